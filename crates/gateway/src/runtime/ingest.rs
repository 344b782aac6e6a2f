//! Document ingestion collaborator boundary.
//!
//! The ingestion pipeline itself (parsers, OCR, chunking) lives in a
//! separate service; the orchestrator only needs a textual context for
//! the referenced document plus an advisory notice for the client.

use async_trait::async_trait;

use aris_domain::error::{Error, Result};
use aris_domain::frame::DocumentNotice;

/// What ingestion hands back for one document reference.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    /// Advisory frame payload for the client.
    pub notice: DocumentNotice,
    /// Textual rendition prepended to the user message for planning.
    pub context_text: String,
}

#[async_trait]
pub trait DocumentIngestor: Send + Sync {
    /// Produce a textual context for the object at `bucket`/`key`.
    async fn ingest(&self, bucket: &str, key: &str) -> Result<IngestedDocument>;
}

/// Default collaborator when no ingestion service is wired up: every
/// document reference fails with an actionable message and the turn
/// continues without document context.
pub struct DisabledIngestor;

#[async_trait]
impl DocumentIngestor for DisabledIngestor {
    async fn ingest(&self, bucket: &str, key: &str) -> Result<IngestedDocument> {
        Err(Error::Other(format!(
            "document ingestion is not configured (requested {bucket}/{key})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_ingestor_reports_reference() {
        let err = DisabledIngestor.ingest("docs", "report.pdf").await.unwrap_err();
        assert!(err.to_string().contains("docs/report.pdf"));
    }
}
