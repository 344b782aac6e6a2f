//! Template resolution — `{{action.field}}` placeholders inside action
//! arguments, resolved against session memory at execution time.
//!
//! References usually name a real sibling action id; when the planner
//! invented a label instead, ordered heuristics map it onto a completed
//! sibling's stored result. Unresolvable references are left verbatim.
//! Resolution is read-only with respect to the plan store and memory
//! contents (reads do bump access counters).

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use aris_domain::config::ToolsConfig;
use aris_domain::plan::{ActionStatus, ActionType, ExecutionPlan, PlannedAction};
use aris_store::MemoryStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TemplateResolver<'a> {
    pub plan: &'a ExecutionPlan,
    pub memory: &'a MemoryStore,
    pub session_id: &'a str,
    pub tools: &'a ToolsConfig,
}

impl<'a> TemplateResolver<'a> {
    /// Resolve every template reference in `arguments`, recursing into
    /// nested objects and lists. Strings without references pass through
    /// untouched.
    pub async fn resolve(&self, arguments: &Value) -> Value {
        let refs = collect_refs(arguments);
        if refs.is_empty() {
            return arguments.clone();
        }

        let mut replacements: HashMap<String, String> = HashMap::new();
        for reference in refs {
            match self.resolve_ref(&reference).await {
                Some(replacement) => {
                    tracing::debug!(reference = %reference, bytes = replacement.len(), "resolved template");
                    replacements.insert(reference, replacement);
                }
                None => {
                    tracing::warn!(reference = %reference, "could not resolve template reference, leaving verbatim");
                }
            }
        }

        substitute(arguments, &replacements)
    }

    /// Resolve one `action_ref.field.path` reference to its replacement
    /// string.
    async fn resolve_ref(&self, reference: &str) -> Option<String> {
        let parts: Vec<&str> = reference.split('.').collect();
        if parts.len() < 2 {
            return None;
        }
        let action_ref = parts[0];
        let field_path = &parts[1..];

        // 1. A real sibling id with a stored result wins outright.
        let stored = if self.plan.action(action_ref).is_some() {
            self.fetch(action_ref).await
        } else {
            None
        };

        // 2. Otherwise the reference is a planner-invented label; map it
        //    onto a completed sibling via the ordered heuristics.
        let stored = match stored {
            Some(v) => Some(v),
            None => self.heuristic_lookup(action_ref, field_path).await,
        };
        let stored = stored?;

        render_replacement(&stored, field_path)
    }

    async fn fetch(&self, action_id: &str) -> Option<Value> {
        self.memory
            .get(self.session_id, &format!("tool_result_{action_id}"))
            .await
            .ok()
            .flatten()
    }

    /// Ordered label heuristics over completed siblings:
    /// document tools for url-ish paths, then structured-data tools,
    /// then analysis results, then anything completed.
    async fn heuristic_lookup(&self, label: &str, field_path: &[&str]) -> Option<Value> {
        let wants_url = field_path.contains(&"file_url") || field_path.contains(&"url");

        if wants_url {
            if let Some(value) = self
                .first_completed(|a| {
                    a.action_type == ActionType::ToolCall
                        && a.tool_name.as_deref().is_some_and(|t| self.tools.is_document_tool(t))
                })
                .await
            {
                tracing::debug!(label, "mapped url template onto document tool result");
                return Some(value);
            }
        }

        if let Some(value) = self
            .first_completed(|a| {
                a.action_type == ActionType::ToolCall
                    && a.tool_name.as_deref().is_some_and(|t| self.tools.is_data_tool(t))
            })
            .await
        {
            tracing::debug!(label, "mapped template onto data tool result");
            return Some(value);
        }

        if let Some(value) = self.first_completed(|a| a.action_type == ActionType::Analysis).await {
            tracing::debug!(label, "mapped template onto analysis result");
            return Some(value);
        }

        let value = self.first_completed(|_| true).await;
        if value.is_some() {
            tracing::debug!(label, "mapped template onto first completed action result");
        }
        value
    }

    async fn first_completed<F>(&self, predicate: F) -> Option<Value>
    where
        F: Fn(&PlannedAction) -> bool,
    {
        for action in &self.plan.actions {
            if action.status == ActionStatus::Completed && predicate(action) {
                if let Some(value) = self.fetch(&action.action_id).await {
                    return Some(value);
                }
            }
        }
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn template_regex() -> Regex {
    // The pattern is a literal; construction cannot fail.
    Regex::new(r"\{\{([^}]+)\}\}").expect("template pattern is valid")
}

/// Collect all distinct template references inside a JSON value.
fn collect_refs(value: &Value) -> Vec<String> {
    let re = template_regex();
    let mut refs = Vec::new();
    walk_strings(value, &mut |s| {
        for capture in re.captures_iter(s) {
            let reference = capture[1].trim().to_owned();
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }
    });
    refs
}

fn walk_strings(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().for_each(|v| walk_strings(v, f)),
        Value::Object(map) => map.values().for_each(|v| walk_strings(v, f)),
        _ => {}
    }
}

/// Navigate a stored result along the field path and render the
/// replacement string. Falls back to analysis `formatted_content` and
/// whole-result serialization for bare `.result` paths.
fn render_replacement(stored: &Value, field_path: &[&str]) -> Option<String> {
    if let Some(target) = navigate(stored, field_path) {
        return Some(stringify(target));
    }

    if field_path == ["result"] {
        if let Some(formatted) = stored.get("formatted_content").and_then(Value::as_str) {
            return Some(formatted.to_owned());
        }
        if stored.is_object() {
            return Some(stringify(stored));
        }
    }
    None
}

fn navigate<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    let mut current = value;
    for field in path {
        current = current.as_object()?.get(*field)?;
    }
    Some(current)
}

/// Strings substitute as-is; everything else as pretty JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Replace resolved references throughout the JSON value; unresolved
/// ones stay verbatim.
fn substitute(value: &Value, replacements: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => {
            if !s.contains("{{") {
                return value.clone();
            }
            let mut out = s.clone();
            for (reference, replacement) in replacements {
                out = out.replace(&format!("{{{{{reference}}}}}"), replacement);
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, replacements)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, replacements)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
