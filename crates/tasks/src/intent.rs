use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Well-known context field names shared by the builder and its callers.
pub mod keys {
    pub const FILE: &str = "file";
    pub const LINE_START: &str = "line_start";
    pub const LINE_END: &str = "line_end";
    pub const DESCRIPTION: &str = "description";
    pub const CATEGORY: &str = "category";
    pub const REFERENCES: &str = "references";
    pub const PR_NUMBER: &str = "pr_number";
    pub const BACKUP_PATH: &str = "backup_path";
    pub const REPLACEMENT: &str = "replacement";
}

/// Operation kinds the remote agent can be asked to perform on a feature
/// toggle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IntentKind {
    /// Delete the toggle and the code it gates.
    Remove,
    /// Bring back a previously removed toggle.
    Restore,
    /// Keep the ON behavior, delete the toggle itself.
    MakePermanent,
    /// Substitute the toggle with a fixed replacement.
    Replace,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Remove => "remove",
            IntentKind::Restore => "restore",
            IntentKind::MakePermanent => "make-permanent",
            IntentKind::Replace => "replace",
        }
    }

    /// Branch prefix used in rendered instructions ("recover"/"enable"
    /// rather than the intent name, matching the dashboard's git history).
    pub fn branch_prefix(&self) -> &'static str {
        match self {
            IntentKind::Remove => "remove",
            IntentKind::Restore => "recover",
            IntentKind::MakePermanent => "enable",
            IntentKind::Replace => "replace",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do, and to which named target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIntent {
    pub kind: IntentKind,
    pub target: String,
}

impl TaskIntent {
    pub fn new(kind: IntentKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }
}

/// String-keyed parameter record the instruction is rendered from.
///
/// Backed by a `BTreeMap` so any enumeration of the fields is in a stable
/// order, which keeps rendered instructions byte-identical across calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskContext(BTreeMap<String, Value>);

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(|v| v.as_u64())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_kind_serde_kebab_case() {
        assert_eq!(
            serde_json::to_string(&IntentKind::MakePermanent).unwrap(),
            "\"make-permanent\""
        );
        let parsed: IntentKind = serde_json::from_str("\"restore\"").unwrap();
        assert_eq!(parsed, IntentKind::Restore);
    }

    #[test]
    fn test_branch_prefixes() {
        assert_eq!(IntentKind::Remove.branch_prefix(), "remove");
        assert_eq!(IntentKind::Restore.branch_prefix(), "recover");
        assert_eq!(IntentKind::MakePermanent.branch_prefix(), "enable");
        assert_eq!(IntentKind::Replace.branch_prefix(), "replace");
    }

    #[test]
    fn test_context_typed_accessors() {
        let ctx = TaskContext::new()
            .with(keys::FILE, "src/mods.js")
            .with(keys::LINE_START, 10u64)
            .with(keys::REFERENCES, 3u64);
        assert_eq!(ctx.str_field(keys::FILE), Some("src/mods.js"));
        assert_eq!(ctx.u64_field(keys::LINE_START), Some(10));
        // Wrong type reads as absent.
        assert_eq!(ctx.u64_field(keys::FILE), None);
        assert_eq!(ctx.str_field(keys::LINE_START), None);
        assert_eq!(ctx.str_field("missing"), None);
    }

    #[test]
    fn test_context_into_value_is_object() {
        let ctx = TaskContext::new().with(keys::FILE, "a.js");
        assert_eq!(ctx.into_value(), json!({"file": "a.js"}));
    }
}
