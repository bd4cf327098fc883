//! Path variable substitution for storage templates and persisted state.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use scopestore_core::traits::PathSubstitutor;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Macro naming the root directory of the scope that owns a store
pub const SCOPE_DIR_MACRO: &str = "SCOPE_DIR";

/// Macro naming the root directory of the project scope
pub const PROJECT_DIR_MACRO: &str = "PROJECT_DIR";

static MACRO_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\$").expect("macro pattern is valid"));

/// Table-driven substitutor that remembers unresolved references.
#[derive(Debug, Default)]
pub struct MacroSubstitutor {
    macros: BTreeMap<String, String>,
    unknown: Mutex<BTreeSet<String>>,
}

impl MacroSubstitutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitutor for a scope rooted at `scope_dir`
    pub fn for_scope(scope_dir: &Path) -> Self {
        Self::new().with_macro(SCOPE_DIR_MACRO, scope_dir)
    }

    /// Add a macro; trailing separators of `path` are dropped
    pub fn with_macro(mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let value = path.as_ref().to_string_lossy();
        let value = value.trim_end_matches('/');
        let value = if value.is_empty() { "/" } else { value };
        self.macros.insert(name.into(), value.to_string());
        self
    }

    /// Value of a macro
    pub fn macro_value(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(|v| v.as_str())
    }

    /// Replace occurrences of `value` that end at a path boundary
    fn replace_at_boundaries(text: &str, value: &str, replacement: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(pos) = rest.find(value) {
            let end = pos + value.len();
            let at_boundary = value.ends_with('/')
                || rest[end..]
                    .chars()
                    .next()
                    .is_none_or(|c| c == '/' || c == '\\');
            out.push_str(&rest[..pos]);
            if at_boundary {
                out.push_str(replacement);
            } else {
                out.push_str(value);
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        out
    }
}

impl PathSubstitutor for MacroSubstitutor {
    fn expand_path(&self, text: &str) -> String {
        MACRO_REFERENCE
            .replace_all(text, |caps: &Captures<'_>| match self.macros.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    debug!("Unknown path macro: {}", &caps[1]);
                    self.unknown.lock().insert(caps[1].to_string());
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    fn collapse_path(&self, text: &str) -> String {
        let mut by_length: Vec<(&String, &String)> = self.macros.iter().collect();
        by_length.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

        let mut result = text.to_string();
        for (name, value) in by_length {
            if result.contains(value.as_str()) {
                result = Self::replace_at_boundaries(&result, value, &format!("${}$", name));
            }
        }
        result
    }

    fn unknown_macros(&self) -> BTreeSet<String> {
        self.unknown.lock().clone()
    }

    fn reset_unknown_macros(&self) {
        self.unknown.lock().clear();
    }
}

/// Apply `f` to every string inside a JSON value
fn map_strings(value: Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, map_strings(v, f)))
                .collect(),
        ),
        other => other,
    }
}

/// Collapse known paths in every string of a component state
pub fn collapse_value(substitutor: Option<&dyn PathSubstitutor>, value: Value) -> Value {
    match substitutor {
        Some(sub) => map_strings(value, &|s| sub.collapse_path(s)),
        None => value,
    }
}

/// Expand macro references in every string of a component state
pub fn expand_value(substitutor: Option<&dyn PathSubstitutor>, value: Value) -> Value {
    match substitutor {
        Some(sub) => map_strings(value, &|s| sub.expand_path(s)),
        None => value,
    }
}
