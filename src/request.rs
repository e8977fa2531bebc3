//! GraphQL request bodies built from fixture records.
//!
//! A [`RequestTemplate`] holds the GraphQL document and an optional variables
//! template. String values in the template may reference record fields with
//! `${field}`. A value that is exactly one placeholder takes the record's
//! JSON value as-is (numbers stay numbers); placeholders embedded in longer
//! strings are replaced textually. Without a variables template, the
//! record's fields are passed through as the variables.

use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::data_source::Record;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("placeholder pattern is valid")
    })
}

/// GraphQL document plus variables template.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub query: String,
    pub variables: Option<Map<String, Value>>,
}

impl RequestTemplate {
    /// Template that forwards every record field as a variable.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Resolve the variables object for one record.
    pub fn variables_for(&self, record: &Record) -> Map<String, Value> {
        match &self.variables {
            Some(template) => template
                .iter()
                .map(|(name, value)| (name.clone(), substitute(value, record)))
                .collect(),
            None => record.clone(),
        }
    }

    /// Build the `{"query": ..., "variables": {...}}` body for one record.
    pub fn build_body(&self, record: &Record) -> Value {
        json!({
            "query": self.query,
            "variables": Value::Object(self.variables_for(record)),
        })
    }
}

fn substitute(value: &Value, record: &Record) -> Value {
    match value {
        Value::String(s) => substitute_str(s, record),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, record)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, record)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(s: &str, record: &Record) -> Value {
    let re = placeholder_regex();

    // Whole-value placeholder keeps the record value's JSON type.
    if let Some(caps) = re.captures(s) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
            if let Some(found) = record.get(&caps[1]) {
                return found.clone();
            }
        }
    }

    let replaced = re.replace_all(s, |caps: &Captures<'_>| match record.get(&caps[1]) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}
