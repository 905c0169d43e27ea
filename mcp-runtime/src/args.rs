//! Typed access to `tools/call` arguments.
//!
//! Missing keys and JSON `null` are the same thing. Blank strings count as
//! absent for optional text and as an error for required text.

use buildlog_core::OutcomeStatus;
use serde_json::{Map, Value};

use crate::ToolError;

#[derive(Clone, Copy)]
pub(crate) struct ToolArgs<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> ToolArgs<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|value| !value.is_null())
    }

    fn invalid(key: &str, expected: &str) -> ToolError {
        ToolError::validation(format!("'{key}' must be {expected}")).with_field(key)
    }

    fn missing(key: &str) -> ToolError {
        ToolError::validation(format!("Missing required field '{key}'")).with_field(key)
    }

    /// Required, non-blank text. Prompt content is kept verbatim.
    pub fn text(&self, key: &str) -> Result<String, ToolError> {
        match self.get(key) {
            None => Err(Self::missing(key)),
            Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
            Some(Value::String(_)) => Err(Self::invalid(key, "non-empty")),
            Some(_) => Err(Self::invalid(key, "a string")),
        }
    }

    pub fn optional_text(&self, key: &str) -> Result<Option<String>, ToolError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(_) => Err(Self::invalid(key, "a string")),
        }
    }

    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ToolError> {
        match self.get(key) {
            None => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(Self::invalid(key, "a boolean")),
        }
    }

    /// Result-count limit. `0` falls back to `default`.
    pub fn limit(&self, key: &str, default: u64) -> Result<u64, ToolError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match whole_number(value) {
                Some(0) => Ok(default),
                Some(limit) => Ok(limit),
                None => Err(Self::invalid(key, "a positive integer")),
            },
        }
    }

    /// 1-indexed step number as used by `follow.step` and `fork.fromStep`.
    pub fn step_number(&self, key: &str) -> Result<Option<usize>, ToolError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        match whole_number(value) {
            Some(0) => Err(Self::invalid(key, "a step number of 1 or more (steps are 1-indexed)")),
            Some(step) => Ok(Some(step as usize)),
            None => Err(Self::invalid(key, "a step number")),
        }
    }

    /// File paths and similar lists. Blank entries are dropped.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, ToolError> {
        let Some(value) = self.get(key) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| Self::invalid(key, "an array of strings"))?;
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) if text.trim().is_empty() => None,
                Value::String(text) => Some(Ok(text.trim().to_string())),
                _ => Some(Err(Self::invalid(key, "an array of strings"))),
            })
            .collect()
    }

    pub fn object(&self, key: &str) -> Result<Option<&'a Map<String, Value>>, ToolError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(Self::invalid(key, "an object")),
        }
    }

    pub fn outcome(&self, key: &str) -> Result<Option<OutcomeStatus>, ToolError> {
        self.optional_text(key)?
            .map(|raw| {
                OutcomeStatus::parse(&raw)
                    .ok_or_else(|| Self::invalid(key, "one of: success, partial, failure"))
            })
            .transpose()
    }

    /// The document object handed to `buildlog_upload`, untouched.
    pub fn document(&self, key: &str) -> Result<&'a Map<String, Value>, ToolError> {
        self.object(key)?.ok_or_else(|| {
            Self::missing(key).with_docs_hint("Pass the buildlog returned by buildlog_record_stop.")
        })
    }
}

/// Non-negative integer, accepting integral floats such as `3.0`.
fn whole_number(value: &Value) -> Option<u64> {
    let Value::Number(number) = value else {
        return None;
    };
    number.as_u64().or_else(|| {
        number
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}
