//! Typed access to `tools/call` arguments.
//!
//! MCP clients are loose about types: ids arrive as strings or numbers,
//! booleans sometimes as strings. Everything is normalised here so tool
//! bodies only see validated values.

use crate::protocol::ToolError;
use dmcp_core::Snowflake;
use serde_json::{Map, Value};

#[derive(Debug, Default)]
pub struct Args {
    values: Map<String, Value>,
}

impl Args {
    pub fn from_value(value: Value) -> Result<Self, ToolError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            other => Err(ToolError::invalid(format!(
                "arguments must be an object, got {}",
                other
            ))),
        }
    }

    fn present(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Blank strings count as absent.
    pub fn opt_string(&self, key: &str) -> Option<String> {
        match self.present(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Result<String, ToolError> {
        self.opt_string(key)
            .ok_or_else(|| ToolError::invalid(format!("missing required argument '{}'", key)))
    }

    pub fn snowflake(&self, key: &str) -> Result<Snowflake, ToolError> {
        Ok(Snowflake::parse_field(key, &self.string(key)?)?)
    }

    pub fn opt_snowflake(&self, key: &str) -> Result<Option<Snowflake>, ToolError> {
        self.opt_string(key)
            .map(|raw| Snowflake::parse_field(key, &raw))
            .transpose()
            .map_err(ToolError::from)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.present(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => default,
            },
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
            _ => default,
        }
    }

    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        self.present(key).map(|_| self.bool_or(key, false))
    }

    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>, ToolError> {
        let Some(value) = self.present(key) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if s.trim().is_empty() => return Ok(None),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(f) if f.is_finite() => Ok(Some(f)),
            _ => Err(ToolError::invalid(format!("'{}' must be a number", key))),
        }
    }

    /// Fractions are truncated.
    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>, ToolError> {
        match self.opt_f64(key)? {
            None => Ok(None),
            Some(f) if f < 0.0 => Err(ToolError::invalid(format!(
                "'{}' must not be negative",
                key
            ))),
            Some(f) => Ok(Some(f as u64)),
        }
    }

    pub fn string_list(&self, key: &str) -> Result<Vec<String>, ToolError> {
        match self.present(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(ToolError::invalid(format!(
                        "'{}' must contain only strings, got {}",
                        key, other
                    ))),
                })
                .collect(),
            Some(_) => Err(ToolError::invalid(format!("'{}' must be an array", key))),
            None => Err(ToolError::invalid(format!(
                "missing required argument '{}'",
                key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Args {
        Args::from_value(value).expect("object")
    }

    #[test]
    fn ids_accept_strings_and_numbers() {
        let a = args(json!({"channel_id": "1234", "user_id": 42}));
        assert_eq!(a.snowflake("channel_id").expect("id").get(), 1234);
        assert_eq!(a.snowflake("user_id").expect("id").get(), 42);
    }

    #[test]
    fn malformed_id_names_the_field() {
        let err = args(json!({"channel_id": "general"}))
            .snowflake("channel_id")
            .expect_err("not numeric");
        assert!(err.to_string().contains("channel_id"));
    }

    #[test]
    fn blank_and_null_are_absent() {
        let a = args(json!({"since_message_id": "  ", "sender_id": null}));
        assert!(a.opt_snowflake("since_message_id").expect("ok").is_none());
        assert!(a.opt_snowflake("sender_id").expect("ok").is_none());
        assert!(a.string("since_message_id").is_err());
    }

    #[test]
    fn booleans_are_lenient() {
        let a = args(json!({"a": true, "b": "false", "c": 1, "d": "maybe"}));
        assert!(a.bool_or("a", false));
        assert!(!a.bool_or("b", true));
        assert!(a.bool_or("c", false));
        assert!(a.bool_or("d", true));
        assert!(a.bool_or("missing", true));
        assert_eq!(a.opt_bool("missing"), None);
        assert_eq!(a.opt_bool("b"), Some(false));
    }

    #[test]
    fn numbers_parse_from_strings() {
        let a = args(json!({"limit": "25", "timeout": 0.5, "bad": "x", "neg": -1}));
        assert_eq!(a.opt_u64("limit").expect("ok"), Some(25));
        assert_eq!(a.opt_f64("timeout").expect("ok"), Some(0.5));
        assert!(a.opt_u64("bad").is_err());
        assert!(a.opt_u64("neg").is_err());
        assert_eq!(a.opt_u64("missing").expect("ok"), None);
    }

    #[test]
    fn string_lists_reject_mixed_items() {
        let a = args(json!({"emojis": ["👍", "🎉"], "mixed": ["👍", 1]}));
        assert_eq!(a.string_list("emojis").expect("list"), vec!["👍", "🎉"]);
        assert!(a.string_list("mixed").is_err());
        assert!(a.string_list("missing").is_err());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(Args::from_value(json!([1, 2])).is_err());
        assert!(Args::from_value(Value::Null).is_ok());
    }
}
