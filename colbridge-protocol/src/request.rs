use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanConsistency {
    #[default]
    NotBounded,
    RequestPlus,
}

/// A query submitted to the query agent.
///
/// Parameters and raw options are kept JSON encoded, the agent
/// forwards them to the server as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub statement: String,
    pub database_name: Option<String>,
    pub scope_name: Option<String>,
    pub priority: bool,
    pub positional_parameters: Vec<String>,
    pub named_parameters: BTreeMap<String, String>,
    pub read_only: bool,
    pub scan_consistency: ScanConsistency,
    pub raw: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    #[inline]
    pub fn new(statement: impl Into<String>) -> Self {
        QueryRequest {
            statement: statement.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn scope(mut self, database_name: impl Into<String>, scope_name: impl Into<String>) -> Self {
        self.database_name = Some(database_name.into());
        self.scope_name = Some(scope_name.into());
        self
    }

    #[inline]
    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[inline]
    pub fn scan_consistency(mut self, scan_consistency: ScanConsistency) -> Self {
        self.scan_consistency = scan_consistency;
        self
    }

    #[inline]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn positional_parameter<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.positional_parameters.push(serde_json::to_string(value)?);
        Ok(self)
    }

    #[inline]
    pub fn named_parameter<T: Serialize>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.named_parameters
            .insert(name.into(), serde_json::to_string(value)?);
        Ok(self)
    }

    #[inline]
    pub fn raw<T: Serialize>(mut self, key: impl Into<String>, value: &T) -> Result<Self> {
        self.raw.insert(key.into(), serde_json::to_string(value)?);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request() {
        let req = QueryRequest::new("SELECT $1, $name")
            .scope("travel", "inventory")
            .read_only(true)
            .scan_consistency(ScanConsistency::RequestPlus)
            .positional_parameter(&1)
            .unwrap()
            .named_parameter("name", &"alice")
            .unwrap()
            .raw("query_context", &serde_json::json!({"x": [1, 2]}))
            .unwrap();
        assert_eq!(req.positional_parameters, vec!["1".to_string()]);
        assert_eq!(req.named_parameters["name"], "\"alice\"");
        assert_eq!(req.raw["query_context"], r#"{"x":[1,2]}"#);
        assert_eq!(req.database_name.as_deref(), Some("travel"));
        assert!(req.read_only);
        assert!(!req.priority);
        assert!(req.timeout.is_none());
    }
}
