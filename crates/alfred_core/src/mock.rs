//! Mock descriptors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One mocked endpoint, as loaded from a mock file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mock {
    pub name: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Function file attached to this mock, if any.
    pub function: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_mock_uses_defaults() {
        let mock: Mock = serde_json::from_str(r#"{"name":"users","url":"/users"}"#).unwrap();
        assert_eq!(mock.name, "users");
        assert_eq!(mock.url, "/users");
        assert_eq!(mock.status, 0);
        assert!(mock.headers.is_empty());
        assert!(mock.function.is_none());
    }
}
