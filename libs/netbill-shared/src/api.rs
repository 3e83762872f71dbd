use serde::{Deserialize, Serialize};

/// `{status, message}` envelope returned by state-changing endpoints that
/// have no resource to echo back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEnvelope {
    pub status: String,
    pub message: String,
}

impl StatusEnvelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
        }
    }
}

/// Error body emitted by every failing request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

/// Cursor page used by append-only logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_omits_empty_fields() {
        let body = ErrorBody {
            error: "forbidden".into(),
            message: None,
            features: vec![],
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"forbidden"}"#);
    }
}
