use crate::error::OperationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One call from host to plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: u64,
    pub operation: String,
    #[serde(default)]
    pub arg: Value,
}

/// The plugin's answer to exactly one [`CallRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Serialised as either a `result` or an `error` key next to the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(OperationError),
}

/// Text that may not be valid UTF-8. Valid UTF-8 travels as a JSON string,
/// anything else as an array of byte values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextPayload {
    Utf8(String),
    Bytes(Vec<u8>),
}

impl TextPayload {
    /// Picks the string form whenever the bytes allow it.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => TextPayload::Utf8(text),
            Err(e) => TextPayload::Bytes(e.into_bytes()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TextPayload::Utf8(text) => text.as_bytes(),
            TextPayload::Bytes(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            TextPayload::Utf8(text) => text.into_bytes(),
            TextPayload::Bytes(bytes) => bytes,
        }
    }
}

impl CallRequest {
    pub fn new(id: u64, operation: impl Into<String>, arg: Value) -> Self {
        Self {
            id,
            operation: operation.into(),
            arg,
        }
    }
}

impl CallResponse {
    pub fn ok(id: u64, value: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(value),
        }
    }

    pub fn error(id: u64, error: OperationError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = CallRequest::new(7, "revert", json!("abc"));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"id": 7, "operation": "revert", "arg": "abc"}));
    }

    #[test]
    fn test_request_without_arg_defaults_to_null() {
        let request: CallRequest = serde_json::from_str(r#"{"id":1,"operation":"exit"}"#).unwrap();
        assert_eq!(request.arg, Value::Null);
    }

    #[test]
    fn test_response_result_shape() {
        let response = CallResponse::ok(3, json!("cba"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"id": 3, "result": "cba"}));
    }

    #[test]
    fn test_null_result_is_not_an_error() {
        let parsed: CallResponse = serde_json::from_str(r#"{"id":9,"result":null}"#).unwrap();
        assert_eq!(parsed.outcome, Outcome::Result(Value::Null));
        assert!(!parsed.is_error());
    }

    #[test]
    fn test_response_error_shape() {
        let response = CallResponse::error(4, OperationError::no_such_operation("frobnicate"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], 4);
        assert_eq!(value["error"]["code"], OperationError::NO_SUCH_OPERATION);
        assert!(value.get("result").is_none());

        let parsed: CallResponse = serde_json::from_value(value).unwrap();
        assert!(parsed.is_error());
    }

    #[test]
    fn test_response_without_outcome_is_rejected() {
        assert!(serde_json::from_str::<CallResponse>(r#"{"id":1}"#).is_err());
    }

    #[test]
    fn test_text_payload_forms() {
        let text = TextPayload::from_bytes(b"abc".to_vec());
        assert_eq!(serde_json::to_value(&text).unwrap(), json!("abc"));

        let raw = TextPayload::from_bytes(vec![0xa9, 0xc3]);
        assert_eq!(serde_json::to_value(&raw).unwrap(), json!([0xa9, 0xc3]));

        let parsed: TextPayload = serde_json::from_value(json!([0xa9, 0xc3])).unwrap();
        assert_eq!(parsed.into_bytes(), vec![0xa9, 0xc3]);
        assert!(serde_json::from_value::<TextPayload>(json!([256])).is_err());
        assert!(serde_json::from_value::<TextPayload>(json!(42)).is_err());
    }
}
