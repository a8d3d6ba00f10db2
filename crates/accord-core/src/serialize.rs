use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Serialize to JSON bytes (wire frames)
pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Serialize to JSON string
pub fn to_json<T: Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Serialize to pretty JSON string
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string_pretty(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from JSON string
pub fn from_json<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Deserialize from JSON bytes
pub fn from_json_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Recipient};
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let message = Message::new(
            "agent-a",
            Recipient::one("agent-b"),
            "task.update",
            json!({ "progress": 50 }),
        );

        let bytes = to_json_bytes(&message).unwrap();
        let raw: serde_json::Value = from_json_bytes(&bytes).unwrap();

        assert_eq!(raw["type"], "task.update");
        assert_eq!(raw["to"], "agent-b");
        assert_eq!(raw["priority"], "normal");
        assert_eq!(raw["encrypted"], false);
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result: Result<Message, _> = from_json("{ \"id\": 12");
        assert!(matches!(result, Err(CoreError::Deserialization(_))));
    }
}
