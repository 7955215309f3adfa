//! Built-in operations.

use super::registry::{Operation, Reply};
use crate::error::OperationError;
use crate::protocol::TextPayload;
use async_trait::async_trait;
use serde_json::Value;

pub const REVERT: &str = "revert";
pub const EXIT: &str = "exit";

/// Reverses the bytes of its input.
///
/// Reversal is byte-wise, not codepoint- or grapheme-aware: multi-byte
/// characters come back with their bytes swapped and the result is usually
/// not UTF-8. Applying it twice always restores the input.
pub fn revert(input: &[u8]) -> Vec<u8> {
    let mut bytes = input.to_vec();
    bytes.reverse();
    bytes
}

/// Takes a string (or the byte-array form of a previous result) and replies
/// with the reversed bytes, as a string when they are valid UTF-8.
pub struct Revert;

#[async_trait]
impl Operation for Revert {
    async fn call(&self, arg: Value) -> Result<Reply, OperationError> {
        let input: TextPayload = serde_json::from_value(arg).map_err(|_| {
            OperationError::invalid_argument("revert expects a string or an array of bytes")
        })?;
        let reversed = TextPayload::from_bytes(revert(input.as_bytes()));
        serde_json::to_value(reversed)
            .map(Reply::value)
            .map_err(|e| OperationError::failed(e.to_string()))
    }
}

/// Ignores its argument, replies `null` and ends the serve loop.
pub struct Exit;

#[async_trait]
impl Operation for Exit {
    async fn call(&self, _arg: Value) -> Result<Reply, OperationError> {
        tracing::info!("Exit requested by host");
        Ok(Reply::shutdown(Value::Null))
    }
}
