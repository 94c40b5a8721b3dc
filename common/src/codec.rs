use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is neither a tag string nor a single-key object")]
    Untagged,
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

pub fn parse_frame(text: &str) -> Result<Value, CodecError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(value)?)
}

/// The variant tag of a raw frame: the bare string of a unit variant, or the
/// only key of a payload variant.
pub fn frame_key(value: &Value) -> Result<&str, CodecError> {
    match value {
        Value::String(tag) => Ok(tag),
        Value::Object(map) if map.len() == 1 => {
            map.keys().next().map(String::as_str).ok_or(CodecError::Untagged)
        }
        _ => Err(CodecError::Untagged),
    }
}
