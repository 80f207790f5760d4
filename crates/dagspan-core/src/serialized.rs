//! Self-describing wire form for values logged from a task run.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENCODING_UTF8: &str = "utf-8";
const ENCODING_JSON: &str = "json";
const ENCODING_BASE64: &str = "base64";

/// Errors at the encode/decode boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot encode an absent value")]
    NoValue,

    #[error("unsupported value: {0}")]
    Unsupported(String),

    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("unknown type {type_name} for encoding {encoding}")]
    UnknownType { type_name: String, encoding: String },

    #[error("content does not match type {0}")]
    TypeMismatch(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A decoded value.
///
/// Serializes untagged, so exported records show the plain value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i64),
    Float(f64),
    List(Vec<serde_json::Value>),
    Dict(serde_json::Map<String, serde_json::Value>),
}

impl Payload {
    /// Type tag written to the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Text(_) => "utf-8",
            Payload::Bytes(_) => "bytes",
            Payload::Bool(_) => "bool",
            Payload::Int(_) => "int",
            Payload::Float(_) => "float",
            Payload::List(_) => "list",
            Payload::Dict(_) => "dict",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Classifies a JSON value. `null` has no payload form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, CodecError> {
        use serde_json::Value;

        match value {
            Value::Null => Err(CodecError::NoValue),
            Value::Bool(b) => Ok(Payload::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Payload::Int(i))
                } else if n.is_u64() {
                    Err(CodecError::Unsupported(format!("integer {} out of range", n)))
                } else {
                    n.as_f64()
                        .map(Payload::Float)
                        .ok_or_else(|| CodecError::Unsupported(n.to_string()))
                }
            }
            Value::String(s) => Ok(Payload::Text(s)),
            Value::Array(items) => Ok(Payload::List(items)),
            Value::Object(map) => Ok(Payload::Dict(map)),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// A (type, encoding, content) triple as attached to `artefact` and
/// `named-value` spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedData {
    #[serde(rename = "type")]
    pub type_name: String,
    pub encoding: String,
    pub encoded_content: String,
}

impl SerializedData {
    pub fn new(
        type_name: impl Into<String>,
        encoding: impl Into<String>,
        encoded_content: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            encoding: encoding.into(),
            encoded_content: encoded_content.into(),
        }
    }

    /// Encodes any serializable value.
    ///
    /// Fails for values without a payload form: `None`/unit, maps with
    /// non-string keys, integers beyond `i64`, non-finite floats.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        let json =
            serde_json::to_value(value).map_err(|e| CodecError::Unsupported(e.to_string()))?;
        Self::encode_payload(&Payload::from_json(json)?)
    }

    /// Encodes raw bytes as base64.
    pub fn encode_bytes(bytes: &[u8]) -> Self {
        Self::new("bytes", ENCODING_BASE64, STANDARD.encode(bytes))
    }

    pub fn encode_payload(payload: &Payload) -> Result<Self, CodecError> {
        let type_name = payload.type_name();
        let content = match payload {
            Payload::Text(s) => return Ok(Self::new(type_name, ENCODING_UTF8, s.clone())),
            Payload::Bytes(b) => return Ok(Self::encode_bytes(b)),
            Payload::Bool(b) => serde_json::to_string(b)?,
            Payload::Int(i) => serde_json::to_string(i)?,
            Payload::Float(f) => {
                if !f.is_finite() {
                    return Err(CodecError::Unsupported(format!("non-finite float {}", f)));
                }
                serde_json::to_string(f)?
            }
            Payload::List(items) => serde_json::to_string(items)?,
            Payload::Dict(map) => serde_json::to_string(map)?,
        };
        Ok(Self::new(type_name, ENCODING_JSON, content))
    }

    /// Inverse of [`SerializedData::encode`].
    pub fn decode(&self) -> Result<Payload, CodecError> {
        match self.encoding.as_str() {
            ENCODING_UTF8 => Ok(Payload::Text(self.encoded_content.clone())),
            ENCODING_BASE64 => Ok(Payload::Bytes(STANDARD.decode(&self.encoded_content)?)),
            ENCODING_JSON => self.decode_json(),
            other => Err(CodecError::UnknownEncoding(other.to_string())),
        }
    }

    fn decode_json(&self) -> Result<Payload, CodecError> {
        let content = self.encoded_content.as_str();
        let mismatch = || CodecError::TypeMismatch(self.type_name.clone());

        match self.type_name.as_str() {
            "bool" => Ok(Payload::Bool(serde_json::from_str(content)?)),
            "int" => Ok(Payload::Int(serde_json::from_str(content)?)),
            "float" => Ok(Payload::Float(serde_json::from_str(content)?)),
            "list" => match serde_json::from_str(content)? {
                serde_json::Value::Array(items) => Ok(Payload::List(items)),
                _ => Err(mismatch()),
            },
            "dict" => match serde_json::from_str(content)? {
                serde_json::Value::Object(map) => Ok(Payload::Dict(map)),
                _ => Err(mismatch()),
            },
            other => Err(CodecError::UnknownType {
                type_name: other.to_string(),
                encoding: self.encoding.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_explicit_wire_examples() {
        assert_eq!(
            SerializedData::encode("foo").unwrap(),
            SerializedData::new("utf-8", "utf-8", "foo")
        );
        assert_eq!(
            SerializedData::encode(&123).unwrap(),
            SerializedData::new("int", "json", "123")
        );
        assert_eq!(
            SerializedData::encode_bytes(&[0, 1, 2, 3, 4, 5]),
            SerializedData::new("bytes", "base64", "AAECAwQF")
        );

        assert_eq!(
            SerializedData::new("bytes", "base64", "AAECAwQF").decode().unwrap(),
            Payload::Bytes(vec![0, 1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn test_decode_inverts_encode() {
        let large: Vec<u8> = (0..1000).flat_map(|_| 0..=255u8).collect();
        let payloads = vec![
            Payload::from("test-text-message"),
            Payload::Bytes(vec![0, 1, 2, 3]),
            Payload::Bytes(large),
            Payload::Bool(true),
            Payload::Float(1.23),
            Payload::Float(1.0),
            Payload::Int(1_000_000),
            Payload::Int(-7),
            Payload::List(vec![serde_json::json!(1), serde_json::json!("two")]),
            Payload::Dict(
                serde_json::json!({"a": 1, "b": [true, null]})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        ];

        for payload in payloads {
            let wire = SerializedData::encode_payload(&payload).unwrap();
            assert_eq!(wire.type_name, payload.type_name());
            assert_eq!(wire.decode().unwrap(), payload);
        }
    }

    #[test]
    fn test_encode_classifies_serde_values() {
        assert_eq!(SerializedData::encode(&true).unwrap().type_name, "bool");
        assert_eq!(SerializedData::encode(&1.23).unwrap().type_name, "float");
        assert_eq!(SerializedData::encode(&vec![1, 2]).unwrap().type_name, "list");

        let mut map = HashMap::new();
        map.insert("k", 1);
        let wire = SerializedData::encode(&map).unwrap();
        assert_eq!(wire.type_name, "dict");
        assert_eq!(wire.encoded_content, r#"{"k":1}"#);
    }

    #[test]
    fn test_encode_rejects_unsupported_values() {
        assert!(matches!(
            SerializedData::encode(&Option::<i32>::None),
            Err(CodecError::NoValue)
        ));
        assert!(matches!(SerializedData::encode(&()), Err(CodecError::NoValue)));

        // maps keyed by non-strings have no JSON form
        let mut opaque = HashMap::new();
        opaque.insert((1, 2), "x");
        assert!(matches!(
            SerializedData::encode(&opaque),
            Err(CodecError::Unsupported(_))
        ));

        assert!(SerializedData::encode(&u64::MAX).is_err());
        assert!(SerializedData::encode_payload(&Payload::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_encoding() {
        let wire = SerializedData::new("string", "utf8", "should be 'utf-8'");
        assert!(matches!(wire.decode(), Err(CodecError::UnknownEncoding(e)) if e == "utf8"));

        let wire = SerializedData::new("tuple", "json", "[1]");
        assert!(matches!(wire.decode(), Err(CodecError::UnknownType { .. })));

        let wire = SerializedData::new("dict", "json", "[1]");
        assert!(matches!(wire.decode(), Err(CodecError::TypeMismatch(_))));
    }

    #[test]
    fn test_wire_shape() {
        let wire = SerializedData::new("int", "json", "1");
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            serde_json::json!({"type": "int", "encoding": "json", "encoded_content": "1"})
        );
    }
}
