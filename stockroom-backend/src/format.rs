//! Value serialization for cache stores.

use serde::{Serialize, de::DeserializeOwned};
use stockroom_core::Raw;
use thiserror::Error;

/// Serialization or deserialization failure.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The value could not be encoded.
    #[error(transparent)]
    Serialize(Box<dyn std::error::Error + Send + Sync>),

    /// Stored bytes did not decode into the requested type.
    #[error(transparent)]
    Deserialize(Box<dyn std::error::Error + Send + Sync>),
}

/// JSON format, the default for stored values.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl JsonFormat {
    /// Serializes `value` into raw bytes.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Raw, FormatError> {
        serde_json::to_vec(value)
            .map(Raw::from)
            .map_err(|e| FormatError::Serialize(Box::new(e)))
    }

    /// Deserializes raw bytes into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, FormatError> {
        serde_json::from_slice(data).map_err(|e| FormatError::Deserialize(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Product {
        handle: String,
        price: u32,
    }

    #[test]
    fn mismatched_shape_is_a_deserialize_error() {
        let raw = JsonFormat.serialize(&vec![1, 2, 3]).unwrap();
        let err = JsonFormat.deserialize::<Product>(&raw).unwrap_err();
        assert!(matches!(err, FormatError::Deserialize(_)));
    }

    #[test]
    fn serializes_as_json_text() {
        let product = Product {
            handle: "shirt".into(),
            price: 20,
        };
        let raw = JsonFormat.serialize(&product).unwrap();
        assert_eq!(&raw[..], br#"{"handle":"shirt","price":20}"#);
        assert_eq!(JsonFormat.deserialize::<Product>(&raw).unwrap(), product);
    }
}
