//! # Quarry Codec
//!
//! Document value model and encodings for Quarry.
//!
//! - [`Value`] and [`Document`]: the dynamically typed data that
//!   collections store and pipelines transform
//! - [`Value::compare`]: the total order used by sorting, grouping and
//!   comparison operators
//! - [`NumericType`]: the `Int < Long < Double` widening lattice
//! - CBOR encoding via `ciborium` for stored documents and descriptors
//! - JSON conversion for the command line and tests
//!
//! ## Usage
//!
//! ```
//! use quarry_codec::{Decode, Document, Encode, Value};
//!
//! let doc = Document::from_json_str(r#"{"name": "ada", "age": 36}"#).unwrap();
//! assert_eq!(doc.get("age"), Some(&Value::Int(36)));
//!
//! let bytes = doc.encode().unwrap();
//! assert_eq!(Document::decode(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod json;
mod value;

pub use document::Document;
pub use error::{CodecError, CodecResult};
pub use value::{format_date, NumericType, OrderedValue, Value, ValueType};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable type as CBOR.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decodes CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are malformed or do
/// not describe a `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Trait for types that can be encoded to CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Document {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Document {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            Just(Value::Undefined),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::Int),
            any::<i64>().prop_map(Value::Long),
            (-1.0e9..1.0e9f64).prop_map(Value::Double),
            "[a-z]{0,8}".prop_map(Value::String),
            any::<i64>().prop_map(Value::Date),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-z]{1,4}", inner), 0..4)
                    .prop_map(|fields| Value::Document(fields.into_iter().collect())),
            ]
        })
    }

    #[test]
    fn document_survives_cbor() {
        let doc = Document::new()
            .with("_id", "x1")
            .with("n", Value::Long(9))
            .with("tags", Value::Array(vec![Value::from("a"), Value::Null]));
        let bytes = doc.encode().unwrap();
        assert_eq!(Document::decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            Document::decode(&[0xff, 0x00, 0x13]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    proptest! {
        #[test]
        fn cbor_preserves_values(value in arb_value()) {
            let bytes = value.encode().unwrap();
            let decoded = Value::decode(&bytes).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn compare_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
        }
    }
}
