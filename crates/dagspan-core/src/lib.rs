//! Core value types shared across dagspan.
//!
//! This crate provides the two value types every other dagspan crate speaks:
//!
//! - [`AttributeValue`] and [`Attributes`]: the typed attribute bag carried by spans
//! - [`SerializedData`] and [`Payload`]: the self-describing wire form of logged values
//!
//! # Example
//!
//! ```rust
//! use dagspan_core::{Payload, SerializedData};
//!
//! let wire = SerializedData::encode(&1.23).unwrap();
//! assert_eq!(wire.type_name, "float");
//! assert_eq!(wire.encoding, "json");
//! assert_eq!(wire.decode().unwrap(), Payload::Float(1.23));
//! ```

mod attribute;
mod serialized;

pub use attribute::{AttributeValue, Attributes};
pub use serialized::{CodecError, Payload, SerializedData};
