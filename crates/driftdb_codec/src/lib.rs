//! # DriftDB Codec
//!
//! Value types and byte encodings shared by every DriftDB crate.
//!
//! This crate provides:
//! - [`ByteString`], an immutable, cheaply cloned, lexicographically ordered
//!   byte sequence (resume tokens, session tokens, blobs)
//! - [`Value`], the typed document field value with its canonical
//!   cross-type ordering
//! - [`OrderedCodeWriter`] / [`OrderedCodeReader`], self-delimiting
//!   order-preserving encodings of bytes, strings and doubles
//! - [`IndexByteEncoder`], which turns values into index keys whose byte
//!   order matches value order, ascending or descending
//! - CBOR record serialization used by the commit log
//!
//! ## Usage
//!
//! ```
//! use driftdb_codec::{encode_index_value, IndexKind, Value};
//!
//! let a = encode_index_value(&Value::Integer(-1), IndexKind::Ascending);
//! let b = encode_index_value(&Value::Integer(1), IndexKind::Ascending);
//! assert!(a < b);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod byte_string;
mod error;
mod index;
mod ordered;
mod path;
mod record;
mod timestamp;
mod value;

pub use byte_string::ByteString;
pub use error::{CodecError, CodecResult};
pub use index::{
    encode_index_value, write_index_value, DirectionalEncoder, DirectionalIndexByteEncoder,
    IndexByteEncoder, IndexKind,
};
pub use ordered::{from_ordered_bits, ordered_bits, OrderedCodeReader, OrderedCodeWriter};
pub use path::ResourcePath;
pub use record::{decode_record, encode_record};
pub use timestamp::{GeoPoint, Timestamp};
pub use value::{compare_doubles, compare_integer_to_double, TypeOrder, Value};
