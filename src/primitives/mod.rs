//! Low-level primitives the token index is built on.
//!
//! Includes byte encoders and the I/O seams to the storage layer.

/// Byte-level utilities and encoding/decoding.
///
/// Order-preserving integer encoders and a bounds-checked parsing cursor.
pub mod bytes;

/// I/O abstractions and utilities.
///
/// Random-access byte sources and sequential sink helpers.
pub mod io;
