//! Low-level primitives shared by the storage, cache, and staging layers.

/// Byte-level utilities and encoding/decoding.
///
/// Little-endian fixed-width fields, varints, and a fallible read cursor.
pub mod bytes;

/// I/O abstractions and utilities.
///
/// Positioned reads/writes and the temp-file + rename commit protocol.
pub mod io;
