#![forbid(unsafe_code)]

//! Archive administration: inspection and integrity verification.
//!
//! Both entry points work on a closed archive file and never modify it.

mod error;
mod inspect;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Header, metadata, and stream table of an archive.
pub use inspect::{inspect, InspectReport};

/// Archive integrity verification.
///
/// Verifies the structural integrity of an archive and reports any issues found.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};
