#![forbid(unsafe_code)]

//! Library side of the `roadstore` command-line tool.

/// CSV node import through the staging store.
pub mod import;
