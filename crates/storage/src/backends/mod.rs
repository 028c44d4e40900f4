//! Byte store backends.

pub mod filesystem;
