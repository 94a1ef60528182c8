//! AuthProbe Library
//!
//! Verifies credential documents by running an external verifier binary
//! against them inside a disposable sandbox, and reports whether the
//! credential was accepted and whether the verifier rotated it.

pub mod config;
pub mod metrics;
pub mod probe;
pub mod server;
pub mod tools;
