//! Shared primitives for the tenantgate services.
//!
//! This crate provides:
//! - Constant-time verification of the pre-shared control key
//! - The secret envelope cipher used for tenant database credentials
//! - Random key generation for operators
#![expect(
    clippy::missing_errors_doc,
    reason = "The situation it maps to errors should be obvious."
)]

mod cipher;
mod key;
mod secrets;

pub use cipher::*;
pub use key::*;
pub use secrets::*;
