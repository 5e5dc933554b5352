//! HTTP control surface of the gateway lifecycle manager.
//!
//! Defines the JSON API, the pre-shared key middleware and the server router.

pub mod api;
pub mod auth;
pub mod server;

pub use server::*;
