//! Router assembly and shared middleware for the control surface.

pub mod middleware;
pub mod router;

pub use router::create_app;
