//! Alfred Core
//!
//! Data types shared between the mock server and the scripting layer:
//! - Mock descriptors
//! - Helper records
//! - HTTP-like request/response pairs
//!
//! All of them are plain serde types. Their JSON field names are the names
//! scripts see.

pub mod helper;
pub mod mock;
pub mod request;

pub use helper::Helper;
pub use mock::Mock;
pub use request::{Request, Response};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
