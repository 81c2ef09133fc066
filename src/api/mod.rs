//! Boundary surface handed to collaborators: the admin service facade and
//! the error translator.

pub mod error;
pub mod service;

pub use error::{ApiError, ErrorCode};
pub use service::{AdminService, FixRequest};
