//! N-central REST API module
//!
//! Authentication, paged listings and record creation against one server,
//! SOAP user creation, plus the scope-bound [`ScopedClient`] the engines
//! talk to.

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod permissions;
pub mod resilience;
pub mod scoped;
pub mod soap;

pub use client::{ClientOptions, NcClient, normalize_base_url};
pub use error::{ClientError, ClientErrorKind};
pub use resilience::ResilienceConfig;
pub use scoped::ScopedClient;
