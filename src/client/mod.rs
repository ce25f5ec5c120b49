//! Device-side helpers: the local identity cache and an HTTP client that uses it.

pub mod cache;
pub mod http;

pub use cache::{CachedIdentity, IdentityCache};
pub use http::DeviceClient;
