//! Device identity resolution and scoped authorization.
//!
//! Registration goes through [`resolver`], every scoped request through
//! [`gate`]. Uniqueness of hardware ids and credentials is enforced by the
//! registry's transactional indexes, never by a prior read in this module.

pub mod credential;
pub mod gate;
pub mod ownership;
pub mod resolver;

pub use gate::{require_device, resolve_caller, AuthorizedDevice, CallerClaims, GateError};
pub use resolver::{resolve_registration, Registration, Resolution, ResolutionPath};
