//! Authorization: durable token store and request validation
//!
//! Two concerns live here. The [`LocalAuthStore`] persists both sides of the
//! token handshake: the gateway's own client/token records per plugin service
//! (used when provisioning plugin access), and the grants issued to external
//! callers through the authorization profile. The [`AccessValidator`] applies
//! the security pipeline to incoming requests: origin first, then the caller
//! access token.

mod store;
mod validator;

pub use store::{AuthRecord, CallerToken, IssuedToken, LocalAuthStore};
pub use validator::{AccessValidator, ANONYMOUS_ORIGIN};
