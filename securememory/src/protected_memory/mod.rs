//! Protected memory implementation of Secret
//!
//! The memory protection state transitions of a [`ProtectedMemorySecret`] are:
//!
//! ```text
//! Initial state: NoAccess (locked, excluded from core dumps)
//!      |
//!      | (first concurrent reader enters access)
//!      v
//!    ReadOnly
//!      |
//!      | (last concurrent reader leaves access)
//!      v
//!    NoAccess
//!      |
//!      | (close, after readers drain)
//!      v
//!    ReadWrite -> zeroed -> unlocked -> unmapped
//! ```

pub mod factory;
mod pages;
pub mod secret;

pub use factory::DefaultSecretFactory;
pub use secret::ProtectedMemorySecret;
