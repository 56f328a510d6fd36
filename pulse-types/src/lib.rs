//! Core type definitions for Pulse.
//!
//! This crate defines the small, transport-agnostic types shared by the
//! push channel and the entity model:
//! - [`EntityId`]: URI-like entity identity, plus client-side id minting
//! - [`Version`]: the server's per-entity update counter
//! - [`PropertyBag`]: an ordered property map that reports every mutation
//!   to its observers

mod ids;
mod props;

pub use ids::{EntityId, Version, GENERATED_PREFIX};
pub use props::{Observer, Properties, PropertyBag, PropertyChange};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid entity id: {0}")]
    InvalidId(String),
}
