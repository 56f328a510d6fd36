//! Live entity model for Pulse.
//!
//! Entities are client-side copies of server documents that stay fresh on
//! their own:
//! - [`Store`]: context object; creates entities and owns the push machinery
//! - [`EntityCache`]: weak identity map, one live instance per id
//! - [`Entity`]: property bag, lifecycle flags and deduplicated
//!   `load`/`reset`/`save`/`remove`
//! - [`Backend`]: where documents are fetched from and persisted to
//! - [`Document`]: the wire form of an entity
//!
//! Subscribing an entity registers it with the store's subscription
//! registry. A server-side change then triggers a `reset` of the entity;
//! dropping the last handle to it eventually drops the subscription too.

pub mod backend;
mod cache;
mod document;
mod entity;
mod error;
mod store;

pub use backend::Backend;
pub use cache::EntityCache;
pub use document::Document;
pub use entity::{Entity, EntityEvent, Lifecycle, OpKind, Pending, UPDATE_COUNTER};
pub use error::{BackendError, BackendResult, ModelError, ModelResult};
pub use store::{Store, StoreConfig};

pub use pulse_types::{EntityId, Properties, Version};
