//! Push notifications for Pulse live entities.
//!
//! Keeps cached entities fresh by listening to server-side change counters.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Protocol**: Text fragments and frames exchanged with the server
//! - **Transport**: Abstracts over the duplex connection (WebSocket, mock)
//! - **Channel**: Reconnecting connection that batches outbound fragments
//! - **Registry**: Per-id subscription records and inbound dispatch
//! - **Watch**: Drops subscriptions whose owner has been reclaimed
//!
//! ## Flow
//!
//! 1. **Subscribe**: the registry stores a record and queues `+id=version`
//! 2. **Flush**: the channel sends queued fragments as one frame once open
//! 3. **Notify**: the server pushes `id=version` pairs
//! 4. **Dispatch**: the registry calls the record's invalidation callback
//! 5. **Cleanup**: explicit `unsubscribe`, or the watch once the owner is gone
//!
//! # Example
//!
//! ```
//! use pulse_sync::{ChannelConfig, Fragment};
//! use pulse_types::EntityId;
//!
//! let config = ChannelConfig::new("wss://example.org/ccus");
//! assert!(config.validate().is_ok());
//!
//! let fragment = Fragment::subscribe(EntityId::new("ex:1"), 0);
//! assert_eq!(fragment.to_string(), "+ex:1=0");
//! ```

pub mod channel;
mod error;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod watch;
pub mod ws;

pub use channel::{
    ChannelConfig, ConnectionState, FrameHandler, Outbox, PushChannel, DEFAULT_ENDPOINT,
};
pub use error::{SyncError, SyncResult};
pub use protocol::{
    decode_frame, decode_outbound, decode_pair, encode_frame, Fragment, InboundPair,
    Notification,
};
pub use registry::{OnUpdate, SubscriptionRegistry};
pub use transport::{Connector, FrameSink, FrameStream, Link};
pub use watch::{ManualWatch, OnUnreachable, ReachabilityWatch, SweepWatch, WeakTarget};
pub use ws::WsConnector;
