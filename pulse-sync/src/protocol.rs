//! Push protocol fragments and frames.
//!
//! The push protocol is plain text:
//! - outbound subscribe fragment: `+<id>=<version>`
//! - outbound unsubscribe fragment: `-<id>`
//! - outbound frame: fragments joined with `,` (`+ex:1=0,-ex:2`)
//! - inbound frame: optional leading `=`, then `<id>=<version>` pairs joined
//!   with `,` (`ex:1=5,ex:2=3`)
//!
//! Delivery is best-effort: the server may push an update before it has seen
//! the matching subscribe, and such an update is not redelivered.

use crate::error::{SyncError, SyncResult};
use pulse_types::{EntityId, Version};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Separator between fragments (outbound) and pairs (inbound).
pub const SEPARATOR: char = ',';

/// Separator between an id and its version.
pub const VERSION_SEPARATOR: char = '=';

/// A single outbound protocol instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Start receiving updates for `id`, given the version we already hold.
    Subscribe { id: EntityId, version: Version },
    /// Stop receiving updates for `id`.
    Unsubscribe { id: EntityId },
}

impl Fragment {
    /// Creates a subscribe fragment.
    pub fn subscribe(id: EntityId, version: Version) -> Self {
        Self::Subscribe { id, version }
    }

    /// Creates an unsubscribe fragment.
    pub fn unsubscribe(id: EntityId) -> Self {
        Self::Unsubscribe { id }
    }

    /// The entity the fragment refers to.
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Subscribe { id, .. } | Self::Unsubscribe { id } => id,
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe { id, version } => write!(f, "+{id}{VERSION_SEPARATOR}{version}"),
            Self::Unsubscribe { id } => write!(f, "-{id}"),
        }
    }
}

impl FromStr for Fragment {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix('+') {
            let n = decode_pair(rest)?;
            Ok(Self::subscribe(n.id, n.version))
        } else if let Some(rest) = s.strip_prefix('-') {
            if rest.is_empty() {
                return Err(SyncError::Protocol("unsubscribe without id".into()));
            }
            Ok(Self::unsubscribe(EntityId::new(rest)))
        } else {
            Err(SyncError::Protocol(format!("unknown fragment: {s:?}")))
        }
    }
}

/// Joins encoded fragments into one outbound frame.
pub fn encode_frame<S: AsRef<str>>(fragments: &[S]) -> String {
    let mut frame = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 {
            frame.push(SEPARATOR);
        }
        frame.push_str(fragment.as_ref());
    }
    frame
}

/// Splits an outbound frame back into fragments.
pub fn decode_outbound(frame: &str) -> SyncResult<Vec<Fragment>> {
    if frame.is_empty() {
        return Ok(Vec::new());
    }
    frame.split(SEPARATOR).map(str::parse).collect()
}

/// A server-side update: `id` is now at `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: EntityId,
    pub version: Version,
}

/// One pair of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPair {
    /// A well-formed update.
    Update(Notification),
    /// A pair naming an id whose version could not be read.
    Malformed { id: EntityId, reason: String },
}

impl InboundPair {
    /// The entity the pair refers to.
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Update(n) => &n.id,
            Self::Malformed { id, .. } => id,
        }
    }
}

/// Parses a single `<id>=<version>` pair.
pub fn decode_pair(pair: &str) -> SyncResult<Notification> {
    let (id, version) = pair
        .split_once(VERSION_SEPARATOR)
        .ok_or_else(|| SyncError::Protocol(format!("missing version in {pair:?}")))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(SyncError::Protocol(format!("missing id in {pair:?}")));
    }
    let version = version
        .trim()
        .parse::<Version>()
        .map_err(|e| SyncError::Protocol(format!("bad version in {pair:?}: {e}")))?;
    Ok(Notification {
        id: EntityId::new(id),
        version,
    })
}

/// Parses an inbound frame. Never fails: pairs without an id are dropped,
/// pairs with an id but no readable version come back as
/// [`InboundPair::Malformed`].
pub fn decode_frame(frame: &str) -> Vec<InboundPair> {
    let body = frame.strip_prefix(VERSION_SEPARATOR).unwrap_or(frame);
    if body.trim().is_empty() {
        return Vec::new();
    }

    let mut pairs = Vec::new();
    for raw in body.split(SEPARATOR) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match decode_pair(raw) {
            Ok(n) => pairs.push(InboundPair::Update(n)),
            Err(e) => {
                let id = raw.split(VERSION_SEPARATOR).next().unwrap_or("").trim();
                if id.is_empty() {
                    debug!("Dropping pair without id: {:?}", raw);
                    continue;
                }
                pairs.push(InboundPair::Malformed {
                    id: EntityId::new(id),
                    reason: e.to_string(),
                });
            }
        }
    }
    pairs
}
