//! Shared wire definitions for the two ends of a lookglass channel.
//!
//! Responsibilities:
//! - modelling the values that live inside an instrumented runtime ([`Live`])
//! - the bounded-cost proxy codec ([`sanitize`] / [`hydrate`])
//! - the tagged envelope union carried by every channel ([`Envelope`])
//! - node records produced by runtime adapters ([`NodeRecord`])
//!
//! Keeping this in a dedicated crate means both the runtime side and the
//! observer side agree on the JSON shape without pulling in tokio.

pub mod codec;
pub mod envelope;
pub mod events;
pub mod hydrated;
pub mod live;
pub mod node;
pub mod path;

pub use codec::{
    MAX_DEPTH, OPAQUE_FRAGMENT_TEXT, STRING_LIMIT, Sanitized, hydrate, sanitize, sanitize_at,
};
pub use envelope::{
    Envelope, EventFrame, WireError, WireResult, decode_envelope, encode_envelope,
};
pub use hydrated::{Hydrated, Marker, PROTO_KEY, Proxy};
pub use live::{Live, LiveArray, LiveFunction, LiveObject};
pub use node::{Capabilities, ChildList, ExternalHandle, NodeKind, NodeRecord, field};
pub use path::{Path, PathSegment, format_path};
