//! Bridge between an instrumented runtime and its observer.
//!
//! A [`Transport`] sits on each end of a [`Channel`]. It batches outbound
//! events, layers request/response calls and deep inspection on top of
//! one-way delivery, and fans inbound events out to local subscribers.
//! [`TreeReporter`] is the runtime-side entry point adapters drive.

pub mod channel;
pub mod config;
pub mod error;
pub mod reporter;
pub mod subscriptions;
pub mod transport;

pub use channel::{Channel, EnvelopeHandler, LocalChannel};
pub use config::TransportConfig;
pub use error::{BridgeError, BridgeResult};
pub use reporter::{HostHooks, Mutation, NoopHooks, TreeReporter};
pub use subscriptions::{SubscriptionId, Subscriptions};
pub use transport::{CallbackId, Transport, WeakTransport};
