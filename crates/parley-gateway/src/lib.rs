//! Parley gateway: the client side of the realtime push connection.
//!
//! - One shared connection per process, owned by the composition root
//! - Exponential backoff on connect and on reconnect
//! - Per-kind handler registry, invoked in registration order
//! - Connection state and lifecycle signals pushed to observers
//! - `Resynced` broadcast after every successful reconnect

pub mod backoff;
pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod transport;

pub use backoff::Backoff;
pub use bus::{BusSignal, ConnectionState, EventBus, Subscription};
pub use error::GatewayError;
pub use transport::{Link, Peer, Transport, WsConfig, WsTransport};
