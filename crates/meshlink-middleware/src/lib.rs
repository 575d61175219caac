//! `meshlink-middleware` – pub/sub plumbing between MeshLink and the outside
//! world.
//!
//! Routes messages without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-keyed publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`transport`] – the [`Transport`] trait the bridge core talks to, plus
//!   [`BusTransport`], its in-process implementation over the bus.
//! - [`rosbridge`] – `rosbridge`-style JSON frames (`publish`, `subscribe`,
//!   `unsubscribe`).
//! - [`ws_bridge`] – WebSocket server that exposes bus topics to remote
//!   peers using those frames.

pub mod bus;
pub mod rosbridge;
pub mod transport;
pub mod ws_bridge;

pub use bus::{EventBus, TopicReceiver};
pub use rosbridge::Frame;
pub use transport::{BusTransport, MessageCallback, Subscription, Transport};
pub use ws_bridge::WsBridge;
