//! # Virtual-Pin MQTT Client for Embedded Systems
//!
//! `vpin-mqtt` lets a device exchange small typed values with an MQTT
//! broker through short "virtual pin" channel ids (`P0`, `P1`, ...) instead
//! of full topic paths.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Every buffer is a fixed-capacity `heapless`
//!   type. Anything that does not fit is rejected with
//!   [`Error::CapacityExceeded`] rather than truncated.
//! - **Tick-driven:** The host calls [`Client::run`] from its main loop.
//!   There are no threads and no async suspension; reconnects, heartbeats
//!   and scheduled tasks all advance from that one call.
//! - **Two transports, one state machine:** Port 8883 runs a native MQTT
//!   client over TLS, port 8884 runs MQTT over WebSocket binary frames
//!   using this crate's own [packet codec](packet). Both plug in through
//!   the [`Session`] trait.
//! - **Self-healing:** Link loss, refused credentials and broker timeouts
//!   are retried with a throttled backoff and counted in [`Diagnostics`],
//!   never surfaced as failures of `write`.
//!
//! ## Topics
//!
//! A channel maps to
//! `{project}/users/{user}/datastreams/{device}/{channel}`; the reserved
//! `status` channel carries `{"s":1,"t":<unix time>}` heartbeats.
//!
//! ## Logging
//!
//! Enable one of the `log`, `defmt` or `esp32-log` features to get state
//! transitions and dropped frames reported through that backend.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod framed;
pub mod packet;
pub mod runtime;
pub mod time;
pub mod topic;
pub mod transport;
pub mod util;
pub mod value;

// Re-export key types for easier access at the crate root.
pub use client::Client;
pub use config::{ClientConfig, TimeSyncPolicy};
pub use connection::{ConnectionState, Diagnostics};
pub use error::{ConnectReasonCode, Error};
pub use framed::FramedSession;
pub use runtime::{Context, ReceiveFn, TaskFn, WriteHandle, WriteQueue};
pub use time::TimeSource;
pub use topic::TopicRouter;
pub use transport::{
    AnySession, Credentials, FrameLink, Handshake, Session, SessionEvent, TransportKind,
};
pub use value::{ToPayload, Value};
