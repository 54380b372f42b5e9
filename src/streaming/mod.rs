//! Duplex channel to the streaming speech-recognition backend
//!
//! # Architecture
//!
//! ```text
//! StreamingClient ──emit──▶ Channel ──commands──▶ I/O task ──▶ WebSocket / long-polling
//!        ▲                                            │
//!        └────────────── ChannelEvent stream ◀────────┘
//! ```
//!
//! The session only depends on the [`Transport`]/[`Channel`] traits, so the
//! built-in [`SocketIoTransport`] can be swapped for any other implementation.

mod channel;
pub mod protocol;
mod socketio;

pub use channel::{
    Channel, ChannelError, ChannelEvent, ConnectRequest, Emit, EventReceiver, OpenedChannel,
    Transport, TransportKind,
};
pub use socketio::SocketIoTransport;
