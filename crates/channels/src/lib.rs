//! Outbound channel sessions.
//!
//! A channel is one messaging identity backed by an external client that has
//! to be authenticated interactively (for WhatsApp Web, by scanning a QR
//! code) before it can send. [`ChannelRegistry`] owns one [`session`] per
//! channel id and is the only way the rest of herald talks to clients.

pub mod address;
pub mod client;
pub mod error;
pub mod outbound;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    address::normalize_recipient,
    client::{ChannelConfig, ClientEvent, ClientFactory, ClientHandle, MessagingClient},
    error::{Error, Result},
    outbound::ChannelOutbound,
    registry::ChannelRegistry,
    state::{ChannelSnapshot, ChannelState},
    store::SenderStore,
};
