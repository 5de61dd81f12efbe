//! WhatsApp Web messaging client for herald.
//!
//! The browser automation lives in a separate sidecar process. This crate
//! keeps one WebSocket connection to it, multiplexes every channel's login
//! over that connection and implements [`herald_channels::ClientFactory`].

pub mod client;
pub mod connection;
pub mod protocol;

pub use {
    client::{WhatsAppClient, WhatsAppClientFactory},
    connection::SidecarConnection,
    protocol::{GatewayFrame, SidecarFrame},
};
