//! Shared networking infrastructure.

pub mod client;
pub mod traits;
pub mod transport;
pub mod wire;

pub use client::{HttpClient, HttpClientBuilder};
pub use traits::Transport;
pub use transport::{HttpTransport, OutgoingRequest, classify_message};
pub use wire::{RequestEnvelope, ResponseEnvelope, WireError};
