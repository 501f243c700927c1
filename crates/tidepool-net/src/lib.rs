//! Join protocol wire format and transport.
//!
//! This crate implements Tidepool's join-path network layer:
//!
//! - [`frame`]: frame-based message layout (fixed initial frame, variable
//!   frames, null markers, nested structures).
//! - [`codec`]: fixed-offset and variable field codecs.
//! - [`JoinMessage`]: the join handshake messages.
//! - [`TcpTransport`] / [`JoinListener`]: TCP request/response on top.

pub mod codec;
mod error;
pub mod frame;
mod message;
mod transport;

pub use error::NetError;
pub use frame::{Frame, FrameMessage, MAX_MESSAGE_SIZE};
pub use message::{
    JOIN_ACCEPT_MESSAGE_TYPE, JOIN_PENDING_MESSAGE_TYPE, JOIN_REDIRECT_MESSAGE_TYPE,
    JOIN_REJECT_MESSAGE_TYPE, JOIN_REQUEST_MESSAGE_TYPE, JoinMessage, JoinRequest,
    PROTOCOL_VERSION,
};
pub use transport::{
    DEFAULT_IDLE_TIMEOUT, JoinListener, TcpChannel, TcpTransport, read_message, write_message,
};

use tidepool_types::Address;

/// Trait abstracting how the join handshake reaches a candidate.
///
/// This allows substituting a scripted transport in tests (no sockets, and
/// full control over accept / reject / redirect / silence).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to a candidate address.
    async fn connect(&self, addr: &Address) -> Result<Box<dyn Channel>, NetError>;
}

/// An established connection to one candidate.
#[async_trait::async_trait]
pub trait Channel: Send {
    /// Send a message and wait for the matching response.
    ///
    /// No timeout is applied here; callers bound the wait themselves.
    async fn request(&mut self, message: &JoinMessage) -> Result<JoinMessage, NetError>;
}
