//! Incoming join handler for the Tidepool daemon.
//!
//! Wires a [`JoinResponder`] to the [`JoinListener`] accept loop: every
//! decoded message is passed to the responder and its reply written back.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tidepool_cluster::JoinResponder;
use tidepool_net::{JoinListener, JoinMessage};
use tidepool_types::Address;
use tokio::sync::watch;
use tracing::debug;

/// Handles incoming join connections.
#[derive(Clone)]
pub struct JoinHandler {
    responder: JoinResponder,
    /// Requests answered so far.
    handled: Arc<AtomicU64>,
}

impl fmt::Debug for JoinHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandler")
            .field("handled", &self.handled())
            .finish_non_exhaustive()
    }
}

impl JoinHandler {
    pub fn new(responder: JoinResponder) -> Self {
        Self {
            responder,
            handled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of messages that received a reply.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Answer one message from `remote`.
    pub async fn handle(self, message: JoinMessage, remote: Address) -> Option<JoinMessage> {
        debug!(%remote, kind = message.kind(), "incoming join message");
        let reply = self.responder.handle(message).await;
        if let Some(reply) = &reply {
            self.handled.fetch_add(1, Ordering::Relaxed);
            debug!(%remote, kind = reply.kind(), "answering join message");
        }
        reply
    }

    /// Serve `listener` until `shutdown` flips.
    pub async fn serve(self, listener: JoinListener, shutdown: watch::Receiver<bool>) {
        listener
            .serve(
                move |message, remote| self.clone().handle(message, remote),
                shutdown,
            )
            .await;
    }
}
