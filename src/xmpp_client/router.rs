//! Inbound read loop: presence/message dispatch and the raw forwarding variant.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::error::XmppError;
use super::stanza::{ClientMessage, ClientPresence, Payload, Stanza};
use super::transport::Reader;

/// Application callbacks. Invoked on the listener task; a slow handler
/// delays every stanza behind it.
pub trait Handler: Send {
    fn recv_message(&mut self, message: &ClientMessage);
    fn recv_presence(&mut self, presence: &ClientPresence);
}

/// Handler that writes every message and presence to the log.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl Handler for LoggingHandler {
    fn recv_message(&mut self, message: &ClientMessage) {
        info!(
            from = %message.from,
            kind = %message.kind,
            body = %message.body,
            composing = message.is_composing(),
            "Message"
        );
    }

    fn recv_presence(&mut self, presence: &ClientPresence) {
        info!(
            from = %presence.from,
            kind = %presence.kind,
            show = %presence.show,
            status = %presence.status,
            "Presence"
        );
    }
}

/// Senders of every presence seen, in arrival order, duplicates included.
#[derive(Debug, Clone, Default)]
pub struct OnlineRoster(Arc<Mutex<Vec<String>>>);

impl OnlineRoster {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn push(&self, jid: String) {
        self.lock().push(jid);
    }

    /// Copy of the list as it is right now.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }
}

/// The receiving direction of an established connection.
pub struct Listener {
    reader: Reader,
    roster: OnlineRoster,
    handler: Option<Box<dyn Handler>>,
}

impl Listener {
    pub(crate) fn new(reader: Reader) -> Self {
        Self {
            reader,
            roster: OnlineRoster::default(),
            handler: None,
        }
    }

    pub fn set_handler(&mut self, handler: Box<dyn Handler>) {
        self.handler = Some(handler);
    }

    /// Shared handle on the online roster, readable while the loop runs.
    pub fn roster(&self) -> OnlineRoster {
        self.roster.clone()
    }

    /// Read and decode the next stanza without dispatching it.
    pub async fn next_stanza(&mut self) -> Result<Stanza, XmppError> {
        self.reader.next_stanza().await
    }

    /// Run until the stream fails. Presence senders go on the roster and to
    /// the handler; messages go to the handler; everything else is dropped.
    pub async fn listen(mut self) -> XmppError {
        loop {
            let stanza = match self.reader.next_stanza().await {
                Ok(stanza) => stanza,
                Err(e) => {
                    info!(error = %e, "Listener stopped");
                    return e;
                }
            };

            match stanza.payload {
                Payload::Presence(presence) => {
                    self.roster.push(presence.from.clone());
                    if let Some(handler) = self.handler.as_mut() {
                        handler.recv_presence(&presence);
                    }
                }
                Payload::Message(message) => {
                    if let Some(handler) = self.handler.as_mut() {
                        handler.recv_message(&message);
                    }
                }
                _ => {
                    trace!(
                        namespace = %stanza.name.namespace,
                        name = %stanza.name.local,
                        "Ignoring stanza"
                    );
                }
            }
        }
    }

    /// Push every decoded stanza into `tx` until the stream fails or the
    /// receiving side is dropped.
    pub async fn forward(mut self, tx: mpsc::Sender<Stanza>) -> Option<XmppError> {
        loop {
            let stanza = match self.reader.next_stanza().await {
                Ok(stanza) => stanza,
                Err(e) => {
                    info!(error = %e, "Forwarder stopped");
                    return Some(e);
                }
            };
            if tx.send(stanza).await.is_err() {
                debug!("Stanza receiver dropped, forwarder stopped");
                return None;
            }
        }
    }
}
