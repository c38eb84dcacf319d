//! Broadcast hub: best-effort fan-out of `{topic, payload}` envelopes.
//!
//! No buffering or replay. A client that subscribes after an event never sees it, and a
//! failing client never blocks delivery to the others.

pub mod error;


use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use error::DeliveryError;

/// Identifier of a subscribed transport client.
pub type ClientId = Uuid;

/// Message delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// A connected transport (WebSocket session, SSE stream, ...).
///
/// `deliver` must not block; slow clients should report [`DeliveryError::Backpressure`].
pub trait TransportClient: Send + Sync {
    fn deliver(&self, envelope: Arc<Envelope>) -> Result<(), DeliveryError>;
}

/// Transport backed by a bounded tokio channel.
pub struct ChannelClient {
    tx: mpsc::Sender<Arc<Envelope>>,
    released: CancellationToken,
}

impl ChannelClient {
    pub fn new(tx: mpsc::Sender<Arc<Envelope>>) -> Self {
        Self {
            tx,
            released: CancellationToken::new(),
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.released.cancel();
    }
}

impl TransportClient for ChannelClient {
    fn deliver(&self, envelope: Arc<Envelope>) -> Result<(), DeliveryError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Closed(_) => DeliveryError::Closed,
            TrySendError::Full(_) => DeliveryError::Backpressure,
        })
    }
}

/// Set of subscribed clients.
#[derive(Default)]
pub struct BroadcastHub {
    clients: RwLock<HashMap<ClientId, Arc<dyn TransportClient>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `client` under `id`. Returns `false` if `id` was already subscribed.
    pub fn subscribe(&self, id: ClientId, client: Arc<dyn TransportClient>) -> bool {
        let mut clients = self.clients.write();
        if clients.contains_key(&id) {
            return false;
        }
        clients.insert(id, client);
        tracing::debug!(client = %id, "hub client subscribed");
        true
    }

    /// Removes `id`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: &ClientId) -> bool {
        let removed = self.clients.write().remove(id).is_some();
        if removed {
            tracing::debug!(client = %id, "hub client unsubscribed");
        }
        removed
    }

    pub fn is_subscribed(&self, id: &ClientId) -> bool {
        self.clients.read().contains_key(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Subscribes a channel-backed client and returns its receiving end.
    ///
    /// The subscription is dropped as soon as the receiver is dropped. Must be called from
    /// within a tokio runtime.
    pub fn connect(self: &Arc<Self>, capacity: usize) -> (ClientId, mpsc::Receiver<Arc<Envelope>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = Uuid::new_v4();
        let watch = tx.clone();
        let client = ChannelClient::new(tx);
        let released = client.released.clone();
        self.subscribe(id, Arc::new(client));

        // Holds a sender clone, so it must also exit once the hub lets go of the client.
        let hub: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = watch.closed() => {
                    if let Some(hub) = hub.upgrade() {
                        hub.unsubscribe(&id);
                    }
                }
                _ = released.cancelled() => {}
            }
        });

        (id, rx)
    }

    /// Sends `payload` on `topic` to every client and returns how many accepted it.
    ///
    /// Clients whose transport is closed are removed.
    pub fn broadcast<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(topic, error = %e, "failed to serialize broadcast payload");
                return 0;
            }
        };
        let envelope = Arc::new(Envelope {
            topic: topic.to_string(),
            payload,
        });

        let targets: Vec<(ClientId, Arc<dyn TransportClient>)> = self
            .clients
            .read()
            .iter()
            .map(|(id, c)| (*id, Arc::clone(c)))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, client) in targets {
            match client.deliver(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Closed) => closed.push(id),
                Err(e) => tracing::warn!(client = %id, topic, error = %e, "delivery failed"),
            }
        }

        if !closed.is_empty() {
            let mut clients = self.clients.write();
            for id in &closed {
                clients.remove(id);
            }
            tracing::debug!(removed = closed.len(), "dropped closed hub clients");
        }

        delivered
    }

    /// Drops every subscription; channel clients see their stream end.
    pub fn close_all(&self) {
        let count = {
            let mut clients = self.clients.write();
            let n = clients.len();
            clients.clear();
            n
        };
        if count > 0 {
            tracing::info!(clients = count, "closed all hub clients");
        }
    }
}
