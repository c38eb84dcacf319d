//! Standard listener set wired to every newly discovered instance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;

use crate::clock;
use crate::constants::TOPIC_INSTANCE;
use crate::hub::BroadcastHub;
use crate::instance::{InstanceEvent, ManagedInstance};
use crate::notify::{Notice, Notifier};
use crate::restart::{RestartPolicy, auto_restart};

pub(crate) struct ListenerSet {
    hub: Arc<BroadcastHub>,
    notifier: Arc<dyn Notifier>,
    online_window: Duration,
    restart: RestartPolicy,
}

impl ListenerSet {
    pub(crate) fn new(
        hub: Arc<BroadcastHub>,
        notifier: Arc<dyn Notifier>,
        online_window: Duration,
        restart: RestartPolicy,
    ) -> Self {
        Self {
            hub,
            notifier,
            online_window,
            restart,
        }
    }

    /// Spawns the instance's listener task. It ends when the instance is retired or dropped.
    pub(crate) fn attach(self: &Arc<Self>, instance: &Arc<ManagedInstance>) {
        let mut events = instance.subscribe();
        let token = instance.lifecycle_token().clone();
        let weak = Arc::downgrade(instance);
        let listeners = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    r = events.recv() => r,
                };
                let Some(instance) = weak.upgrade() else {
                    break;
                };
                match received {
                    Ok(event) => listeners.handle(&instance, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(instance = %instance.id(), skipped, "listener lagged");
                        listeners.publish(&instance);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    pub(crate) async fn handle(&self, instance: &Arc<ManagedInstance>, event: InstanceEvent) {
        match event {
            InstanceEvent::StatusChanged { .. } => {}
            InstanceEvent::PowerChanged { new: true, .. } => {
                instance.seed_expiration(clock::after(Utc::now(), self.online_window));
                tracing::info!(instance = %instance.id(), "instance is online");
                self.notifier
                    .notify(Notice::InstanceOnline {
                        instance: instance.label(),
                        expires_at: instance.expires_at(),
                    })
                    .await;
            }
            InstanceEvent::PowerChanged { new: false, .. } => {
                tracing::warn!(instance = %instance.id(), "instance is offline");
                if let Some(expires_at) = instance.expires_at()
                    && expires_at > Utc::now()
                {
                    tokio::spawn(auto_restart(
                        Arc::clone(instance),
                        expires_at,
                        self.restart,
                        Arc::clone(&self.notifier),
                    ));
                }
            }
        }
        self.publish(instance);
    }

    fn publish(&self, instance: &ManagedInstance) {
        self.hub.broadcast(TOPIC_INSTANCE, &instance.to_snapshot());
    }
}
