use anyhow::Result;
use async_trait::async_trait;
use nostr::{Event, Filter};
use nostr_dm_engine::{
    Error as EngineError, RelayPool, Result as EngineResult, Subscription, Unsubscribe,
};
use nostr_sdk::{Client, EventSource, RelayPoolNotification, SubscriptionId};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::Settings;

pub(crate) async fn connect_client(settings: &Settings) -> Result<Client> {
    let client = Client::default();
    for relay in settings.relays() {
        client.add_relay(relay).await?;
    }
    client.connect().await;
    Ok(client)
}

/// Engine relay-pool seam backed by the nostr-sdk client.
pub(crate) struct SdkRelayPool {
    client: Client,
}

impl SdkRelayPool {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RelayPool for SdkRelayPool {
    async fn query(&self, filters: Vec<Filter>, timeout: Duration) -> EngineResult<Vec<Event>> {
        let events = self
            .client
            .get_events_of(filters, EventSource::relays(Some(timeout)))
            .await
            .map_err(|e| EngineError::Relay(e.to_string()))?;
        Ok(events.into_iter().collect())
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> EngineResult<Subscription> {
        let subid = SubscriptionId::generate();
        // Grab the notifications stream before subscribing so backfilled
        // events the relay pushes immediately are not lost.
        let mut notifications = self.client.notifications();
        self.client
            .subscribe_with_id(subid.clone(), filters.clone(), None)
            .await
            .map_err(|e| EngineError::Relay(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        let forward = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(RelayPoolNotification::Event { event, .. }) => {
                        if filters.iter().any(|f| f.match_event(&event)) {
                            if tx.send((*event).clone()).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let client = self.client.clone();
        let close_id = subid.clone();
        let unsubscribe: Unsubscribe = Box::new(move || {
            forward.abort();
            tokio::spawn(async move {
                client.unsubscribe(close_id).await;
            });
        });

        Ok(Subscription::new(subid.to_string(), rx, Some(unsubscribe)))
    }

    async fn publish(&self, event: Event) -> EngineResult<()> {
        self.client
            .send_event(event)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Publish(e.to_string()))
    }
}
