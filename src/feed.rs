//! Change feed over the store's tables.

use log::{debug, info};
use slotwatch_realtime::{
    ChangeNotice, ConnectionState, DatabaseChanges, EventMask, RealtimeClient, Subscription,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::ClientOptions;
use crate::error::Error;
use crate::store::{APPOINTMENTS_TABLE, SCRAPE_RUNS_TABLE};

/// Tables a view can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Appointments,
    ScrapeRuns,
}

impl Topic {
    pub fn table(&self) -> &'static str {
        match self {
            Topic::Appointments => APPOINTMENTS_TABLE,
            Topic::ScrapeRuns => SCRAPE_RUNS_TABLE,
        }
    }
}

/// Shared change feed. Clones share one connection.
#[derive(Clone)]
pub struct ChangeFeed {
    client: RealtimeClient,
    schema: String,
}

impl ChangeFeed {
    pub fn new(url: &str, key: &str, options: &ClientOptions) -> Self {
        Self::from_client(
            RealtimeClient::new_with_options(url, key, options.realtime.clone()),
            &options.db_schema,
        )
    }

    pub fn from_client(client: RealtimeClient, schema: &str) -> Self {
        Self {
            client,
            schema: schema.to_string(),
        }
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    pub async fn state(&self) -> ConnectionState {
        self.client.get_connection_state().await
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.client.on_state_change()
    }

    /// Calls `on_change` for every committed change on `topic` matching `mask`,
    /// and once more after each reconnect.
    ///
    /// Each call gets its own channel, so several subscribers can follow the
    /// same table independently. The returned handle releases the channel
    /// when dropped.
    pub async fn subscribe<F>(
        &self,
        topic: Topic,
        mask: EventMask,
        on_change: F,
    ) -> Result<FeedHandle, Error>
    where
        F: Fn(ChangeNotice) + Send + Sync + 'static,
    {
        let name = format!("{}-{}", topic.table(), Uuid::new_v4().simple());
        let changes = DatabaseChanges::new(topic.table())
            .schema(&self.schema)
            .events(mask);

        let subscription = self.client.channel(&name).on(changes, on_change).subscribe().await?;
        info!("Subscribed to {} changes on {}", topic.table(), subscription.topic());
        Ok(FeedHandle {
            topic,
            subscription,
        })
    }

    /// Closes the connection for every subscriber.
    pub async fn close(&self) -> Result<(), Error> {
        debug!("Closing change feed");
        Ok(self.client.disconnect().await?)
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct FeedHandle {
    topic: Topic,
    subscription: Subscription,
}

impl FeedHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    /// Releases the channel. Calling it again does nothing.
    pub async fn unsubscribe(&self) -> Result<(), Error> {
        Ok(self.subscription.unsubscribe().await?)
    }
}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle")
            .field("topic", &self.topic)
            .field("channel", &self.subscription.topic())
            .field("active", &self.is_active())
            .finish()
    }
}
