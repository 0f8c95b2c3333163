//! slotwatch
//!
//! Live view over short-notice appointment slots scraped into a Supabase
//! project. Views re-read the store whenever the Realtime feed reports a
//! change on their table, so what they show always comes from an
//! authoritative query rather than from event payloads.

pub mod classify;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod present;
pub mod registrar;
pub mod store;
pub mod view;

use std::sync::Arc;

use log::info;
use reqwest::Client;

use crate::config::{ClientOptions, Config};
use crate::error::Error;
use crate::feed::ChangeFeed;
use crate::registrar::Registrar;
use crate::store::{SlotStore, StoreClient};
use crate::view::{AppointmentsTable, GoldenPanel, LastChecked, LiveView, Mounted};

/// The main entry point
pub struct Slotwatch {
    /// Client options
    pub options: ClientOptions,
    store: Arc<dyn SlotStore>,
    feed: ChangeFeed,
}

impl Slotwatch {
    /// Create a new client for the project at `url` using its anon key
    ///
    /// # Example
    ///
    /// ```
    /// use slotwatch::Slotwatch;
    ///
    /// let slotwatch = Slotwatch::new("https://your-project-url.supabase.co", "your-anon-key");
    /// ```
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, ClientOptions::default())
    }

    /// Create a new client with custom options
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use slotwatch::{Slotwatch, config::ClientOptions};
    ///
    /// let options = ClientOptions::default().with_stale_after(Duration::from_secs(600));
    /// let slotwatch = Slotwatch::new_with_options(
    ///     "https://your-project-url.supabase.co",
    ///     "your-anon-key",
    ///     options
    /// );
    /// ```
    pub fn new_with_options(url: &str, key: &str, options: ClientOptions) -> Self {
        let http_client = Client::new();
        let store = StoreClient::new(url, key, http_client, options.clone());
        let feed = ChangeFeed::new(url, key, &options);
        Self::from_parts(Arc::new(store), feed, options)
    }

    /// Create a client from `SUPABASE_URL` / `SUPABASE_ANON_KEY` (and a `.env` file, if any)
    pub fn from_env() -> Result<Self, Error> {
        let config = Config::from_env()?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self::new_with_options(&config.url, &config.anon_key, config.options)
    }

    /// Assemble a client from an arbitrary store and feed
    pub fn from_parts(store: Arc<dyn SlotStore>, feed: ChangeFeed, options: ClientOptions) -> Self {
        Self {
            options,
            store,
            feed,
        }
    }

    pub fn store(&self) -> Arc<dyn SlotStore> {
        self.store.clone()
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn registrar(&self) -> Registrar {
        Registrar::new(self.store.clone())
    }

    /// Mount the filterable appointments table
    pub async fn appointments_table(&self) -> Mounted<AppointmentsTable> {
        self.mount(AppointmentsTable::new(self.store.clone(), &self.options))
            .await
    }

    /// Mount the short-notice panel
    pub async fn golden_panel(&self) -> Mounted<GoldenPanel> {
        self.mount(GoldenPanel::new(self.store.clone())).await
    }

    /// Mount the last-checked indicator
    pub async fn last_checked(&self) -> Mounted<LastChecked> {
        self.mount(LastChecked::new(self.store.clone(), &self.options))
            .await
    }

    pub async fn mount<V: LiveView>(&self, view: V) -> Mounted<V> {
        info!("Mounting view on {}", view.topic().table());
        Mounted::mount(view, &self.feed).await
    }

    /// Close the change feed; mounted views stop updating
    pub async fn close(&self) -> Result<(), Error> {
        self.feed.close().await
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::{ClientOptions, Config};
    pub use crate::error::{Error, RegistrationError};
    pub use crate::feed::{ChangeFeed, FeedHandle, Topic};
    pub use crate::models::{
        Appointment, AvailabilityFilter, Office, PageSize, RowId, ScrapeRun, SlotType, Subscriber,
        BOOK_URL,
    };
    pub use crate::store::{AppointmentFilter, SlotStore, StoreClient};
    pub use crate::view::{AppointmentsTable, GoldenPanel, LastChecked, LiveView, Mounted};
    pub use crate::Slotwatch;
}
