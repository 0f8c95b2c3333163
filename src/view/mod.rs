//! Live views over the store.
//!
//! Each view owns its state behind one lock; every mutation (filter edit,
//! feed refresh, fetch completion, paging) goes through it and publishes a
//! fresh snapshot on a watch channel. Fetches run in spawned tasks and are
//! tagged with a generation number so a response to a superseded query is
//! dropped instead of overwriting newer data.

pub mod golden;
pub mod last_checked;
pub mod table;

use std::ops::Deref;

use log::{debug, warn};
use slotwatch_realtime::{ConnectionState, EventMask};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::feed::{ChangeFeed, FeedHandle, Topic};

pub use golden::{GoldenPanel, GoldenSnapshot};
pub use last_checked::{LastChecked, LastCheckedSnapshot, LastCheckedText};
pub use table::{AppointmentsTable, TableSnapshot};

/// A view that re-reads the store when its table changes.
pub trait LiveView: Clone + Send + Sync + 'static {
    fn topic(&self) -> Topic;

    fn events(&self) -> EventMask {
        EventMask::ALL
    }

    /// Re-issues the current query. The handle resolves once the result is applied or discarded.
    fn refresh(&self) -> JoinHandle<()>;

    fn feed_state_changed(&self, _state: ConnectionState) {}
}

/// A view together with the feed subscription keeping it current.
///
/// Dropping the mount releases the subscription.
pub struct Mounted<V: LiveView> {
    view: V,
    feed: Option<FeedHandle>,
    watcher: Option<JoinHandle<()>>,
}

impl<V: LiveView> Mounted<V> {
    /// Loads the view and subscribes it to its topic.
    ///
    /// An unreachable feed does not fail the mount: the subscription joins
    /// once the connection comes up. A rejected subscription leaves the view
    /// loaded but static and reported as a failed feed for good; later
    /// connection changes on the shared feed no longer reach it.
    pub async fn mount(view: V, feed: &ChangeFeed) -> Self {
        let _initial = view.refresh();

        // Taken before subscribing so the transitions it causes are seen
        let mut states = feed.on_state_change();

        let listener = view.clone();
        let topic = view.topic();
        let subscription = feed
            .subscribe(topic, view.events(), move |notice| {
                debug!("{} changed ({:?}), refreshing", notice.table, notice.cause);
                let _ = listener.refresh();
            })
            .await;

        let handle = match subscription {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot follow {} changes: {}", topic.table(), e);
                view.feed_state_changed(ConnectionState::Failed);
                return Self {
                    view,
                    feed: None,
                    watcher: None,
                };
            }
        };

        let watched = view.clone();
        let watcher = tokio::spawn(async move {
            loop {
                match states.recv().await {
                    Ok(state) => watched.feed_state_changed(state),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Missed {} feed state changes", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            view,
            feed: Some(handle),
            watcher: Some(watcher),
        }
    }

    /// Mount without a feed: the view only changes when told to.
    pub fn detached(view: V) -> Self {
        let _initial = view.refresh();
        Self {
            view,
            feed: None,
            watcher: None,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Whether a feed subscription is keeping the view current.
    pub fn is_live(&self) -> bool {
        self.feed.as_ref().map_or(false, FeedHandle::is_active)
    }

    pub async fn unmount(mut self) -> Result<(), Error> {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(feed) = self.feed.take() {
            feed.unsubscribe().await?;
        }
        Ok(())
    }
}

impl<V: LiveView> Deref for Mounted<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.view
    }
}

impl<V: LiveView> Drop for Mounted<V> {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
