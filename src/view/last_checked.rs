use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use slotwatch_realtime::{ConnectionState, EventMask};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ClientOptions;
use crate::feed::Topic;
use crate::models::ScrapeRun;
use crate::present::relative_age;
use crate::store::SlotStore;
use crate::view::LiveView;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastCheckedSnapshot {
    /// Latest completed run, if any has completed.
    pub run: Option<ScrapeRun>,
    pub loaded: bool,
    /// The change feed gave up reconnecting; the run shown may be outdated.
    pub feed_failed: bool,
    pub stale_after: Duration,
}

impl LastCheckedSnapshot {
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.run.as_ref().and_then(|run| run.completed_at)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if self.feed_failed {
            return true;
        }
        match self.completed_at() {
            Some(completed_at) => match (now - completed_at).to_std() {
                Ok(age) => age > self.stale_after,
                // Completed "in the future": clock skew, not stale
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Indicator text with the timestamp shown in `now`'s time zone.
    pub fn text<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> LastCheckedText
    where
        Tz::Offset: fmt::Display,
    {
        let now_utc = now.with_timezone(&Utc);
        match self.completed_at() {
            None => LastCheckedText::CheckingNow,
            Some(completed_at) => LastCheckedText::Checked {
                at: completed_at
                    .with_timezone(&now.timezone())
                    .format("%B %-d, %Y at %-I:%M %p")
                    .to_string(),
                age: relative_age(completed_at, now_utc),
                stale: self.is_stale(now_utc),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastCheckedText {
    /// No run has completed yet.
    CheckingNow,
    Checked {
        /// `February 12, 2026 at 2:05 PM`
        at: String,
        /// `5 minutes ago`
        age: String,
        stale: bool,
    },
}

impl fmt::Display for LastCheckedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastCheckedText::CheckingNow => f.write_str("Checking now..."),
            LastCheckedText::Checked { at, age, .. } => write!(f, "Last checked {} ({})", at, age),
        }
    }
}

struct Inner {
    store: Arc<dyn SlotStore>,
    generation: Mutex<u64>,
    published: watch::Sender<LastCheckedSnapshot>,
}

/// When the scraper last finished a pass.
#[derive(Clone)]
pub struct LastChecked {
    inner: Arc<Inner>,
}

impl LastChecked {
    pub fn new(store: Arc<dyn SlotStore>, options: &ClientOptions) -> Self {
        let (published, _) = watch::channel(LastCheckedSnapshot {
            stale_after: options.stale_after,
            ..Default::default()
        });
        Self {
            inner: Arc::new(Inner {
                store,
                generation: Mutex::new(0),
                published,
            }),
        }
    }

    pub fn snapshot(&self) -> LastCheckedSnapshot {
        self.inner.published.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<LastCheckedSnapshot> {
        self.inner.published.subscribe()
    }
}

impl Inner {
    async fn refresh(self: Arc<Self>) {
        let generation = {
            let mut current = self.generation.lock().await;
            *current += 1;
            *current
        };

        let result = self.store.latest_scrape_run().await;

        let current = self.generation.lock().await;
        if *current != generation {
            debug!("Discarding scrape run fetch #{}", generation);
            return;
        }
        match result {
            // "No completed run yet" keeps whatever was shown before
            Ok(None) => self.published.send_modify(|snapshot| snapshot.loaded = true),
            Ok(Some(run)) => self.published.send_modify(|snapshot| {
                snapshot.run = Some(run);
                snapshot.loaded = true;
            }),
            Err(e) => warn!("Latest scrape run query failed: {}", e),
        }
    }
}

impl LiveView for LastChecked {
    fn topic(&self) -> Topic {
        Topic::ScrapeRuns
    }

    fn events(&self) -> EventMask {
        EventMask::INSERT | EventMask::UPDATE
    }

    fn refresh(&self) -> JoinHandle<()> {
        tokio::spawn(self.inner.clone().refresh())
    }

    fn feed_state_changed(&self, state: ConnectionState) {
        let failed = match state {
            ConnectionState::Failed => true,
            ConnectionState::Connected => false,
            _ => return,
        };
        self.inner.published.send_if_modified(|snapshot| {
            if snapshot.feed_failed == failed {
                return false;
            }
            if failed {
                info!("Change feed failed, marking last-checked stale");
            }
            snapshot.feed_failed = failed;
            true
        });
    }
}
