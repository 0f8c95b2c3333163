use std::sync::Arc;

use chrono::{DateTime, TimeZone};
use log::{debug, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::classify::sort_canonical;
use crate::feed::Topic;
use crate::models::Appointment;
use crate::present::GoldenCard;
use crate::store::SlotStore;
use crate::view::LiveView;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoldenSnapshot {
    /// Golden, available slots in canonical order.
    pub slots: Vec<Appointment>,
    pub loaded: bool,
}

impl GoldenSnapshot {
    /// Header count, e.g. `3 available`.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// The panel is hidden when there is nothing to show.
    pub fn is_visible(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn cards<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<GoldenCard> {
        self.slots
            .iter()
            .map(|slot| GoldenCard::render(slot, now))
            .collect()
    }
}

struct Inner {
    store: Arc<dyn SlotStore>,
    generation: Mutex<u64>,
    published: watch::Sender<GoldenSnapshot>,
}

/// Short-notice slots that can still be booked.
#[derive(Clone)]
pub struct GoldenPanel {
    inner: Arc<Inner>,
}

impl GoldenPanel {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        let (published, _) = watch::channel(GoldenSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                store,
                generation: Mutex::new(0),
                published,
            }),
        }
    }

    pub fn snapshot(&self) -> GoldenSnapshot {
        self.inner.published.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<GoldenSnapshot> {
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

        let result = self.store.golden_slots().await;

        let current = self.generation.lock().await;
        if *current != generation {
            debug!("Discarding golden slots fetch #{}", generation);
            return;
        }
        match result {
            Ok(mut slots) => {
                slots.retain(Appointment::is_golden_available);
                sort_canonical(&mut slots);
                self.published.send_replace(GoldenSnapshot {
                    slots,
                    loaded: true,
                });
            }
            Err(e) => warn!("Golden slots query failed: {}", e),
        }
    }
}

impl LiveView for GoldenPanel {
    fn topic(&self) -> Topic {
        Topic::Appointments
    }

    fn refresh(&self) -> JoinHandle<()> {
        tokio::spawn(self.inner.clone().refresh())
    }
}
