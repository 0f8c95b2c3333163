use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ClientOptions;
use crate::feed::Topic;
use crate::models::{Appointment, AvailabilityFilter, Office, PageSize};
use crate::present::{office_caption, range_caption, AppointmentRow};
use crate::store::{AppointmentFilter, SlotStore};
use crate::view::LiveView;

/// What the appointments table shows at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub filter: AppointmentFilter,
    /// 1-based
    pub page: usize,
    pub page_size: PageSize,
    /// The full fetched set in canonical order; pages are slices of it.
    pub results: Vec<Appointment>,
    /// False until the first successful fetch.
    pub loaded: bool,
}

impl TableSnapshot {
    fn new(page_size: PageSize) -> Self {
        Self {
            filter: AppointmentFilter::default(),
            page: 1,
            page_size,
            results: Vec::new(),
            loaded: false,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn total_pages(&self) -> usize {
        self.results.len().div_ceil(self.page_size.get())
    }

    /// Rows on the current page; empty when the page is past the end.
    pub fn page_rows(&self) -> &[Appointment] {
        let size = self.page_size.get();
        let start = (self.page - 1).saturating_mul(size).min(self.results.len());
        let end = start.saturating_add(size).min(self.results.len());
        &self.results[start..end]
    }

    pub fn rows(&self, now: DateTime<Utc>) -> Vec<AppointmentRow> {
        self.page_rows()
            .iter()
            .map(|appointment| AppointmentRow::render(appointment, now))
            .collect()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    /// `26–50 of 60`
    pub fn range_caption(&self) -> String {
        range_caption(self.page, self.page_size.get(), self.total())
    }

    /// `All Offices` / `3 offices`
    pub fn office_caption(&self) -> String {
        office_caption(&self.filter.offices)
    }

    fn last_page(&self) -> usize {
        self.total_pages().max(1)
    }
}

struct TableState {
    snapshot: TableSnapshot,
    generation: u64,
}

struct Inner {
    store: Arc<dyn SlotStore>,
    state: Mutex<TableState>,
    published: watch::Sender<TableSnapshot>,
    clamp_page_on_refresh: bool,
}

/// Filterable, paginated list of appointments.
///
/// Filter edits reset to page 1 and issue a new query; paging only slices
/// the fetched set. Clones share the same state.
#[derive(Clone)]
pub struct AppointmentsTable {
    inner: Arc<Inner>,
}

impl AppointmentsTable {
    pub fn new(store: Arc<dyn SlotStore>, options: &ClientOptions) -> Self {
        let snapshot = TableSnapshot::new(options.default_page_size);
        let (published, _) = watch::channel(snapshot.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(TableState {
                    snapshot,
                    generation: 0,
                }),
                published,
                clamp_page_on_refresh: options.clamp_page_on_refresh,
            }),
        }
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.inner.published.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TableSnapshot> {
        self.inner.published.subscribe()
    }

    /// Shows only `offices`; an empty set shows every office.
    pub async fn set_office_filter<I>(&self, offices: I) -> JoinHandle<()>
    where
        I: IntoIterator<Item = Office>,
    {
        let offices: BTreeSet<Office> = offices.into_iter().collect();
        self.edit_filter(move |filter| filter.offices = offices).await
    }

    /// Adds `office` to the filter, or removes it if already selected.
    pub async fn toggle_office(&self, office: Office) -> JoinHandle<()> {
        self.edit_filter(move |filter| {
            if !filter.offices.remove(&office) {
                filter.offices.insert(office);
            }
        })
        .await
    }

    pub async fn clear_offices(&self) -> JoinHandle<()> {
        self.edit_filter(|filter| filter.offices.clear()).await
    }

    pub async fn set_availability_filter(&self, availability: AvailabilityFilter) -> JoinHandle<()> {
        self.edit_filter(move |filter| filter.availability = availability)
            .await
    }

    /// Moves to `page`, clamped to the existing pages.
    pub async fn set_page(&self, page: usize) {
        self.edit_page(|snapshot| page.clamp(1, snapshot.last_page()))
            .await
    }

    pub async fn next_page(&self) {
        self.edit_page(|snapshot| (snapshot.page + 1).min(snapshot.last_page()))
            .await
    }

    pub async fn prev_page(&self) {
        self.edit_page(|snapshot| snapshot.page.saturating_sub(1).max(1))
            .await
    }

    /// Changes the page size and returns to page 1.
    pub async fn set_page_size(&self, page_size: PageSize) {
        let mut state = self.inner.state.lock().await;
        state.snapshot.page_size = page_size;
        state.snapshot.page = 1;
        self.inner.published.send_replace(state.snapshot.clone());
    }

    async fn edit_page<F>(&self, next: F)
    where
        F: FnOnce(&TableSnapshot) -> usize,
    {
        let mut state = self.inner.state.lock().await;
        let page = next(&state.snapshot);
        if page != state.snapshot.page {
            state.snapshot.page = page;
            self.inner.published.send_replace(state.snapshot.clone());
        }
    }

    async fn edit_filter<F>(&self, edit: F) -> JoinHandle<()>
    where
        F: FnOnce(&mut AppointmentFilter),
    {
        let mut state = self.inner.state.lock().await;
        edit(&mut state.snapshot.filter);
        state.snapshot.page = 1;
        self.inner.published.send_replace(state.snapshot.clone());
        let (generation, filter) = Inner::begin_fetch(&mut state);
        drop(state);

        tokio::spawn(Inner::fetch(self.inner.clone(), generation, filter))
    }
}

impl Inner {
    fn begin_fetch(state: &mut TableState) -> (u64, AppointmentFilter) {
        state.generation += 1;
        (state.generation, state.snapshot.filter.clone())
    }

    async fn refresh(self: Arc<Self>) {
        let (generation, filter) = {
            let mut state = self.state.lock().await;
            Inner::begin_fetch(&mut state)
        };
        self.fetch(generation, filter).await;
    }

    async fn fetch(self: Arc<Self>, generation: u64, filter: AppointmentFilter) {
        let result = self.store.appointments(&filter).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(
                "Discarding appointments fetch #{} superseded by #{}",
                generation, state.generation
            );
            return;
        }

        match result {
            Ok(rows) => {
                state.snapshot.results = rows;
                state.snapshot.loaded = true;
                if self.clamp_page_on_refresh && state.snapshot.page > state.snapshot.last_page() {
                    debug!(
                        "Page {} out of range after refresh, clamping to {}",
                        state.snapshot.page,
                        state.snapshot.last_page()
                    );
                    state.snapshot.page = state.snapshot.last_page();
                }
                self.published.send_replace(state.snapshot.clone());
            }
            Err(e) => warn!("Appointments query failed, keeping previous rows: {}", e),
        }
    }
}

impl LiveView for AppointmentsTable {
    fn topic(&self) -> Topic {
        Topic::Appointments
    }

    fn refresh(&self) -> JoinHandle<()> {
        tokio::spawn(self.inner.clone().refresh())
    }
}
