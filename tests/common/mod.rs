#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use slotwatch::classify::sort_canonical;
use slotwatch::error::Error;
use slotwatch::models::{Appointment, Office, RowId, ScrapeRun, SlotType, Subscriber, BOOK_URL};
use slotwatch::store::{AppointmentFilter, SlotStore};
use slotwatch_postgrest::PostgrestError;
use slotwatch_realtime::{ChannelEvent, RealtimeMessage};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn slot(
    office: Office,
    day: NaiveDate,
    at: Option<NaiveTime>,
    golden: bool,
    available: bool,
) -> Appointment {
    let seen = Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap();
    Appointment {
        id: Uuid::new_v4().into(),
        office,
        appointment_type: "Driver License Renewal".to_string(),
        appointment_date: day,
        appointment_time: at,
        slot_type: if golden { SlotType::Golden } else { SlotType::Future },
        is_golden: golden,
        is_current_closest: false,
        available,
        first_seen_at: seen,
        last_seen_at: seen,
        book_url: BOOK_URL.to_string(),
    }
}

/// An address nothing listens on, until a test binds it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// In-memory store with the same read semantics as the PostgREST one.
#[derive(Default)]
pub struct MemoryStore {
    pub appointments: Mutex<Vec<Appointment>>,
    pub runs: Mutex<Vec<ScrapeRun>>,
    pub subscribers: Mutex<BTreeMap<String, Subscriber>>,
    pub failing: AtomicBool,
}

impl MemoryStore {
    pub fn with_appointments(appointments: Vec<Appointment>) -> Self {
        let store = Self::default();
        *store.appointments.lock().unwrap() = appointments;
        store
    }

    pub fn set_available(&self, id: &RowId, available: bool) {
        for appointment in self.appointments.lock().unwrap().iter_mut() {
            if &appointment.id == id {
                appointment.available = available;
            }
        }
    }

    pub fn push_run(&self, run: ScrapeRun) {
        self.runs.lock().unwrap().push(run);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Store(PostgrestError::InvalidParameters(
                "store unavailable".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, Error> {
        self.check()?;
        let mut rows: Vec<_> = self
            .appointments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        sort_canonical(&mut rows);
        Ok(rows)
    }

    async fn golden_slots(&self) -> Result<Vec<Appointment>, Error> {
        self.check()?;
        let mut rows: Vec<_> = self
            .appointments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.is_golden && a.available)
            .cloned()
            .collect();
        sort_canonical(&mut rows);
        Ok(rows)
    }

    async fn latest_scrape_run(&self) -> Result<Option<ScrapeRun>, Error> {
        self.check()?;
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|run| run.completed_at.is_some())
            .max_by_key(|run| run.completed_at)
            .cloned())
    }

    async fn upsert_subscriber(&self, subscriber: &Subscriber) -> Result<(), Error> {
        self.check()?;
        self.subscribers
            .lock()
            .unwrap()
            .insert(subscriber.email.clone(), subscriber.clone());
        Ok(())
    }
}

pub enum FeedCmd {
    Push(serde_json::Value),
    /// Closes the current socket; the next connection is accepted as usual.
    DropConnection,
}

/// Realtime endpoint stand-in: acks joins, reports every client message and
/// pushes whatever the test sends it.
pub struct MockFeed {
    pub addr: SocketAddr,
    pub seen: mpsc::UnboundedReceiver<RealtimeMessage>,
    pub cmd: mpsc::UnboundedSender<FeedCmd>,
    pub handle: JoinHandle<()>,
}

impl MockFeed {
    pub async fn start() -> Self {
        Self::start_on(SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<FeedCmd>();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                loop {
                    tokio::select! {
                        incoming = ws.next() => {
                            let text = match incoming {
                                Some(Ok(Message::Text(text))) => text,
                                _ => break,
                            };
                            let Ok(parsed) = serde_json::from_str::<RealtimeMessage>(&text) else {
                                continue;
                            };
                            if parsed.event == ChannelEvent::PhoenixJoin {
                                let reply = json!({
                                    "topic": parsed.topic,
                                    "event": "phx_reply",
                                    "payload": { "status": "ok", "response": {} },
                                    "ref": parsed.message_ref,
                                });
                                if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            let _ = seen_tx.send(parsed);
                        }
                        cmd = cmd_rx.recv() => match cmd {
                            Some(FeedCmd::Push(value)) => {
                                if ws.send(Message::Text(value.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Some(FeedCmd::DropConnection) | None => break,
                        }
                    }
                }
            }
        });

        Self {
            addr,
            seen: seen_rx,
            cmd: cmd_tx,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn drop_connection(&self) {
        self.cmd.send(FeedCmd::DropConnection).unwrap();
    }

    pub async fn next_event(&mut self, event: ChannelEvent) -> RealtimeMessage {
        tokio::time::timeout(std::time::Duration::from_secs(3), async {
            loop {
                let message = self.seen.recv().await.expect("mock feed stopped");
                if message.event == event {
                    return message;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", event))
    }

    /// Sends a row change on `topic` as the server would after a commit.
    pub fn push_change(&self, topic: &str, table: &str, kind: &str) {
        self.cmd
            .send(FeedCmd::Push(json!({
                "topic": topic,
                "event": "postgres_changes",
                "payload": {
                    "ids": [1],
                    "data": {
                        "type": kind,
                        "schema": "public",
                        "table": table,
                        "commit_timestamp": "2026-02-11T16:00:00Z",
                        "record": {}
                    }
                },
                "ref": null
            })))
            .unwrap();
    }
}
