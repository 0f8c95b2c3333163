use crate::client::{ConnectionState, RealtimeClient};
use crate::error::RealtimeError;
use crate::message::{
    parse_change, ChangeCause, ChangeNotice, ChannelEvent, EventMask, RealtimeMessage,
};
use log::{debug, trace, warn};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// データベース変更監視設定
#[derive(Debug, Clone)]
pub struct DatabaseChanges {
    schema: String,
    table: String,
    mask: EventMask,
}

impl DatabaseChanges {
    /// 新しいデータベース変更監視設定を作成 (all change kinds)
    pub fn new(table: &str) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.to_string(),
            mask: EventMask::ALL,
        }
    }

    /// スキーマを設定
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// Restricts the binding to the given change kinds.
    pub fn events(mut self, mask: EventMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    /// `postgres_changes` entries for the join payload, one per wire event.
    fn to_channel_config(&self) -> Vec<serde_json::Value> {
        self.mask
            .wire_events()
            .into_iter()
            .map(|event| {
                json!({
                    "event": event,
                    "schema": self.schema,
                    "table": self.table,
                })
            })
            .collect()
    }
}

type CallbackFn = Box<dyn Fn(ChangeNotice) + Send + Sync>;

struct Binding {
    changes: DatabaseChanges,
    callback: CallbackFn,
}

/// 内部チャンネル表現
pub(crate) struct Channel {
    topic: String,
    bindings: Vec<Binding>,
}

impl Channel {
    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn join_payload(&self, access_token: &str) -> serde_json::Value {
        let postgres_changes: Vec<serde_json::Value> = self
            .bindings
            .iter()
            .flat_map(|binding| binding.changes.to_channel_config())
            .collect();

        json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": postgres_changes,
            },
            "access_token": access_token,
        })
    }

    pub(crate) fn handle_message(&self, message: &RealtimeMessage) {
        match message.event {
            ChannelEvent::PostgresChanges => {
                let (table, kind) = parse_change(&message.payload);
                for binding in &self.bindings {
                    if let Some(table) = &table {
                        if table != binding.changes.table() {
                            continue;
                        }
                    }
                    let cause = match kind {
                        Some(kind) if binding.changes.mask().contains(kind) => ChangeCause::Row(kind),
                        Some(_) => continue,
                        // Without a kind we cannot filter; invalidating is the safe side.
                        None => ChangeCause::Unspecified,
                    };
                    trace!("Change on {} ({:?}) for {}", binding.changes.table(), cause, self.topic);
                    (binding.callback)(ChangeNotice {
                        table: binding.changes.table().to_string(),
                        cause,
                    });
                }
            }
            ChannelEvent::PhoenixReply | ChannelEvent::System => {
                let status = message.payload.get("status").and_then(|v| v.as_str());
                if status == Some("error") {
                    warn!(
                        "Channel {} reported an error: {}",
                        self.topic, message.payload
                    );
                } else {
                    debug!("Channel {} {}: {:?}", self.topic, message.event, status);
                }
            }
            ChannelEvent::PhoenixError => {
                warn!("Channel {} received phx_error: {}", self.topic, message.payload);
            }
            ChannelEvent::PhoenixClose => {
                debug!("Channel {} closed by server", self.topic);
            }
            other => trace!("Unhandled event {} on channel {}", other, self.topic),
        }
    }

    /// Fires every binding once after a reconnect.
    pub(crate) fn notify_resync(&self) {
        for binding in &self.bindings {
            (binding.callback)(ChangeNotice {
                table: binding.changes.table().to_string(),
                cause: ChangeCause::Resync,
            });
        }
    }
}

/// アクティブなチャンネル購読を表す
///
/// Dropping the handle releases the channel; [`unsubscribe`](Self::unsubscribe)
/// does the same explicitly and may be called any number of times.
pub struct Subscription {
    topic: String,
    client: RealtimeClient,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub async fn unsubscribe(&self) -> Result<(), RealtimeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            trace!("Subscription {} already released", self.topic);
            return Ok(());
        }
        self.client.remove_channel(&self.topic).await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = self.client.clone();
        let topic = std::mem::take(&mut self.topic);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.remove_channel(&topic).await {
                        warn!("Error releasing channel {}: {}", topic, e);
                    }
                });
            }
            Err(_) => {
                // Outside a runtime: drop the callbacks at least, the server side
                // goes away with the socket.
                if let Ok(mut channels) = client.channels.try_write() {
                    channels.remove(&topic);
                }
                warn!("Subscription {} dropped outside a runtime, leave not sent", topic);
            }
        }
    }
}

/// チャンネル作成と購読設定のためのビルダー
pub struct ChannelBuilder<'a> {
    client: &'a RealtimeClient,
    name: String,
    bindings: Vec<Binding>,
}

impl<'a> ChannelBuilder<'a> {
    pub(crate) fn new(client: &'a RealtimeClient, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
            bindings: Vec::new(),
        }
    }

    /// データベース変更イベントのコールバックを登録
    pub fn on<F>(mut self, changes: DatabaseChanges, callback: F) -> Self
    where
        F: Fn(ChangeNotice) + Send + Sync + 'static,
    {
        self.bindings.push(Binding {
            changes,
            callback: Box::new(callback),
        });
        self
    }

    /// チャンネルへの接続と購読を開始
    ///
    /// Starts the client's connection when needed. A connection that is down
    /// or still retrying does not fail the subscription: the channel is
    /// registered and joined, with a resync notice, once the socket is up.
    pub async fn subscribe(self) -> Result<Subscription, RealtimeError> {
        if self.bindings.is_empty() {
            return Err(RealtimeError::SubscriptionError(format!(
                "Channel {} has no bindings",
                self.name
            )));
        }
        self.client.endpoint()?;

        if self.client.get_connection_state().await != ConnectionState::Connected {
            if let Err(e) = self.client.connect().await {
                debug!("Channel {} joins once the feed connects: {}", self.name, e);
            }
        }

        let topic = format!("realtime:{}", self.name);
        let channel = Arc::new(Channel {
            topic: topic.clone(),
            bindings: self.bindings,
        });
        self.client.add_channel(channel).await?;

        Ok(Subscription {
            topic,
            client: self.client.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}
