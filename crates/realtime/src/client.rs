use crate::channel::{Channel, ChannelBuilder};
use crate::error::RealtimeError;
use crate::message::{ChannelEvent, RealtimeMessage};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 接続状態
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
///                      \                          \
///                       -> Reconnecting            -> Failed (attempts exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts are exhausted. Stays here until `connect()` is called again.
    Failed,
}

/// RealtimeClient設定オプション
#[derive(Debug, Clone)]
pub struct RealtimeClientOptions {
    pub auto_reconnect: bool,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// First reconnect delay in milliseconds.
    pub reconnect_interval: u64,
    pub reconnect_backoff_factor: f64,
    pub max_reconnect_interval: u64,
    pub heartbeat_interval: u64,
    /// Upper bound on how long `connect` waits for the first attempt to resolve.
    pub connect_timeout: u64,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: Some(10),
            reconnect_interval: 1000, // 1 second
            reconnect_backoff_factor: 2.0,
            max_reconnect_interval: 30000, // 30 seconds
            heartbeat_interval: 30000,     // 30 seconds
            connect_timeout: 10000,
        }
    }
}

impl RealtimeClientOptions {
    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.reconnect_interval as f64 * self.reconnect_backoff_factor.powi(exponent);
        let capped = millis.min(self.max_reconnect_interval as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Realtimeクライアント本体
///
/// Cloning is cheap and every clone drives the same connection.
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) url: String,
    pub(crate) key: String,
    next_ref: Arc<AtomicU32>,
    // Active channels (topic -> Channel)
    pub(crate) channels: Arc<RwLock<HashMap<String, Arc<Channel>>>>,
    // Sender feeding the WebSocket writer task of the current session
    socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    pub(crate) options: RealtimeClientOptions,
    state: Arc<watch::Sender<ConnectionState>>,
    state_change: broadcast::Sender<ConnectionState>,
    // Held while a session installs its socket and rejoins, and while a new
    // channel registers, so each channel is joined once per session.
    join_lock: Arc<Mutex<()>>,
    reconnect_attempts: Arc<AtomicU32>,
    is_manually_closed: Arc<AtomicBool>,
    supervisor_running: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

struct Session {
    read: SplitStream<WsStream>,
    socket_tx: mpsc::Sender<Message>,
    writer: JoinHandle<()>,
}

impl RealtimeClient {
    /// デフォルトオプションで新しいクライアントを作成
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, RealtimeClientOptions::default())
    }

    /// カスタムオプションで新しいクライアントを作成
    pub fn new_with_options(url: &str, key: &str, options: RealtimeClientOptions) -> Self {
        let (state_change_tx, _) = broadcast::channel(16);
        let (shutdown_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            next_ref: Arc::new(AtomicU32::new(1)),
            channels: Arc::new(RwLock::new(HashMap::new())),
            socket: Arc::new(RwLock::new(None)),
            options,
            state: Arc::new(state_tx),
            state_change: state_change_tx,
            join_lock: Arc::new(Mutex::new(())),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            is_manually_closed: Arc::new(AtomicBool::new(false)),
            supervisor_running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(shutdown_tx),
        }
    }

    /// 接続状態変更の通知を受け取るためのレシーバーを取得
    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_change.subscribe()
    }

    /// 現在の接続状態を取得
    pub async fn get_connection_state(&self) -> ConnectionState {
        let state = *self.state.borrow();
        state
    }

    /// Reconnect attempts made since the last established connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// 特定のトピックに対するチャンネルビルダーを作成
    pub fn channel(&self, name: &str) -> ChannelBuilder<'_> {
        debug!("Creating channel builder for {}", name);
        ChannelBuilder::new(self, name)
    }

    /// 次のメッセージ参照番号を生成
    pub(crate) fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// WebSocket endpoint derived from the project URL.
    pub fn endpoint(&self) -> Result<String, RealtimeError> {
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            s => {
                return Err(RealtimeError::ConnectionError(format!(
                    "Unsupported URL scheme: {}",
                    s
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            RealtimeError::ConnectionError(format!("Cannot switch URL scheme to {}", scheme))
        })?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.key)
            .append_pair("vsn", "1.0.0");
        Ok(url.to_string())
    }

    /// 内部接続状態を設定し、変更を通知
    async fn set_connection_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!("Realtime state changing from {:?} to {:?}", *current, state);
            *current = state;
            true
        });
        if changed {
            // No receivers is fine
            let _ = self.state_change.send(state);
        } else {
            trace!("Realtime state already {:?}, not changing.", state);
        }
    }

    /// Starts the background connection task and waits for its first attempt.
    ///
    /// Returns `Ok` once connected. If the first attempt fails the task keeps
    /// retrying with exponential backoff and this returns an error; registered
    /// channels are joined as soon as a connection comes up. The state only
    /// becomes `Failed` after `max_reconnect_attempts` retries.
    ///
    /// Concurrent callers share one task and all wait for the same attempt.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let ws_url = self.endpoint()?;
        if self.supervisor_running.swap(true, Ordering::SeqCst) {
            debug!("connect(): connection task already running");
        } else {
            self.is_manually_closed.store(false, Ordering::SeqCst);
            self.shutdown.send_replace(false);
            self.reconnect_attempts.store(0, Ordering::SeqCst);
            self.set_connection_state(ConnectionState::Connecting).await;

            info!("Connecting to realtime endpoint at {}", self.url);
            let client = self.clone();
            tokio::spawn(async move {
                client.supervise(ws_url).await;
            });
        }

        match self.settled_state().await {
            ConnectionState::Connected => Ok(()),
            other => Err(RealtimeError::ConnectionError(format!(
                "Realtime connection is {:?}",
                other
            ))),
        }
    }

    /// 切断処理
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        info!("disconnect() called");
        self.is_manually_closed.store(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);

        if let Some(socket_tx) = self.socket.write().await.take() {
            // Writer task exits once the last sender is gone
            drop(socket_tx);
        } else {
            debug!("disconnect(): no active socket, already disconnected");
        }
        self.set_connection_state(ConnectionState::Disconnected).await;
        Ok(())
    }

    async fn supervise(self, ws_url: String) {
        let mut next = match connect_async(ws_url.as_str()).await {
            Ok((ws_stream, _response)) => Some(ws_stream),
            Err(e) => {
                warn!("WebSocket connection failed: {}", e);
                None
            }
        };

        let final_state = loop {
            let ws_stream = match next.take() {
                Some(ws_stream) => ws_stream,
                None => {
                    if self.is_manually_closed.load(Ordering::SeqCst) {
                        break ConnectionState::Disconnected;
                    }
                    if !self.options.auto_reconnect {
                        warn!("Realtime connection lost and auto_reconnect is off");
                        break ConnectionState::Disconnected;
                    }
                    match self.reconnect_with_backoff(&ws_url).await {
                        Some(ws_stream) => ws_stream,
                        None if self.is_manually_closed.load(Ordering::SeqCst) => {
                            break ConnectionState::Disconnected;
                        }
                        None => break ConnectionState::Failed,
                    }
                }
            };

            let session = self.open_session(ws_stream).await;
            self.drive_session(session).await;
        };

        // Cleared first so a caller reacting to the final state can start over
        self.supervisor_running.store(false, Ordering::SeqCst);
        self.set_connection_state(final_state).await;
        debug!("Realtime connection task finished");
    }

    /// State once no connection attempt is in flight, bounded by `connect_timeout`.
    async fn settled_state(&self) -> ConnectionState {
        let mut rx = self.state.subscribe();
        let wait = tokio::time::timeout(
            Duration::from_millis(self.options.connect_timeout),
            rx.wait_for(|state| *state != ConnectionState::Connecting),
        );
        let settled = match wait.await {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        };
        match settled {
            Some(state) => state,
            None => self.get_connection_state().await,
        }
    }

    async fn reconnect_with_backoff(&self, ws_url: &str) -> Option<WsStream> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut attempts = 0u32;

        loop {
            if self.is_manually_closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(max_attempts) = self.options.max_reconnect_attempts {
                if attempts >= max_attempts {
                    error!(
                        "Max reconnect attempts ({}) reached, giving up on realtime feed",
                        max_attempts
                    );
                    return None;
                }
            }

            attempts += 1;
            self.reconnect_attempts.store(attempts, Ordering::SeqCst);
            self.set_connection_state(ConnectionState::Reconnecting).await;

            let delay = self.options.backoff_delay(attempts);
            debug!("Reconnect attempt #{} in {:?}", attempts, delay);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = closed(&mut shutdown_rx) => return None,
            }

            match connect_async(ws_url).await {
                Ok((ws_stream, _response)) => {
                    info!("Reconnected after {} attempt(s)", attempts);
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    return Some(ws_stream);
                }
                Err(e) => warn!("Reconnect attempt #{} failed: {}", attempts, e),
            }
        }
    }

    async fn open_session(&self, ws_stream: WsStream) -> Session {
        let (mut write, read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);

        let writer = tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                trace!("Writer task sending message: {:?}", message);
                if let Err(e) = write.send(message).await {
                    warn!("WebSocket send error: {}", e);
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
            debug!("Writer task finished");
        });

        {
            let _joining = self.join_lock.lock().await;
            *self.socket.write().await = Some(socket_tx.clone());
            self.rejoin_channels().await;
        }
        self.set_connection_state(ConnectionState::Connected).await;

        Session {
            read,
            socket_tx,
            writer,
        }
    }

    async fn drive_session(&self, session: Session) {
        let Session {
            mut read,
            socket_tx,
            writer,
        } = session;
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.options.heartbeat_interval.max(1)));
        // interval fires immediately; skip that tick
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = closed(&mut shutdown_rx) => {
                    debug!("Reader loop stopping on manual disconnect");
                    break;
                }

                msg_result = read.next() => {
                    match msg_result {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text).await,
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Received Close frame: {:?}", frame);
                            break;
                        }
                        Some(Ok(other)) => trace!("Ignoring non-text message: {:?}", other),
                        Some(Err(e)) => {
                            warn!("WebSocket read error: {}", e);
                            break;
                        }
                        None => {
                            debug!("WebSocket stream closed by remote");
                            break;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    let heartbeat_msg = json!({
                        "topic": "phoenix",
                        "event": ChannelEvent::Heartbeat,
                        "payload": {},
                        "ref": self.next_ref(),
                    });
                    if let Err(e) = socket_tx.send(Message::Text(heartbeat_msg.to_string())).await {
                        warn!("Failed to send heartbeat: {}. Assuming connection lost.", e);
                        break;
                    }
                }
            }
        }

        self.socket.write().await.take();
        drop(socket_tx);
        if let Err(e) = writer.await {
            warn!("Writer task ended abnormally: {}", e);
        }
    }

    async fn dispatch(&self, text: &str) {
        let message = match serde_json::from_str::<RealtimeMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse realtime message: {}. Raw: {}", e, text);
                return;
            }
        };

        if message.topic == "phoenix" {
            trace!("Phoenix message: {:?}", message.event);
            return;
        }

        let channel = self.channels.read().await.get(&message.topic).cloned();
        match channel {
            Some(channel) => channel.handle_message(&message),
            None => debug!("Message for unknown topic {}", message.topic),
        }
    }

    /// Joins every registered channel on the new socket. Each of them was
    /// either joined on an earlier connection or registered while offline, so
    /// changes may have been missed and every binding is told to resync.
    async fn rejoin_channels(&self) {
        let channels: Vec<Arc<Channel>> = self.channels.read().await.values().cloned().collect();
        for channel in channels {
            if let Err(e) = self.send_join(&channel).await {
                warn!("Failed to rejoin channel {}: {}", channel.topic(), e);
            }
            channel.notify_resync();
        }
    }

    /// Registers `channel` and joins it now if a socket is up, otherwise when
    /// the next connection opens.
    pub(crate) async fn add_channel(&self, channel: Arc<Channel>) -> Result<(), RealtimeError> {
        let _joining = self.join_lock.lock().await;
        {
            let mut channels = self.channels.write().await;
            if channels.contains_key(channel.topic()) {
                return Err(RealtimeError::SubscriptionError(format!(
                    "Channel {} is already subscribed",
                    channel.topic()
                )));
            }
            channels.insert(channel.topic().to_string(), channel.clone());
        }

        if self.socket.read().await.is_none() {
            debug!("Channel {} registered, joining once connected", channel.topic());
            return Ok(());
        }
        match self.send_join(&channel).await {
            Ok(()) => info!("Joined channel {}", channel.topic()),
            Err(e) => debug!("Join for {} deferred until reconnect: {}", channel.topic(), e),
        }
        Ok(())
    }

    pub(crate) async fn send_join(&self, channel: &Channel) -> Result<(), RealtimeError> {
        let message = json!({
            "topic": channel.topic(),
            "event": ChannelEvent::PhoenixJoin,
            "payload": channel.join_payload(&self.key),
            "ref": self.next_ref(),
        });
        self.send_message(message).await
    }

    /// Drops the channel and tells the server to leave it. Unknown topics are a no-op.
    pub(crate) async fn remove_channel(&self, topic: &str) -> Result<(), RealtimeError> {
        let removed = self.channels.write().await.remove(topic);
        if removed.is_none() {
            trace!("Channel {} already removed", topic);
            return Ok(());
        }

        info!("Leaving channel {}", topic);
        let leave = json!({
            "topic": topic,
            "event": ChannelEvent::PhoenixLeave,
            "payload": {},
            "ref": self.next_ref(),
        });
        if let Err(e) = self.send_message(leave).await {
            // Nothing to leave when the socket is gone
            debug!("phx_leave for {} not sent: {}", topic, e);
        }
        Ok(())
    }

    /// Helper to send a raw JSON message through the WebSocket connection
    pub(crate) async fn send_message(&self, message: serde_json::Value) -> Result<(), RealtimeError> {
        trace!("Client attempting to send message: {}", message);
        let socket_guard = self.socket.read().await;
        if let Some(socket_tx) = socket_guard.as_ref() {
            let ws_message = Message::Text(message.to_string());
            socket_tx.send(ws_message).await.map_err(RealtimeError::from)
        } else {
            Err(RealtimeError::ConnectionError(
                "Client socket unavailable".to_string(),
            ))
        }
    }
}

/// Resolves once `rx` reports a manual shutdown. Drops the watch guard before returning.
async fn closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await.map(|_| ());
}
