//! Panel session manager
//!
//! One instance per paired panel. This is the canonical API the coordinator
//! uses to talk to a panel: connection management and authentication, the
//! protocol state machine, batching and coalescing, delta sequence
//! tracking, keepalive, and reconnect with backoff. Nothing else talks to
//! panel devices directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::protocol::{
    SUPPORTED_PROTOCOL_VERSIONS, build_auth_confirmed, build_envelope, build_time_body,
    parse_auth_ok,
};
use crate::transport::{ClientError, WsClient, WsMessage};

/// Outstanding delta acknowledgements are bounded; a full window refuses
/// further deltas until the panel acks.
pub const MAX_PENDING_DELTA_ACKS: usize = 32;

/// Consecutive missed pong windows before the socket is declared dead.
const MAX_MISSED_PONG_WINDOWS: u32 = 3;

/// Bounded wait for task and socket teardown during close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Configuration & State
// ============================================================================

/// Tunable timing for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// State-update batching window.
    pub batch_interval: Duration,
    /// Application keepalive ping interval.
    pub ping_interval: Duration,
    /// Grace period beyond the interval before a pong counts as missed.
    pub ping_timeout: Duration,
    /// Base reconnect delay; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Reconnect delay ceiling.
    pub retry_max_delay: Duration,
    /// WebSocket connect timeout.
    pub connect_timeout: Duration,
    /// Transport-level ping interval keeping middleboxes awake.
    pub transport_ping_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(500),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            transport_ping_interval: Some(Duration::from_secs(20)),
        }
    }
}

/// Protocol states of a panel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct PendingDeltaAck {
    seq: u64,
    sent_at: Instant,
}

/// Mutable per-session state. Owned by the session; every critical section
/// is short and never held across an await.
struct SessionState {
    connection_state: ConnectionState,
    retry_attempts: u32,
    shutdown: bool,

    protocol_version: Option<i64>,
    device_protocol_versions: Vec<i64>,

    delta_seq: u64,
    pending_delta_acks: HashMap<String, PendingDeltaAck>,

    ping_id: u64,
    pending_pings: HashMap<u64, Instant>,
    last_pong: Option<Instant>,
    missed_pong_windows: u32,

    pending_batch: BTreeMap<String, Value>,

    layout_applied: bool,
    current_layout_id: Option<String>,
    snapshot_sent: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            retry_attempts: 0,
            shutdown: false,
            protocol_version: None,
            device_protocol_versions: Vec::new(),
            delta_seq: 0,
            pending_delta_acks: HashMap::new(),
            ping_id: 0,
            pending_pings: HashMap::new(),
            last_pong: None,
            missed_pong_windows: 0,
            pending_batch: BTreeMap::new(),
            layout_applied: false,
            current_layout_id: None,
            snapshot_sent: false,
        }
    }

    fn ready_for_states(&self) -> bool {
        self.connection_state == ConnectionState::Authenticated && self.layout_applied
    }
}

// ============================================================================
// Hooks
// ============================================================================

type InputEventHook = Box<dyn Fn(&Value) + Send + Sync>;
type StateRequestHook = Box<dyn Fn(&str) -> Option<Value> + Send + Sync>;
type ConnectionStateHook = Box<dyn Fn(ConnectionState) + Send + Sync>;
type AuthFailedHook = Box<dyn Fn() + Send + Sync>;
type DeviceStateHook = Box<dyn Fn(&Value) + Send + Sync>;

/// Typed hooks owned by the session. Each is a single function value; an
/// absent hook is valid and silently skipped.
#[derive(Default)]
struct Hooks {
    input_event: Option<InputEventHook>,
    state_request: Option<StateRequestHook>,
    connection_state: Option<ConnectionStateHook>,
    auth_failed: Option<AuthFailedHook>,
    device_state: Option<DeviceStateHook>,
}

// ============================================================================
// Session
// ============================================================================

struct SessionShared {
    device_id: String,
    host: String,
    port: u16,
    token: String,
    config: SessionConfig,

    state: Mutex<SessionState>,
    hooks: Mutex<Hooks>,
    ws: Mutex<Option<Arc<WsClient>>>,

    listen_task: Mutex<Option<JoinHandle<()>>>,
    keepalive_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    batch_timer: Mutex<Option<JoinHandle<()>>>,
}

/// High-level session manager for one paired panel.
///
/// Usage:
/// ```ignore
/// let session = Session::new("abc123", "192.168.1.10", 80, "secret", SessionConfig::default());
/// session.connect().await;
/// session.on_input_event(|body| { /* route input */ });
/// session.schedule_state_update("binding_1", json!("on"));
/// session.send_layout(&layout_package).await;
/// session.close().await;
/// ```
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub fn new(
        device_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        token: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                device_id: device_id.into(),
                host: host.into(),
                port,
                token: token.into(),
                config,
                state: Mutex::new(SessionState::new()),
                hooks: Mutex::new(Hooks::default()),
                ws: Mutex::new(None),
                listen_task: Mutex::new(None),
                keepalive_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                batch_timer: Mutex::new(None),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Public API: connection management
    // ------------------------------------------------------------------

    /// Connect and start authenticating. Returns whether the socket opened.
    pub async fn connect(&self) -> bool {
        SessionShared::connect(&self.shared).await
    }

    /// Gracefully close the session: suppress reconnects, stop every
    /// background task, close the socket, and transition to disconnected.
    pub async fn close(&self) {
        self.shared.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Authenticated
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock_state().connection_state
    }

    /// Negotiated protocol version, once authenticated.
    pub fn protocol_version(&self) -> Option<i64> {
        self.shared.lock_state().protocol_version
    }

    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    // ------------------------------------------------------------------
    // Public API: hooks
    // ------------------------------------------------------------------

    /// Called with the body of every `input_event` frame.
    pub fn on_input_event(&self, hook: impl Fn(&Value) + Send + Sync + 'static) {
        self.shared.lock_hooks().input_event = Some(Box::new(hook));
    }

    /// Called per binding id to answer `state_request` frames.
    pub fn on_state_request(
        &self,
        hook: impl Fn(&str) -> Option<Value> + Send + Sync + 'static,
    ) {
        self.shared.lock_hooks().state_request = Some(Box::new(hook));
    }

    /// Observes every connection-state transition.
    pub fn on_connection_state_changed(
        &self,
        hook: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) {
        self.shared.lock_hooks().connection_state = Some(Box::new(hook));
    }

    /// Invoked exactly once when the panel rejects authentication.
    pub fn on_auth_failed(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared.lock_hooks().auth_failed = Some(Box::new(hook));
    }

    /// Called with the body of every `state_update` (telemetry) frame.
    pub fn on_device_state_update(&self, hook: impl Fn(&Value) + Send + Sync + 'static) {
        self.shared.lock_hooks().device_state = Some(Box::new(hook));
    }

    // ------------------------------------------------------------------
    // Public API: state updates
    // ------------------------------------------------------------------

    /// Schedule a state update for batching. Updates coalesce per binding
    /// (last write wins) and flush after the batch interval.
    pub fn schedule_state_update(&self, binding_id: impl Into<String>, value: Value) {
        self.shared
            .lock_state()
            .pending_batch
            .insert(binding_id.into(), value);

        // Set or reset the debounce timer. Outside a runtime the update
        // stays pending until the next explicit flush.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let timer = handle.spawn(async move {
            tokio::time::sleep(shared.config.batch_interval).await;
            shared.flush_pending_batch().await;
        });
        if let Some(previous) = self.shared.lock_task(&self.shared.batch_timer).replace(timer) {
            previous.abort();
        }
    }

    /// Send one update immediately, bypassing the batch window but honoring
    /// the snapshot-before-delta rule and the ack window.
    pub async fn send_immediate_update(&self, binding_id: &str, value: Value) -> bool {
        self.shared.send_immediate_update(binding_id, value).await
    }

    /// Flush the pending batch now, as the timer would.
    pub async fn flush_pending_batch(&self) -> bool {
        self.shared.flush_pending_batch().await
    }

    /// Number of deltas awaiting acknowledgement.
    pub fn pending_delta_acks(&self) -> usize {
        self.shared.lock_state().pending_delta_acks.len()
    }

    /// Whether the panel has confirmed the current layout.
    pub fn layout_applied(&self) -> bool {
        self.shared.lock_state().layout_applied
    }

    // ------------------------------------------------------------------
    // Public API: layout & misc frames
    // ------------------------------------------------------------------

    /// Send a layout package. The `layout_id` must be `sha256:`-prefixed;
    /// state updates flow only after the panel confirms with
    /// `layout_applied`.
    pub async fn send_layout(&self, layout_package: &Value) -> bool {
        self.shared.send_layout(layout_package).await
    }

    /// Send a capabilities frame.
    pub async fn send_capabilities(&self, capabilities: &Value) -> bool {
        if !self.is_connected() {
            return false;
        }
        let frame = self.shared.envelope("capabilities", capabilities.clone());
        self.shared.send_frame(frame, "capabilities").await
    }

    /// Send a time-sync frame.
    pub async fn send_time(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let body = build_time_body(&chrono::Utc::now(), None);
        let frame = self.shared.envelope("time", body);
        self.shared.send_frame(frame, "time").await
    }
}

// ============================================================================
// Internals
// ============================================================================

impl SessionShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Hooks> {
        match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_task<'a>(
        &self,
        slot: &'a Mutex<Option<JoinHandle<()>>>,
    ) -> std::sync::MutexGuard<'a, Option<JoinHandle<()>>> {
        match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn current_ws(&self) -> Option<Arc<WsClient>> {
        self.lock_task_ws().clone()
    }

    fn lock_task_ws(&self) -> std::sync::MutexGuard<'_, Option<Arc<WsClient>>> {
        match self.ws.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn envelope(&self, msg_type: &str, body: Value) -> Value {
        build_envelope(&self.device_id, msg_type, body, None, None)
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.lock_state();
            if state.connection_state == next {
                return;
            }
            debug!(
                device_id = %self.device_id,
                from = ?state.connection_state,
                to = ?next,
                "connection state changed"
            );
            state.connection_state = next;
        }
        if let Some(hook) = &self.lock_hooks().connection_state {
            hook(next);
        }
    }

    // ------------------------------------------------------------------
    // Connect / reconnect
    // ------------------------------------------------------------------

    async fn connect(self: &Arc<Self>) -> bool {
        if self.lock_state().shutdown {
            debug!(device_id = %self.device_id, "connection aborted: shutdown requested");
            return false;
        }

        self.set_state(ConnectionState::Connecting);
        let attempt = self.lock_state().retry_attempts + 1;
        info!(
            device_id = %self.device_id,
            host = %self.host,
            port = self.port,
            attempt,
            "connecting"
        );

        // Stop the previous listener before touching its socket, so a stale
        // listener never observes the teardown as a connection failure.
        if let Some(previous) = self.lock_task(&self.listen_task).take() {
            previous.abort();
        }
        let old = self.lock_task_ws().take();
        if let Some(old) = old {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, old.close()).await;
        }

        let client = match WsClient::connect(
            &self.host,
            self.port,
            crate::transport::ws::DEFAULT_WS_PATH,
            self.config.transport_ping_interval,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(client) => client,
            Err(err) => {
                match &err {
                    ClientError::Timeout(_) => {
                        warn!(device_id = %self.device_id, "connection timeout - device unreachable");
                    }
                    ClientError::Handshake(msg) => {
                        error!(device_id = %self.device_id, %msg, "websocket handshake failed");
                    }
                    other => {
                        warn!(device_id = %self.device_id, err = %other, "connection failed");
                    }
                }
                self.set_state(ConnectionState::Failed);
                self.handle_connection_failure();
                return false;
            }
        };

        if self.lock_state().shutdown {
            // Shutdown raced the dial; do not keep the socket.
            client.close().await;
            return false;
        }

        let client = Arc::new(client);
        let messages = client.take_messages();
        *self.lock_task_ws() = Some(Arc::clone(&client));

        let Some(messages) = messages else {
            // Freshly connected clients always yield a receiver.
            self.set_state(ConnectionState::Failed);
            return false;
        };

        let shared = Arc::clone(self);
        let listener = tokio::spawn(async move {
            shared.listen(messages).await;
        });
        *self.lock_task(&self.listen_task) = Some(listener);

        self.lock_state().retry_attempts = 0;
        true
    }

    fn handle_connection_failure(self: &Arc<Self>) {
        {
            let state = self.lock_state();
            if state.shutdown {
                return;
            }
        }
        let mut reconnect_slot = self.lock_task(&self.reconnect_task);
        if reconnect_slot.as_ref().is_some_and(|t| !t.is_finished()) {
            // Only one reconnect task at a time.
            return;
        }

        let (delay, attempt) = {
            let mut state = self.lock_state();
            let exponent = state.retry_attempts.min(16);
            let delay = self
                .config
                .retry_base_delay
                .saturating_mul(2_u32.saturating_pow(exponent))
                .min(self.config.retry_max_delay);
            state.retry_attempts += 1;
            (delay, state.retry_attempts)
        };

        info!(
            device_id = %self.device_id,
            delay_secs = delay.as_secs(),
            attempt,
            "scheduling reconnect"
        );

        let shared = Arc::clone(self);
        *reconnect_slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Release the slot before dialing so a failed attempt can
            // schedule the next one.
            *shared.lock_task(&shared.reconnect_task) = None;
            shared.connect().await;
        }));
    }

    async fn close(&self) {
        info!(device_id = %self.device_id, "closing session");
        self.lock_state().shutdown = true;

        for slot in [&self.reconnect_task, &self.keepalive_task, &self.listen_task] {
            let task = self.lock_task(slot).take();
            if let Some(task) = task {
                task.abort();
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, async { let _ = task.await; }).await;
            }
        }

        if let Some(timer) = self.lock_task(&self.batch_timer).take() {
            timer.abort();
        }

        if let Some(ws) = self.lock_task_ws().take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close()).await;
        }

        self.set_state(ConnectionState::Disconnected);
    }

    // ------------------------------------------------------------------
    // Listener
    // ------------------------------------------------------------------

    async fn listen(self: Arc<Self>, mut messages: tokio::sync::mpsc::Receiver<WsMessage>) {
        // Authenticate immediately after the socket opens.
        self.send_auth().await;

        while let Some(message) = messages.recv().await {
            match message {
                WsMessage::Text(_) => {
                    let frame = match message.json() {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(device_id = %self.device_id, %err, "invalid message");
                            continue;
                        }
                    };
                    if self.handle_frame(&frame).await {
                        // Terminal auth failure: stop listening, no reconnect.
                        return;
                    }
                }
                WsMessage::Closed => {
                    info!(device_id = %self.device_id, "websocket closed by device");
                    break;
                }
                WsMessage::Error => {
                    error!(device_id = %self.device_id, "websocket error");
                    break;
                }
            }
        }

        // Closed, errored, or the transport was torn down under us (the
        // keepalive force-close): all reconnect unless shutting down.
        if !self.lock_state().shutdown {
            self.set_state(ConnectionState::Failed);
            self.handle_connection_failure();
        }
    }

    /// Route one inbound frame. Returns true when the session is terminally
    /// failed (auth rejected).
    async fn handle_frame(self: &Arc<Self>, frame: &Value) -> bool {
        let msg_type = frame.get("type").and_then(Value::as_str).unwrap_or("");
        let body = frame.get("body").cloned().unwrap_or_else(|| json!({}));

        match msg_type {
            "auth_ok" => self.handle_auth_ok(&body).await,
            "auth_invalid" => {
                error!(device_id = %self.device_id, "authentication rejected");
                self.set_state(ConnectionState::Failed);
                if let Some(hook) = self.lock_hooks().auth_failed.take() {
                    hook();
                }
                return true;
            }
            "layout_applied" => self.handle_layout_applied(&body),
            "input_event" => {
                if let Some(hook) = &self.lock_hooks().input_event {
                    hook(&body);
                }
            }
            "delta_ack" => self.handle_delta_ack(&body),
            "state_request" => self.handle_state_request(&body).await,
            "pong" => self.handle_pong(&body),
            "state_update" => {
                if let Some(hook) = &self.lock_hooks().device_state {
                    hook(&body);
                }
            }
            other => {
                debug!(device_id = %self.device_id, msg_type = %other, "unknown message type");
            }
        }
        false
    }

    async fn send_auth(self: &Arc<Self>) {
        self.set_state(ConnectionState::Authenticating);
        let frame = self.envelope(
            "auth",
            json!({
                "secret": self.token,
                "protocol_versions": SUPPORTED_PROTOCOL_VERSIONS,
            }),
        );
        if self.send_frame(frame, "auth").await {
            debug!(device_id = %self.device_id, "auth sent");
        }
    }

    async fn handle_auth_ok(self: &Arc<Self>, body: &Value) {
        let device_versions = match parse_auth_ok(body) {
            Ok(versions) => versions,
            Err(err) => {
                // Protocol error: log, fall back to v1.
                warn!(device_id = %self.device_id, %err, "bad coordinator_protocol_versions");
                Vec::new()
            }
        };

        // Highest mutual version; v1 when the device advertises nothing.
        let negotiated = SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .copied()
            .filter(|v| device_versions.contains(v))
            .max()
            .unwrap_or(1);

        {
            let mut state = self.lock_state();
            state.device_protocol_versions = device_versions;
            state.protocol_version = Some(negotiated);
        }

        let frame = build_auth_confirmed(&self.device_id);
        self.send_frame(frame, "auth_confirmed").await;

        self.set_state(ConnectionState::Authenticated);
        info!(device_id = %self.device_id, protocol = negotiated, "authenticated");

        // Start keepalive once per connection.
        let mut keepalive_slot = self.lock_task(&self.keepalive_task);
        if keepalive_slot.as_ref().is_none_or(JoinHandle::is_finished) {
            let shared = Arc::clone(self);
            *keepalive_slot = Some(tokio::spawn(async move {
                shared.keepalive_loop().await;
            }));
        }
    }

    fn handle_layout_applied(&self, body: &Value) {
        let layout_id = body.get("layout_id").and_then(Value::as_str);
        let mut state = self.lock_state();
        if layout_id.is_some() && layout_id == state.current_layout_id.as_deref() {
            state.layout_applied = true;
            state.snapshot_sent = false;
            info!(device_id = %self.device_id, layout_id = %layout_id.unwrap_or(""), "layout applied");
        }
    }

    fn handle_delta_ack(&self, body: &Value) {
        let Some(msg_id) = body.get("msg_id").and_then(Value::as_str) else {
            return;
        };
        let mut state = self.lock_state();
        if let Some(ack) = state.pending_delta_acks.remove(msg_id) {
            debug!(
                device_id = %self.device_id,
                seq = ack.seq,
                latency_ms = ack.sent_at.elapsed().as_millis() as u64,
                "delta acked"
            );
        } else {
            // Unknown ack: protocol noise, not an error.
            debug!(device_id = %self.device_id, %msg_id, "ack for unknown delta");
        }
    }

    async fn handle_state_request(self: &Arc<Self>, body: &Value) {
        let binding_ids: Vec<String> = body
            .get("binding_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let states: Vec<Value> = {
            let hooks = self.lock_hooks();
            let Some(hook) = &hooks.state_request else {
                warn!(device_id = %self.device_id, "no state request hook registered");
                return;
            };
            binding_ids
                .iter()
                .filter_map(|binding_id| {
                    hook(binding_id)
                        .map(|state| json!({"binding_id": binding_id, "state": state}))
                })
                .collect()
        };

        if !states.is_empty() {
            self.send_snapshot(states).await;
        }
    }

    fn handle_pong(&self, body: &Value) {
        let Some(ping_id) = body.get("id").and_then(Value::as_u64) else {
            return;
        };
        let mut state = self.lock_state();
        if let Some(sent_at) = state.pending_pings.remove(&ping_id) {
            state.last_pong = Some(Instant::now());
            state.missed_pong_windows = 0;
            debug!(
                device_id = %self.device_id,
                ping_id,
                latency_ms = sent_at.elapsed().as_millis() as u64,
                "pong"
            );
        }
    }

    // ------------------------------------------------------------------
    // Keepalive
    // ------------------------------------------------------------------

    async fn keepalive_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.ping_interval).await;
            if self.lock_state().shutdown {
                break;
            }
            self.send_ping().await;

            let since_pong = self.lock_state().last_pong.map(|t| t.elapsed());
            if let Some(since_pong) = since_pong {
                if since_pong > self.config.ping_interval + self.config.ping_timeout {
                    let windows = {
                        let mut state = self.lock_state();
                        state.missed_pong_windows += 1;
                        state.missed_pong_windows
                    };
                    warn!(
                        device_id = %self.device_id,
                        since_pong_secs = since_pong.as_secs(),
                        windows,
                        "missed pong window"
                    );
                    if windows >= MAX_MISSED_PONG_WINDOWS {
                        error!(device_id = %self.device_id, "connection dead (3 missed pongs)");
                        if let Some(ws) = self.current_ws() {
                            ws.close().await;
                        }
                        break;
                    }
                }
            }
        }
    }

    async fn send_ping(&self) -> bool {
        let ping_id = {
            let mut state = self.lock_state();
            state.ping_id += 1;
            let ping_id = state.ping_id;
            state.pending_pings.insert(ping_id, Instant::now());
            ping_id
        };
        let frame = self.envelope("ping", json!({ "id": ping_id }));
        self.send_frame(frame, "ping").await
    }

    // ------------------------------------------------------------------
    // Batching, snapshots, deltas
    // ------------------------------------------------------------------

    async fn flush_pending_batch(&self) -> bool {
        let (ready, snapshot_sent, changes) = {
            let state = self.lock_state();
            if state.pending_batch.is_empty() {
                return true;
            }
            let changes: Vec<Value> = state
                .pending_batch
                .iter()
                .map(|(binding_id, value)| json!({"binding_id": binding_id, "state": value}))
                .collect();
            (state.ready_for_states(), state.snapshot_sent, changes)
        };

        if !ready {
            debug!(device_id = %self.device_id, "batch skipped: not ready");
            return false;
        }

        let sent = if snapshot_sent {
            self.send_delta(changes).await
        } else {
            // First flush after a layout: full snapshot of held states.
            self.send_snapshot(changes).await
        };

        if sent {
            self.lock_state().pending_batch.clear();
        }
        sent
    }

    async fn send_immediate_update(&self, binding_id: &str, value: Value) -> bool {
        let (ready, snapshot_sent) = {
            let state = self.lock_state();
            (
                state.ready_for_states() && state.current_layout_id.is_some(),
                state.snapshot_sent,
            )
        };
        if !ready {
            return false;
        }

        if snapshot_sent {
            self.send_delta(vec![json!({"binding_id": binding_id, "state": value})])
                .await
        } else {
            // Fold the update into the held states and snapshot everything.
            let states: Vec<Value> = {
                let mut state = self.lock_state();
                state
                    .pending_batch
                    .insert(binding_id.to_string(), value);
                state
                    .pending_batch
                    .iter()
                    .map(|(id, v)| json!({"binding_id": id, "state": v}))
                    .collect()
            };
            let sent = self.send_snapshot(states).await;
            if sent {
                self.lock_state().pending_batch.clear();
            }
            sent
        }
    }

    async fn send_snapshot(&self, states: Vec<Value>) -> bool {
        let Some(layout_id) = self.lock_state().current_layout_id.clone() else {
            return false;
        };
        let count = states.len();
        let frame = self.envelope(
            "snapshot",
            json!({ "layout_id": layout_id, "states": states }),
        );
        if self.send_frame(frame, "snapshot").await {
            self.lock_state().snapshot_sent = true;
            debug!(device_id = %self.device_id, states = count, "snapshot sent");
            true
        } else {
            false
        }
    }

    async fn send_delta(&self, changes: Vec<Value>) -> bool {
        let (layout_id, seq, msg_id) = {
            let mut state = self.lock_state();
            let Some(layout_id) = state.current_layout_id.clone() else {
                return false;
            };
            if state.pending_delta_acks.len() >= MAX_PENDING_DELTA_ACKS {
                warn!(
                    device_id = %self.device_id,
                    pending = state.pending_delta_acks.len(),
                    "delta refused: ack window full"
                );
                return false;
            }
            state.delta_seq += 1;
            let seq = state.delta_seq;
            let msg_id = Uuid::new_v4().to_string();
            state.pending_delta_acks.insert(
                msg_id.clone(),
                PendingDeltaAck {
                    seq,
                    sent_at: Instant::now(),
                },
            );
            (layout_id, seq, msg_id)
        };

        let count = changes.len();
        let frame = self.envelope(
            "delta",
            json!({
                "layout_id": layout_id,
                "seq": seq,
                "msg_id": msg_id,
                "changes": changes,
            }),
        );
        if self.send_frame(frame, "delta").await {
            debug!(device_id = %self.device_id, seq, changes = count, "delta sent");
            true
        } else {
            // The frame never left; free its window slot.
            self.lock_state().pending_delta_acks.remove(&msg_id);
            false
        }
    }

    // ------------------------------------------------------------------
    // Outbound frames
    // ------------------------------------------------------------------

    async fn send_layout(&self, layout_package: &Value) -> bool {
        if self.lock_state().connection_state != ConnectionState::Authenticated {
            error!(device_id = %self.device_id, "cannot send layout: not authenticated");
            return false;
        }
        let Some(layout_id) = layout_package.get("layout_id").and_then(Value::as_str) else {
            error!(device_id = %self.device_id, "layout package missing layout_id");
            return false;
        };
        if !layout_id.starts_with("sha256:") {
            error!(device_id = %self.device_id, %layout_id, "invalid layout_id");
            return false;
        }

        let frame = self.envelope("layout", layout_package.clone());
        if self.send_frame(frame, "layout").await {
            self.lock_state().current_layout_id = Some(layout_id.to_string());
            info!(device_id = %self.device_id, %layout_id, "layout sent");
            true
        } else {
            false
        }
    }

    /// Send one frame; failures are logged and surfaced as `false`, never
    /// panics or crashes the session.
    async fn send_frame(&self, frame: Value, what: &str) -> bool {
        let Some(ws) = self.current_ws() else {
            return false;
        };
        match ws.send_json(&frame).await {
            Ok(()) => true,
            Err(err) => {
                error!(device_id = %self.device_id, %err, "failed to send {what}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_protocol_timing() {
        let config = SessionConfig::default();
        assert_eq!(config.batch_interval, Duration::from_millis(500));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.retry_base_delay, Duration::from_secs(5));
        assert_eq!(config.retry_max_delay, Duration::from_secs(60));
    }

    #[test]
    fn new_session_starts_disconnected() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
        assert_eq!(session.pending_delta_acks(), 0);
    }

    #[tokio::test]
    async fn schedule_coalesces_per_binding() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        session.schedule_state_update("b1", json!("a"));
        session.schedule_state_update("b1", json!("b"));
        session.schedule_state_update("b2", json!(1));

        let state = session.shared.lock_state();
        assert_eq!(state.pending_batch.len(), 2);
        assert_eq!(state.pending_batch["b1"], json!("b"));
    }

    #[tokio::test]
    async fn immediate_update_requires_applied_layout() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        assert!(!session.send_immediate_update("b1", json!("on")).await);
    }

    #[tokio::test]
    async fn layout_requires_authentication() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        let package = json!({"layout_id": "sha256:abc", "layout": {}});
        assert!(!session.send_layout(&package).await);
    }

    #[test]
    fn layout_applied_only_flips_on_matching_id() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        {
            let mut state = session.shared.lock_state();
            state.current_layout_id = Some("sha256:abc".to_string());
        }

        session
            .shared
            .handle_layout_applied(&json!({"layout_id": "sha256:other"}));
        assert!(!session.shared.lock_state().layout_applied);

        session
            .shared
            .handle_layout_applied(&json!({"layout_id": "sha256:abc"}));
        assert!(session.shared.lock_state().layout_applied);
    }

    #[test]
    fn delta_ack_removes_pending_entry() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        {
            let mut state = session.shared.lock_state();
            state.pending_delta_acks.insert(
                "msg-1".to_string(),
                PendingDeltaAck {
                    seq: 1,
                    sent_at: Instant::now(),
                },
            );
        }
        session.shared.handle_delta_ack(&json!({"msg_id": "msg-1"}));
        assert_eq!(session.pending_delta_acks(), 0);

        // Unknown acks are ignored.
        session.shared.handle_delta_ack(&json!({"msg_id": "msg-9"}));
    }

    #[test]
    fn pong_resets_missed_window_counter() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        {
            let mut state = session.shared.lock_state();
            state.pending_pings.insert(7, Instant::now());
            state.missed_pong_windows = 2;
        }
        session.shared.handle_pong(&json!({"id": 7}));
        let state = session.shared.lock_state();
        assert_eq!(state.missed_pong_windows, 0);
        assert!(state.last_pong.is_some());
        assert!(state.pending_pings.is_empty());
    }

    #[test]
    fn state_change_hook_sees_transitions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        let sink = Arc::clone(&seen);
        session.on_connection_state_changed(move |state| {
            sink.lock().unwrap().push(state);
        });

        session.shared.set_state(ConnectionState::Connecting);
        session.shared.set_state(ConnectionState::Connecting); // no-op
        session.shared.set_state(ConnectionState::Failed);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Failed]
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_suppresses_reconnect() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        session.close().await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(session.shared.lock_state().shutdown);

        // Reconnect scheduling after shutdown is a no-op.
        session.shared.handle_connection_failure();
        assert!(session.shared.lock_task(&session.shared.reconnect_task).is_none());

        session.close().await;
    }

    #[tokio::test]
    async fn connect_after_shutdown_is_refused() {
        let session = Session::new("dev-1", "127.0.0.1", 80, "secret", SessionConfig::default());
        session.close().await;
        assert!(!session.connect().await);
    }
}
