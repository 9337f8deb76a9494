use crate::connection::{Connection, LinkState};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use teleop_core::action::ActionRepository;
use teleop_core::command::{parse_ack, CommandPayload, DeviceCommand};
use teleop_core::config::Config;
use teleop_core::motion::MotionRepository;
use teleop_core::recording::RecordingLog;
use teleop_core::{Result, TeleopError};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Reserved code sent in the auth prompt when the registry is full. Never
/// handed out as a real pairing code.
pub const CAPACITY_CODE: &str = "0000";

const OUTBOUND_QUEUE: usize = 32;

/// First message of the device handshake: its motion inventory.
#[derive(Deserialize)]
struct MotionInventory {
    moves: Vec<String>,
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Owns the set of live device connections: pairing, heartbeat liveness,
/// and the per-connection inbound read loop.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    actions: Arc<ActionRepository>,
    motions: Arc<MotionRepository>,
    recording: Arc<RecordingLog>,
    sweep_interval: Duration,
    idle_timeout: Duration,
    pairing_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(
        config: &Config,
        actions: Arc<ActionRepository>,
        motions: Arc<MotionRepository>,
        recording: Arc<RecordingLog>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            actions,
            motions,
            recording,
            sweep_interval: config.sweep_interval(),
            idle_timeout: config.idle_timeout(),
            pairing_capacity: config.pairing_capacity,
        }
    }

    pub async fn get(&self, code: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(code).cloned()
    }

    /// Insert an already-built connection under a caller-chosen code,
    /// bypassing the capacity check and code generation of `pair`. A test
    /// seam for pairing without a socket.
    pub async fn register(&self, conn: Arc<Connection>) {
        self.connections
            .write()
            .await
            .insert(conn.code.clone(), conn);
    }

    /// Drop a connection entirely. All of its locks and pending commands
    /// vanish; dispatch calls still suspended on them observe the closed
    /// signal channel.
    pub async fn remove(&self, code: &str) {
        if let Some(conn) = self.connections.write().await.remove(code) {
            conn.locks.lock().await.clear();
            self.recording.stop(code);
            info!(code = %code, "device connection removed");
        }
    }

    // -----------------------------------------------------------------------
    // Handshake & read loop
    // -----------------------------------------------------------------------

    /// Accept a device socket: writer task, motion-inventory handshake,
    /// pairing, then the inbound demultiplexer until disconnect.
    pub async fn accept(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // The device leads with its capability/motion inventory.
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<MotionInventory>(&text) {
                Ok(inventory) => self.motions.add_motions(&inventory.moves, &self.actions),
                Err(err) => warn!(error = %err, "malformed motion inventory, continuing without it"),
            },
            _ => {
                debug!("device disconnected during handshake");
                drop(tx);
                let _ = writer.await;
                return;
            }
        }

        let Some(conn) = self.pair(tx.clone()).await else {
            warn!("pairing capacity reached, refusing device");
            let payload = CommandPayload::auth(CAPACITY_CODE);
            if let Ok(text) = serde_json::to_string(&payload) {
                let _ = tx.send(Message::Text(text.into())).await;
            }
            drop(tx);
            let _ = writer.await;
            return;
        };

        info!(code = %conn.code, "device paired");
        conn.send_auth_prompt().await;

        self.run_connection(&conn, &mut stream).await;
        drop(tx);
        let _ = writer.await;
    }

    /// Pairing decision: capacity check plus code generation and insert
    /// under one write guard, so two accepts cannot race into the same code.
    /// `None` when the registry is full.
    async fn pair(&self, outbound: mpsc::Sender<Message>) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.pairing_capacity {
            return None;
        }
        let mut rng = rand::thread_rng();
        let code = loop {
            let candidate = format!("{:04}", rng.gen_range(1..=9999));
            if !connections.contains_key(&candidate) {
                break candidate;
            }
        };
        let conn = Arc::new(Connection::new(code.clone(), outbound));
        connections.insert(code, conn.clone());
        Some(conn)
    }

    /// Inbound demultiplexer: route acknowledgements to their pending
    /// commands until the device disconnects or violates the protocol, then
    /// drop the connection. Anything that is not an acknowledgement is
    /// logged and ignored.
    async fn run_connection<S>(&self, conn: &Arc<Connection>, stream: &mut S)
    where
        S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
    {
        while let Some(result) = stream.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(code = %conn.code, error = %err, "read error");
                    break;
                }
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    info!(code = %conn.code, "device closed the connection");
                    break;
                }
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
            };
            let value: serde_json::Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(err) => {
                    warn!(code = %conn.code, error = %err, "unparseable device message");
                    continue;
                }
            };
            match parse_ack(&value) {
                Some(ack) => {
                    if !conn.resolve_ack(ack).await {
                        // The device acknowledged a command this engine never
                        // issued or already retired. Fatal for this connection.
                        warn!(code = %conn.code, id = %ack.id, "acknowledgement for untracked command, dropping connection");
                        break;
                    }
                    debug!(code = %conn.code, id = %ack.id, "command acknowledged");
                }
                None => debug!(code = %conn.code, "non-acknowledgement device message ignored"),
            }
        }

        self.remove(&conn.code).await;
    }

    // -----------------------------------------------------------------------
    // Operator pairing controls
    // -----------------------------------------------------------------------

    /// Claim the device for an operator. Clears any stale on-device visual
    /// fragment as a side effect.
    pub async fn link(&self, code: &str) -> Result<()> {
        let conn = self
            .get(code)
            .await
            .ok_or_else(|| TeleopError::ConnectionNotFound(code.to_string()))?;
        {
            let mut link = conn.link.lock().await;
            if link.linked {
                return Err(TeleopError::AlreadyLinked(code.to_string()));
            }
            link.linked = true;
            link.checked = Some(Instant::now());
        }
        info!(code = %code, "operator linked");
        conn.send_payload(&CommandPayload::control(DeviceCommand::ClearFragment))
            .await;
        Ok(())
    }

    /// Release the device and re-send the auth prompt so a new operator can
    /// claim it.
    pub async fn unlink(&self, code: &str) -> Result<()> {
        let conn = self
            .get(code)
            .await
            .ok_or_else(|| TeleopError::ConnectionNotFound(code.to_string()))?;
        {
            let mut link = conn.link.lock().await;
            if !link.linked {
                return Err(TeleopError::NotLinked(code.to_string()));
            }
            link.linked = false;
            link.checked = Some(Instant::now());
        }
        info!(code = %code, "operator unlinked");
        conn.send_auth_prompt().await;
        Ok(())
    }

    /// 1 if the connection exists and is linked, else 0. Polling while
    /// linked refreshes the heartbeat; this doubles as the keep-alive.
    pub async fn status(&self, code: &str) -> u8 {
        let Some(conn) = self.get(code).await else {
            return 0;
        };
        let mut link = conn.link.lock().await;
        if link.linked {
            link.checked = Some(Instant::now());
            1
        } else {
            0
        }
    }

    /// Direct pass-through `clear_image`, also used on primary dispatch.
    pub async fn clear_visual(&self, code: &str) -> Result<()> {
        let conn = self
            .get(code)
            .await
            .ok_or_else(|| TeleopError::ConnectionNotFound(code.to_string()))?;
        conn.send_clear_visual().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Idle sweep
    // -----------------------------------------------------------------------

    /// Background guard against operators that vanish without unlinking.
    pub fn start_idle_sweep(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.sweep_interval);
            loop {
                ticker.tick().await;
                registry.sweep_idle_once().await;
            }
        });
    }

    /// One sweep pass: force-unlink every connection whose heartbeat is
    /// older than the idle timeout. Never-polled connections (`checked` is
    /// `None`) are left alone.
    pub async fn sweep_idle_once(&self) {
        let connections: Vec<Arc<Connection>> =
            self.connections.read().await.values().cloned().collect();
        for conn in connections {
            let expired = {
                let mut link = conn.link.lock().await;
                match link.checked {
                    Some(at) if at.elapsed() > self.idle_timeout => {
                        *link = LinkState {
                            linked: false,
                            checked: None,
                        };
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                warn!(code = %conn.code, "operator heartbeat stale, force-unlinked");
                self.recording.stop(&conn.code);
                conn.send_auth_prompt().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use teleop_core::action::ActionKind;
    use tokio::time::sleep;
    use uuid::Uuid;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        recording: Arc<RecordingLog>,
        conn: Arc<Connection>,
        outbound: mpsc::Receiver<Message>,
    }

    async fn harness(idle_timeout_ms: u64) -> Harness {
        let config = Config {
            idle_timeout_ms,
            ..Config::default()
        };
        let actions = Arc::new(ActionRepository::new());
        let motions = Arc::new(MotionRepository::new());
        let recording = Arc::new(RecordingLog::new());
        let registry = Arc::new(ConnectionRegistry::new(
            &config,
            actions,
            motions,
            recording.clone(),
        ));
        let (tx, outbound) = mpsc::channel(16);
        let conn = Arc::new(Connection::new("4821".to_string(), tx));
        registry.register(conn.clone()).await;
        Harness {
            registry,
            recording,
            conn,
            outbound,
        }
    }

    fn next_command(outbound: &mut mpsc::Receiver<Message>) -> Option<String> {
        match outbound.try_recv() {
            Ok(Message::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                Some(value["command"].as_str().unwrap().to_string())
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn link_status_unlink_roundtrip() {
        let mut h = harness(30_000).await;

        assert_eq!(h.registry.status("4821").await, 0);

        h.registry.link("4821").await.unwrap();
        assert_eq!(next_command(&mut h.outbound).as_deref(), Some("clear_fragment"));
        assert_eq!(h.registry.status("4821").await, 1);

        let err = h.registry.link("4821").await.unwrap_err();
        assert!(matches!(err, TeleopError::AlreadyLinked(_)));

        h.registry.unlink("4821").await.unwrap();
        assert_eq!(next_command(&mut h.outbound).as_deref(), Some("auth"));
        assert_eq!(h.registry.status("4821").await, 0);

        let err = h.registry.unlink("4821").await.unwrap_err();
        assert!(matches!(err, TeleopError::NotLinked(_)));
    }

    #[tokio::test]
    async fn unknown_code_reports_not_found() {
        let h = harness(30_000).await;
        assert_eq!(h.registry.status("9999").await, 0);
        assert!(matches!(
            h.registry.link("9999").await.unwrap_err(),
            TeleopError::ConnectionNotFound(_)
        ));
        assert!(matches!(
            h.registry.clear_visual("9999").await.unwrap_err(),
            TeleopError::ConnectionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn stale_heartbeat_is_force_unlinked() {
        let mut h = harness(20).await;
        h.registry.link("4821").await.unwrap();
        h.recording.start("4821").unwrap();
        assert_eq!(next_command(&mut h.outbound).as_deref(), Some("clear_fragment"));

        sleep(Duration::from_millis(50)).await;
        h.registry.sweep_idle_once().await;

        assert_eq!(h.registry.status("4821").await, 0);
        assert!(h.conn.link.lock().await.checked.is_none());
        assert!(!h.recording.is_recording("4821"));
        assert_eq!(next_command(&mut h.outbound).as_deref(), Some("auth"));
    }

    #[tokio::test]
    async fn fresh_heartbeat_survives_the_sweep() {
        let h = harness(30_000).await;
        h.registry.link("4821").await.unwrap();
        h.registry.sweep_idle_once().await;
        assert_eq!(h.registry.status("4821").await, 1);
    }

    #[tokio::test]
    async fn never_polled_connections_are_left_alone() {
        let mut h = harness(20).await;
        sleep(Duration::from_millis(50)).await;
        h.registry.sweep_idle_once().await;

        assert!(h.registry.get("4821").await.is_some());
        assert!(next_command(&mut h.outbound).is_none());
    }

    fn bare_registry(config: &Config) -> Arc<ConnectionRegistry> {
        let actions = Arc::new(ActionRepository::new());
        let motions = Arc::new(MotionRepository::new());
        let recording = Arc::new(RecordingLog::new());
        Arc::new(ConnectionRegistry::new(config, actions, motions, recording))
    }

    #[tokio::test]
    async fn pairing_is_refused_at_capacity() {
        let config = Config {
            pairing_capacity: 1,
            ..Config::default()
        };
        let registry = bare_registry(&config);

        let (tx, _rx) = mpsc::channel(1);
        assert!(registry.pair(tx).await.is_some());

        let (tx, _rx) = mpsc::channel(1);
        assert!(registry.pair(tx).await.is_none());
    }

    #[tokio::test]
    async fn pairing_rerolls_taken_codes_and_never_uses_the_reserved_one() {
        let config = Config {
            pairing_capacity: 10_000,
            ..Config::default()
        };
        let registry = bare_registry(&config);

        // Occupy every drawable code except one. The only valid outcome is
        // that single free code; returning "0000" or any taken code would
        // fail the assertion.
        for n in 1..=9999u32 {
            if n == 4821 {
                continue;
            }
            let (tx, _rx) = mpsc::channel(1);
            registry
                .register(Arc::new(Connection::new(format!("{n:04}"), tx)))
                .await;
        }

        let (tx, _rx) = mpsc::channel(1);
        let conn = registry.pair(tx).await.expect("one code left");
        assert_eq!(conn.code, "4821");
        assert!(registry.get("4821").await.is_some());
    }

    #[tokio::test]
    async fn untracked_ack_drops_the_connection() {
        let h = harness(30_000).await;
        let tracked = Uuid::new_v4();
        let rx = {
            let mut state = h.conn.locks.lock().await;
            state.acquire(ActionKind::Utterance, tracked, HashSet::new())
        };

        let bogus = serde_json::json!({ "action_success": Uuid::new_v4() }).to_string();
        let late = serde_json::json!({ "action_success": tracked }).to_string();
        let mut stream = futures_util::stream::iter(vec![
            Ok::<_, axum::Error>(Message::Text(bogus.into())),
            Ok(Message::Text(late.into())),
        ]);
        h.registry.run_connection(&h.conn, &mut stream).await;

        // The loop ended at the violation: the connection is gone and the
        // later, valid acknowledgement was never processed.
        assert!(h.registry.get("4821").await.is_none());
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn non_acknowledgement_messages_are_skipped() {
        let h = harness(30_000).await;
        let tracked = Uuid::new_v4();
        let rx = {
            let mut state = h.conn.locks.lock().await;
            state.acquire(ActionKind::Utterance, tracked, HashSet::new())
        };

        let ack = serde_json::json!({ "action_success": tracked }).to_string();
        let mut stream = futures_util::stream::iter(vec![
            Ok::<_, axum::Error>(Message::Text(
                serde_json::json!({ "battery": 93 }).to_string().into(),
            )),
            Ok(Message::Text("not json at all".into())),
            Ok(Message::Text(ack.into())),
        ]);
        h.registry.run_connection(&h.conn, &mut stream).await;

        // The acknowledgement after the noise still landed; the exhausted
        // stream then tore the connection down.
        rx.await.expect("acknowledgement delivered");
        assert!(h.registry.get("4821").await.is_none());
    }

    #[tokio::test]
    async fn remove_clears_locks_and_recording() {
        let h = harness(30_000).await;
        h.recording.start("4821").unwrap();
        let rx = {
            let mut state = h.conn.locks.lock().await;
            state.acquire(ActionKind::Utterance, Uuid::new_v4(), HashSet::new())
        };

        h.registry.remove("4821").await;

        assert!(h.registry.get("4821").await.is_none());
        assert!(rx.await.is_err());
        assert!(!h.recording.is_recording("4821"));
    }
}
