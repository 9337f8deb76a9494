use axum::extract::ws::Message;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use teleop_core::action::ActionKind;
use teleop_core::command::{Ack, AckOutcome, CommandPayload, DeviceCommand};
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Lock manager
// ---------------------------------------------------------------------------

/// Exclusivity lock for one action kind.
#[derive(Debug)]
pub struct KindLock {
    pub owner: Uuid,
    /// A later dispatch already collided with this lock. Only then does the
    /// override window start counting for forced release.
    pub has_blocked: bool,
    pub since: Instant,
}

/// One entry per in-flight dispatch (parent or child). Exists in the table
/// exactly while its device command is outstanding.
#[derive(Debug)]
pub struct PendingCommand {
    signal: Option<oneshot::Sender<()>>,
    pub result: Option<AckOutcome>,
    /// Unfinished child ids; composite parents only.
    pub children: HashSet<Uuid>,
    /// One slot per finished child: empty string on success, the failing
    /// kind name (or a lookup error) otherwise.
    pub errors: Vec<String>,
}

impl PendingCommand {
    fn new(signal: oneshot::Sender<()>, children: HashSet<Uuid>) -> Self {
        Self {
            signal: Some(signal),
            result: None,
            children,
            errors: Vec::new(),
        }
    }

    /// Trigger the completion signal. At most once; later calls are no-ops,
    /// so the override path and the demultiplexer can never double-fire.
    pub fn fire(&mut self) {
        if let Some(signal) = self.signal.take() {
            let _ = signal.send(());
        }
    }
}

/// Per-connection lock and pending-command state. Held behind a single
/// mutex so every lock check plus table update is one atomic step.
#[derive(Debug, Default)]
pub struct LockState {
    pub locks: HashMap<ActionKind, KindLock>,
    pub pending: HashMap<Uuid, PendingCommand>,
}

impl LockState {
    /// Acquire `kind` for `owner` and register its pending entry. The caller
    /// must have established that the kind is free.
    pub fn acquire(
        &mut self,
        kind: ActionKind,
        owner: Uuid,
        children: HashSet<Uuid>,
    ) -> oneshot::Receiver<()> {
        self.locks.insert(
            kind,
            KindLock {
                owner,
                has_blocked: false,
                since: Instant::now(),
            },
        );
        let (signal, receiver) = oneshot::channel();
        self.pending.insert(owner, PendingCommand::new(signal, children));
        receiver
    }

    /// Release `kind` and retire `owner`'s pending entry in one step. The
    /// owner check guards against freeing a lock a retried dispatch has
    /// already re-acquired.
    pub fn release(&mut self, kind: ActionKind, owner: Uuid) -> Option<PendingCommand> {
        if self.locks.get(&kind).map(|l| l.owner) == Some(owner) {
            self.locks.remove(&kind);
        }
        self.pending.remove(&owner)
    }

    /// Force-signal the pending command holding `kind`, if any. The awaiting
    /// dispatch wakes up, observes the missing result, and releases its own
    /// lock and entry.
    pub fn fire_kind(&mut self, kind: ActionKind) -> bool {
        if let Some(owner) = self.locks.get(&kind).map(|l| l.owner) {
            if let Some(entry) = self.pending.get_mut(&owner) {
                entry.fire();
                return true;
            }
        }
        false
    }

    /// Drop everything. Dropping the pending entries drops their signal
    /// senders, which wakes every awaiting dispatch with a closed channel.
    pub fn clear(&mut self) {
        self.locks.clear();
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Operator pairing state. Written by link/unlink/status polls and by the
/// idle sweep, all through the same mutex.
#[derive(Debug, Default)]
pub struct LinkState {
    pub linked: bool,
    /// Last heartbeat. `None` until the first status poll, and cleared again
    /// by forced unlink; never-polled connections are never swept.
    pub checked: Option<Instant>,
}

/// One paired device socket: pairing code, outbound channel (drained into
/// the WebSocket sink by the writer task), link state, and the lock manager.
pub struct Connection {
    pub code: String,
    outbound: mpsc::Sender<Message>,
    pub link: Mutex<LinkState>,
    pub locks: Mutex<LockState>,
}

impl Connection {
    pub fn new(code: String, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            code,
            outbound,
            link: Mutex::new(LinkState::default()),
            locks: Mutex::new(LockState::default()),
        }
    }

    /// Serialize and queue a payload for the device. `false` when the
    /// connection is gone (writer task hung up).
    pub async fn send_payload(&self, payload: &CommandPayload) -> bool {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(code = %self.code, error = %err, "payload serialization failed");
                return false;
            }
        };
        self.outbound.send(Message::Text(text.into())).await.is_ok()
    }

    /// Re-send the authentication prompt so a (new) operator can claim the
    /// device under this connection's code.
    pub async fn send_auth_prompt(&self) -> bool {
        self.send_payload(&CommandPayload::auth(&self.code)).await
    }

    pub async fn send_clear_visual(&self) -> bool {
        self.send_payload(&CommandPayload::control(DeviceCommand::ClearImage))
            .await
    }

    /// Resolve a device acknowledgement against the pending-command table.
    /// `false` means the ack references an untracked command id, which is a
    /// protocol violation and fatal for this connection's read loop.
    pub async fn resolve_ack(&self, ack: Ack) -> bool {
        let mut state = self.locks.lock().await;
        match state.pending.get_mut(&ack.id) {
            Some(entry) => {
                entry.result = Some(ack.outcome);
                entry.fire();
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_requires_matching_owner() {
        let mut state = LockState::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let _rx = state.acquire(ActionKind::Motion, first, HashSet::new());
        // A retried dispatch re-acquires before the broken one cleans up.
        state.locks.remove(&ActionKind::Motion);
        let _rx2 = state.acquire(ActionKind::Motion, second, HashSet::new());

        state.release(ActionKind::Motion, first);
        assert_eq!(
            state.locks.get(&ActionKind::Motion).map(|l| l.owner),
            Some(second)
        );
    }

    #[tokio::test]
    async fn fire_is_idempotent() {
        let mut state = LockState::default();
        let owner = Uuid::new_v4();
        let rx = state.acquire(ActionKind::Url, owner, HashSet::new());

        assert!(state.fire_kind(ActionKind::Url));
        // Second trigger must not panic or signal twice.
        assert!(state.fire_kind(ActionKind::Url));
        rx.await.expect("signal delivered once");
    }

    #[tokio::test]
    async fn clear_wakes_waiters_with_closed_channel() {
        let mut state = LockState::default();
        let rx = state.acquire(ActionKind::Image, Uuid::new_v4(), HashSet::new());
        state.clear();
        assert!(rx.await.is_err());
        assert!(state.locks.is_empty());
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn resolve_ack_rejects_untracked_ids() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new("1234".to_string(), tx);
        let ack = Ack {
            id: Uuid::new_v4(),
            outcome: AckOutcome::Success,
        };
        assert!(!conn.resolve_ack(ack).await);
    }

    #[tokio::test]
    async fn resolve_ack_stores_result_and_signals() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new("1234".to_string(), tx);
        let id = Uuid::new_v4();
        let rx = {
            let mut state = conn.locks.lock().await;
            state.acquire(ActionKind::Utterance, id, HashSet::new())
        };

        assert!(
            conn.resolve_ack(Ack {
                id,
                outcome: AckOutcome::Error,
            })
            .await
        );
        rx.await.expect("signal fired");
        let state = conn.locks.lock().await;
        assert_eq!(state.pending[&id].result, Some(AckOutcome::Error));
    }
}
