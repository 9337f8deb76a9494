use crate::connection::{Connection, LockState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use teleop_core::action::{Action, ActionKind, ActionRepository};
use teleop_core::command::{AckOutcome, CommandPayload, DeviceCommand};
use teleop_core::motion::MotionRepository;
use teleop_core::recording::RecordingLog;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CommandReply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Success,
    Error,
    Warning,
    RetryRequired,
}

impl ReplyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyStatus::Success => "action_success",
            ReplyStatus::Error => "action_error",
            ReplyStatus::Warning => "action_warning",
            ReplyStatus::RetryRequired => "action_retry_required",
        }
    }
}

/// Outcome of one dispatch call, keyed by the action id on the wire:
/// `{"<id>": "<status>", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub id: Uuid,
    pub status: ReplyStatus,
    pub message: String,
}

impl CommandReply {
    fn new(id: Uuid, status: ReplyStatus, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            self.id.to_string(): self.status.as_str(),
            "message": self.message,
        })
    }
}

// ---------------------------------------------------------------------------
// DispatchEngine
// ---------------------------------------------------------------------------

/// The command-dispatch protocol: per-kind exclusivity locks, composite
/// fan-out, and the override/retry workaround for abandoned locks.
pub struct DispatchEngine {
    actions: Arc<ActionRepository>,
    motions: Arc<MotionRepository>,
    recording: Arc<RecordingLog>,
    override_window: Duration,
}

impl DispatchEngine {
    pub fn new(
        actions: Arc<ActionRepository>,
        motions: Arc<MotionRepository>,
        recording: Arc<RecordingLog>,
        override_window: Duration,
    ) -> Self {
        Self {
            actions,
            motions,
            recording,
            override_window,
        }
    }

    /// Dispatch `action_id` on `conn` and wait for the outcome.
    ///
    /// Contended locks yield a "please wait" warning on first collision. A
    /// collision against a lock that has already blocked someone and is
    /// older than the override window breaks that lock, but deliberately
    /// does NOT admit the new command in the same call: the caller gets
    /// `action_retry_required` and must resend. Collapsing the two steps
    /// corrupted dispatch state in the predecessor of this engine, and the
    /// retry reply is part of the client protocol now.
    pub async fn dispatch(self: &Arc<Self>, conn: &Arc<Connection>, action_id: Uuid) -> CommandReply {
        let Some(action) = self.actions.get(action_id) else {
            return CommandReply::new(
                action_id,
                ReplyStatus::Error,
                format!("Faulty action ID: {action_id}"),
            );
        };
        let kind = action.kind();

        // Lock phase: one critical section over the whole check-and-acquire.
        let (receiver, children) = {
            let mut state = conn.locks.lock().await;

            if let Some(reply) = self.check_same_kind(&mut state, &action) {
                return reply;
            }

            let children = match &action {
                Action::Composite(composite) => {
                    let children = composite.children();
                    if children.is_empty() {
                        return CommandReply::new(
                            action_id,
                            ReplyStatus::Warning,
                            "MultiAction has no children to execute!",
                        );
                    }
                    if let Some(reply) = self.check_child_kinds(&mut state, &action, &children) {
                        return reply;
                    }
                    children
                }
                _ => Vec::new(),
            };

            // Register the full child set before any worker can run, so a
            // fast child cannot finish before a slower sibling is known.
            let child_ids: HashSet<Uuid> = children.iter().map(Action::id).collect();
            let receiver = state.acquire(kind, action_id, child_ids);
            (receiver, children)
        };

        tracing::debug!(code = %conn.code, id = %action_id, kind = %kind, "command locked");

        if self.recording.is_recording(&conn.code) && !self.recording.is_paused() {
            self.recording.log_command(action_id);
        }

        // Screen-clear is strictly ordered before the payload for primary
        // actions; both go through the same outbound queue.
        if action.is_primary()
            && !conn
                .send_payload(&CommandPayload::control(DeviceCommand::ClearImage))
                .await
        {
            return self.abort_send(conn, kind, action_id).await;
        }

        if children.is_empty() {
            let Some(payload) = action.command_payload() else {
                // Unreachable for single kinds; composites always fan out.
                return self.abort_send(conn, kind, action_id).await;
            };
            if !conn.send_payload(&payload).await {
                return self.abort_send(conn, kind, action_id).await;
            }
        } else {
            for child in &children {
                let engine = Arc::clone(self);
                let conn = Arc::clone(conn);
                let child_id = child.id();
                tokio::spawn(async move {
                    engine.run_child(&conn, child_id, action_id).await;
                });
            }
        }

        // Suspend until an acknowledgement, a worker completing the child
        // set, or a forced release signals us.
        let signalled = receiver.await.is_ok();

        let entry = {
            let mut state = conn.locks.lock().await;
            state.release(kind, action_id)
        };
        let Some(entry) = entry else {
            // Teardown cleared the table while we were suspended.
            return CommandReply::new(
                action_id,
                ReplyStatus::Error,
                "connection closed before the command completed",
            );
        };
        if !signalled {
            return CommandReply::new(
                action_id,
                ReplyStatus::Error,
                "connection closed before the command completed",
            );
        }

        if kind == ActionKind::Composite {
            let message = entry
                .errors
                .iter()
                .filter(|entry| !entry.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            let status = if message.is_empty() {
                ReplyStatus::Success
            } else {
                ReplyStatus::Error
            };
            CommandReply::new(action_id, status, message)
        } else {
            match entry.result {
                Some(AckOutcome::Success) => {
                    CommandReply::new(action_id, ReplyStatus::Success, "")
                }
                Some(AckOutcome::Error) => CommandReply::new(action_id, ReplyStatus::Error, ""),
                None => CommandReply::new(action_id, ReplyStatus::Error, "command overridden"),
            }
        }
    }

    /// Same-kind lock inspection, step one of the dispatch protocol. Returns
    /// a reply when the dispatch must end here.
    fn check_same_kind(&self, state: &mut LockState, action: &Action) -> Option<CommandReply> {
        let kind = action.kind();
        let held = state
            .locks
            .get(&kind)
            .map(|l| (l.owner, l.has_blocked, l.since));
        let (owner, has_blocked, since) = held?;

        if has_blocked && since.elapsed() > self.override_window {
            // Abandoned lock. Break it and demand an explicit retry.
            if kind == ActionKind::Composite {
                // Children release the parent on their own; fire every
                // locked single kind. If none is left (children already
                // done, parent not yet released), fire the parent itself.
                let mut fired = false;
                for &child_kind in ActionKind::singles() {
                    fired |= state.fire_kind(child_kind);
                }
                if !fired {
                    if let Some(entry) = state.pending.get_mut(&owner) {
                        entry.fire();
                    }
                }
            } else if let Some(entry) = state.pending.get_mut(&owner) {
                entry.fire();
            }
            tracing::warn!(id = %action.id(), kind = %kind, blocker = %owner, "abandoned lock broken, retry required");
            Some(CommandReply::new(
                action.id(),
                ReplyStatus::RetryRequired,
                "redo required",
            ))
        } else {
            if let Some(lock) = state.locks.get_mut(&kind) {
                lock.has_blocked = true;
            }
            Some(CommandReply::new(
                action.id(),
                ReplyStatus::Warning,
                "Please wait for the previous command to finish!",
            ))
        }
    }

    /// Per-kind lock checks for the kinds a composite actually uses. The
    /// parent-kind check above does not bypass these.
    fn check_child_kinds(
        &self,
        state: &mut LockState,
        action: &Action,
        children: &[Action],
    ) -> Option<CommandReply> {
        let mut lockbreak = false;
        for child_kind in children.iter().map(Action::kind) {
            let held = state
                .locks
                .get(&child_kind)
                .map(|l| (l.owner, l.has_blocked, l.since));
            let Some((_, has_blocked, since)) = held else {
                continue;
            };
            if has_blocked && since.elapsed() > self.override_window {
                state.fire_kind(child_kind);
                lockbreak = true;
            } else {
                if let Some(lock) = state.locks.get_mut(&child_kind) {
                    lock.has_blocked = true;
                }
                return Some(CommandReply::new(
                    action.id(),
                    ReplyStatus::Error,
                    "A child command is blocked, please wait for the previous command to finish!",
                ));
            }
        }
        if lockbreak {
            tracing::warn!(id = %action.id(), "abandoned child locks broken, retry required");
            return Some(CommandReply::new(
                action.id(),
                ReplyStatus::RetryRequired,
                "redo required",
            ));
        }
        None
    }

    /// The outbound queue hung up mid-dispatch: undo the lock and report.
    async fn abort_send(
        &self,
        conn: &Arc<Connection>,
        kind: ActionKind,
        action_id: Uuid,
    ) -> CommandReply {
        let mut state = conn.locks.lock().await;
        state.release(kind, action_id);
        CommandReply::new(
            action_id,
            ReplyStatus::Error,
            "connection closed before the command completed",
        )
    }

    // -----------------------------------------------------------------------
    // Sub-command worker
    // -----------------------------------------------------------------------

    /// Run one composite child like a single dispatch, then report into the
    /// shared parent record. Lock contention was already cleared by the
    /// parent before this worker was spawned.
    pub(crate) async fn run_child(&self, conn: &Arc<Connection>, child_id: Uuid, parent_id: Uuid) {
        let Some(action) = self.actions.get(child_id) else {
            self.finish_child(conn, parent_id, child_id, format!("Faulty action ID: {child_id}"))
                .await;
            return;
        };
        let kind = action.kind();

        // A motion the device never declared would hang forever: the device
        // cannot acknowledge what it cannot perform. Fail it up front.
        if kind == ActionKind::Motion && !self.motions.known_by_id(child_id) {
            tracing::warn!(code = %conn.code, id = %child_id, "unknown motion, child failed without device traffic");
            self.finish_child(conn, parent_id, child_id, kind.as_str().to_string())
                .await;
            return;
        }

        let Some(payload) = action.command_payload() else {
            self.finish_child(conn, parent_id, child_id, kind.as_str().to_string())
                .await;
            return;
        };

        let receiver = {
            let mut state = conn.locks.lock().await;
            state.acquire(kind, child_id, HashSet::new())
        };

        if !conn.send_payload(&payload).await {
            let mut state = conn.locks.lock().await;
            state.release(kind, child_id);
            Self::report_to_parent(&mut state, parent_id, child_id, kind.as_str().to_string());
            return;
        }

        let _ = receiver.await;

        let mut state = conn.locks.lock().await;
        let result = state.release(kind, child_id).and_then(|entry| entry.result);
        let slot = match result {
            Some(AckOutcome::Success) => String::new(),
            // Device-reported error or forced release both count as failure.
            _ => kind.as_str().to_string(),
        };
        Self::report_to_parent(&mut state, parent_id, child_id, slot);
    }

    async fn finish_child(
        &self,
        conn: &Arc<Connection>,
        parent_id: Uuid,
        child_id: Uuid,
        slot: String,
    ) {
        let mut state = conn.locks.lock().await;
        Self::report_to_parent(&mut state, parent_id, child_id, slot);
    }

    /// Append the child's error slot, retire it from the parent's child set,
    /// and signal the parent once the set drains. Must run under the lock
    /// mutex so two workers cannot both observe a non-empty set.
    fn report_to_parent(state: &mut LockState, parent_id: Uuid, child_id: Uuid, slot: String) {
        if let Some(parent) = state.pending.get_mut(&parent_id) {
            parent.errors.push(slot);
            parent.children.remove(&child_id);
            if parent.children.is_empty() {
                parent.fire();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
