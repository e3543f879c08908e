//! Operator control of the migration phase.
//!
//! The phase lives in a `watch` channel. The router holds a [`PhaseHandle`]
//! and copies the value once at the start of every call. Only the
//! [`PhaseController`] can change it, and only along the forward path.
//! Entering `TARGET_ONLY` also requires an empty shadow queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};

use storeshift_core::migration::{MigrationPhase, PhaseError};

use super::queue::{QueueError, ShadowQueue};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Cannot access phase file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("{pending} shadow writes are still queued, run the backfill before leaving dual writing")]
    PendingShadowWrites { pending: u64 },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Read-only view of the current phase.
#[derive(Debug, Clone)]
pub struct PhaseHandle {
    receiver: watch::Receiver<MigrationPhase>,
}

impl PhaseHandle {
    /// A handle pinned to one phase, for tests and one-shot commands.
    pub fn fixed(phase: MigrationPhase) -> Self {
        let (_sender, receiver) = watch::channel(phase);
        Self { receiver }
    }

    pub fn current(&self) -> MigrationPhase {
        *self.receiver.borrow()
    }
}

/// Owns the phase and validates every change.
pub struct PhaseController {
    sender: watch::Sender<MigrationPhase>,
    phase_file: Option<PathBuf>,
    queue: Option<Arc<dyn ShadowQueue>>,
}

impl PhaseController {
    pub fn new(initial: MigrationPhase) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            phase_file: None,
            queue: None,
        }
    }

    /// Enables [`reload`](Self::reload) from the given file.
    pub fn with_phase_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.phase_file = Some(path.into());
        self
    }

    /// Blocks the move to `TARGET_ONLY` while this queue holds entries.
    pub fn with_queue(mut self, queue: Arc<dyn ShadowQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn handle(&self) -> PhaseHandle {
        PhaseHandle {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn current(&self) -> MigrationPhase {
        *self.sender.borrow()
    }

    /// Moves to `target` if the transition is legal and, when `target` is
    /// `TARGET_ONLY`, the shadow queue is drained.
    ///
    /// Writes already in flight may still enqueue after the switch. The
    /// replicator applies those without overwriting later records.
    pub async fn apply(&self, target: MigrationPhase) -> Result<MigrationPhase, ControllerError> {
        if target == MigrationPhase::TargetOnly && self.current() != MigrationPhase::TargetOnly {
            if let Some(queue) = &self.queue {
                ensure_drained(queue.as_ref()).await?;
            }
        }
        Ok(self.transition(target)?)
    }

    /// Validation and the update happen under the channel's lock, so two
    /// concurrent callers cannot both advance from the same phase.
    fn transition(&self, target: MigrationPhase) -> Result<MigrationPhase, PhaseError> {
        let mut outcome = Ok(target);
        let mut previous = target;
        let changed = self.sender.send_if_modified(|phase| {
            previous = *phase;
            match phase.transition_to(target) {
                Ok(next) => {
                    let changed = *phase != next;
                    *phase = next;
                    changed
                }
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            }
        });

        if changed {
            tracing::info!(from = %previous, to = %target, "Migration phase changed");
        }
        outcome
    }

    /// Moves one step forward.
    pub async fn advance(&self) -> Result<MigrationPhase, ControllerError> {
        let current = self.current();
        let next = current.next().ok_or(PhaseError::Final(current))?;
        self.apply(next).await
    }

    /// Applies the phase stored in the phase file, if one is configured and present.
    pub async fn reload(&self) -> Result<Option<MigrationPhase>, ControllerError> {
        let Some(path) = &self.phase_file else {
            return Ok(None);
        };
        match read_phase_file(path).await? {
            Some(phase) => Ok(Some(self.apply(phase).await?)),
            None => Ok(None),
        }
    }

    /// Polls the phase file until shutdown.
    ///
    /// Illegal transitions found in the file are logged and ignored.
    pub async fn watch_file(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        if self.phase_file.is_none() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.reload().await {
                        tracing::warn!(error = %err, "Ignoring phase file");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Phase file watcher shutting down");
                    break;
                }
            }
        }
    }
}

async fn ensure_drained(queue: &dyn ShadowQueue) -> Result<(), ControllerError> {
    let pending = queue.len().await?;
    if pending > 0 {
        return Err(ControllerError::PendingShadowWrites { pending });
    }
    Ok(())
}

/// Reads a phase from a file holding its name. A missing file yields `None`.
pub async fn read_phase_file(path: &Path) -> Result<Option<MigrationPhase>, ControllerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents.parse()?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ControllerError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Validates the move from the file's current phase (or `fallback` when the
/// file is absent) to `target`, then writes `target` to the file. Moving to
/// `TARGET_ONLY` is refused while `queue` holds entries.
pub async fn write_phase_file(
    path: &Path,
    fallback: MigrationPhase,
    target: MigrationPhase,
    queue: &dyn ShadowQueue,
) -> Result<MigrationPhase, ControllerError> {
    let current = read_phase_file(path).await?.unwrap_or(fallback);
    let next = current.transition_to(target)?;
    if next == MigrationPhase::TargetOnly && current != MigrationPhase::TargetOnly {
        ensure_drained(queue).await?;
    }
    tokio::fs::write(path, format!("{next}\n"))
        .await
        .map_err(|source| ControllerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::queue::InMemoryShadowQueue;
    use storeshift_core::migration::{Mutation, Operation, ShadowWrite};
    use storeshift_core::model::{Entity, User};

    fn queued_delete() -> ShadowWrite {
        let user = User::new("Ana", "a@x.com", "h1");
        ShadowWrite::new(user.entity_key(), Operation::Delete, Mutation::Delete)
    }

    #[tokio::test]
    async fn test_advance_walks_every_phase() {
        let controller = PhaseController::new(MigrationPhase::SourceOnly);
        let handle = controller.handle();

        assert_eq!(controller.advance().await.unwrap(), MigrationPhase::DualWrite);
        assert_eq!(handle.current(), MigrationPhase::DualWrite);
        assert_eq!(
            controller.advance().await.unwrap(),
            MigrationPhase::DualWriteVerify
        );
        assert_eq!(controller.advance().await.unwrap(), MigrationPhase::TargetOnly);
        assert!(matches!(
            controller.advance().await,
            Err(ControllerError::Phase(PhaseError::Final(MigrationPhase::TargetOnly)))
        ));
    }

    #[tokio::test]
    async fn test_apply_rejects_skip_and_reversal() {
        let controller = PhaseController::new(MigrationPhase::DualWrite);

        assert!(matches!(
            controller.apply(MigrationPhase::TargetOnly).await,
            Err(ControllerError::Phase(PhaseError::Skip { .. }))
        ));
        assert!(matches!(
            controller.apply(MigrationPhase::SourceOnly).await,
            Err(ControllerError::Phase(PhaseError::Backward { .. }))
        ));
        assert_eq!(controller.current(), MigrationPhase::DualWrite);
    }

    #[tokio::test]
    async fn test_apply_current_phase_is_noop() {
        let controller = PhaseController::new(MigrationPhase::DualWriteVerify);
        assert_eq!(
            controller
                .apply(MigrationPhase::DualWriteVerify)
                .await
                .unwrap(),
            MigrationPhase::DualWriteVerify
        );
    }

    #[tokio::test]
    async fn test_target_only_waits_for_empty_queue() {
        let queue = InMemoryShadowQueue::new();
        let controller =
            PhaseController::new(MigrationPhase::DualWrite).with_queue(Arc::new(queue.clone()));
        let seq = queue.enqueue(queued_delete()).await.unwrap();

        assert_eq!(
            controller.advance().await.unwrap(),
            MigrationPhase::DualWriteVerify
        );
        assert!(matches!(
            controller.advance().await,
            Err(ControllerError::PendingShadowWrites { pending: 1 })
        ));
        assert_eq!(controller.current(), MigrationPhase::DualWriteVerify);

        queue.ack(seq).await.unwrap();
        assert_eq!(controller.advance().await.unwrap(), MigrationPhase::TargetOnly);
    }

    #[tokio::test]
    async fn test_unreadable_queue_blocks_target_only() {
        let queue = InMemoryShadowQueue::new();
        queue.set_unavailable(true);
        let controller = PhaseController::new(MigrationPhase::DualWriteVerify)
            .with_queue(Arc::new(queue));

        assert!(matches!(
            controller.advance().await,
            Err(ControllerError::Queue(_))
        ));
        assert_eq!(controller.current(), MigrationPhase::DualWriteVerify);
    }

    #[test]
    fn test_fixed_handle() {
        let handle = PhaseHandle::fixed(MigrationPhase::TargetOnly);
        assert_eq!(handle.current(), MigrationPhase::TargetOnly);
    }

    #[tokio::test]
    async fn test_phase_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phase");
        let queue = InMemoryShadowQueue::new();

        assert_eq!(read_phase_file(&path).await.unwrap(), None);

        let written = write_phase_file(
            &path,
            MigrationPhase::SourceOnly,
            MigrationPhase::DualWrite,
            &queue,
        )
        .await
        .unwrap();
        assert_eq!(written, MigrationPhase::DualWrite);
        assert_eq!(
            read_phase_file(&path).await.unwrap(),
            Some(MigrationPhase::DualWrite)
        );

        let skipped = write_phase_file(
            &path,
            MigrationPhase::SourceOnly,
            MigrationPhase::TargetOnly,
            &queue,
        )
        .await;
        assert!(matches!(
            skipped,
            Err(ControllerError::Phase(PhaseError::Skip { .. }))
        ));
    }

    #[tokio::test]
    async fn test_phase_file_refuses_target_only_with_queued_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phase");
        tokio::fs::write(&path, "DUAL_WRITE_VERIFY\n").await.unwrap();
        let queue = InMemoryShadowQueue::new();
        queue.enqueue(queued_delete()).await.unwrap();

        let refused = write_phase_file(
            &path,
            MigrationPhase::SourceOnly,
            MigrationPhase::TargetOnly,
            &queue,
        )
        .await;

        assert!(matches!(
            refused,
            Err(ControllerError::PendingShadowWrites { pending: 1 })
        ));
        assert_eq!(
            read_phase_file(&path).await.unwrap(),
            Some(MigrationPhase::DualWriteVerify)
        );
    }

    #[tokio::test]
    async fn test_reload_applies_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phase");
        tokio::fs::write(&path, "dual-write\n").await.unwrap();

        let controller = PhaseController::new(MigrationPhase::SourceOnly).with_phase_file(&path);
        let handle = controller.handle();

        assert_eq!(
            controller.reload().await.unwrap(),
            Some(MigrationPhase::DualWrite)
        );
        assert_eq!(handle.current(), MigrationPhase::DualWrite);
    }
}
