//! Reentrant edit sessions with taint-and-rollback.
//!
//! The [`EditManager`] tracks at most one transaction per workspace. The
//! thread that began it owns it: further `begin` calls from that thread nest
//! (the depth grows and the transaction is shared), while calls from other
//! threads fail fast with [`EditError::WorkspaceLockConflict`].
//!
//! Every [`EditSession`] handle ends with exactly one `commit` or `rollback`
//! and each of those lowers the depth by one. Only the outermost handle, the
//! one that began the transaction, reaches the engine. It cannot commit while
//! nested handles are open ([`EditError::NestedOpen`]); its rollback ends the
//! transaction for every handle. A failure anywhere inside the transaction
//! taints it; a tainted transaction always rolls back and the failure that
//! tainted it is returned from the final commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use gpf_core_common::{EditToken, GeoprocessingEngine, WorkspacePath};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{EditError, GpfError, Result};
use crate::feedback::{FeedbackEvent, Reporter};

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    /// Open, at least one handle has not finished.
    Active,
    /// The engine committed the edits.
    Committed,
    /// The engine rolled the edits back.
    RolledBack,
}

impl EditState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

#[derive(Debug)]
struct Transaction {
    workspace: WorkspacePath,
    token: EditToken,
    depth: usize,
    tainted: Option<Arc<GpfError>>,
    state: EditState,
}

impl Transaction {
    fn taint(&mut self, error: Arc<GpfError>) {
        if self.tainted.is_none() {
            debug!("Edit on {} tainted: {error}", self.workspace);
            self.tainted = Some(error);
        }
    }
}

#[derive(Debug)]
struct ActiveEdit {
    owner: ThreadId,
    txn: Arc<Mutex<Transaction>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Commit,
    Rollback,
}

/// Tracks the active transaction of each workspace.
pub struct EditManager {
    engine: Arc<dyn GeoprocessingEngine>,
    reporter: Arc<Reporter>,
    active: Mutex<HashMap<WorkspacePath, ActiveEdit>>,
}

impl EditManager {
    /// Creates a manager for `engine` that reports to `reporter`.
    #[must_use]
    pub fn new(engine: Arc<dyn GeoprocessingEngine>, reporter: Arc<Reporter>) -> Self {
        Self {
            engine,
            reporter,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Begins an edit on `workspace`, or nests into the calling thread's
    /// active edit on it.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::NestedMismatch`] when the calling thread edits
    /// another workspace, [`EditError::WorkspaceLockConflict`] when another
    /// thread or process holds the workspace and [`EditError::Engine`] when
    /// the engine cannot start the edit.
    pub fn begin(&self, workspace: &WorkspacePath) -> Result<EditSession<'_>> {
        let me = thread::current().id();
        let mut active = self.active.lock();

        if let Some((other, _)) = active
            .iter()
            .find(|(ws, edit)| edit.owner == me && *ws != workspace)
        {
            return Err(EditError::NestedMismatch {
                active: other.to_string(),
                requested: workspace.to_string(),
            }
            .into());
        }

        if let Some(edit) = active.get(workspace) {
            if edit.owner != me {
                return Err(EditError::WorkspaceLockConflict {
                    workspace: workspace.to_string(),
                    detail: "another caller is editing it".to_string(),
                }
                .into());
            }
            let txn = Arc::clone(&edit.txn);
            let depth = {
                let mut t = txn.lock();
                t.depth += 1;
                t.depth
            };
            debug!("Nested edit on {workspace} (depth {depth})");
            return Ok(EditSession::new(self, workspace.clone(), txn, false));
        }

        let token = self.engine.begin_edit(workspace).map_err(|source| {
            if source.is_lock_conflict() {
                EditError::WorkspaceLockConflict {
                    workspace: workspace.to_string(),
                    detail: source.message,
                }
            } else {
                EditError::Engine {
                    workspace: workspace.to_string(),
                    operation: "begin",
                    source,
                }
            }
        })?;

        let txn = Arc::new(Mutex::new(Transaction {
            workspace: workspace.clone(),
            token,
            depth: 1,
            tainted: None,
            state: EditState::Active,
        }));
        active.insert(
            workspace.clone(),
            ActiveEdit {
                owner: me,
                txn: Arc::clone(&txn),
            },
        );
        debug!("Began edit {token} on {workspace}");
        Ok(EditSession::new(self, workspace.clone(), txn, true))
    }

    /// Fails when another thread holds an edit on `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::WorkspaceLockConflict`].
    pub fn ensure_writable(&self, workspace: &WorkspacePath) -> std::result::Result<(), EditError> {
        let me = thread::current().id();
        match self.active.lock().get(workspace) {
            Some(edit) if edit.owner != me => Err(EditError::WorkspaceLockConflict {
                workspace: workspace.to_string(),
                detail: "another caller is editing it".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Marks the calling thread's edit on `workspace` as failed.
    ///
    /// Does nothing when the thread has no edit on the workspace.
    pub fn taint(&self, workspace: &WorkspacePath, error: &GpfError) {
        let me = thread::current().id();
        let txn = match self.active.lock().get(workspace) {
            Some(edit) if edit.owner == me => Arc::clone(&edit.txn),
            _ => return,
        };
        txn.lock().taint(Arc::new(error.clone()));
    }

    /// Returns `true` while any caller edits `workspace`.
    #[must_use]
    pub fn is_editing(&self, workspace: &WorkspacePath) -> bool {
        self.active.lock().contains_key(workspace)
    }

    /// Nesting depth of the active edit on `workspace` (0 when idle).
    #[must_use]
    pub fn depth(&self, workspace: &WorkspacePath) -> usize {
        let txn = self
            .active
            .lock()
            .get(workspace)
            .map(|edit| Arc::clone(&edit.txn));
        txn.map_or(0, |t| t.lock().depth)
    }

    fn finish(&self, txn: &Arc<Mutex<Transaction>>, outcome: Outcome, outermost: bool) -> Result<()> {
        let (workspace, token, tainted) = {
            let mut t = txn.lock();
            if t.state != EditState::Active {
                return Err(EditError::Closed {
                    workspace: t.workspace.to_string(),
                    state: t.state.as_str(),
                }
                .into());
            }
            if outermost && t.depth > 1 {
                if outcome == Outcome::Commit {
                    return Err(EditError::NestedOpen {
                        workspace: t.workspace.to_string(),
                        open: t.depth - 1,
                    }
                    .into());
                }
                debug!(
                    "Rolling back edit on {} with {} nested handles open",
                    t.workspace,
                    t.depth - 1
                );
                t.depth = 0;
            } else {
                if outcome == Outcome::Rollback && t.depth > 1 {
                    let error = GpfError::from(EditError::NestedRollback {
                        workspace: t.workspace.to_string(),
                    });
                    t.taint(Arc::new(error));
                }
                t.depth -= 1;
                if t.depth > 0 {
                    return Ok(());
                }
            }
            t.state = if outcome == Outcome::Commit && t.tainted.is_none() {
                EditState::Committed
            } else {
                EditState::RolledBack
            };
            (t.workspace.clone(), t.token, t.tainted.clone())
        };

        self.active.lock().remove(&workspace);

        if outcome == Outcome::Commit && tainted.is_none() {
            return match self.engine.commit_edit(token) {
                Ok(()) => {
                    debug!("Committed edit {token} on {workspace}");
                    self.reporter.report(&FeedbackEvent::EditCommitted {
                        workspace: workspace.to_string(),
                    });
                    Ok(())
                },
                Err(source) => {
                    txn.lock().state = EditState::RolledBack;
                    if let Err(e) = self.engine.rollback_edit(token) {
                        warn!("Rollback after failed commit on {workspace} failed: {e}");
                    }
                    let err = GpfError::from(EditError::Engine {
                        workspace: workspace.to_string(),
                        operation: "commit",
                        source,
                    });
                    self.reporter.report(&FeedbackEvent::Error {
                        detail: err.to_string(),
                    });
                    Err(err)
                },
            };
        }

        let rolled_back = self.engine.rollback_edit(token);
        self.reporter.report(&FeedbackEvent::EditRolledBack {
            workspace: workspace.to_string(),
        });
        match (outcome, tainted, rolled_back) {
            (Outcome::Commit, Some(original), rolled_back) => {
                if let Err(e) = rolled_back {
                    warn!("Rollback of tainted edit on {workspace} failed: {e}");
                }
                Err(EditError::Tainted {
                    workspace: workspace.to_string(),
                    original,
                }
                .into())
            },
            (_, _, Err(source)) => Err(EditError::Engine {
                workspace: workspace.to_string(),
                operation: "rollback",
                source,
            }
            .into()),
            (_, _, Ok(())) => {
                debug!("Rolled back edit {token} on {workspace}");
                Ok(())
            },
        }
    }
}

impl std::fmt::Debug for EditManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditManager")
            .field("active", &self.active.lock().len())
            .finish_non_exhaustive()
    }
}

/// One handle on a (possibly shared) edit transaction.
///
/// Finish every handle with [`EditSession::commit`] or
/// [`EditSession::rollback`]. A handle dropped unfinished, including during a
/// panic, taints the transaction and counts as a rollback.
pub struct EditSession<'a> {
    manager: &'a EditManager,
    workspace: WorkspacePath,
    txn: Arc<Mutex<Transaction>>,
    outermost: bool,
    finished: Option<EditState>,
}

impl<'a> EditSession<'a> {
    fn new(
        manager: &'a EditManager,
        workspace: WorkspacePath,
        txn: Arc<Mutex<Transaction>>,
        outermost: bool,
    ) -> Self {
        Self {
            manager,
            workspace,
            txn,
            outermost,
            finished: None,
        }
    }

    /// The workspace being edited.
    #[must_use]
    pub fn workspace(&self) -> &WorkspacePath {
        &self.workspace
    }

    /// Current nesting depth of the shared transaction.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.txn.lock().depth
    }

    /// State of the shared transaction.
    #[must_use]
    pub fn state(&self) -> EditState {
        self.txn.lock().state
    }

    /// Returns `true` for the handle that began the transaction.
    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Returns `true` once this handle committed or rolled back.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Returns `true` if the transaction will roll back.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        self.txn.lock().tainted.is_some()
    }

    /// Opens a nested handle on the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::NestedMismatch`] when `workspace` is not the
    /// edited workspace and [`EditError::Closed`] when this handle finished.
    pub fn nest(&self, workspace: &WorkspacePath) -> Result<EditSession<'a>> {
        if *workspace != self.workspace {
            return Err(EditError::NestedMismatch {
                active: self.workspace.to_string(),
                requested: workspace.to_string(),
            }
            .into());
        }
        self.ensure_unfinished()?;
        let mut t = self.txn.lock();
        if t.state != EditState::Active {
            return Err(EditError::Closed {
                workspace: self.workspace.to_string(),
                state: t.state.as_str(),
            }
            .into());
        }
        t.depth += 1;
        drop(t);
        Ok(EditSession::new(
            self.manager,
            self.workspace.clone(),
            Arc::clone(&self.txn),
            false,
        ))
    }

    /// Marks the transaction as failed; it will roll back at the end.
    pub fn taint(&self, error: impl Into<GpfError>) {
        self.txn.lock().taint(Arc::new(error.into()));
    }

    /// Commits this handle. Only the outermost commit reaches the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::Closed`] on a finished handle,
    /// [`EditError::NestedOpen`] when this is the outermost handle and nested
    /// handles have not finished (this handle stays open) and
    /// [`EditError::Tainted`] carrying the original failure when the
    /// transaction was tainted and had to roll back.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_unfinished()?;
        let result = self.manager.finish(&self.txn, Outcome::Commit, self.outermost);
        if !matches!(result, Err(GpfError::Edit(EditError::NestedOpen { .. }))) {
            self.finished = Some(EditState::Committed);
        }
        result
    }

    /// Rolls this handle back. Inside a nested edit this taints the
    /// transaction; the engine rollback happens at the outermost level. On
    /// the outermost handle it rolls back at once, even with nested handles
    /// still open; those are closed from then on.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::Closed`] on a finished handle.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_unfinished()?;
        self.finished = Some(EditState::RolledBack);
        self.manager.finish(&self.txn, Outcome::Rollback, self.outermost)
    }

    fn ensure_unfinished(&self) -> Result<()> {
        match self.finished {
            Some(state) => Err(EditError::Closed {
                workspace: self.workspace.to_string(),
                state: state.as_str(),
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl Drop for EditSession<'_> {
    fn drop(&mut self) {
        if self.finished.is_some() {
            return;
        }
        let panicked = thread::panicking();
        warn!(
            "Edit session on {} was dropped without commit or rollback",
            self.workspace
        );
        self.taint(EditError::Abandoned {
            workspace: self.workspace.to_string(),
            panicked,
        });
        if let Err(e) = self.rollback() {
            warn!("Rollback of abandoned edit on {} failed: {e}", self.workspace);
        }
    }
}

impl std::fmt::Debug for EditSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("workspace", &self.workspace.to_string())
            .field("outermost", &self.outermost)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
