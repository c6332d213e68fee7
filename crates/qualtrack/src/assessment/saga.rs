use std::fmt;

use super::store::StoreError;

/// Identifies one persisted row touched by a multi-step write, for
/// compensation reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: &'static str,
    pub id: u64,
}

impl EntityRef {
    pub const fn new(kind: &'static str, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

type Undo = Box<dyn FnOnce() -> Result<(), StoreError> + Send>;

/// Records an undo step per successful write in a multi-table operation.
/// On failure the caller aborts the saga: undos run in reverse order,
/// best-effort, and the attempted refs are reported back so the error can
/// say what was cleaned up.
pub struct Saga {
    steps: Vec<(EntityRef, Undo)>,
}

impl Saga {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn record<F>(&mut self, entity: EntityRef, undo: F)
    where
        F: FnOnce() -> Result<(), StoreError> + Send + 'static,
    {
        self.steps.push((entity, Box::new(undo)));
    }

    /// Drops the undo log; the forward writes stand.
    pub fn commit(self) {}

    /// Runs every recorded undo, newest first. A failing undo is logged and
    /// skipped so the remaining steps still run.
    pub fn abort(self) -> Vec<EntityRef> {
        let mut attempted = Vec::with_capacity(self.steps.len());
        for (entity, undo) in self.steps.into_iter().rev() {
            attempted.push(entity);
            if let Err(err) = undo() {
                tracing::warn!(entity = %entity, error = %err, "compensation step failed");
            }
        }
        attempted
    }
}

impl Default for Saga {
    fn default() -> Self {
        Self::new()
    }
}
