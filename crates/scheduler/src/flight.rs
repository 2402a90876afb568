//! Per-task single-flight table.
//!
//! At most one run per task id is accepted at a time. Acquiring a slot yields
//! a [`FlightGuard`] carrying the run's execution id and cancellation token;
//! dropping the guard frees the slot on every exit path. Slots are keyed per
//! task, so unrelated tasks never contend beyond the short map lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sluice_core::{SluiceError, TaskId, TriggerKind};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Accepted, waiting for a worker.
    Pending,
    Running,
    /// Outcome decided, record being written. No longer cancellable.
    Finishing,
}

/// Status view of one accepted run.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightRun {
    pub task_id: TaskId,
    pub execution_id: Uuid,
    pub trigger: TriggerKind,
    pub phase: RunPhase,
    pub accepted_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

struct Slot {
    run: InFlightRun,
    token: CancellationToken,
}

#[derive(Default)]
pub struct FlightTable {
    slots: Mutex<HashMap<TaskId, Slot>>,
}

impl FlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TaskId, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for `task_id`, failing fast when a run already holds it.
    pub fn try_acquire(
        self: &Arc<Self>,
        task_id: TaskId,
        trigger: TriggerKind,
        now: DateTime<Utc>,
    ) -> Result<FlightGuard, SluiceError> {
        let mut slots = self.slots();
        if slots.contains_key(&task_id) {
            return Err(SluiceError::AlreadyRunning(task_id));
        }

        let execution_id = Uuid::new_v4();
        let token = CancellationToken::new();
        slots.insert(
            task_id,
            Slot {
                run: InFlightRun {
                    task_id,
                    execution_id,
                    trigger,
                    phase: RunPhase::Pending,
                    accepted_at: now,
                    cancel_requested: false,
                },
                token: token.clone(),
            },
        );

        Ok(FlightGuard {
            table: Arc::clone(self),
            task_id,
            execution_id,
            trigger,
            token,
        })
    }

    /// Request cancellation of the active run for `task_id`.
    ///
    /// Returns false when the task has no active run, or its run is already
    /// finishing.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(&task_id) {
            Some(slot) if slot.run.phase != RunPhase::Finishing => {
                slot.run.cancel_requested = true;
                slot.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every active run; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut slots = self.slots();
        let mut signalled = 0;
        for slot in slots.values_mut() {
            if slot.run.phase == RunPhase::Finishing {
                continue;
            }
            slot.run.cancel_requested = true;
            slot.token.cancel();
            signalled += 1;
        }
        signalled
    }

    pub fn is_active(&self, task_id: TaskId) -> bool {
        self.slots().contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<InFlightRun> {
        let mut runs: Vec<InFlightRun> = self.slots().values().map(|s| s.run.clone()).collect();
        runs.sort_by_key(|r| r.accepted_at);
        runs
    }

    fn set_phase(&self, task_id: TaskId, execution_id: Uuid, phase: RunPhase) {
        if let Some(slot) = self.slots().get_mut(&task_id) {
            if slot.run.execution_id == execution_id {
                slot.run.phase = phase;
            }
        }
    }

    fn release(&self, task_id: TaskId, execution_id: Uuid) {
        let mut slots = self.slots();
        if slots
            .get(&task_id)
            .is_some_and(|s| s.run.execution_id == execution_id)
        {
            slots.remove(&task_id);
        }
    }
}

/// Holds a task's single-flight slot until dropped.
pub struct FlightGuard {
    table: Arc<FlightTable>,
    task_id: TaskId,
    execution_id: Uuid,
    trigger: TriggerKind,
    token: CancellationToken,
}

impl FlightGuard {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn mark_running(&self) {
        self.table
            .set_phase(self.task_id, self.execution_id, RunPhase::Running);
    }

    pub fn mark_finishing(&self) {
        self.table
            .set_phase(self.task_id, self.execution_id, RunPhase::Finishing);
    }
}

impl std::fmt::Debug for FlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGuard")
            .field("task_id", &self.task_id)
            .field("execution_id", &self.execution_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.table.release(self.task_id, self.execution_id);
    }
}
