//! Cancellable deferred deliveries for the debounced `-change` channel.

use std::collections::BTreeMap;

use web_time::Instant;

use crate::node::NodeId;

/// Handle of a scheduled delivery. Ids grow monotonically, so ordering by id
/// is scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub node: NodeId,
    pub due: Instant,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: u64,
    tasks: BTreeMap<TaskId, ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, node: NodeId, due: Instant) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.tasks.insert(id, ScheduledTask { node, due });
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub fn get(&self, id: TaskId) -> Option<&ScheduledTask> {
        self.tasks.get(&id)
    }

    /// Removes and returns tasks whose deadline is at or before `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TaskId, ScheduledTask)> {
        let due: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.due <= now)
            .map(|(id, _)| *id)
            .collect();
        due.into_iter()
            .filter_map(|id| self.tasks.remove(&id).map(|task| (id, task)))
            .collect()
    }

    pub fn take_all(&mut self) -> Vec<(TaskId, ScheduledTask)> {
        std::mem::take(&mut self.tasks).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
