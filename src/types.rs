//! Shared identifiers and task model used across the system.

/// Identifier minted for every produced task.
pub type TaskId = i64;

/// Reserved id marking a poison task.
pub const POISON_ID: TaskId = -1;

/// Unit of work flowing from producers to consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// Monotonic id from the run's shared counter, or [`POISON_ID`].
    pub id: TaskId,
    /// Human-readable label written to the sink.
    pub name: String,
    /// Set once a consumer has executed the task.
    pub completed: bool,
}

impl Task {
    /// Construct a pending task with the provided id and name.
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            completed: false,
        }
    }

    /// Sentinel that unblocks exactly one dequeuer and makes it exit.
    pub fn poison() -> Self {
        Self::new(POISON_ID, "Exit")
    }

    pub fn is_poison(&self) -> bool {
        self.id == POISON_ID
    }

    /// Sink row for this task: id, name, status.
    pub fn record_fields(&self) -> Vec<String> {
        let status = if self.completed { "Complete" } else { "Incomplete" };
        vec![self.id.to_string(), self.name.clone(), status.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poison_is_recognised() {
        assert!(Task::poison().is_poison());
        assert!(!Task::new(1, "Task_1").is_poison());
    }

    #[test]
    fn record_fields_reflect_completion() {
        let mut task = Task::new(7, "Task_7");
        assert_eq!(task.record_fields(), vec!["7", "Task_7", "Incomplete"]);
        task.completed = true;
        assert_eq!(task.record_fields(), vec!["7", "Task_7", "Complete"]);
    }
}
