/// Scheduled workflow layer
///
/// Schedule definitions, due-ness evaluation and the per-day execution
/// history written by the scheduler daemon.

pub mod types;

// Cron/interval arithmetic and duplicate suppression
pub mod timing;

// Per-schedule, per-day execution archive
pub mod history;

pub use history::ExecutionHistory;
pub use timing::{next_run, should_execute, ProcessedKeys};
pub use types::{ScheduleExecution, ScheduleExecutionStatus, ScheduledWorkflow, TriggerType};
