/// Schedule definitions and per-run records
///
/// `ScheduledWorkflow` is persisted one document per schedule through the
/// same `JsonFileStore` as workflow definitions. `ScheduleExecution` tracks
/// one daemon-triggered run until it is archived to the history file.

use crate::schedule::timing;
use crate::workflow::storage::Entity;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What makes a schedule fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// `cron_expression` evaluated in `timezone`
    Cron,
    /// Every `interval_seconds` since `last_run`
    Interval,
    /// Fired externally; never due from the tick loop
    Event,
}

/// A workflow bound to a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledWorkflow {
    pub id: String,
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    /// IANA zone name
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_runs: Option<u64>,
    #[serde(default)]
    pub current_runs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Entity for ScheduledWorkflow {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl ScheduledWorkflow {
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>, trigger_type: TriggerType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            name: name.into(),
            description: String::new(),
            trigger_type,
            cron_expression: None,
            timezone: default_timezone(),
            interval_seconds: None,
            start_date: None,
            end_date: None,
            max_runs: None,
            current_runs: 0,
            enabled: true,
            last_run: None,
            next_run: None,
            last_status: None,
            consecutive_failures: 0,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Reject definitions the daemon could never evaluate
    pub fn validate(&self) -> Result<()> {
        if self.workflow_id.trim().is_empty() {
            return Err(anyhow::anyhow!("Schedule '{}' has no workflow_id", self.id));
        }
        timing::parse_timezone(&self.timezone)?;
        match self.trigger_type {
            TriggerType::Cron => {
                let expression = self
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("Cron schedule '{}' missing cron_expression", self.id))?;
                timing::parse_cron(expression)?;
            }
            TriggerType::Interval => match self.interval_seconds {
                Some(seconds) if seconds > 0 => {
                    timing::interval_after(Utc::now(), seconds)?;
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "Interval schedule '{}' needs a positive interval_seconds",
                        self.id
                    ))
                }
            },
            TriggerType::Event => {}
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(anyhow::anyhow!("Schedule '{}' ends before it starts", self.id));
            }
        }
        Ok(())
    }

    pub fn runs_exhausted(&self) -> bool {
        self.max_runs.is_some_and(|max| self.current_runs >= max)
    }

    /// Inside `[start_date, end_date]`, either bound optional
    pub fn within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date.map_or(true, |start| now >= start) && self.end_date.map_or(true, |end| now <= end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleExecutionStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl ScheduleExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleExecutionStatus::Running => "running",
            ScheduleExecutionStatus::Completed => "completed",
            ScheduleExecutionStatus::Failed => "failed",
            ScheduleExecutionStatus::Timeout => "timeout",
        }
    }
}

/// One daemon-triggered run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecution {
    pub schedule_id: String,
    /// Engine execution id
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub status: ScheduleExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds between start and completion, set by `finish`
    #[serde(default)]
    pub duration: Option<f64>,
}

impl ScheduleExecution {
    pub fn start(schedule_id: &str, execution_id: &str) -> Self {
        Self {
            schedule_id: schedule_id.to_string(),
            execution_id: execution_id.to_string(),
            started_at: Utc::now(),
            status: ScheduleExecutionStatus::Running,
            error_message: None,
            completed_at: None,
            duration: None,
        }
    }

    pub fn finish(&mut self, status: ScheduleExecutionStatus, error_message: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(now);
        self.duration = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
    }
}
