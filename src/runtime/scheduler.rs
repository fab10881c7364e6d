/// Background scheduler daemon
///
/// A single repeated tokio-cron-scheduler job evaluates every stored schedule
/// each `check_interval`. Due schedules get an execution prepared on the
/// engine, a spawned run and a spawned monitor that records the outcome in the
/// schedule's stats and the day's history file.

use crate::config::SchedulerConfig;
use crate::runtime::engine::WorkflowExecutionEngine;
use crate::runtime::events::{broadcast_best_effort, Broadcaster};
use crate::schedule::history::ExecutionHistory;
use crate::schedule::timing::{next_run, should_execute, ProcessedKeys};
use crate::schedule::types::{ScheduleExecution, ScheduleExecutionStatus, ScheduledWorkflow};
use crate::workflow::storage::EntityStore;
use crate::workflow::types::{WorkflowDefinition, WorkflowStatus};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};

const DRAIN_POLL: Duration = Duration::from_millis(500);

/// Snapshot returned by `get_status`
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub active_executions: usize,
    /// Seconds
    pub check_interval: u64,
    pub processed_schedules_count: usize,
}

/// Schedule evaluator and run monitor
pub struct SchedulerDaemon {
    engine: Arc<WorkflowExecutionEngine>,
    workflows: Arc<dyn EntityStore<WorkflowDefinition>>,
    schedules: Arc<dyn EntityStore<ScheduledWorkflow>>,
    history: Arc<ExecutionHistory>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    config: SchedulerConfig,
    scheduler: RwLock<Option<JobScheduler>>,
    running: AtomicBool,
    /// Held for the duration of one tick; a tick that cannot take it is skipped
    tick_lock: Mutex<()>,
    processed: Mutex<ProcessedKeys>,
    /// Serializes read-modify-write of stored schedule stats
    stats_lock: Mutex<()>,
    /// engine execution_id -> record
    active: RwLock<HashMap<String, ScheduleExecution>>,
}

impl std::fmt::Debug for SchedulerDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerDaemon")
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl SchedulerDaemon {
    pub fn new(
        engine: Arc<WorkflowExecutionEngine>,
        workflows: Arc<dyn EntityStore<WorkflowDefinition>>,
        schedules: Arc<dyn EntityStore<ScheduledWorkflow>>,
        history: Arc<ExecutionHistory>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            workflows,
            schedules,
            history,
            broadcaster: None,
            config,
            scheduler: RwLock::new(None),
            running: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
            processed: Mutex::new(ProcessedKeys::new()),
            stats_lock: Mutex::new(()),
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    /// Run one check now and register the repeated tick
    ///
    /// Calling `start` on a running daemon is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("⏰ Scheduler daemon already running");
            return Ok(());
        }
        tracing::info!(
            "⏰ Starting scheduler daemon (check interval {}s)",
            self.config.check_interval_secs
        );

        self.check_schedules().await;

        match self.register_tick().await {
            Ok(scheduler) => {
                *self.scheduler.write().await = Some(scheduler);
                tracing::info!("✅ Scheduler daemon started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                tracing::error!("❌ Failed to start scheduler daemon: {}", e);
                Err(e)
            }
        }
    }

    async fn register_tick(self: &Arc<Self>) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;
        // Weak so the job does not keep the daemon alive
        let daemon = Arc::downgrade(self);

        let job = Job::new_repeated_async(self.config.check_interval(), move |_uuid, _l| {
            let daemon = daemon.clone();
            Box::pin(async move {
                if let Some(daemon) = daemon.upgrade() {
                    daemon.check_schedules().await;
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        Ok(scheduler)
    }

    /// Stop ticking and wait up to `shutdown_grace` for monitored runs to finish
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("⏹️ Stopping scheduler daemon");

        if let Some(mut scheduler) = self.scheduler.write().await.take() {
            scheduler.shutdown().await?;
        }

        let deadline = Instant::now() + self.config.shutdown_grace();
        loop {
            let remaining = self.active.read().await.len();
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!("⚠️ Scheduler stopped with {} execution(s) still active", remaining);
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        tracing::info!("✅ Scheduler daemon stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn get_status(&self) -> DaemonStatus {
        DaemonStatus {
            running: self.is_running(),
            active_executions: self.active.read().await.len(),
            check_interval: self.config.check_interval_secs,
            processed_schedules_count: self.processed.lock().await.len(),
        }
    }

    /// Runs still being monitored, oldest first
    pub async fn get_active_executions(&self) -> Vec<ScheduleExecution> {
        let mut active: Vec<ScheduleExecution> = self.active.read().await.values().cloned().collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Evaluate every stored schedule once
    pub async fn check_schedules(self: &Arc<Self>) {
        let Ok(_tick) = self.tick_lock.try_lock() else {
            tracing::debug!("⏭️ Previous schedule check still running, skipping tick");
            return;
        };

        let schedules = match self.schedules.list_all().await {
            Ok(schedules) => schedules,
            Err(e) => {
                tracing::error!("❌ Error listing schedules: {}", e);
                return;
            }
        };

        let now = Utc::now();
        let window = chrono::Duration::seconds(self.config.check_interval_secs as i64);
        tracing::debug!("🔍 Checking {} schedules", schedules.len());

        for schedule in schedules {
            let due = {
                let mut processed = self.processed.lock().await;
                should_execute(&schedule, now, window, &mut processed)
            };
            match due {
                Ok(true) => {
                    if let Err(e) = self.fire(schedule).await {
                        tracing::error!("❌ Scheduled run failed to start: {}", e);
                    }
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("⚠️ Skipping schedule {}: {}", schedule.id, e),
            }
        }
    }

    /// Fire a schedule immediately, regardless of its trigger
    pub async fn trigger_now(self: &Arc<Self>, schedule_id: &str) -> Result<String> {
        let schedule = self
            .schedules
            .load(schedule_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Schedule {} not found", schedule_id))?;
        tracing::info!("👆 Manual trigger for schedule {}", schedule_id);
        self.fire(schedule).await
    }

    /// Start one run; returns the engine execution id
    async fn fire(self: &Arc<Self>, schedule: ScheduledWorkflow) -> Result<String> {
        tracing::info!("🚀 Executing schedule {}: {}", schedule.id, schedule.name);

        let workflow = match self.workflows.load(&schedule.workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                let message = format!("Workflow {} not found", schedule.workflow_id);
                self.record_fire_failure(&schedule.id, &message).await;
                return Err(anyhow::anyhow!(message));
            }
            Err(e) => {
                let message = format!("Failed to load workflow {}: {}", schedule.workflow_id, e);
                self.record_fire_failure(&schedule.id, &message).await;
                return Err(anyhow::anyhow!(message));
            }
        };

        let execution_id = self
            .engine
            .prepare_execution(&workflow, None, Some(format!("schedule:{}", schedule.id)))
            .await;
        let record = ScheduleExecution::start(&schedule.id, &execution_id);
        self.active
            .write()
            .await
            .insert(execution_id.clone(), record.clone());

        self.update_stats(&schedule.id, "started").await;
        broadcast_best_effort(
            self.broadcaster.as_deref(),
            json!({
                "type": "schedule_execution_started",
                "schedule_id": schedule.id,
                "execution_id": execution_id,
                "workflow_name": workflow.name,
                "timestamp": Utc::now(),
            }),
        )
        .await;

        {
            let engine = Arc::clone(&self.engine);
            let execution_id = execution_id.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.run_execution(&execution_id, &workflow).await {
                    tracing::warn!("⚠️ Scheduled execution {} failed: {}", execution_id, e);
                }
            });
        }
        {
            let daemon = Arc::clone(self);
            tokio::spawn(async move { daemon.monitor(record).await });
        }

        Ok(execution_id)
    }

    /// Poll the engine until the run ends or times out
    async fn monitor(self: Arc<Self>, record: ScheduleExecution) {
        // Floor for zero-second configs
        let poll = self.config.monitor_poll().max(Duration::from_millis(10));
        let deadline = Instant::now() + self.config.execution_timeout();

        let (status, error) = loop {
            match self.engine.get_workflow_execution_state(&record.execution_id).await {
                None => break (ScheduleExecutionStatus::Failed, Some("Execution state not found".to_string())),
                Some(state) => match state.status {
                    WorkflowStatus::Completed => break (ScheduleExecutionStatus::Completed, None),
                    WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
                        break (ScheduleExecutionStatus::Failed, state.error)
                    }
                    _ => {}
                },
            }
            if Instant::now() >= deadline {
                break (ScheduleExecutionStatus::Timeout, Some("Execution timed out".to_string()));
            }
            tokio::time::sleep(poll).await;
        };

        self.finish(record, status, error).await;
    }

    async fn finish(&self, mut record: ScheduleExecution, status: ScheduleExecutionStatus, error: Option<String>) {
        record.finish(status, error);

        self.update_stats(&record.schedule_id, status.as_str()).await;

        broadcast_best_effort(
            self.broadcaster.as_deref(),
            json!({
                "type": "schedule_execution_completed",
                "schedule_id": record.schedule_id,
                "execution_id": record.execution_id,
                "status": status,
                "duration": record.duration,
                "timestamp": Utc::now(),
            }),
        )
        .await;

        if let Err(e) = self.history.append(&record).await {
            tracing::error!("❌ Error saving execution history: {}", e);
        }
        self.active.write().await.remove(&record.execution_id);

        match status {
            ScheduleExecutionStatus::Completed => {
                tracing::info!("✅ Schedule {} run {} completed", record.schedule_id, record.execution_id)
            }
            _ => tracing::warn!(
                "⚠️ Schedule {} run {} ended as {}",
                record.schedule_id,
                record.execution_id,
                status.as_str()
            ),
        }
    }

    /// Archive a run that never reached the engine
    async fn record_fire_failure(&self, schedule_id: &str, message: &str) {
        tracing::error!("❌ Error executing schedule {}: {}", schedule_id, message);

        let mut record = ScheduleExecution::start(schedule_id, &uuid::Uuid::new_v4().to_string());
        record.finish(ScheduleExecutionStatus::Failed, Some(message.to_string()));
        if let Err(e) = self.history.append(&record).await {
            tracing::error!("❌ Error saving execution history: {}", e);
        }

        self.update_stats(schedule_id, "failed").await;
        broadcast_best_effort(
            self.broadcaster.as_deref(),
            json!({
                "type": "schedule_execution_failed",
                "schedule_id": schedule_id,
                "execution_id": record.execution_id,
                "error": message,
                "timestamp": Utc::now(),
            }),
        )
        .await;
    }

    /// Apply one status transition to the stored schedule
    ///
    /// The document is reloaded under `stats_lock` so a tick holding an older
    /// copy never overwrites what a monitor saved in between.
    async fn update_stats(&self, schedule_id: &str, status: &str) {
        let _guard = self.stats_lock.lock().await;
        let mut schedule = match self.schedules.load(schedule_id).await {
            Ok(Some(schedule)) => schedule,
            Ok(None) => {
                tracing::debug!("Schedule {} was deleted, dropping '{}' stats update", schedule_id, status);
                return;
            }
            Err(e) => {
                tracing::error!("❌ Error loading schedule {}: {}", schedule_id, e);
                return;
            }
        };

        let now = Utc::now();
        match status {
            "started" => {
                schedule.current_runs += 1;
                schedule.last_run = Some(now);
            }
            "completed" => schedule.consecutive_failures = 0,
            "failed" | "timeout" => schedule.consecutive_failures += 1,
            _ => {}
        }
        schedule.last_status = Some(status.to_string());
        schedule.next_run = next_run(&schedule, now);
        schedule.updated_at = now;

        if let Err(e) = self.schedules.save(&schedule).await {
            tracing::error!("❌ Error updating schedule stats for {}: {}", schedule.id, e);
        }
    }
}
