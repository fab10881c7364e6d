/// Schedule execution history archive
///
/// Finished schedule executions are appended to
/// `{dir}/{schedule_id}_{YYYYMMDD}.json`, one JSON array per schedule per UTC
/// day of `started_at`.

use crate::schedule::types::ScheduleExecution;
use anyhow::Result;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct ExecutionHistory {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on the day files
    write_lock: Mutex<()>,
}

impl ExecutionHistory {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create history directory '{}': {}", dir.display(), e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, schedule_id: &str, day: NaiveDate) -> Result<PathBuf> {
        if schedule_id.is_empty() || schedule_id.contains(['/', '\\']) || schedule_id.contains("..") {
            return Err(anyhow::anyhow!("Invalid schedule id: {:?}", schedule_id));
        }
        Ok(self
            .dir
            .join(format!("{}_{}.json", schedule_id, day.format("%Y%m%d"))))
    }

    async fn read_file(path: &Path) -> Result<Vec<ScheduleExecution>> {
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(anyhow::anyhow!("Failed to read {}: {}", path.display(), e)),
        }
    }

    /// Add one record to its day file
    pub async fn append(&self, execution: &ScheduleExecution) -> Result<()> {
        let path = self.file_for(&execution.schedule_id, execution.started_at.date_naive())?;
        let _guard = self.write_lock.lock().await;

        let mut records = Self::read_file(&path).await?;
        records.push(execution.clone());

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&records)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("💾 Archived execution {} to {}", execution.execution_id, path.display());
        Ok(())
    }

    /// Records for one schedule on one UTC day, oldest first
    pub async fn read(&self, schedule_id: &str, day: NaiveDate) -> Result<Vec<ScheduleExecution>> {
        let path = self.file_for(schedule_id, day)?;
        Self::read_file(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::types::ScheduleExecutionStatus;

    #[tokio::test]
    async fn append_accumulates_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let history = ExecutionHistory::open(dir.path()).await.unwrap();

        let mut first = ScheduleExecution::start("s1", "exec-1");
        first.finish(ScheduleExecutionStatus::Completed, None);
        let mut second = ScheduleExecution::start("s1", "exec-2");
        second.finish(ScheduleExecutionStatus::Failed, Some("boom".into()));

        history.append(&first).await.unwrap();
        history.append(&second).await.unwrap();

        let day = first.started_at.date_naive();
        let records = history.read("s1", day).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].execution_id, "exec-1");
        assert_eq!(records[1].error_message.as_deref(), Some("boom"));

        let file = dir.path().join(format!("s1_{}.json", day.format("%Y%m%d")));
        assert!(file.exists());
        assert!(history.read("other", day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_path_like_schedule_ids() {
        let dir = tempfile::tempdir().unwrap();
        let history = ExecutionHistory::open(dir.path()).await.unwrap();
        let day = chrono::Utc::now().date_naive();
        assert!(history.read("../x", day).await.is_err());
    }
}
