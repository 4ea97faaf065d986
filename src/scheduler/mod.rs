//! Durable, passive job store. A dispatch loop external to this module
//! polls `due()` roughly once a second (see `crate::gateway`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type JobId = String;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_id: JobId,
    pub name: String,
    pub run_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub cron_expr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub job_id: JobId,
    pub ran_at: DateTime<Utc>,
    pub status: String,
    pub detail: Option<String>,
}

/// Validate a payload against the field requirements its `type` implies.
pub fn validate_payload(payload: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(kind) = payload.get("type").and_then(|v| v.as_str()) else {
        errors.push("payload missing 'type'".to_string());
        return errors;
    };
    match kind {
        "supervisor_check" => {
            if payload.get("task_id").and_then(|v| v.as_str()).is_none() {
                errors.push("supervisor_check payload requires 'task_id'".to_string());
            }
        }
        "continuous_tick" => {}
        _ => {
            // treat anything else as a deliverable prompt
            if payload.get("prompt").and_then(|v| v.as_str()).is_none() {
                errors.push("deliverable payload requires 'prompt'".to_string());
            }
            if payload.get("channel").and_then(|v| v.as_str()).is_none() {
                errors.push("deliverable payload requires 'channel'".to_string());
            }
            if payload.get("target").and_then(|v| v.as_str()).is_none() {
                errors.push("deliverable payload requires 'target'".to_string());
            }
            if payload.get("channel").and_then(|v| v.as_str()) == Some("teams")
                && payload.get("service_url").and_then(|v| v.as_str()).is_none()
            {
                errors.push("teams deliverable payload requires 'service_url'".to_string());
            }
        }
    }
    errors
}

pub fn validate_cron(expr: &str) -> Result<(), SchedulerError> {
    expr.parse::<cron::Schedule>()
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))
}

fn naive_utc(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

pub struct Scheduler {
    path: PathBuf,
    run_log_path: PathBuf,
    jobs: RwLock<BTreeMap<JobId, ScheduledJob>>,
}

impl Scheduler {
    pub async fn load(path: PathBuf, run_log_path: PathBuf) -> Result<Self, SchedulerError> {
        let jobs = if path.exists() {
            let text = tokio::fs::read_to_string(&path).await?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            run_log_path,
            jobs: RwLock::new(jobs),
        })
    }

    async fn persist(&self, jobs: &BTreeMap<JobId, ScheduledJob>) -> Result<(), SchedulerError> {
        let text = serde_json::to_string_pretty(jobs)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn schedule(
        &self,
        name: &str,
        run_at: DateTime<Utc>,
        payload: serde_json::Value,
        cron_expr: Option<String>,
    ) -> Result<ScheduledJob, SchedulerError> {
        let errors = validate_payload(&payload);
        if !errors.is_empty() {
            return Err(SchedulerError::InvalidPayload(errors.join("; ")));
        }
        if let Some(expr) = &cron_expr {
            validate_cron(expr)?;
        }
        let job = ScheduledJob {
            job_id: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            run_at,
            payload,
            created_at: Utc::now(),
            completed_at: None,
            cancelled: false,
            cron_expr,
        };
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.job_id.clone(), job.clone());
        self.persist(&jobs).await?;
        Ok(job)
    }

    pub async fn get(&self, job_id: &JobId) -> Option<ScheduledJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn list(&self) -> Vec<ScheduledJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// All jobs due at or before `now`, not cancelled, not completed.
    /// Both sides are normalized to naive UTC before comparison.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let now_naive = naive_utc(now);
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| !j.cancelled && j.completed_at.is_none() && naive_utc(j.run_at) <= now_naive)
            .cloned()
            .collect()
    }

    pub async fn mark_completed(&self, job_id: &JobId) -> Result<ScheduledJob, SchedulerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::NotFound(job_id.clone()))?;
        if let Some(expr) = job.cron_expr.clone() {
            let schedule: cron::Schedule = expr
                .parse()
                .map_err(|e: cron::error::Error| SchedulerError::InvalidCron(e.to_string()))?;
            if let Some(next) = schedule.after(&job.run_at).next() {
                job.run_at = next;
            }
        } else {
            job.completed_at = Some(Utc::now());
        }
        let result = job.clone();
        self.persist(&jobs).await?;
        Ok(result)
    }

    pub async fn cancel(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.cancelled = true;
        }
        self.persist(&jobs).await
    }

    pub async fn reschedule(
        &self,
        job_id: &JobId,
        run_at: DateTime<Utc>,
    ) -> Result<ScheduledJob, SchedulerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::NotFound(job_id.clone()))?;
        job.run_at = run_at;
        let result = job.clone();
        self.persist(&jobs).await?;
        Ok(result)
    }

    pub async fn clear_all(&self) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        jobs.clear();
        self.persist(&jobs).await
    }

    pub async fn log_run(
        &self,
        job_id: &JobId,
        status: &str,
        detail: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let run = JobRun {
            job_id: job_id.clone(),
            ran_at: Utc::now(),
            status: status.to_string(),
            detail: detail.map(str::to_string),
        };
        let mut line = serde_json::to_string(&run)?;
        line.push('\n');
        if let Some(parent) = self.run_log_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.run_log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn list_runs(
        &self,
        job_id: Option<&JobId>,
        limit: usize,
    ) -> Result<Vec<JobRun>, SchedulerError> {
        if !self.run_log_path.exists() {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&self.run_log_path).await?;
        let mut runs: Vec<JobRun> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .filter(|r: &JobRun| job_id.map(|id| &r.job_id == id).unwrap_or(true))
            .collect();
        if runs.len() > limit {
            runs.drain(0..runs.len() - limit);
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn scheduler() -> (tempfile::TempDir, Scheduler) {
        let dir = tempfile::tempdir().unwrap();
        let s = Scheduler::load(dir.path().join("jobs.json"), dir.path().join("runs.jsonl"))
            .await
            .unwrap();
        (dir, s)
    }

    #[tokio::test]
    async fn due_returns_jobs_at_or_before_now() {
        let (_dir, s) = scheduler().await;
        let job = s
            .schedule(
                "greet",
                Utc::now() - Duration::seconds(5),
                serde_json::json!({"type": "deliverable", "prompt": "hi", "channel": "telegram", "target": "1"}),
                None,
            )
            .await
            .unwrap();
        let due = s.due(Utc::now()).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_id, job.job_id);
    }

    #[tokio::test]
    async fn mark_completed_on_cron_job_advances_run_at() {
        let (_dir, s) = scheduler().await;
        let job = s
            .schedule(
                "tick",
                Utc::now() - Duration::seconds(5),
                serde_json::json!({"type": "continuous_tick"}),
                Some("0 * * * * *".to_string()),
            )
            .await
            .unwrap();
        let prev_run_at = job.run_at;
        let updated = s.mark_completed(&job.job_id).await.unwrap();
        assert!(updated.completed_at.is_none());
        assert!(updated.run_at > prev_run_at);
    }

    #[tokio::test]
    async fn supervisor_check_payload_requires_task_id() {
        let errors = validate_payload(&serde_json::json!({"type": "supervisor_check"}));
        assert!(!errors.is_empty());
    }
}
