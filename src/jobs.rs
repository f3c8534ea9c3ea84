//! Background video-job registry.
//!
//! Records live in a process-wide map. Each job has exactly one writer, the
//! [`JobHandle`] owned by its background task; pollers read snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Finished jobs are dropped this long after their last update.
pub const JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Queued,
  GeneratingScript,
  GeneratingAudio,
  FetchingVideos,
  Assembling,
  Completed,
  Failed,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, JobStatus::Completed | JobStatus::Failed)
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobRecord {
  pub job_id: String,
  pub status: JobStatus,
  /// 0..=100
  pub progress: u8,
  pub message: String,
  pub video_url: Option<String>,
  pub error: Option<String>,
  pub title: Option<String>,
  #[serde(skip)]
  updated_at: Instant,
}

#[derive(Clone, Default)]
pub struct JobRegistry {
  jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl JobRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a queued job under a fresh 8-character id and hand back its writer.
  pub async fn create(&self) -> JobHandle {
    let job_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let record = JobRecord {
      job_id: job_id.clone(),
      status: JobStatus::Queued,
      progress: 0,
      message: "Video generation queued...".into(),
      video_url: None,
      error: None,
      title: None,
      updated_at: Instant::now(),
    };
    let mut jobs = self.jobs.write().await;
    evict_finished(&mut jobs, JOB_RETENTION);
    jobs.insert(job_id.clone(), record);
    JobHandle { job_id, registry: self.clone() }
  }

  /// Fail the job if its task ends without reaching a terminal status (a panic or
  /// cancellation).
  pub fn watch(&self, job_id: String, task: JoinHandle<()>) {
    let registry = self.clone();
    tokio::spawn(async move {
      let reason = match task.await {
        Ok(()) => return,
        Err(e) if e.is_panic() => "internal error while generating the lecture",
        Err(_) => "lecture generation was cancelled",
      };
      error!(target: "video", %job_id, reason, "Video task ended abnormally");
      let mut jobs = registry.jobs.write().await;
      if let Some(rec) = jobs.get_mut(&job_id).filter(|r| !r.status.is_terminal()) {
        mark_failed(rec, reason.to_string());
      }
    });
  }

  pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
    self.jobs.read().await.get(job_id).cloned()
  }
}

/// The single writer of one job. Not `Clone`.
pub struct JobHandle {
  job_id: String,
  registry: JobRegistry,
}

impl JobHandle {
  pub fn job_id(&self) -> &str {
    &self.job_id
  }

  async fn update(&self, f: impl FnOnce(&mut JobRecord)) {
    if let Some(rec) = self.registry.jobs.write().await.get_mut(&self.job_id) {
      f(rec);
      rec.updated_at = Instant::now();
      debug!(target: "video", job_id = %self.job_id, status = ?rec.status, progress = rec.progress, "Job updated");
    }
  }

  pub async fn progress(&self, status: JobStatus, progress: u8, message: impl Into<String>) {
    let message = message.into();
    self.update(|r| {
      r.status = status;
      r.progress = progress.min(100);
      r.message = message;
    })
    .await;
  }

  pub async fn complete(&self, title: String, video_url: String) {
    self.update(|r| {
      r.status = JobStatus::Completed;
      r.progress = 100;
      r.message = "Video lecture ready!".into();
      r.title = Some(title);
      r.video_url = Some(video_url);
    })
    .await;
  }

  pub async fn fail(&self, error: impl Into<String>) {
    let error = error.into();
    self.update(|r| mark_failed(r, error)).await;
  }
}

fn mark_failed(r: &mut JobRecord, error: String) {
  r.status = JobStatus::Failed;
  r.message = format!("Video generation failed: {}", error);
  r.error = Some(error);
  r.updated_at = Instant::now();
}

fn evict_finished(jobs: &mut HashMap<String, JobRecord>, retention: Duration) {
  let before = jobs.len();
  jobs.retain(|_, r| !r.status.is_terminal() || r.updated_at.elapsed() < retention);
  if jobs.len() < before {
    info!(target: "video", evicted = before - jobs.len(), "Evicted finished jobs");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn lifecycle_is_visible_to_pollers() {
    let reg = JobRegistry::new();
    let job = reg.create().await;
    assert_eq!(job.job_id().len(), 8);
    let id = job.job_id().to_string();

    let queued = reg.get(&id).await.unwrap();
    assert_eq!((queued.status, queued.progress), (JobStatus::Queued, 0));

    job.progress(JobStatus::FetchingVideos, 56, "Fetching stock footage...").await;
    assert_eq!(reg.get(&id).await.unwrap().progress, 56);

    job.complete("Lecture: Gravity".into(), format!("/downloads/generated_videos/{}/lecture.mp4", id)).await;
    let done = reg.get(&id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert!(done.video_url.unwrap().ends_with("/lecture.mp4"));
  }

  #[tokio::test]
  async fn failure_records_error_and_unknown_ids_are_absent() {
    let reg = JobRegistry::new();
    let job = reg.create().await;
    job.fail("no narration audio").await;
    let rec = reg.get(job.job_id()).await.unwrap();
    assert_eq!(rec.status, JobStatus::Failed);
    assert_eq!(rec.error.as_deref(), Some("no narration audio"));
    assert!(reg.get("missing").await.is_none());
  }

  #[tokio::test]
  async fn panicking_task_fails_its_job() {
    let reg = JobRegistry::new();
    let job = reg.create().await;
    let id = job.job_id().to_string();
    let task = tokio::spawn(async move {
      job.progress(JobStatus::GeneratingScript, 10, "Generating lecture script...").await;
      panic!("script parser blew up");
    });
    reg.watch(id.clone(), task);

    let mut rec = reg.get(&id).await.unwrap();
    for _ in 0..100 {
      if rec.status.is_terminal() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
      rec = reg.get(&id).await.unwrap();
    }
    assert_eq!(rec.status, JobStatus::Failed);
    assert!(rec.error.is_some());
  }

  #[tokio::test]
  async fn only_stale_finished_jobs_are_evicted() {
    let reg = JobRegistry::new();
    let done = reg.create().await;
    done.complete("Lecture: Tides".into(), "/downloads/generated_videos/x/lecture.mp4".into()).await;
    let running = reg.create().await;

    let mut jobs = reg.jobs.write().await;
    evict_finished(&mut jobs, Duration::from_secs(3600));
    assert_eq!(jobs.len(), 2);
    evict_finished(&mut jobs, Duration::ZERO);
    assert!(!jobs.contains_key(done.job_id()));
    assert!(jobs.contains_key(running.job_id()));
  }
}
