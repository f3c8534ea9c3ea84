//! Video lecture pipeline run as a background job.
//!
//! script (model) -> narration (speech) -> one stock clip per scene -> ffmpeg assembly.
//! Progress: script 10, audio 30, footage 50 plus 20/n per scene, assembling 80,
//! done 100. A model failure or missing narration fails the job; missing clips do not.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::Prompts;
use crate::domain::LectureScript;
use crate::extract::{extract_json_as, JsonShape};
use crate::jobs::{JobHandle, JobStatus};
use crate::llm::{LanguageModel, LlmError, ModelTier};
use crate::seeds::fallback_lecture_script;
use crate::services::assembler::AssemblyError;
use crate::services::{FootageSource, SpeechSynthesizer, VideoAssembler};
use crate::util::{fill_template, take_chars};

const LECTURE_MINUTES: &str = "2";
const CONTEXT_PROMPT_CHARS: usize = 3000;
const CAPTION_CHARS: usize = 80;
const NARRATION_LANGUAGE: &str = "en-IN";

#[derive(Debug, Error)]
pub enum LectureError {
  #[error("script generation failed: {0}")]
  Script(#[from] LlmError),
  #[error("narration audio could not be generated")]
  NoNarration,
  #[error("narration audio is not valid base64: {0}")]
  Decode(#[from] base64::DecodeError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("video assembly failed: {0}")]
  Assembly(#[from] AssemblyError),
}

/// Public URL of a finished lecture.
pub fn video_url(job_id: &str) -> String {
  format!("/downloads/generated_videos/{}/lecture.mp4", job_id)
}

/// Progress after fetching footage for scene `i` of `n` (integer steps, as a share of 20).
pub fn scene_progress(i: usize, n: usize) -> u8 {
  if n == 0 {
    return 50;
  }
  let step = 20 / n;
  (50 + (i + 1) * step).min(70) as u8
}

pub struct LectureGenerator {
  pub llm: Arc<dyn LanguageModel>,
  pub prompts: Arc<Prompts>,
  pub speech: Arc<dyn SpeechSynthesizer>,
  pub footage: Arc<dyn FootageSource>,
  pub assembler: Arc<dyn VideoAssembler>,
  pub output_dir: PathBuf,
}

impl LectureGenerator {
  /// Script from the model. Unparseable output falls back to a three-scene script;
  /// a failed model call is an error.
  pub async fn generate_script(&self, topic: &str, context: &str) -> Result<LectureScript, LlmError> {
    let context_block = if context.trim().is_empty() {
      String::new()
    } else {
      format!("\nUse this reference material:\n{}\n", take_chars(context, CONTEXT_PROMPT_CHARS))
    };
    let user = fill_template(
      &self.prompts.lecture_user_template,
      &[("minutes", LECTURE_MINUTES), ("topic", topic), ("context", &context_block)],
    );
    let text = self.llm.invoke(&self.prompts.lecture_system, &user, ModelTier::Smart).await?;
    match extract_json_as::<LectureScript>(&text, JsonShape::Object) {
      Ok(script) if !script.scenes.is_empty() => Ok(script),
      Ok(_) => {
        warn!(target: "video", %topic, "Script has no scenes; using fallback script");
        Ok(fallback_lecture_script(topic))
      }
      Err(e) => {
        warn!(target: "video", %topic, error = %e, "Unparseable script; using fallback script");
        Ok(fallback_lecture_script(topic))
      }
    }
  }

  /// Drive one job to completion or failure. Never panics; the outcome lands in the registry.
  #[instrument(level = "info", skip(self, job, topic, context), fields(job_id = %job.job_id(), %topic))]
  pub async fn run(&self, job: JobHandle, topic: String, context: String) {
    match self.produce(&job, &topic, &context).await {
      Ok(title) => {
        info!(target: "video", job_id = %job.job_id(), %title, "Lecture ready");
        job.complete(title, video_url(job.job_id())).await;
      }
      Err(e) => {
        error!(target: "video", job_id = %job.job_id(), error = %e, "Lecture generation failed");
        job.fail(e.to_string()).await;
      }
    }
  }

  async fn produce(&self, job: &JobHandle, topic: &str, context: &str) -> Result<String, LectureError> {
    let dir = self.output_dir.join(job.job_id());
    tokio::fs::create_dir_all(&dir).await?;

    job.progress(JobStatus::GeneratingScript, 10, "Generating lecture script...").await;
    let script = self.generate_script(topic, context).await?;

    job.progress(JobStatus::GeneratingAudio, 30, "Generating narration audio...").await;
    let audio_b64 = self
      .speech
      .synthesize(&script.narration(), NARRATION_LANGUAGE)
      .await
      .ok_or(LectureError::NoNarration)?;
    let audio_path = dir.join("narration.wav");
    let bytes = base64::engine::general_purpose::STANDARD.decode(audio_b64.trim())?;
    tokio::fs::write(&audio_path, bytes).await?;

    job.progress(JobStatus::FetchingVideos, 50, "Fetching stock footage...").await;
    let clips = self.fetch_clips(job, &script, &dir).await;

    job.progress(JobStatus::Assembling, 80, "Assembling final video...").await;
    let captions: Vec<String> = script.scenes.iter().map(|s| take_chars(&s.narration, CAPTION_CHARS)).collect();
    self.assembler.assemble(&audio_path, &clips, &captions, &dir.join("lecture.mp4")).await?;
    Ok(script.title)
  }

  async fn fetch_clips(&self, job: &JobHandle, script: &LectureScript, dir: &Path) -> Vec<Option<PathBuf>> {
    let n = script.scenes.len();
    let mut clips = Vec::with_capacity(n);
    for (i, scene) in script.scenes.iter().enumerate() {
      let clip = self.footage.search_and_download(&scene.visual, &dir.join(format!("clip_{}.mp4", i))).await;
      if clip.is_none() {
        warn!(target: "video", scene = i, visual = %scene.visual, "No footage; placeholder will be used");
      }
      clips.push(clip);
      job.progress(JobStatus::FetchingVideos, scene_progress(i, n), "Fetching stock footage...").await;
    }
    clips
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::jobs::JobRegistry;
  use crate::services::mock::{FailingModel, NoFootage, RecordingAssembler, ScriptedModel, StaticSpeech};

  fn generator(llm: Arc<dyn LanguageModel>, audio: Option<String>, assembler: Arc<RecordingAssembler>) -> LectureGenerator {
    LectureGenerator {
      llm,
      prompts: Arc::new(Prompts::default()),
      speech: Arc::new(StaticSpeech(audio)),
      footage: Arc::new(NoFootage),
      assembler,
      output_dir: std::env::temp_dir().join(format!("edusynth-test-{}", uuid::Uuid::new_v4())),
    }
  }

  #[test]
  fn scene_progress_uses_integer_steps() {
    assert_eq!(scene_progress(0, 3), 56);
    assert_eq!(scene_progress(2, 3), 68);
    assert_eq!(scene_progress(3, 4), 70);
    assert_eq!(scene_progress(0, 0), 50);
  }

  #[tokio::test]
  async fn completed_job_uses_placeholders_for_missing_footage() {
    let llm = ScriptedModel::new().reply(
      r#"{"title": "Gravity 101", "scenes": [{"visual": "apple falling", "narration": "Things fall."}, {"visual": "planets", "narration": "Planets orbit."}]}"#,
    );
    let assembler = Arc::new(RecordingAssembler::default());
    let audio = base64::engine::general_purpose::STANDARD.encode(b"RIFFdata");
    let lg = generator(Arc::new(llm), Some(audio), assembler.clone());

    let reg = JobRegistry::new();
    let job = reg.create().await;
    let id = job.job_id().to_string();
    lg.run(job, "gravity".into(), String::new()).await;

    let rec = reg.get(&id).await.unwrap();
    assert_eq!(rec.status, JobStatus::Completed);
    assert_eq!(rec.title.as_deref(), Some("Gravity 101"));
    assert_eq!(rec.video_url, Some(video_url(&id)));
    assert_eq!(*assembler.clips_seen.lock().unwrap(), vec![None, None]);
    let narration = lg.output_dir.join(&id).join("narration.wav");
    assert_eq!(std::fs::read(narration).unwrap(), b"RIFFdata");
    let _ = std::fs::remove_dir_all(&lg.output_dir);
  }

  #[tokio::test]
  async fn unparseable_script_falls_back_but_missing_audio_fails_job() {
    let llm = ScriptedModel::new().reply("I cannot produce JSON today.");
    let lg = generator(Arc::new(llm), None, Arc::new(RecordingAssembler::default()));
    let reg = JobRegistry::new();
    let job = reg.create().await;
    let id = job.job_id().to_string();
    lg.run(job, "optics".into(), String::new()).await;
    let rec = reg.get(&id).await.unwrap();
    assert_eq!(rec.status, JobStatus::Failed);
    assert_eq!(rec.error.as_deref(), Some("narration audio could not be generated"));
    assert_eq!(rec.progress, 30);
    let _ = std::fs::remove_dir_all(&lg.output_dir);
  }

  #[tokio::test]
  async fn script_fallback_and_model_failure() {
    let llm = ScriptedModel::new().reply("I cannot produce JSON today.");
    let lg = generator(Arc::new(llm), None, Arc::new(RecordingAssembler::default()));
    let script = lg.generate_script("optics", "").await.unwrap();
    assert_eq!(script, fallback_lecture_script("optics"));

    let reg = JobRegistry::new();
    let job = reg.create().await;
    let id = job.job_id().to_string();
    let failing = generator(Arc::new(FailingModel), None, Arc::new(RecordingAssembler::default()));
    failing.run(job, "optics".into(), String::new()).await;
    let rec = reg.get(&id).await.unwrap();
    assert_eq!(rec.status, JobStatus::Failed);
    assert!(rec.error.unwrap().starts_with("script generation failed"));
    let _ = std::fs::remove_dir_all(&failing.output_dir);
  }
}
