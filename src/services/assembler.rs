//! Lecture video assembly with ffmpeg.
//!
//! Every scene gets an equal share of the narration length. Missing clips become a
//! solid (30,30,50) 1280x720 placeholder of the same duration. Captions are written
//! next to the video as an SRT sidecar.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::util::trunc_for_log;

pub const FRAME_WIDTH: u32 = 1280;
pub const FRAME_HEIGHT: u32 = 720;
pub const FPS: u32 = 24;
/// Placeholder background, (30,30,50) as hex.
pub const PLACEHOLDER_COLOR: &str = "0x1e1e32";

#[derive(Debug, Error)]
pub enum AssemblyError {
  #[error("could not probe narration length: {0}")]
  Probe(String),
  #[error("failed to launch {bin}: {source}")]
  Spawn { bin: String, source: std::io::Error },
  #[error("ffmpeg exited with {code:?}: {stderr}")]
  Encode { code: Option<i32>, stderr: String },
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

#[async_trait]
pub trait VideoAssembler: Send + Sync {
  async fn assemble(
    &self,
    audio: &Path,
    clips: &[Option<PathBuf>],
    captions: &[String],
    out: &Path,
  ) -> Result<PathBuf, AssemblyError>;
}

/// ffmpeg argument list for one assembly. Clips that are `None` (or absent on disk,
/// decided by the caller) render as colour placeholders.
pub fn build_ffmpeg_args(audio: &Path, clips: &[Option<PathBuf>], total_secs: f64, out: &Path) -> Vec<String> {
  let scenes = clips.len().max(1);
  let scene = total_secs / scenes as f64;
  let dur = format!("{:.3}", scene);
  let mut args: Vec<String> = vec!["-y".into()];

  let placeholder = format!("color=c={}:s={}x{}:r={}", PLACEHOLDER_COLOR, FRAME_WIDTH, FRAME_HEIGHT, FPS);
  let inputs: Vec<Option<&PathBuf>> = if clips.is_empty() { vec![None] } else { clips.iter().map(Option::as_ref).collect() };
  for clip in &inputs {
    match clip {
      Some(path) => {
        args.extend(["-t".into(), dur.clone(), "-i".into(), path.display().to_string()]);
      }
      None => {
        args.extend(["-f".into(), "lavfi".into(), "-t".into(), dur.clone(), "-i".into(), placeholder.clone()]);
      }
    }
  }
  args.extend(["-i".into(), audio.display().to_string()]);

  let mut filter = String::new();
  for i in 0..inputs.len() {
    filter.push_str(&format!(
      "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},trim=duration={dur},setpts=PTS-STARTPTS[v{i}];",
      i = i, w = FRAME_WIDTH, h = FRAME_HEIGHT, fps = FPS, dur = dur
    ));
  }
  for i in 0..inputs.len() {
    filter.push_str(&format!("[v{}]", i));
  }
  filter.push_str(&format!("concat=n={}:v=1:a=0[outv]", inputs.len()));

  args.extend([
    "-filter_complex".into(), filter,
    "-map".into(), "[outv]".into(),
    "-map".into(), format!("{}:a", inputs.len()),
    "-c:v".into(), "libx264".into(),
    "-c:a".into(), "aac".into(),
    "-pix_fmt".into(), "yuv420p".into(),
    "-shortest".into(),
    out.display().to_string(),
  ]);
  args
}

fn srt_time(secs: f64) -> String {
  let ms = (secs * 1000.0).round() as u64;
  format!("{:02}:{:02}:{:02},{:03}", ms / 3_600_000, (ms / 60_000) % 60, (ms / 1000) % 60, ms % 1000)
}

/// One cue per scene, equal durations.
pub fn build_srt(captions: &[String], total_secs: f64) -> String {
  if captions.is_empty() {
    return String::new();
  }
  let scene = total_secs / captions.len() as f64;
  captions
    .iter()
    .enumerate()
    .map(|(i, text)| {
      format!("{}\n{} --> {}\n{}\n", i + 1, srt_time(scene * i as f64), srt_time(scene * (i + 1) as f64), text)
    })
    .collect::<Vec<_>>()
    .join("\n")
}

#[derive(Clone, Debug)]
pub struct FfmpegAssembler {
  ffmpeg_bin: String,
  ffprobe_bin: String,
}

impl FfmpegAssembler {
  pub fn new(ffmpeg_bin: &str, ffprobe_bin: &str) -> Self {
    Self { ffmpeg_bin: ffmpeg_bin.into(), ffprobe_bin: ffprobe_bin.into() }
  }

  async fn probe_duration(&self, audio: &Path) -> Result<f64, AssemblyError> {
    let output = Command::new(&self.ffprobe_bin)
      .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
      .arg(audio)
      .output()
      .await
      .map_err(|source| AssemblyError::Spawn { bin: self.ffprobe_bin.clone(), source })?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim().parse::<f64>().ok().filter(|d| *d > 0.0).ok_or_else(|| AssemblyError::Probe(text.trim().to_string()))
  }
}

#[async_trait]
impl VideoAssembler for FfmpegAssembler {
  #[instrument(level = "info", skip(self, clips, captions), fields(audio = %audio.display(), scenes = clips.len()))]
  async fn assemble(
    &self,
    audio: &Path,
    clips: &[Option<PathBuf>],
    captions: &[String],
    out: &Path,
  ) -> Result<PathBuf, AssemblyError> {
    let total = self.probe_duration(audio).await?;
    let usable: Vec<Option<PathBuf>> = clips.iter().map(|c| c.clone().filter(|p| p.exists())).collect();
    let placeholders = usable.iter().filter(|c| c.is_none()).count();

    let args = build_ffmpeg_args(audio, &usable, total, out);
    let output = Command::new(&self.ffmpeg_bin)
      .args(&args)
      .output()
      .await
      .map_err(|source| AssemblyError::Spawn { bin: self.ffmpeg_bin.clone(), source })?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(AssemblyError::Encode { code: output.status.code(), stderr: trunc_for_log(stderr.trim(), 400) });
    }

    let srt = build_srt(captions, total);
    if !srt.is_empty() {
      if let Err(e) = tokio::fs::write(out.with_extension("srt"), srt).await {
        warn!(target: "video", error = %e, "Could not write caption sidecar");
      }
    }
    info!(target: "video", out = %out.display(), duration_secs = total, placeholders, "Video assembled");
    Ok(out.to_path_buf())
  }
}
