//! Codec compatibility and duration probing.
//!
//! Runs a bounded metadata probe against an origin stream and decides
//! whether its audio track can be played directly. Every failure mode leans
//! toward the transcode path: a stream that probes badly still plays, just
//! through the slower audio-repair pipeline.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use super::basic_auth_header;
use crate::config::TranscodeConfig;

/// Audio codecs playable without repair.
pub const COMPATIBLE_AUDIO_CODECS: [&str; 2] = ["aac", "mp3"];

/// Errors from running or parsing the metadata probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Probe failed: {reason}")]
    Failed { reason: String },
}

/// Verdict on one stream's audio compatibility.
#[derive(Debug, Clone, Serialize)]
pub struct CodecReport {
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    pub needs_transcode: bool,
    pub reason: String,
}

impl CodecReport {
    /// Conservative verdict for a stream that could not be probed.
    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self {
            has_audio: false,
            audio_codec: None,
            needs_transcode: true,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Builds a codec verdict from raw ffprobe JSON.
///
/// # Errors
/// - `ProbeError::Failed` - Output is not valid probe JSON
pub(crate) fn codec_report(json: &str) -> Result<CodecReport, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_str(json).map_err(|e| ProbeError::Failed {
        reason: format!("unparsable probe output: {e}"),
    })?;

    let audio = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"));

    match audio {
        None => Ok(CodecReport {
            has_audio: false,
            audio_codec: None,
            needs_transcode: true,
            reason: "no audio track".to_string(),
        }),
        Some(stream) => {
            let codec = stream
                .codec_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let compatible = COMPATIBLE_AUDIO_CODECS.contains(&codec.as_str());
            Ok(CodecReport {
                has_audio: true,
                needs_transcode: !compatible,
                reason: if compatible {
                    format!("compatible codec: {codec}")
                } else {
                    format!("incompatible codec: {codec}")
                },
                audio_codec: Some(codec),
            })
        }
    }
}

/// Extracts the container duration in whole seconds from ffprobe JSON.
pub(crate) fn duration_secs(json: &str) -> Option<u64> {
    let parsed: FfprobeOutput = serde_json::from_str(json).ok()?;
    let duration = parsed.format?.duration?;
    let seconds: f64 = duration.parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(seconds.floor() as u64)
    } else {
        None
    }
}

/// Stream metadata probing, abstracted so handlers can be tested without
/// spawning external tools.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Probes the stream's first audio track and reports compatibility.
    ///
    /// # Errors
    /// - `ProbeError::Failed` - Tool failed or produced garbage; callers
    ///   treat this as needs-transcode (`CodecReport::probe_failed`)
    async fn probe_codec(&self, url: &str) -> Result<CodecReport, ProbeError>;

    /// Probes the container duration in seconds. `None` on any failure.
    async fn probe_duration(&self, url: &str) -> Option<u64>;
}

/// Production prober shelling out to ffprobe.
pub struct FfprobeProber {
    config: TranscodeConfig,
    auth_header: Option<String>,
}

impl FfprobeProber {
    pub fn new(config: TranscodeConfig, credentials: Option<(&str, &str)>) -> Self {
        let auth_header = credentials.map(|(user, pass)| basic_auth_header(user, pass));
        Self {
            config,
            auth_header,
        }
    }

    async fn run(&self, url: &str, selector: &str) -> Result<String, ProbeError> {
        let mut cmd = Command::new(&self.config.ffprobe_bin);
        if let Some(header) = &self.auth_header {
            cmd.arg("-headers").arg(header);
        }
        cmd.arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg(selector)
            .arg("-analyzeduration")
            .arg(self.config.probe_window.to_string())
            .arg("-probesize")
            .arg(self.config.probe_window.to_string())
            .arg(url)
            .stdin(Stdio::null());

        debug!("Probing {url} with {} {selector}", self.config.ffprobe_bin);

        let output = tokio::time::timeout(self.config.probe_timeout, cmd.output())
            .await
            .map_err(|_| ProbeError::Failed {
                reason: "probe timed out".to_string(),
            })?
            .map_err(|e| ProbeError::Failed {
                reason: format!("failed to run {}: {e}", self.config.ffprobe_bin),
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                reason: format!("{} exited with {}", self.config.ffprobe_bin, output.status),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| ProbeError::Failed {
            reason: "probe output was not UTF-8".to_string(),
        })
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe_codec(&self, url: &str) -> Result<CodecReport, ProbeError> {
        let json = self.run(url, "-show_streams").await?;
        codec_report(&json)
    }

    async fn probe_duration(&self, url: &str) -> Option<u64> {
        match self.run(url, "-show_format").await {
            Ok(json) => duration_secs(&json),
            Err(e) => {
                warn!("Duration probe failed for {url}: {e}");
                None
            }
        }
    }
}
