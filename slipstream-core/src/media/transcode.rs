//! Supervised audio-repair transcoding.
//!
//! Each active transcoded playback owns one external ffmpeg process that
//! copies the video track and re-encodes audio to AAC, streaming a matroska
//! container to stdout. Seeking restarts the process with an input-side
//! offset; the previous process for the same (session, item) key is killed
//! first so two transcoders never compete for one response. The returned
//! stream carries a guard that kills the process on every exit path,
//! including abrupt client disconnect.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::basic_auth_header;
use crate::config::TranscodeConfig;
use crate::locator::ContentHash;

/// Audio codec every repaired stream is encoded to.
const TARGET_AUDIO_CODEC: &str = "aac";

/// Identity of one streaming playback: a session item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub hash: ContentHash,
    pub index: u64,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.index)
    }
}

/// Parameters for one transcode run.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Origin stream URL the transcoder reads from.
    pub input_url: String,
    /// Input-side seek offset in seconds; 0 starts from the beginning.
    pub seek_secs: u64,
}

/// Errors from starting a transcode process.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Failed to spawn transcoder: {reason}")]
    SpawnFailed { reason: String },
}

struct RunningTranscode {
    generation: u64,
    child: Child,
}

type ActiveMap = Arc<Mutex<HashMap<StreamKey, RunningTranscode>>>;

/// Supervises at most one live transcoder per (session, item) key.
pub struct TranscodeManager {
    config: TranscodeConfig,
    auth_header: Option<String>,
    active: ActiveMap,
    generations: AtomicU64,
}

impl TranscodeManager {
    pub fn new(config: TranscodeConfig, credentials: Option<(&str, &str)>) -> Self {
        let auth_header = credentials.map(|(user, pass)| basic_auth_header(user, pass));
        Self {
            config,
            auth_header,
            active: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Starts a transcoder for `key`, replacing any prior one.
    ///
    /// # Errors
    /// - `TranscodeError::SpawnFailed` - Process could not start
    pub fn start(&self, key: StreamKey, job: &TranscodeJob) -> Result<TranscodeStream, TranscodeError> {
        if job.seek_secs > 0 {
            info!("Starting transcoder for {key} at {}s", job.seek_secs);
        } else {
            info!("Starting transcoder for {key}");
        }

        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(transcode_args(
            &self.config,
            self.auth_header.as_deref(),
            job,
        ));
        self.start_process(key, cmd)
    }

    fn start_process(
        &self,
        key: StreamKey,
        mut cmd: Command,
    ) -> Result<TranscodeStream, TranscodeError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The prior process for this key must be gone before its replacement
        // starts; two transcoders must never feed the same playback.
        if let Some(mut previous) = self.active.lock().remove(&key) {
            info!("Replacing live transcoder for {key}");
            terminate(key, &mut previous.child);
        }

        let mut child = cmd.spawn().map_err(|e| TranscodeError::SpawnFailed {
            reason: e.to_string(),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscodeError::SpawnFailed {
                reason: "transcoder stdout not captured".to_string(),
            })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_transcoder_output(key, stderr));
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut active = self.active.lock();
            // A concurrent start for the same key may have landed between the
            // kill above and this insert; whichever got in first loses.
            if let Some(mut raced) = active.insert(key, RunningTranscode { generation, child }) {
                terminate(key, &mut raced.child);
            }
        }

        Ok(TranscodeStream {
            inner: ReaderStream::new(stdout),
            _guard: TranscodeGuard {
                active: self.active.clone(),
                key,
                generation,
            },
        })
    }

    /// Number of currently supervised transcoders.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Whether a transcoder is live for the given key.
    pub fn is_active(&self, key: StreamKey) -> bool {
        self.active.lock().contains_key(&key)
    }
}

/// Kills the process if it is still running; a finished process only gets
/// its exit status logged (the client already received its bytes).
fn terminate(key: StreamKey, child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            if status.success() {
                debug!("Transcoder for {key} already finished cleanly");
            } else {
                warn!("Transcoder for {key} exited with {status}");
            }
        }
        Ok(None) => {
            debug!("Killing transcoder for {key}");
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill transcoder for {key}: {e}");
            }
        }
        Err(e) => warn!("Could not reap transcoder for {key}: {e}"),
    }
}

async fn log_transcoder_output(key: StreamKey, stderr: ChildStderr) {
    let mut lines = tokio::io::BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("transcoder[{key}]: {line}");
    }
}

/// Builds the fixed audio-repair argument profile.
///
/// The seek offset goes before `-i` so the demuxer jumps straight to the
/// target instead of decoding and discarding from zero.
fn transcode_args(
    config: &TranscodeConfig,
    auth_header: Option<&str>,
    job: &TranscodeJob,
) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(header) = auth_header {
        args.push("-headers".to_string());
        args.push(header.to_string());
    }
    if job.seek_secs > 0 {
        args.push("-ss".to_string());
        args.push(job.seek_secs.to_string());
    }
    let channels = config.audio_channels.to_string();
    args.extend(
        [
            "-i",
            job.input_url.as_str(),
            "-c:v",
            "copy",
            "-c:a",
            TARGET_AUDIO_CODEC,
            "-b:a",
            config.audio_bitrate.as_str(),
            "-ac",
            channels.as_str(),
            "-f",
            "matroska",
            "pipe:1",
        ]
        .map(str::to_string),
    );
    args
}

/// Transcoder stdout as an HTTP-ready byte stream.
///
/// Dropping the stream (client disconnect, normal end, handler error)
/// kills the underlying process.
pub struct TranscodeStream {
    inner: ReaderStream<ChildStdout>,
    _guard: TranscodeGuard,
}

impl Stream for TranscodeStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

struct TranscodeGuard {
    active: ActiveMap,
    key: StreamKey,
    generation: u64,
}

impl Drop for TranscodeGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        // A newer process may have replaced this one (seek restart); only the
        // guard matching the live generation tears the entry down.
        let owns_entry = active
            .get(&self.key)
            .is_some_and(|running| running.generation == self.generation);
        if owns_entry {
            if let Some(mut running) = active.remove(&self.key) {
                terminate(self.key, &mut running.child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(index: u64) -> StreamKey {
        StreamKey {
            hash: ContentHash::new([0x11; 20]),
            index,
        }
    }

    fn job(seek: u64) -> TranscodeJob {
        TranscodeJob {
            input_url: "http://origin.test/stream/video?link=abc&index=0".to_string(),
            seek_secs: seek,
        }
    }

    #[test]
    fn seek_offset_precedes_input() {
        let config = TranscodeConfig::default();
        let args = transcode_args(&config, None, &job(600));

        let seek_pos = args.iter().position(|a| a == "-ss").unwrap();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert!(seek_pos < input_pos);
        assert_eq!(args[seek_pos + 1], "600");
    }

    #[test]
    fn zero_seek_omits_offset() {
        let config = TranscodeConfig::default();
        let args = transcode_args(&config, None, &job(0));
        assert!(!args.contains(&"-ss".to_string()));
    }

    #[test]
    fn profile_copies_video_and_repairs_audio() {
        let config = TranscodeConfig::default();
        let args = transcode_args(&config, None, &job(0));

        let find = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(find("-c:v"), "copy");
        assert_eq!(find("-c:a"), "aac");
        assert_eq!(find("-b:a"), "128k");
        assert_eq!(find("-ac"), "2");
        assert_eq!(find("-f"), "matroska");
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn auth_header_comes_first() {
        let config = TranscodeConfig::default();
        let args = transcode_args(&config, Some("Authorization: Basic abc"), &job(30));
        assert_eq!(args[0], "-headers");
        assert_eq!(args[1], "Authorization: Basic abc");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let manager = TranscodeManager::new(
            TranscodeConfig {
                ffmpeg_bin: "/nonexistent/transcoder-binary".to_string(),
                ..TranscodeConfig::default()
            },
            None,
        );

        let result = manager.start(key(0), &job(0));
        assert!(matches!(result, Err(TranscodeError::SpawnFailed { .. })));
    }

    #[cfg(unix)]
    fn long_running_command() -> Command {
        let mut cmd = Command::new("sleep");
        cmd.arg("300");
        cmd
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn seek_restart_leaves_exactly_one_live_process() {
        let manager = TranscodeManager::new(TranscodeConfig::default(), None);

        let first = manager.start_process(key(3), long_running_command()).unwrap();
        let second = manager.start_process(key(3), long_running_command()).unwrap();

        assert_eq!(manager.active_count(), 1);
        assert!(manager.is_active(key(3)));

        // The stale guard must not tear down the replacement process.
        drop(first);
        assert_eq!(manager.active_count(), 1);

        drop(second);
        assert_eq!(manager.active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn client_disconnect_kills_process() {
        let manager = TranscodeManager::new(TranscodeConfig::default(), None);

        let stream = manager.start_process(key(7), long_running_command()).unwrap();
        assert!(manager.is_active(key(7)));

        // Dropping the response stream is what a disconnect looks like.
        drop(stream);
        assert!(!manager.is_active(key(7)));
        assert_eq!(manager.active_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn distinct_items_run_independently() {
        let manager = TranscodeManager::new(TranscodeConfig::default(), None);

        let a = manager.start_process(key(1), long_running_command()).unwrap();
        let b = manager.start_process(key(2), long_running_command()).unwrap();

        assert_eq!(manager.active_count(), 2);
        drop(a);
        assert_eq!(manager.active_count(), 1);
        assert!(manager.is_active(key(2)));
        drop(b);
    }
}
