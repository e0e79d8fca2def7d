//! Transcoding through an external `gifsicle` binary.

use super::{CompressionProfile, Transcoder};
use crate::result::{CastError, CastResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Palette size used by the ultra-lossy profile
pub const ULTRA_LOSSY_COLORS: u16 = 64;

/// Pipes the GIF through `gifsicle` on stdin/stdout
#[derive(Debug, Clone)]
pub struct GifsicleTranscoder {
    program: String,
    extra_flags: Vec<String>,
}

impl Default for GifsicleTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GifsicleTranscoder {
    /// Use `gifsicle` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "gifsicle".to_string(),
            extra_flags: Vec::new(),
        }
    }

    /// Set a custom binary path
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Add a flag passed on every invocation
    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.extra_flags.push(flag.into());
        self
    }

    /// Check whether the binary runs
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }

    /// Command-line arguments for a profile
    #[must_use]
    pub fn args(&self, profile: &CompressionProfile) -> Vec<String> {
        let mut args = vec![format!("-O{}", profile.optimization())];
        if let Some(loss) = profile.loss() {
            args.push(format!("--lossy={loss}"));
        }
        if matches!(profile, CompressionProfile::UltraLossy { .. }) {
            args.push(format!("--colors={ULTRA_LOSSY_COLORS}"));
        }
        args.extend(self.extra_flags.iter().cloned());
        args
    }
}

#[async_trait]
impl Transcoder for GifsicleTranscoder {
    async fn transcode(&self, input: &[u8], profile: &CompressionProfile) -> CastResult<Vec<u8>> {
        let args = self.args(profile);
        debug!(program = %self.program, ?args, "running gifsicle");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CastError::encode(format!(
                    "failed to execute {}: {e}. Is gifsicle installed?",
                    self.program
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CastError::encode("gifsicle stdin unavailable"))?;
        let payload = input.to_vec();
        // Feed stdin concurrently so a full stdout pipe cannot deadlock us.
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CastError::encode(format!("gifsicle did not finish: {e}")))?;
        writer
            .await
            .map_err(|e| CastError::encode(format!("gifsicle stdin task panicked: {e}")))?
            .map_err(|e| CastError::encode(format!("failed to feed gifsicle: {e}")))?;

        if !output.status.success() {
            return Err(CastError::encode(format!(
                "gifsicle exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}
