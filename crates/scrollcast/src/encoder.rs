//! Streaming GIF encoding.
//!
//! An [`EncoderSession`] hands frames over a bounded queue to a blocking
//! worker that owns the `gif::Encoder`. The worker writes through a buffered
//! sink which emits one or more chunks per frame into a [`BufferAssembler`].
//! When the session is closed the worker writes the trailer, flushes the
//! final chunk and signals completion; only then can the artifact be
//! assembled.

use crate::artifact::{Artifact, ArtifactKind};
use crate::decode::{rgba_len, Frame};
use crate::result::{CastError, CastResult};
use gif::{Encoder, Repeat};
use serde::{Deserialize, Serialize};
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Frames waiting for the encoder worker before `add_frame` applies backpressure
const FRAME_QUEUE_DEPTH: usize = 4;

/// Buffered bytes per emitted chunk
const CHUNK_CAPACITY: usize = 64 * 1024;

/// Parameters of one encoder session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Frames per second (1-60)
    pub frame_rate: u32,
    /// Loop the animation forever instead of playing once
    pub loop_forever: bool,
    /// Palette quality (1-100)
    pub quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            frame_rate: 10,
            loop_forever: true,
            quality: 80,
        }
    }
}

impl EncoderConfig {
    /// Create a configuration for the given canvas
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Set frames per second (clamped to 1-60)
    #[must_use]
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps.clamp(1, 60);
        self
    }

    /// Set quality (1-100)
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Play once instead of looping
    #[must_use]
    pub const fn play_once(mut self) -> Self {
        self.loop_forever = false;
        self
    }

    /// Frame delay in centiseconds (GIF standard)
    #[must_use]
    pub fn frame_delay_cs(&self) -> u16 {
        (100 / self.frame_rate.clamp(1, 60)).max(1) as u16
    }

    /// Convert quality (1-100) to NeuQuant speed (1-30)
    #[must_use]
    pub fn quantizer_speed(&self) -> i32 {
        let normalized = 100 - i32::from(self.quality.clamp(1, 100));
        (normalized * 29 / 100 + 1).clamp(1, 30)
    }

    /// Byte length `add_frame` expects
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        rgba_len(self.width, self.height)
    }

    fn canvas(&self) -> CastResult<(u16, u16)> {
        let width = u16::try_from(self.width).ok().filter(|w| *w > 0);
        let height = u16::try_from(self.height).ok().filter(|h| *h > 0);
        match (width, height) {
            (Some(w), Some(h)) => Ok((w, h)),
            _ => Err(CastError::encoder_state(format!(
                "canvas {}x{} is not a valid GIF size",
                self.width, self.height
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct AssemblerInner {
    chunks: Vec<Vec<u8>>,
    completed: bool,
}

/// Accumulates emitted chunks in emission order
///
/// Chunks may be pushed until [`complete`](Self::complete) is called, which
/// may happen exactly once. Reading is only allowed after completion.
#[derive(Debug)]
pub struct BufferAssembler {
    inner: Mutex<AssemblerInner>,
    done_tx: watch::Sender<bool>,
}

impl Default for BufferAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferAssembler {
    /// Create an empty assembler
    #[must_use]
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            inner: Mutex::new(AssemblerInner::default()),
            done_tx,
        }
    }

    fn lock(&self) -> CastResult<std::sync::MutexGuard<'_, AssemblerInner>> {
        self.inner
            .lock()
            .map_err(|_| CastError::encoder_state("chunk accumulator poisoned"))
    }

    /// Append a chunk; empty chunks are ignored
    pub fn push(&self, chunk: Vec<u8>) -> CastResult<()> {
        let mut inner = self.lock()?;
        if inner.completed {
            return Err(CastError::encoder_state("chunk emitted after completion"));
        }
        if !chunk.is_empty() {
            inner.chunks.push(chunk);
        }
        Ok(())
    }

    /// Signal that no more chunks will arrive
    pub fn complete(&self) -> CastResult<()> {
        {
            let mut inner = self.lock()?;
            if inner.completed {
                return Err(CastError::encoder_state("completion signalled twice"));
            }
            inner.completed = true;
        }
        self.done_tx.send_replace(true);
        Ok(())
    }

    /// Whether completion has been signalled
    #[must_use]
    pub fn is_complete(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// Number of chunks emitted so far
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.inner.lock().map(|i| i.chunks.len()).unwrap_or(0)
    }

    /// Total bytes emitted so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|i| i.chunks.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Whether nothing has been emitted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate the chunks, failing if completion has not been signalled
    pub fn try_assemble(&self) -> CastResult<Vec<u8>> {
        let inner = self.lock()?;
        if !inner.completed {
            return Err(CastError::encoder_state(
                "artifact read before the encoder signalled completion",
            ));
        }
        let total = inner.chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in &inner.chunks {
            out.extend_from_slice(chunk);
        }
        Ok(out)
    }

    /// Wait for completion, then concatenate the chunks
    pub async fn assemble(&self) -> CastResult<Vec<u8>> {
        let mut done = self.done_tx.subscribe();
        done.wait_for(|complete| *complete)
            .await
            .map_err(|_| CastError::encoder_state("completion signal dropped"))?;
        self.try_assemble()
    }
}

/// `Write` sink that forwards every write as one chunk
struct ChunkSink {
    assembler: Arc<BufferAssembler>,
}

impl Write for ChunkSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.assembler
            .push(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed,
}

/// An open GIF encoding session with a single writer
#[derive(Debug)]
pub struct EncoderSession {
    config: EncoderConfig,
    state: SessionState,
    frames_added: usize,
    frame_tx: Option<mpsc::Sender<Vec<u8>>>,
    worker: Option<JoinHandle<CastResult<()>>>,
    assembler: Arc<BufferAssembler>,
}

impl EncoderSession {
    /// Open a session: writes the GIF header and starts the encoder worker
    ///
    /// # Errors
    ///
    /// Fails with an encoder state error outside a tokio runtime or for a
    /// canvas GIF cannot hold.
    pub fn open(config: EncoderConfig) -> CastResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            CastError::encoder_state("encoder session opened outside a tokio runtime")
        })?;
        let (width, height) = config.canvas()?;
        let assembler = Arc::new(BufferAssembler::new());
        let sink = BufWriter::with_capacity(
            CHUNK_CAPACITY,
            ChunkSink {
                assembler: Arc::clone(&assembler),
            },
        );

        let mut encoder = Encoder::new(sink, width, height, &[])
            .map_err(|e| CastError::encode(format!("failed to create GIF encoder: {e}")))?;
        // Without the looping extension viewers play the animation once.
        if config.loop_forever {
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| CastError::encode(format!("failed to set GIF repeat: {e}")))?;
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let worker_config = config.clone();
        let worker_assembler = Arc::clone(&assembler);
        let worker = runtime.spawn_blocking(move || {
            run_worker(encoder, frame_rx, &worker_config, &worker_assembler)
        });

        debug!(width, height, fps = config.frame_rate, "encoder session opened");

        Ok(Self {
            config,
            state: SessionState::Open,
            frames_added: 0,
            frame_tx: Some(frame_tx),
            worker: Some(worker),
            assembler,
        })
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Frames accepted so far
    #[must_use]
    pub const fn frames_added(&self) -> usize {
        self.frames_added
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Chunk accumulator shared with the worker
    #[must_use]
    pub fn assembler(&self) -> &Arc<BufferAssembler> {
        &self.assembler
    }

    /// Queue one frame for encoding
    ///
    /// # Errors
    ///
    /// Returns a state error after `close`, or if the frame does not match the
    /// canvas; returns the worker's error if encoding already failed.
    pub async fn add_frame(&mut self, frame: Frame) -> CastResult<()> {
        if self.state == SessionState::Closed {
            return Err(CastError::encoder_state("frame added after close"));
        }
        if frame.width() != self.config.width || frame.height() != self.config.height {
            return Err(CastError::encoder_state(format!(
                "frame is {}x{}, session canvas is {}x{}",
                frame.width(),
                frame.height(),
                self.config.width,
                self.config.height
            )));
        }
        let tx = self
            .frame_tx
            .as_ref()
            .ok_or_else(|| CastError::encoder_state("frame queue missing"))?;
        if tx.send(frame.into_data()).await.is_err() {
            // The worker only hangs up when it failed; surface its error.
            return Err(self.take_worker_error().await);
        }
        self.frames_added += 1;
        Ok(())
    }

    async fn take_worker_error(&mut self) -> CastError {
        self.state = SessionState::Closed;
        self.frame_tx = None;
        match self.worker.take() {
            Some(handle) => match handle.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => CastError::encode("encoder worker stopped early"),
                Err(join) => CastError::encode(format!("encoder worker panicked: {join}")),
            },
            None => CastError::encode("encoder worker already finished"),
        }
    }

    /// Stop accepting frames; the worker writes the trailer and signals completion
    pub fn close(&mut self) -> CastResult<()> {
        if self.state == SessionState::Closed {
            return Err(CastError::encoder_state("session closed twice"));
        }
        self.state = SessionState::Closed;
        self.frame_tx = None;
        debug!(frames = self.frames_added, "encoder session closed");
        Ok(())
    }

    /// Wait for the worker's completion signal and return the artifact
    ///
    /// # Errors
    ///
    /// Returns a state error if the session is still open, and the worker's
    /// error if encoding failed.
    pub async fn assemble(mut self) -> CastResult<Artifact> {
        if self.state != SessionState::Closed {
            return Err(CastError::encoder_state("assemble called before close"));
        }
        let worker = self
            .worker
            .take()
            .ok_or_else(|| CastError::encoder_state("encoder worker already consumed"))?;
        worker
            .await
            .map_err(|join| CastError::encode(format!("encoder worker panicked: {join}")))??;
        let bytes = self.assembler.assemble().await?;
        Ok(Artifact::new(ArtifactKind::Original, bytes))
    }
}

fn run_worker(
    mut encoder: Encoder<BufWriter<ChunkSink>>,
    mut frame_rx: mpsc::Receiver<Vec<u8>>,
    config: &EncoderConfig,
    assembler: &BufferAssembler,
) -> CastResult<()> {
    let (width, height) = config.canvas()?;
    let delay = config.frame_delay_cs();
    let speed = config.quantizer_speed();
    let expected = config.frame_len();

    while let Some(mut rgba) = frame_rx.blocking_recv() {
        if rgba.len() != expected {
            return Err(CastError::encoder_state(format!(
                "frame is {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        let mut frame = gif::Frame::from_rgba_speed(width, height, &mut rgba, speed);
        frame.delay = delay;
        encoder
            .write_frame(&frame)
            .map_err(|e| CastError::encode(format!("failed to write GIF frame: {e}")))?;
        encoder
            .get_mut()
            .flush()
            .map_err(|e| CastError::encode(format!("failed to flush frame chunk: {e}")))?;
    }

    let sink = encoder
        .into_inner()
        .map_err(|e| CastError::encode(format!("failed to write GIF trailer: {e}")))?;
    sink.into_inner()
        .map_err(|e| CastError::encode(format!("failed to flush GIF trailer: {e}")))?;
    assembler.complete()
}
