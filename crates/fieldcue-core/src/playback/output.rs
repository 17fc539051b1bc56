//! Audio output backends.
//!
//! An [`AudioOutput`] starts one clip and hands back a [`PlaybackHandle`]:
//! a one-shot "finished" signal plus a way to stop. Dropping the handle
//! stops playback and drops the finished listener, so no completion can be
//! observed after a stop.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::PlaybackError;

/// A resolved clip ready to be played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipSource {
    pub state: String,
    pub clip: String,
    pub path: PathBuf,
}

/// One in-flight clip.
pub struct PlaybackHandle {
    opening: Option<oneshot::Receiver<Result<(), String>>>,
    finished: oneshot::Receiver<()>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl PlaybackHandle {
    pub fn new(finished: oneshot::Receiver<()>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            opening: None,
            finished,
            stop: Some(Box::new(stop)),
        }
    }

    /// Handle for an output that opens the resource in the background and
    /// reports the outcome on `opening`.
    pub fn opening(
        opening: oneshot::Receiver<Result<(), String>>,
        finished: oneshot::Receiver<()>,
        stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            opening: Some(opening),
            finished,
            stop: Some(Box::new(stop)),
        }
    }

    /// Wait until the output has actually started.
    ///
    /// Returns the output's message when it could not open the resource.
    pub async fn opened(&mut self) -> Result<(), String> {
        match self.opening.take() {
            None => Ok(()),
            Some(opening) => match opening.await {
                Ok(outcome) => outcome,
                Err(_) => Err("output exited during startup".into()),
            },
        }
    }

    /// Wait for the end of the clip.
    ///
    /// Returns `false` when the output went away without reporting an end.
    pub async fn wait(&mut self) -> bool {
        (&mut self.finished).await.is_ok()
    }

    /// Stop the clip and release the output. Idempotent, and also run on
    /// drop after a natural end.
    pub fn stop(&mut self) {
        self.finished.close();
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub trait AudioOutput: Send + Sync {
    /// Begin playing `source`.
    ///
    /// # Errors
    /// `StartFailed` when the resource cannot be opened or decoded.
    fn start(&self, source: &ClipSource) -> Result<PlaybackHandle, PlaybackError>;
}

/// Output that "plays" each clip by waiting a fixed time on the tokio clock.
///
/// Keeps a history of started clips and tracks how many are playing at
/// once, which makes it suitable for dry runs and tests. Must be used from
/// inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct SimulatedOutput {
    clip_length: Duration,
    history: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    playing: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SimulatedOutput {
    pub fn new(clip_length: Duration) -> Self {
        Self {
            clip_length,
            history: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            playing: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `start` fail for this clip name, as a corrupt file would.
    pub fn fail_on(&self, clip: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(clip.into());
        }
    }

    /// Clip names in the order they were started.
    pub fn played(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Clips currently playing.
    pub fn playing(&self) -> usize {
        self.playing.load(Ordering::SeqCst)
    }

    /// Most clips ever playing at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl AudioOutput for SimulatedOutput {
    fn start(&self, source: &ClipSource) -> Result<PlaybackHandle, PlaybackError> {
        let fails = self
            .failing
            .lock()
            .map(|f| f.contains(&source.clip))
            .unwrap_or(false);
        if fails {
            return Err(PlaybackError::StartFailed {
                clip: source.clip.clone(),
                message: "simulated decode failure".into(),
            });
        }

        if let Ok(mut history) = self.history.lock() {
            history.push(source.clip.clone());
        }
        let now_playing = self.playing.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_playing, Ordering::SeqCst);

        // Whoever flips `done` first releases the playing slot.
        let done = Arc::new(AtomicBool::new(false));
        let release = {
            let done = done.clone();
            let playing = self.playing.clone();
            move || {
                if !done.swap(true, Ordering::SeqCst) {
                    playing.fetch_sub(1, Ordering::SeqCst);
                }
            }
        };

        let (tx, rx) = oneshot::channel();
        let length = self.clip_length;
        let on_finish = release.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(length).await;
            on_finish();
            let _ = tx.send(());
        });

        Ok(PlaybackHandle::new(rx, move || {
            task.abort();
            release();
        }))
    }
}
