//! Plays one clip at a time on the leased audio session.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::clips::ClipStore;
use super::output::{ClipSource, PlaybackHandle};
use super::session::SessionLease;
use crate::error::PlaybackError;

pub struct PlaybackDriver {
    lease: SessionLease,
    clips: Arc<dyn ClipStore>,
    active: Option<PlaybackHandle>,
}

enum Wait {
    Finished(bool),
    FailedToOpen(String),
    Cancelled,
}

impl PlaybackDriver {
    pub fn new(lease: SessionLease, clips: Arc<dyn ClipStore>) -> Self {
        Self {
            lease,
            clips,
            active: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Play `clip` of `state` to its end.
    ///
    /// Suspends until the output reports the end of the clip or `cancel`
    /// fires. On cancellation the player is stopped before this returns.
    ///
    /// # Errors
    /// - `ClipMissing` when the clip store has no file for it
    /// - `StartFailed` when the output refuses the file or cannot open it
    /// - `Cancelled` when `cancel` fired first
    pub async fn play(
        &mut self,
        state: &str,
        clip: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PlaybackError> {
        if cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        let path = self
            .clips
            .locate(state, clip)
            .ok_or_else(|| PlaybackError::ClipMissing {
                state: state.to_string(),
                clip: clip.to_string(),
            })?;

        // Serialized use: never two clips on the session.
        self.stop();

        let source = ClipSource {
            state: state.to_string(),
            clip: clip.to_string(),
            path,
        };
        let handle = self.lease.output().start(&source)?;
        debug!(state, clip, "clip started");

        let outcome = {
            let handle = self.active.insert(handle);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Wait::Cancelled,
                waited = async {
                    match handle.opened().await {
                        Ok(()) => Wait::Finished(handle.wait().await),
                        Err(message) => Wait::FailedToOpen(message),
                    }
                } => waited,
            }
        };

        match outcome {
            Wait::Cancelled => {
                self.stop();
                debug!(state, clip, "clip cancelled");
                Err(PlaybackError::Cancelled)
            }
            Wait::FailedToOpen(message) => {
                self.stop();
                Err(PlaybackError::StartFailed {
                    clip: clip.to_string(),
                    message,
                })
            }
            Wait::Finished(natural) => {
                self.active = None;
                if !natural {
                    warn!(state, clip, "output closed without reporting end of clip");
                }
                Ok(())
            }
        }
    }

    /// Stop whatever is playing. The driver is idle afterwards.
    pub fn stop(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.stop();
        }
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
