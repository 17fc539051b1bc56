//! The single physical audio session.
//!
//! Only the holder of a [`SessionLease`] can reach the output. The lease is
//! an owned mutex guard, so handing the session from one state's playback
//! to the next is a release followed by an acquire, never an overlap.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::output::AudioOutput;

#[derive(Clone)]
pub struct AudioSession {
    output: Arc<dyn AudioOutput>,
    lease: Arc<Mutex<()>>,
}

impl AudioSession {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            lease: Arc::new(Mutex::new(())),
        }
    }

    /// Wait until the session is free and take it.
    pub async fn acquire(&self) -> SessionLease {
        let guard = self.lease.clone().lock_owned().await;
        SessionLease {
            output: self.output.clone(),
            _guard: guard,
        }
    }

    pub fn is_held(&self) -> bool {
        self.lease.try_lock().is_err()
    }
}

/// Exclusive access to the audio output. Released on drop.
pub struct SessionLease {
    output: Arc<dyn AudioOutput>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn output(&self) -> &dyn AudioOutput {
        self.output.as_ref()
    }
}
