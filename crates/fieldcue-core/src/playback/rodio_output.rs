//! Real playback through the default output device.
//!
//! rodio's output stream is not `Send`, so each clip gets its own thread
//! that owns the stream for the clip's lifetime. The sink is shared with
//! the handle so a stop silences the device at once; the stop then joins
//! the thread, so the stream is closed before the next clip can open one.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::output::{AudioOutput, ClipSource, PlaybackHandle};
use crate::error::PlaybackError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default, Clone)]
pub struct RodioOutput;

impl RodioOutput {
    pub fn new() -> Self {
        Self
    }
}

fn open(path: &Path) -> Result<(OutputStream, Sink), String> {
    let (stream, handle) = OutputStream::try_default().map_err(|e| e.to_string())?;
    let file = File::open(path).map_err(|e| e.to_string())?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| e.to_string())?;
    let sink = Sink::try_new(&handle).map_err(|e| e.to_string())?;
    sink.append(decoder);
    Ok((stream, sink))
}

/// State shared between the audio thread and the handle.
#[derive(Default)]
struct Shared {
    stopped: AtomicBool,
    sink: Mutex<Option<Arc<Sink>>>,
}

impl Shared {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Ok(mut sink) = self.sink.lock() {
            if let Some(sink) = sink.take() {
                sink.stop();
            }
        }
    }
}

impl AudioOutput for RodioOutput {
    /// Opening the device and decoding happen on the audio thread; the
    /// outcome arrives through the handle's opening signal.
    fn start(&self, source: &ClipSource) -> Result<PlaybackHandle, PlaybackError> {
        let (open_tx, open_rx) = oneshot::channel::<Result<(), String>>();
        let (done_tx, done_rx) = oneshot::channel();
        let shared = Arc::new(Shared::default());

        let path = source.path.clone();
        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("fieldcue-audio".into())
            .spawn(move || {
                let (_stream, sink) = match open(&path) {
                    Ok((stream, sink)) => (stream, Arc::new(sink)),
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                if let Ok(mut slot) = thread_shared.sink.lock() {
                    *slot = Some(sink.clone());
                }
                // A stop that raced the open never saw the sink.
                if thread_shared.stopped.load(Ordering::SeqCst) {
                    sink.stop();
                    return;
                }
                let _ = open_tx.send(Ok(()));

                while !sink.empty() {
                    if thread_shared.stopped.load(Ordering::SeqCst) {
                        debug!(path = %path.display(), "clip stopped");
                        return;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                if !thread_shared.stopped.load(Ordering::SeqCst) {
                    let _ = done_tx.send(());
                }
            })
            .map_err(|e| PlaybackError::StartFailed {
                clip: source.clip.clone(),
                message: e.to_string(),
            })?;

        let clip = source.clip.clone();
        Ok(PlaybackHandle::opening(open_rx, done_rx, move || {
            shared.stop();
            if thread.join().is_err() {
                warn!(clip = %clip, "audio thread panicked");
            }
        }))
    }
}
