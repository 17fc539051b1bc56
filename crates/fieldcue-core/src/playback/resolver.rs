//! Picks the next clip of a state according to its playback mode.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::error::ResolveError;
use crate::journey::{ClipId, PlaybackMode};

/// Per-state-entry clip picker.
///
/// Built fresh on every state entry, so the cursor always starts at 0 and
/// the alphabetical ordering is computed once per entry.
#[derive(Debug, Clone)]
pub struct ClipResolver {
    clips: Vec<ClipId>,
    mode: PlaybackMode,
    cursor: usize,
    rng: Pcg64,
}

impl ClipResolver {
    pub fn new(clips: Vec<ClipId>, mode: PlaybackMode) -> Self {
        Self::build(clips, mode, Pcg64::from_entropy())
    }

    /// Deterministic random picks.
    pub fn with_seed(clips: Vec<ClipId>, mode: PlaybackMode, seed: u64) -> Self {
        Self::build(clips, mode, Pcg64::seed_from_u64(seed))
    }

    fn build(mut clips: Vec<ClipId>, mode: PlaybackMode, rng: Pcg64) -> Self {
        if mode == PlaybackMode::Alphabetical {
            clips.sort_by_key(|c| c.to_lowercase());
        }
        Self {
            clips,
            mode,
            cursor: 0,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Clips in the order this resolver walks them.
    pub fn ordered(&self) -> &[ClipId] {
        &self.clips
    }

    /// Next clip to play.
    ///
    /// # Errors
    /// `NoClipsAvailable` when the state has no clips.
    pub fn next(&mut self) -> Result<ClipId, ResolveError> {
        if self.clips.is_empty() {
            return Err(ResolveError::NoClipsAvailable);
        }
        match self.mode {
            PlaybackMode::SequentialSelected | PlaybackMode::Alphabetical => {
                let clip = self.clips[self.cursor].clone();
                self.cursor = (self.cursor + 1) % self.clips.len();
                Ok(clip)
            }
            PlaybackMode::Random => {
                let i = self.rng.gen_range(0..self.clips.len());
                Ok(self.clips[i].clone())
            }
        }
    }
}
