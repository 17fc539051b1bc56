//! Clip storage lookup.
//!
//! Clips live under `<audio_root>/<state>/<clip>`. The engine only asks two
//! questions of the store: which clips exist for a state, and where a given
//! clip's file is.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::journey::ClipId;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "wav", "ogg", "flac"];

pub trait ClipStore: Send + Sync {
    /// Clips recorded for `state`, sorted by file name.
    fn clips_for(&self, state: &str) -> Vec<ClipId>;

    /// Playable file for `clip`, or `None` when it does not exist.
    fn locate(&self, state: &str, clip: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct DirectoryClipStore {
    root: PathBuf,
}

impl DirectoryClipStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_dir(&self, state: &str) -> PathBuf {
        self.root.join(state)
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

impl ClipStore for DirectoryClipStore {
    fn clips_for(&self, state: &str) -> Vec<ClipId> {
        let dir = self.state_dir(state);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "no clip directory for state");
                return Vec::new();
            }
        };

        let mut clips: Vec<ClipId> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_audio_file(path))
            .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
            .collect();
        clips.sort();
        clips
    }

    fn locate(&self, state: &str, clip: &str) -> Option<PathBuf> {
        // Clip ids are bare file names; anything with a separator is not ours.
        if clip.is_empty() || clip.contains(['/', '\\']) || clip == ".." {
            return None;
        }
        let path = self.state_dir(state).join(clip);
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(files: &[&str]) -> (TempDir, DirectoryClipStore) {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("Active");
        std::fs::create_dir_all(&state_dir).unwrap();
        for f in files {
            std::fs::write(state_dir.join(f), b"").unwrap();
        }
        let store = DirectoryClipStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn lists_only_audio_files_sorted() {
        let (_dir, store) = store_with(&["b.mp3", "a.wav", "notes.txt"]);
        assert_eq!(store.clips_for("Active"), vec!["a.wav", "b.mp3"]);
    }

    #[test]
    fn missing_state_dir_is_empty() {
        let (_dir, store) = store_with(&[]);
        assert!(store.clips_for("Trigger").is_empty());
    }

    #[test]
    fn locate_checks_existence() {
        let (_dir, store) = store_with(&["a.mp3"]);
        assert!(store.locate("Active", "a.mp3").is_some());
        assert!(store.locate("Active", "gone.mp3").is_none());
        assert!(store.locate("Active", "../Active/a.mp3").is_none());
    }
}
