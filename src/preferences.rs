//! Persisted capture preferences.
//!
//! The record is read once at run start and written whenever the user
//! changes it. A run never consults the store again after it started.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Which capture categories are enabled and which panels are selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    pub include_screenshots: bool,
    pub include_console_dump: bool,
    pub include_variant_cycling: bool,
    /// Structural classes; empty means "every panel"
    pub selected_panels: BTreeSet<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            include_screenshots: true,
            include_console_dump: true,
            include_variant_cycling: true,
            selected_panels: BTreeSet::new(),
        }
    }
}

impl CaptureOptions {
    pub fn screenshots(mut self, enabled: bool) -> Self {
        self.include_screenshots = enabled;
        self
    }

    pub fn console_dump(mut self, enabled: bool) -> Self {
        self.include_console_dump = enabled;
        self
    }

    pub fn variant_cycling(mut self, enabled: bool) -> Self {
        self.include_variant_cycling = enabled;
        self
    }

    pub fn select(mut self, panels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.selected_panels.extend(panels.into_iter().map(Into::into));
        self
    }

    /// Explicit selection check; no selection selects everything
    pub fn is_selected(&self, structural_class: &str) -> bool {
        self.selected_panels.is_empty() || self.selected_panels.contains(structural_class)
    }
}

pub type PreferencesResult<T> = Result<T, PreferencesError>;

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid preferences file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON file holding the last-used [`CaptureOptions`]
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the configured location
    pub fn from_config() -> Self {
        Self::new(crate::config::preferences_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last saved options, or the defaults when nothing was saved yet
    pub fn load(&self) -> PreferencesResult<CaptureOptions> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no preferences saved yet, using defaults");
                return Ok(CaptureOptions::default());
            }
            Err(source) => {
                return Err(PreferencesError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|source| PreferencesError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, options: &CaptureOptions) -> PreferencesResult<()> {
        let io_err = |source| PreferencesError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(options).map_err(|source| PreferencesError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(io_err)?;
        tracing::debug!(path = %self.path.display(), "preferences saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path().join("prefs.json"));
        assert_eq!(store.load().unwrap(), CaptureOptions::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path().join("nested").join("prefs.json"));
        let options = CaptureOptions::default()
            .console_dump(false)
            .select(["tab_setup", "tab_ports"]);

        store.save(&options).unwrap();
        assert_eq!(store.load().unwrap(), options);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, r#"{"include_console_dump": false}"#).unwrap();

        let options = PreferencesStore::new(&path).load().unwrap();
        assert!(options.include_screenshots);
        assert!(!options.include_console_dump);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            PreferencesStore::new(&path).load(),
            Err(PreferencesError::Parse { .. })
        ));
    }

    #[test]
    fn test_empty_selection_selects_all() {
        let options = CaptureOptions::default();
        assert!(options.is_selected("tab_anything"));
        let options = options.select(["tab_setup"]);
        assert!(options.is_selected("tab_setup"));
        assert!(!options.is_selected("tab_ports"));
    }
}
