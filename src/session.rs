//! Backup session identity.
//!
//! A session is one run's naming scope: every asset lands under a
//! timestamped root folder inside the archive, and the packaged file takes
//! the same timestamp.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Prefix shared by root folders and package files
const SESSION_PREFIX: &str = "backup";

/// Naming scope of a single backup run
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID, e.g. `backup_20261019_142501`
    pub id: String,
    /// Moment the run started
    pub started: DateTime<Utc>,
    /// Directory receiving the packaged archive
    pub output_dir: PathBuf,
}

impl Session {
    /// New session starting now, packaging into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::at(output_dir, Utc::now())
    }

    /// Session pinned to a given start time
    pub fn at(output_dir: impl Into<PathBuf>, started: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}_{}", SESSION_PREFIX, started.format("%Y%m%d_%H%M%S")),
            started,
            output_dir: output_dir.into(),
        }
    }

    /// Folder that groups every asset inside the archive
    pub fn root_folder(&self) -> &str {
        &self.id
    }

    /// File name of the downloadable package
    pub fn package_name(&self) -> String {
        format!("{}.zip", self.id)
    }

    /// Full path of the downloadable package
    pub fn package_path(&self) -> PathBuf {
        self.output_dir.join(self.package_name())
    }

    /// Folder name for the `index`-th (1-based) panel of the run
    pub fn panel_folder(index: usize, structural_class: &str) -> String {
        let stem = structural_class.strip_prefix("tab_").unwrap_or(structural_class);
        format!("{:02}_{}", index, sanitize_name(stem))
    }
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// List packaged archives in `dir`, oldest first
pub fn list_archives(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut archives = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_package = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .map(|n| n.starts_with(SESSION_PREFIX) && n.ends_with(".zip"))
            .unwrap_or(false);
        if is_package {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// Remove packaged archives older than `max_age`
pub fn cleanup_old_archives(dir: &Path, max_age: std::time::Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut cleaned = 0;

    for path in list_archives(dir)? {
        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if let Some(age) = age {
            if age > max_age && fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }
    }

    Ok(cleaned)
}
