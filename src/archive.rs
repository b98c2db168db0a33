//! Archive collaborator.
//!
//! Units hand every [`CapturedAsset`] to an [`AssetSink`] the moment it is
//! produced and keep nothing. The zip sink groups files under the session's
//! root folder and yields the package when the run signals completion.

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::session::{Session, sanitize_name};

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive already packaged")]
    Finished,
}

/// Asset body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetPayload {
    Binary(Vec<u8>),
    Text(String),
}

/// One file of the backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAsset {
    pub folder_name: String,
    pub file_name: String,
    pub payload: AssetPayload,
}

impl CapturedAsset {
    pub fn image(folder: impl Into<String>, file: impl Into<String>, png: Vec<u8>) -> Self {
        Self {
            folder_name: folder.into(),
            file_name: file.into(),
            payload: AssetPayload::Binary(png),
        }
    }

    pub fn text(folder: impl Into<String>, file: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            folder_name: folder.into(),
            file_name: file.into(),
            payload: AssetPayload::Text(text.into()),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.payload, AssetPayload::Binary(_))
    }

    pub fn len(&self) -> usize {
        match &self.payload {
            AssetPayload::Binary(bytes) => bytes.len(),
            AssetPayload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The downloadable result of a run
#[derive(Debug, Clone)]
pub struct PackagedArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Paths inside the archive, in insertion order
    pub entries: Vec<String>,
}

impl PackagedArchive {
    /// Write the package into `dir`, returning the file path
    pub fn write_to(&self, dir: &Path) -> ArchiveResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// Receiver of asset payloads
pub trait AssetSink: Send + Sync {
    /// Store one asset; the caller keeps no copy
    fn put(&mut self, asset: CapturedAsset) -> ArchiveResult<()>;

    /// Extraction complete: package everything received so far
    fn complete(&mut self) -> ArchiveResult<PackagedArchive>;

    /// Number of assets stored
    fn count(&self) -> usize;
}

/// In-memory zip grouped under one timestamped root folder
pub struct ZipArchiveSink {
    root: String,
    package_name: String,
    /// Compression encoders are not `Sync`; the lock makes the sink shareable by reference
    writer: Mutex<Option<ZipWriter<Cursor<Vec<u8>>>>>,
    entries: Vec<String>,
    names: HashSet<String>,
}

impl ZipArchiveSink {
    pub fn new(root: impl Into<String>, package_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            package_name: package_name.into(),
            writer: Mutex::new(Some(ZipWriter::new(Cursor::new(Vec::new())))),
            entries: Vec::new(),
            names: HashSet::new(),
        }
    }

    pub fn for_session(session: &Session) -> Self {
        Self::new(session.root_folder(), session.package_name())
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// `root/folder/file`, with a numeric suffix if the path is taken
    fn entry_path(&mut self, folder: &str, file: &str) -> String {
        let file = sanitize_name(file);
        let base = if folder.trim().is_empty() {
            format!("{}/{}", self.root, file)
        } else {
            format!("{}/{}/{}", self.root, sanitize_name(folder), file)
        };

        let mut candidate = base.clone();
        let mut n = 2;
        while self.names.contains(&candidate) {
            candidate = match base.rsplit_once('.') {
                Some((stem, ext)) if !stem.ends_with('/') => format!("{stem}_{n}.{ext}"),
                _ => format!("{base}_{n}"),
            };
            n += 1;
        }
        self.names.insert(candidate.clone());
        candidate
    }
}

impl AssetSink for ZipArchiveSink {
    fn put(&mut self, asset: CapturedAsset) -> ArchiveResult<()> {
        if self.writer.get_mut().is_none() {
            return Err(ArchiveError::Finished);
        }
        let path = self.entry_path(&asset.folder_name, &asset.file_name);
        // PNG data is already compressed
        let method = if asset.is_binary() {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let options = FileOptions::default().compression_method(method);

        let writer = self.writer.get_mut().as_mut().ok_or(ArchiveError::Finished)?;
        writer.start_file(path.as_str(), options)?;
        match &asset.payload {
            AssetPayload::Binary(bytes) => writer.write_all(bytes)?,
            AssetPayload::Text(text) => writer.write_all(text.as_bytes())?,
        }

        tracing::debug!(entry = %path, bytes = asset.len(), "asset archived");
        self.entries.push(path);
        Ok(())
    }

    fn complete(&mut self) -> ArchiveResult<PackagedArchive> {
        let mut writer = self.writer.get_mut().take().ok_or(ArchiveError::Finished)?;
        let cursor = writer.finish()?;
        Ok(PackagedArchive {
            file_name: self.package_name.clone(),
            bytes: cursor.into_inner(),
            entries: std::mem::take(&mut self.entries),
        })
    }

    fn count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).unwrap();
            out.push((file.name().to_string(), buf));
        }
        out
    }

    #[test]
    fn test_assets_grouped_under_root() {
        let mut sink = ZipArchiveSink::new("backup_20260101_000000", "backup_20260101_000000.zip");
        sink.put(CapturedAsset::image("01_setup", "setup.png", vec![1, 2, 3])).unwrap();
        sink.put(CapturedAsset::text("console", "diff_all.txt", "set a = 1")).unwrap();
        assert_eq!(sink.count(), 2);

        let package = sink.complete().unwrap();
        assert_eq!(package.file_name, "backup_20260101_000000.zip");

        let entries = read_entries(&package.bytes);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "backup_20260101_000000/01_setup/setup.png");
        assert_eq!(entries[0].1, vec![1, 2, 3]);
        assert_eq!(entries[1].0, "backup_20260101_000000/console/diff_all.txt");
        assert_eq!(entries[1].1, b"set a = 1".to_vec());
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let mut sink = ZipArchiveSink::new("root", "root.zip");
        sink.put(CapturedAsset::image("p", "a.png", vec![0])).unwrap();
        sink.put(CapturedAsset::image("p", "a.png", vec![1])).unwrap();
        assert_eq!(sink.entries(), ["root/p/a.png", "root/p/a_2.png"]);
    }

    #[test]
    fn test_put_after_complete_fails() {
        let mut sink = ZipArchiveSink::new("root", "root.zip");
        sink.complete().unwrap();
        assert!(matches!(
            sink.put(CapturedAsset::text("f", "x.txt", "x")),
            Err(ArchiveError::Finished)
        ));
        assert!(matches!(sink.complete(), Err(ArchiveError::Finished)));
    }

    #[test]
    fn test_sink_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ZipArchiveSink>();

        let sink: Box<dyn AssetSink> = Box::new(ZipArchiveSink::new("root", "root.zip"));
        let handle = std::thread::spawn(move || sink.count());
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn test_write_package_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ZipArchiveSink::new("root", "root.zip");
        sink.put(CapturedAsset::text("f", "x.txt", "hello")).unwrap();
        let path = sink.complete().unwrap().write_to(dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(read_entries(&fs::read(path).unwrap()).len(), 1);
    }
}
