//! Read-only file streams
//!
//! The UI library loads documents, style sheets and fonts through a
//! [`FileInterface`]. [`PackagedFileInterface`] serves them from a content
//! root on disk, pooling open streams in a [`SlotTable`].

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::handle::FileHandle;
use crate::slot::{Recycle, SlotTable};

/// Errors reported by [`FileInterface::load_file`]
#[derive(Error, Debug)]
pub enum FileError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Short read of '{path}': expected {expected} bytes, got {got}")]
    ShortRead {
        path: String,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, FileError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// Read-only byte streams addressed by [`FileHandle`]
pub trait FileInterface {
    /// Open `path` for reading; the zero handle when it cannot be opened
    fn open(&mut self, path: &str) -> FileHandle;

    fn close(&mut self, file: FileHandle);

    /// Read up to `buffer.len()` bytes and return how many were read
    fn read(&mut self, file: FileHandle, buffer: &mut [u8]) -> usize;

    /// Move the read position; `false` when the target lies outside the file
    fn seek(&mut self, file: FileHandle, offset: i64, origin: SeekOrigin) -> bool;

    fn tell(&mut self, file: FileHandle) -> usize;

    /// Total length in bytes; the read position is unaffected
    fn length(&mut self, file: FileHandle) -> usize;

    /// Read a whole file, failing when fewer bytes than its length arrive
    fn load_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let file = self.open(path);
        if !file.is_valid() {
            return Err(FileError::NotFound(path.to_string()));
        }

        let expected = self.length(file);
        let mut data = vec![0u8; expected];
        let got = self.read(file, &mut data);
        self.close(file);

        if got < expected {
            return Err(FileError::ShortRead {
                path: path.to_string(),
                expected,
                got,
            });
        }
        Ok(data)
    }
}

#[derive(Debug, Default)]
struct OpenFile {
    file: Option<File>,
    length: u64,
}

impl Recycle for OpenFile {
    fn recycle(&mut self) {
        self.file = None;
        self.length = 0;
    }
}

/// [`FileInterface`] over a content root directory
#[derive(Debug)]
pub struct PackagedFileInterface {
    root: PathBuf,
    files: SlotTable<FileHandle, OpenFile>,
}

impl PackagedFileInterface {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: SlotTable::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of streams currently open
    pub fn open_count(&self) -> usize {
        self.files.reserved_count()
    }

    /// Map a UI path below the root; paths escaping the root are rejected
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches(['/', '\\']));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }

    fn open_file(path: &Path) -> std::io::Result<OpenFile> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(OpenFile {
            file: Some(file),
            length,
        })
    }

    fn stream(&mut self, file: FileHandle) -> Option<(&mut File, u64)> {
        let open = self.files.get_mut(file)?;
        let length = open.length;
        open.file.as_mut().map(|f| (f, length))
    }
}

impl FileInterface for PackagedFileInterface {
    fn open(&mut self, path: &str) -> FileHandle {
        let Some(resolved) = self.resolve(path) else {
            warn!("rejecting file path '{}' outside the content root", path);
            return FileHandle::INVALID;
        };

        match Self::open_file(&resolved) {
            Ok(open) => {
                let handle = self.files.insert(open);
                debug!("opened '{}' as {:?}", resolved.display(), handle);
                handle
            }
            Err(e) => {
                warn!("failed to open '{}': {}", resolved.display(), e);
                FileHandle::INVALID
            }
        }
    }

    fn close(&mut self, file: FileHandle) {
        self.files.release(file);
    }

    fn read(&mut self, file: FileHandle, buffer: &mut [u8]) -> usize {
        let Some((stream, _)) = self.stream(file) else {
            return 0;
        };

        let mut total = 0;
        while total < buffer.len() {
            match stream.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("read from {:?} failed: {}", file, e);
                    break;
                }
            }
        }
        total
    }

    fn seek(&mut self, file: FileHandle, offset: i64, origin: SeekOrigin) -> bool {
        let Some((stream, length)) = self.stream(file) else {
            return false;
        };

        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => match stream.stream_position() {
                Ok(position) => position as i64,
                Err(_) => return false,
            },
            SeekOrigin::End => length as i64,
        };
        let Some(target) = base.checked_add(offset) else {
            return false;
        };
        if target < 0 || target as u64 > length {
            return false;
        }
        stream.seek(SeekFrom::Start(target as u64)).is_ok()
    }

    fn tell(&mut self, file: FileHandle) -> usize {
        self.stream(file)
            .and_then(|(stream, _)| stream.stream_position().ok())
            .map_or(0, |position| position as usize)
    }

    fn length(&mut self, file: FileHandle) -> usize {
        self.files.get(file).map_or(0, |open| open.length as usize)
    }

    fn load_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| FileError::NotFound(path.to_string()))?;
        let mut file = File::open(&resolved).map_err(|e| io_error(path, e))?;
        let expected = file.metadata().map_err(|e| io_error(path, e))?.len() as usize;

        let mut data = Vec::with_capacity(expected);
        file.read_to_end(&mut data).map_err(|e| io_error(path, e))?;
        if data.len() < expected {
            return Err(FileError::ShortRead {
                path: path.to_string(),
                expected,
                got: data.len(),
            });
        }
        Ok(data)
    }
}

fn io_error(path: &str, source: std::io::Error) -> FileError {
    if source.kind() == ErrorKind::NotFound {
        FileError::NotFound(path.to_string())
    } else {
        FileError::Io {
            path: path.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn content_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("ui")).unwrap();
        let mut file = File::create(dir.path().join("ui/doc.rml")).unwrap();
        file.write_all(b"<rml>hello</rml>").unwrap();
        dir
    }

    #[test]
    fn open_read_and_close() {
        let dir = content_root();
        let mut files = PackagedFileInterface::new(dir.path());

        let handle = files.open("ui/doc.rml");
        assert!(handle.is_valid());
        assert_eq!(files.length(handle), 16);

        let mut head = [0u8; 5];
        assert_eq!(files.read(handle, &mut head), 5);
        assert_eq!(&head, b"<rml>");
        assert_eq!(files.tell(handle), 5);

        files.close(handle);
        assert_eq!(files.open_count(), 0);
        assert_eq!(files.read(handle, &mut head), 0);
    }

    #[test]
    fn seek_validates_range() {
        let dir = content_root();
        let mut files = PackagedFileInterface::new(dir.path());
        let handle = files.open("/ui/doc.rml");

        assert!(files.seek(handle, -6, SeekOrigin::End));
        assert_eq!(files.tell(handle), 10);
        assert!(files.seek(handle, 2, SeekOrigin::Current));
        assert_eq!(files.tell(handle), 12);
        assert!(!files.seek(handle, 17, SeekOrigin::Start));
        assert!(!files.seek(handle, -1, SeekOrigin::Start));
        // Failed seeks keep the position
        assert_eq!(files.tell(handle), 12);
        assert!(files.seek(handle, 0, SeekOrigin::End));
    }

    #[test]
    fn missing_and_escaping_paths_yield_zero_handle() {
        let dir = content_root();
        let mut files = PackagedFileInterface::new(dir.path().join("ui"));
        assert_eq!(files.open("missing.rml"), FileHandle::INVALID);
        assert_eq!(files.open("../ui/doc.rml"), FileHandle::INVALID);
        assert_eq!(files.length(FileHandle::INVALID), 0);
    }

    #[test]
    fn load_file_reads_everything() {
        let dir = content_root();
        let mut files = PackagedFileInterface::new(dir.path());
        assert_eq!(files.load_file("ui/doc.rml").unwrap(), b"<rml>hello</rml>");
        assert_eq!(files.open_count(), 0);
        assert!(matches!(
            files.load_file("ui/none.rml"),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn loading_a_directory_is_an_io_error() {
        let dir = content_root();
        let mut files = PackagedFileInterface::new(dir.path());
        assert!(files.load_file("ui").is_err());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Short reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Reports a longer length than it can deliver
    struct Truncated;

    impl FileInterface for Truncated {
        fn open(&mut self, _path: &str) -> FileHandle {
            FileHandle(1)
        }
        fn close(&mut self, _file: FileHandle) {}
        fn read(&mut self, _file: FileHandle, buffer: &mut [u8]) -> usize {
            buffer.len() / 2
        }
        fn seek(&mut self, _file: FileHandle, _offset: i64, _origin: SeekOrigin) -> bool {
            true
        }
        fn tell(&mut self, _file: FileHandle) -> usize {
            0
        }
        fn length(&mut self, _file: FileHandle) -> usize {
            8
        }
    }

    #[test]
    fn load_file_rejects_short_reads() {
        match Truncated.load_file("x") {
            Err(FileError::ShortRead { expected, got, .. }) => {
                assert_eq!((expected, got), (8, 4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
