//! File access handed to the state machines.
//!
//! The server only ever sees a [`FileSource`], never a raw path, so every
//! requested name is resolved against one base directory and cannot walk out
//! of it.

use std::cell::Cell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not a regular file: {0}")]
    NotAFile(String),
    #[error("cannot open {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl OpenError {
    fn from_io(name: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => OpenError::NotFound(name.to_string()),
            io::ErrorKind::PermissionDenied => OpenError::AccessDenied(name.to_string()),
            _ => OpenError::Io {
                name: name.to_string(),
                source: err,
            },
        }
    }
}

pub trait FileSource {
    type Reader: Read;

    fn open(&self, name: &str) -> Result<Self::Reader, OpenError>;
}

#[derive(Debug, Clone)]
pub struct FileRoot {
    base: PathBuf,
}

impl FileRoot {
    pub fn new(base: impl AsRef<Path>) -> io::Result<Self> {
        let base = base.as_ref().canonicalize()?;
        if !base.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", base.display()),
            ));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf, OpenError> {
        if name.is_empty() || name.contains('\0') {
            return Err(OpenError::AccessDenied(name.to_string()));
        }

        let relative = Path::new(name);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain {
            return Err(OpenError::AccessDenied(name.to_string()));
        }

        let canonical = self
            .base
            .join(relative)
            .canonicalize()
            .map_err(|e| OpenError::from_io(name, e))?;

        // symlinks may still point outside the base
        if !canonical.starts_with(&self.base) {
            return Err(OpenError::AccessDenied(name.to_string()));
        }

        Ok(canonical)
    }
}

impl FileSource for FileRoot {
    type Reader = File;

    fn open(&self, name: &str) -> Result<File, OpenError> {
        let path = self.resolve(name)?;
        let metadata = fs::metadata(&path).map_err(|e| OpenError::from_io(name, e))?;
        if !metadata.is_file() {
            return Err(OpenError::NotAFile(name.to_string()));
        }
        File::open(&path).map_err(|e| OpenError::from_io(name, e))
    }
}

/// In-memory file source that counts every byte handed out.
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    files: HashMap<String, Rc<[u8]>>,
    bytes_served: Rc<Cell<u64>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), Rc::from(contents.into()));
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.get()
    }
}

impl FileSource for MemoryFiles {
    type Reader = CountingReader<Cursor<Rc<[u8]>>>;

    fn open(&self, name: &str) -> Result<Self::Reader, OpenError> {
        let contents = self
            .files
            .get(name)
            .ok_or_else(|| OpenError::NotFound(name.to_string()))?;
        Ok(CountingReader {
            inner: Cursor::new(Rc::clone(contents)),
            counter: Rc::clone(&self.bytes_served),
        })
    }
}

#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    counter: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.set(self.counter.get() + n as u64);
        Ok(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub data: Vec<u8>,
    pub is_last: bool,
}

/// Splits a reader into fixed-size blocks. A block is last when nothing
/// remains after it, so a length that is an exact multiple of the block size
/// never yields an empty trailing block.
#[derive(Debug)]
pub struct BlockReader<R> {
    reader: BufReader<R>,
    block_size: usize,
    blocks_read: u32,
    bytes_read: u64,
    finished: bool,
}

impl<R: Read> BlockReader<R> {
    pub fn new(reader: R, block_size: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            block_size,
            blocks_read: 0,
            bytes_read: 0,
            finished: false,
        }
    }

    pub fn next_block(&mut self) -> io::Result<Block> {
        let mut data = Vec::with_capacity(self.block_size);
        self.reader
            .by_ref()
            .take(self.block_size as u64)
            .read_to_end(&mut data)?;
        let is_last = self.reader.fill_buf()?.is_empty();

        self.blocks_read += 1;
        self.bytes_read += data.len() as u64;
        self.finished = is_last;

        Ok(Block { data, is_last })
    }

    pub fn blocks_read(&self) -> u32 {
        self.blocks_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
