//! Report persistence: named, timestamped text artifacts.
//!
//! The persistence collaborator is split in two: an [`ArtifactStore`] opens
//! writable artifacts by name, a [`Sink`] streams blocks of lines into one
//! artifact. `FileStore` backs production use, `MemoryStore` backs tests.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Streaming destination for formatted report text.
pub trait Sink: Send {
    /// Appends a block of lines, durably (flushed) before returning.
    fn write_block(&mut self, lines: &[String]) -> io::Result<()>;
}

/// Persistence collaborator: opens writable artifacts by name.
pub trait ArtifactStore: Send + Sync {
    fn open(&self, name: &str) -> io::Result<Box<dyn Sink>>;

    /// Identifier the artifact is reachable under once written (a path for
    /// file stores, the bare name in memory).
    fn target(&self, name: &str) -> String;
}

/// Produces `<prefix>-<pid>[-<extra>].log` artifact names.
pub(crate) fn artifact_name(extra: Option<&str>) -> String {
    let pid = std::process::id();
    match extra {
        Some(extra) => format!("memcensus-{pid}-{extra}.log"),
        None => format!("memcensus-{pid}.log"),
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Writes artifacts as files under a base directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at the system temp directory.
    pub fn new() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }

    /// Store rooted at a caller-chosen directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactStore for FileStore {
    fn open(&self, name: &str) -> io::Result<Box<dyn Sink>> {
        // Truncates any previous artifact of the same name.
        let file = File::create(self.dir.join(name))?;
        Ok(Box::new(FileSink { file }))
    }

    fn target(&self, name: &str) -> String {
        self.dir.join(name).display().to_string()
    }
}

struct FileSink {
    file: File,
}

impl Sink for FileSink {
    fn write_block(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            writeln!(self.file, "{line}")?;
        }
        self.file.flush()
    }
}

// ---------------------------------------------------------------------------
// In-memory store (tests)
// ---------------------------------------------------------------------------

/// In-memory store: artifacts are shared vectors of lines.
///
/// Clones share the same artifacts, so a test can keep one handle and hand
/// another to the code under test. Failure injection targets per-sink block
/// indexes, which is how tests break exactly one daemon cycle.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    artifacts: Arc<Mutex<HashMap<String, Vec<String>>>>,
    fail_blocks: HashSet<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose sinks fail with an injected I/O error on the given
    /// 0-based block indexes.
    pub fn fail_on_blocks(blocks: impl IntoIterator<Item = usize>) -> Self {
        Self {
            artifacts: Arc::default(),
            fail_blocks: blocks.into_iter().collect(),
        }
    }

    /// Snapshot of one artifact's lines (empty if never opened).
    pub fn lines(&self, name: &str) -> Vec<String> {
        self.artifacts
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of all artifacts opened so far.
    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts.lock().unwrap().keys().cloned().collect()
    }
}

impl ArtifactStore for MemoryStore {
    fn open(&self, name: &str) -> io::Result<Box<dyn Sink>> {
        self.artifacts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            artifacts: self.artifacts.clone(),
            fail_blocks: self.fail_blocks.clone(),
            blocks_seen: 0,
        }))
    }

    fn target(&self, name: &str) -> String {
        name.to_string()
    }
}

struct MemorySink {
    name: String,
    artifacts: Arc<Mutex<HashMap<String, Vec<String>>>>,
    fail_blocks: HashSet<usize>,
    blocks_seen: usize,
}

impl Sink for MemorySink {
    fn write_block(&mut self, lines: &[String]) -> io::Result<()> {
        let index = self.blocks_seen;
        self.blocks_seen += 1;
        if self.fail_blocks.contains(&index) {
            return Err(io::Error::other("injected sink failure"));
        }
        self.artifacts
            .lock()
            .unwrap()
            .entry(self.name.clone())
            .or_default()
            .extend(lines.iter().cloned());
        Ok(())
    }
}
