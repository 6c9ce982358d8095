//! Snapshot handle and sinks
//!
//! A snapshot is a deep copy of the map taken at one log position. It is
//! encoded only when the collaborator asks to persist it:
//!
//! ```text
//! {"<key>":"<value>", ...}
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

use super::{FsmSnapshot, SnapshotMeta, SnapshotSink};

/// Immutable copy of the key-value map
#[derive(Debug, Clone)]
pub struct KvSnapshot {
    meta: SnapshotMeta,
    data: HashMap<String, String>,
}

impl KvSnapshot {
    pub fn new(meta: SnapshotMeta, data: HashMap<String, String>) -> Self {
        Self { meta, data }
    }

    /// Number of keys captured
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encode the snapshot into a byte vector
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.data)?)
    }

    fn write_to(&self, sink: &mut dyn SnapshotSink) -> Result<()> {
        serde_json::to_writer(&mut *sink, &self.data)
            .map_err(|e| StoreError::Snapshot(format!("failed to encode snapshot: {}", e)))?;
        sink.flush()
            .map_err(|e| StoreError::Snapshot(format!("failed to write snapshot: {}", e)))?;
        sink.close()
    }
}

impl FsmSnapshot for KvSnapshot {
    fn meta(&self) -> SnapshotMeta {
        self.meta
    }

    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<()> {
        let result = self.write_to(sink);

        match &result {
            Ok(()) => tracing::debug!(
                "Persisted snapshot at index {} ({} keys)",
                self.meta.index,
                self.data.len()
            ),
            Err(e) => {
                tracing::warn!("Snapshot persist at index {} failed, cancelling: {}", self.meta.index, e);
                if let Err(cancel_err) = sink.cancel() {
                    tracing::warn!("Failed to cancel snapshot sink: {}", cancel_err);
                }
            }
        }

        result
    }
}

// =============================================================================
// In-memory sink
// =============================================================================

/// Collects a snapshot in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
    closed: bool,
    cancelled: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The bytes written so far
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed || self.cancelled {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "snapshot sink finished"));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SnapshotSink for MemorySink {
    fn close(&mut self) -> Result<()> {
        if self.cancelled {
            return Err(StoreError::Snapshot("sink already cancelled".to_string()));
        }
        self.closed = true;
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.buffer.clear();
        self.cancelled = true;
        Ok(())
    }
}

// =============================================================================
// File sink
// =============================================================================

/// Writes a snapshot to `{path}.tmp` and renames it over `path` on close,
/// so a reader never observes a half-written snapshot file.
pub struct FileSnapshotSink {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSnapshotSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let file = File::create(&tmp_path)?;
        Ok(Self {
            path,
            tmp_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Final location of the snapshot
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "snapshot sink finished"))
    }
}

impl Write for FileSnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn close(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| StoreError::Snapshot("sink already finished".to_string()))?;

        let file = writer
            .into_inner()
            .map_err(|e| StoreError::Snapshot(format!("failed to flush snapshot: {}", e.error())))?;
        file.sync_all()?;
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.writer = None;
        match fs::remove_file(&self.tmp_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FileSnapshotSink {
    fn drop(&mut self) {
        // Never closed: leave no partial file behind
        if self.writer.is_some() {
            let _ = self.cancel();
        }
    }
}

/// Open a persisted snapshot file, `None` if there is none yet
pub fn read_snapshot_file(path: &Path) -> Result<Option<BufReader<File>>> {
    match File::open(path) {
        Ok(file) => Ok(Some(BufReader::new(file))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read a persisted snapshot file in full and check that it decodes.
///
/// Returns `None` if there is no file yet. A file that is not a flat JSON
/// map fails with [`StoreError::Snapshot`] and is left on disk untouched.
pub fn load_snapshot_file(path: &Path) -> Result<Option<Vec<u8>>> {
    let Some(mut reader) = read_snapshot_file(path)? else {
        return Ok(None);
    };

    let mut bytes = Vec::new();
    io::Read::read_to_end(&mut reader, &mut bytes)
        .map_err(|e| StoreError::Snapshot(format!("failed to read {}: {}", path.display(), e)))?;

    serde_json::from_slice::<HashMap<String, String>>(&bytes).map_err(|e| {
        StoreError::Snapshot(format!("corrupt snapshot {}: {}", path.display(), e))
    })?;
    Ok(Some(bytes))
}
