use std::{
    fs::{self, File},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    config::SegmentStoreConfig,
    descriptor::SegmentLocator,
    error::Result,
    tree::{is_empty_range, Entry, Value},
    Error,
};
use bincode::Options;
use format::{segment_header, HEADER_SIZE, LENGTH_SIZE, MAGIC, OFFSET_SIZE};
use memmap2::Mmap;
use tempfile::TempDir;
use tracing::debug;

pub use format::SegmentWriter;

mod format;

/// Opens immutable segments by their locator.
pub trait SegmentStore<V>: Send + Sync {
    /// Open a segment. The returned handle must be closed (or dropped) to release the resource.
    fn open(&self, locator: &SegmentLocator) -> Result<Segment<V>>;
}

/// A [`SegmentStore`] that keeps each segment as a file in a single directory.
pub struct DirectorySegmentStore {
    directory: PathBuf,
    _temporary: Option<TempDir>,
    config: SegmentStoreConfig,
    open_handles: Arc<AtomicUsize>,
    opened_total: AtomicUsize,
}

impl DirectorySegmentStore {
    /// Use the given directory for the segment files. It is created if it does not exist.
    pub fn with_directory<P: Into<PathBuf>>(
        directory: P,
        config: SegmentStoreConfig,
    ) -> Result<DirectorySegmentStore> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(DirectorySegmentStore {
            directory,
            _temporary: None,
            config,
            open_handles: Arc::new(AtomicUsize::new(0)),
            opened_total: AtomicUsize::new(0),
        })
    }

    /// Use a new temporary directory that is deleted when the store is dropped.
    pub fn temporary(config: SegmentStoreConfig) -> Result<DirectorySegmentStore> {
        let temporary = tempfile::tempdir()?;
        Ok(DirectorySegmentStore {
            directory: temporary.path().to_path_buf(),
            _temporary: Some(temporary),
            config,
            open_handles: Arc::new(AtomicUsize::new(0)),
            opened_total: AtomicUsize::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_of(&self, locator: &SegmentLocator) -> PathBuf {
        self.directory.join(locator.as_str())
    }

    /// Create a new segment file for the locator.
    pub fn create_segment<V: Value>(&self, locator: &SegmentLocator) -> Result<SegmentWriter<V>> {
        SegmentWriter::create(&self.path_of(locator), locator.clone())
    }

    /// Write all entries, which must be sorted by key, into a new segment file.
    pub fn write_segment<V, I>(&self, locator: &SegmentLocator, entries: I) -> Result<usize>
    where
        V: Value,
        I: IntoIterator<Item = Entry<V>>,
    {
        let mut writer = self.create_segment(locator)?;
        for (key, value) in entries {
            writer.push(&key, &value)?;
        }
        writer.finish()
    }

    /// Number of segment handles that are currently open.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Number of times any segment has been opened.
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    fn acquire_handle(&self) -> Result<()> {
        match self.config.max_open_segments {
            Some(limit) => self
                .open_handles
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n < limit {
                        Some(n + 1)
                    } else {
                        None
                    }
                })
                .map(|_| ())
                .map_err(|_| Error::TooManyOpenSegments { limit }),
            None => {
                self.open_handles.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

impl<V> SegmentStore<V> for DirectorySegmentStore
where
    V: Value,
{
    fn open(&self, locator: &SegmentLocator) -> Result<Segment<V>> {
        self.acquire_handle()?;
        match SegmentFile::open(&self.path_of(locator), locator.clone()) {
            Ok(file) => {
                self.opened_total.fetch_add(1, Ordering::SeqCst);
                debug!(segment = %locator, entries = file.entry_count, "opened segment");
                Ok(Segment {
                    file: Arc::new(file),
                    open_handles: self.open_handles.clone(),
                    serializer: bincode::DefaultOptions::new(),
                    phantom: PhantomData,
                })
            }
            Err(e) => {
                self.open_handles.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

struct SegmentFile {
    locator: SegmentLocator,
    mmap: Mmap,
    entry_count: usize,
    index_offset: usize,
    closed: AtomicBool,
}

impl SegmentFile {
    fn open(path: &Path, locator: SegmentLocator) -> Result<SegmentFile> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(source) => return Err(Error::SegmentOpen { locator, source }),
        };
        // Segment files are never changed after they have been written
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(source) => return Err(Error::SegmentOpen { locator, source }),
        };

        if mmap.len() < HEADER_SIZE {
            return Err(Error::CorruptSegment {
                locator,
                reason: "file is smaller than the header".to_string(),
            });
        }
        let header = segment_header::View::new(&mmap[0..HEADER_SIZE]);
        if header.magic().read() != MAGIC {
            return Err(Error::CorruptSegment {
                locator,
                reason: "invalid magic number".to_string(),
            });
        }
        let entry_count: usize = header.entry_count().read().try_into()?;
        let index_offset: usize = header.index_offset().read().try_into()?;

        // The index is the last part of the file
        let index_end = entry_count
            .checked_mul(OFFSET_SIZE)
            .and_then(|size| size.checked_add(index_offset));
        if index_offset < HEADER_SIZE || index_end != Some(mmap.len()) {
            return Err(Error::CorruptSegment {
                locator,
                reason: "entry index is out of bounds".to_string(),
            });
        }

        Ok(SegmentFile {
            locator,
            mmap,
            entry_count,
            index_offset,
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::SegmentClosed(self.locator.clone()))
        } else {
            Ok(())
        }
    }

    fn corrupt(&self, reason: &str) -> Error {
        Error::CorruptSegment {
            locator: self.locator.clone(),
            reason: reason.to_string(),
        }
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.mmap.get(offset..end))
            .ok_or_else(|| self.corrupt("entry is out of bounds"))
    }

    fn read_length(&self, offset: usize) -> Result<usize> {
        let mut buffer = [0; LENGTH_SIZE];
        buffer.copy_from_slice(self.bytes(offset, LENGTH_SIZE)?);
        Ok(u32::from_le_bytes(buffer).try_into()?)
    }

    fn read_offset(&self, offset: usize) -> Result<usize> {
        let mut buffer = [0; OFFSET_SIZE];
        buffer.copy_from_slice(self.bytes(offset, OFFSET_SIZE)?);
        Ok(u64::from_le_bytes(buffer).try_into()?)
    }

    /// Returns the key and serialized value of the entry at the given position.
    fn entry(&self, position: usize) -> Result<(&[u8], &[u8])> {
        let offset = self.read_offset(self.index_offset + position * OFFSET_SIZE)?;
        let key_len = self.read_length(offset)?;
        let key = self.bytes(offset + LENGTH_SIZE, key_len)?;
        let value_offset = offset + LENGTH_SIZE + key_len;
        let value_len = self.read_length(value_offset)?;
        let value = self.bytes(value_offset + LENGTH_SIZE, value_len)?;
        Ok((key, value))
    }

    /// Position of the first entry with a key that is not less than the search key.
    fn lower_bound(&self, key: &[u8]) -> Result<usize> {
        let mut low = 0;
        let mut high = self.entry_count;
        while low < high {
            let mid = low + (high - low) / 2;
            if self.entry(mid)?.0 < key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    fn find(&self, key: &[u8]) -> Result<Option<usize>> {
        let position = self.lower_bound(key)?;
        if position < self.entry_count && self.entry(position)?.0 == key {
            Ok(Some(position))
        } else {
            Ok(None)
        }
    }

    /// Returns the half-open range of entry positions inside the key range.
    fn positions(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<(usize, usize)> {
        if is_empty_range(from, to) {
            return Ok((0, 0));
        }
        let start = match from {
            Some(from) => self.lower_bound(from)?,
            None => 0,
        };
        let end = match to {
            Some(to) => self.lower_bound(to)?,
            None => self.entry_count,
        };
        Ok((start, end.max(start)))
    }
}

/// An open handle to an immutable segment.
///
/// All reads fail with [`Error::SegmentClosed`] after the handle has been closed,
/// including reads of a [`SegmentRange`] that was created before.
pub struct Segment<V> {
    file: Arc<SegmentFile>,
    open_handles: Arc<AtomicUsize>,
    serializer: bincode::DefaultOptions,
    phantom: PhantomData<V>,
}

impl<V> Segment<V> {
    pub fn locator(&self) -> &SegmentLocator {
        &self.file.locator
    }

    /// Number of entries in the segment.
    pub fn len(&self) -> usize {
        self.file.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.file.entry_count == 0
    }

    pub fn is_closed(&self) -> bool {
        self.file.closed.load(Ordering::SeqCst)
    }

    /// Release the handle. Closing a handle more than once has no effect.
    pub fn close(&self) {
        if !self.file.closed.swap(true, Ordering::SeqCst) {
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
            debug!(segment = %self.file.locator, "closed segment");
        }
    }
}

impl<V> Segment<V>
where
    V: Value,
{
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.file.check_open()?;
        Ok(self.file.find(key)?.is_some())
    }

    pub fn lookup(&self, key: &[u8]) -> Result<Option<V>> {
        self.file.check_open()?;
        if let Some(position) = self.file.find(key)? {
            let (_, value) = self.file.entry(position)?;
            Ok(Some(self.serializer.deserialize(value)?))
        } else {
            Ok(None)
        }
    }

    /// Exact number of entries in the key range.
    pub fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        self.file.check_open()?;
        let (start, end) = self.file.positions(from, to)?;
        Ok((end - start).try_into()?)
    }

    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<SegmentRange<V>> {
        self.file.check_open()?;
        let (start, end) = self.file.positions(from, to)?;
        Ok(SegmentRange {
            file: self.file.clone(),
            position: start,
            end,
            serializer: self.serializer,
            phantom: PhantomData,
        })
    }
}

impl<V> Drop for Segment<V> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterator over a key range of a [`Segment`].
pub struct SegmentRange<V> {
    file: Arc<SegmentFile>,
    position: usize,
    end: usize,
    serializer: bincode::DefaultOptions,
    phantom: PhantomData<V>,
}

impl<V> SegmentRange<V>
where
    V: Value,
{
    fn read_entry(&self) -> Result<Entry<V>> {
        self.file.check_open()?;
        let (key, value) = self.file.entry(self.position)?;
        let value = self.serializer.deserialize(value)?;
        Ok((key.to_vec(), value))
    }
}

impl<V> Iterator for SegmentRange<V>
where
    V: Value,
{
    type Item = Result<Entry<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        match self.read_entry() {
            Ok(entry) => {
                self.position += 1;
                Some(Ok(entry))
            }
            Err(e) => {
                // Stop after the first error
                self.position = self.end;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests;
