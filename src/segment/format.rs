use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    marker::PhantomData,
    path::Path,
};

use crate::{descriptor::SegmentLocator, error::Result, tree::Value, Error};
use binary_layout::prelude::*;
use bincode::Options;
use tracing::debug;

pub(crate) const MAGIC: u64 = u64::from_le_bytes(*b"PBISEG01");
pub(crate) const HEADER_SIZE: usize = 24;
pub(crate) const OFFSET_SIZE: usize = 8;
pub(crate) const LENGTH_SIZE: usize = 4;

// A segment file starts with this header, followed by the entries and an index with the
// file offset of each entry in key order. An entry consists of the key length (u32), the key,
// the length of the serialized value (u32) and the serialized value.
define_layout!(segment_header, LittleEndian, {
    magic: u64,
    entry_count: u64,
    index_offset: u64,
});

/// Writes a new segment file.
///
/// Keys must be added in strictly ascending order.
/// The segment is only valid after [`SegmentWriter::finish`] has been called.
pub struct SegmentWriter<V> {
    locator: SegmentLocator,
    out: BufWriter<File>,
    offsets: Vec<u64>,
    position: u64,
    last_key: Option<Vec<u8>>,
    serializer: bincode::DefaultOptions,
    phantom: PhantomData<V>,
}

impl<V> SegmentWriter<V>
where
    V: Value,
{
    pub(crate) fn create(path: &Path, locator: SegmentLocator) -> Result<SegmentWriter<V>> {
        let mut out = BufWriter::new(File::create(path)?);
        // The header is written when the segment is finished
        out.write_all(&[0; HEADER_SIZE])?;

        Ok(SegmentWriter {
            locator,
            out,
            offsets: Vec::new(),
            position: HEADER_SIZE.try_into()?,
            last_key: None,
            serializer: bincode::DefaultOptions::new(),
            phantom: PhantomData,
        })
    }

    /// Append an entry to the segment.
    pub fn push(&mut self, key: &[u8], value: &V) -> Result<()> {
        if let Some(last_key) = &self.last_key {
            if last_key.as_slice() >= key {
                return Err(Error::UnsortedSegmentInput);
            }
        }

        let value = self.serializer.serialize(value)?;
        let key_len: u32 = key.len().try_into()?;
        let value_len: u32 = value.len().try_into()?;

        self.offsets.push(self.position);
        self.out.write_all(&key_len.to_le_bytes())?;
        self.out.write_all(key)?;
        self.out.write_all(&value_len.to_le_bytes())?;
        self.out.write_all(&value)?;

        let entry_size: u64 = (2 * LENGTH_SIZE + key.len() + value.len()).try_into()?;
        self.position += entry_size;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Write the entry index and the header and sync the file to disk.
    ///
    /// Returns the number of entries in the segment.
    pub fn finish(mut self) -> Result<usize> {
        let index_offset = self.position;
        for offset in self.offsets.iter() {
            self.out.write_all(&offset.to_le_bytes())?;
        }

        let entry_count: u64 = self.offsets.len().try_into()?;
        let mut header = [0u8; HEADER_SIZE];
        let mut view = segment_header::View::new(&mut header[..]);
        view.magic_mut().write(MAGIC);
        view.entry_count_mut().write(entry_count);
        view.index_offset_mut().write(index_offset);

        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header)?;
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!(segment = %self.locator, entries = entry_count, "wrote segment");
        Ok(self.offsets.len())
    }
}
