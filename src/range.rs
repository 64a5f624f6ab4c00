use std::sync::Arc;

use crate::{
    error::Result,
    index::Router,
    tree::{Entry, EntryIter, Value},
    Error,
};

enum RangeState<V> {
    /// Reading the range of the partition at `ordinal`.
    Positioned { ordinal: usize, source: EntryIter<V> },
    Exhausted,
}

/// Iterator over a key range that spans several partitions.
///
/// The partitions are visited in ordinal order and each partition is only opened when the scan
/// reaches it. Since partitions own disjoint and ordered key ranges, the entries are produced in
/// ascending key order.
///
/// Besides being an [`Iterator`], the range can be used as a cursor with [`PartitionedRange::advance`],
/// [`PartitionedRange::key`] and [`PartitionedRange::value`].
pub struct PartitionedRange<V> {
    router: Arc<Router<V>>,
    from: Option<Vec<u8>>,
    to: Option<Vec<u8>>,
    to_ordinal: usize,
    state: RangeState<V>,
    current: Option<Entry<V>>,
}

impl<V> PartitionedRange<V>
where
    V: Value,
{
    pub(crate) fn new(
        router: Arc<Router<V>>,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        from_ordinal: usize,
        to_ordinal: usize,
    ) -> Result<PartitionedRange<V>> {
        let source = router.open_range(from_ordinal, from, to)?;
        Ok(PartitionedRange {
            router,
            from: from.map(|k| k.to_vec()),
            to: to.map(|k| k.to_vec()),
            to_ordinal,
            state: RangeState::Positioned {
                ordinal: from_ordinal,
                source,
            },
            current: None,
        })
    }

    /// A range without any entries.
    pub(crate) fn empty(router: Arc<Router<V>>) -> PartitionedRange<V> {
        PartitionedRange {
            router,
            from: None,
            to: None,
            to_ordinal: 0,
            state: RangeState::Exhausted,
            current: None,
        }
    }

    /// Move to the next entry.
    ///
    /// Returns false if there are no more entries. An error ends the iteration.
    pub fn advance(&mut self) -> Result<bool> {
        self.current = None;
        match self.next_entry() {
            Ok(entry) => {
                self.current = entry;
                Ok(self.current.is_some())
            }
            Err(e) => {
                self.state = RangeState::Exhausted;
                Err(e)
            }
        }
    }

    /// Key of the entry the range is positioned at.
    ///
    /// Fails with [`Error::InvalidIteratorState`] before the first entry and after the last one.
    pub fn key(&self) -> Result<&[u8]> {
        self.current
            .as_ref()
            .map(|(key, _)| key.as_slice())
            .ok_or(Error::InvalidIteratorState)
    }

    /// Value of the entry the range is positioned at.
    ///
    /// Fails with [`Error::InvalidIteratorState`] before the first entry and after the last one.
    pub fn value(&self) -> Result<&V> {
        self.current
            .as_ref()
            .map(|(_, value)| value)
            .ok_or(Error::InvalidIteratorState)
    }

    /// Ordinal of the partition that is currently read, or `None` if the range is exhausted.
    pub fn partition_ordinal(&self) -> Option<usize> {
        match &self.state {
            RangeState::Positioned { ordinal, .. } => Some(*ordinal),
            RangeState::Exhausted => None,
        }
    }

    fn next_entry(&mut self) -> Result<Option<Entry<V>>> {
        loop {
            let next_ordinal = match &mut self.state {
                RangeState::Exhausted => return Ok(None),
                RangeState::Positioned { ordinal, source } => {
                    if let Some(entry) = source.next() {
                        return entry.map(Some);
                    }
                    if *ordinal < self.to_ordinal {
                        Some(*ordinal + 1)
                    } else {
                        None
                    }
                }
            };

            match next_ordinal {
                Some(ordinal) => {
                    // Release the finished partition before the next one is opened
                    self.state = RangeState::Exhausted;
                    let source =
                        self.router
                            .open_range(ordinal, self.from.as_deref(), self.to.as_deref())?;
                    self.state = RangeState::Positioned { ordinal, source };
                }
                None => {
                    self.state = RangeState::Exhausted;
                    return Ok(None);
                }
            }
        }
    }
}

impl<V> Iterator for PartitionedRange<V>
where
    V: Value,
{
    type Item = Result<Entry<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => self.current.clone().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
