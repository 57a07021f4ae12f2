//! Cross-reference entry table
//!
//! A sparse table keyed by object number. Sections are read newest revision
//! first, so a slot accepts only its first write; later writes (from older
//! revisions) are silently ignored.

use crate::error::{Error, ErrorKind, Result};

/// One cross-reference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XrefEntry {
    /// Free slot: linkage to the next free object number and the generation
    /// to use on reuse
    Free { next_free: u32, next_gen: u16 },
    /// Object stored at a byte offset in the file
    InUse { offset: u64, gen: u16 },
    /// Object packed inside a compressed object stream
    Compressed { stream_num: u32, index: u32 },
    /// Slot never filled by any revision
    #[default]
    Unparsed,
}

impl XrefEntry {
    pub fn is_parsed(&self) -> bool {
        !matches!(self, XrefEntry::Unparsed)
    }
}

/// Sparse per-object-number entry table with amortized growth
#[derive(Debug, Default)]
pub struct XrefTable {
    slots: Vec<XrefEntry>,
    max_object_count: u32,
}

impl XrefTable {
    pub fn new(max_object_count: u32) -> Self {
        Self {
            slots: Vec::new(),
            max_object_count,
        }
    }

    /// Number of slots (highest object number seen + 1).
    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Grow the table to hold at least `new_size` slots. Never shrinks.
    pub fn enlarge(&mut self, new_size: u32) -> Result<()> {
        if new_size > self.max_object_count {
            return Err(Error::with_message(
                ErrorKind::ValueOutOfRange,
                format!("xref table would exceed {} objects", self.max_object_count),
            ));
        }
        if new_size as usize > self.slots.len() {
            self.slots.resize(new_size as usize, XrefEntry::Unparsed);
        }
        Ok(())
    }

    /// The entry for an object number, `Unparsed` when out of range.
    pub fn get(&self, num: u32) -> XrefEntry {
        self.slots
            .get(num as usize)
            .copied()
            .unwrap_or(XrefEntry::Unparsed)
    }

    /// Record an entry. A slot already filled by a newer revision keeps its
    /// value; the write is a no-op then.
    pub fn set(&mut self, num: u32, entry: XrefEntry) -> Result<()> {
        if num as usize >= self.slots.len() {
            self.enlarge(num.checked_add(1).ok_or(ErrorKind::ValueOutOfRange)?)?;
        }
        let slot = &mut self.slots[num as usize];
        if !slot.is_parsed() {
            *slot = entry;
        }
        Ok(())
    }

    /// Iterate `(object number, entry)` pairs over all slots.
    pub fn iter(&self) -> impl Iterator<Item = (u32, XrefEntry)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(num, entry)| (num as u32, *entry))
    }

    /// Drop every entry, keeping the configured capacity limit.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Count of slots filled by some revision.
    pub fn parsed_count(&self) -> u32 {
        self.slots.iter().filter(|e| e.is_parsed()).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_unparsed() {
        let table = XrefTable::new(1000);
        assert_eq!(table.get(5), XrefEntry::Unparsed);
        assert!(!table.get(5).is_parsed());
    }

    #[test]
    fn test_set_and_get() {
        let mut table = XrefTable::new(1000);
        table
            .set(3, XrefEntry::InUse { offset: 17, gen: 0 })
            .unwrap();
        assert_eq!(table.get(3), XrefEntry::InUse { offset: 17, gen: 0 });
        assert_eq!(table.len(), 4);
        assert_eq!(table.parsed_count(), 1);
    }

    #[test]
    fn test_first_writer_wins() {
        let mut table = XrefTable::new(1000);
        table
            .set(2, XrefEntry::InUse { offset: 99, gen: 1 })
            .unwrap();
        // An older revision must not shadow the newer entry
        table
            .set(2, XrefEntry::InUse { offset: 11, gen: 0 })
            .unwrap();
        assert_eq!(table.get(2), XrefEntry::InUse { offset: 99, gen: 1 });
    }

    #[test]
    fn test_enlarge_never_shrinks() {
        let mut table = XrefTable::new(1000);
        table.enlarge(10).unwrap();
        table.enlarge(4).unwrap();
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn test_object_count_cap() {
        let mut table = XrefTable::new(8);
        assert!(table.enlarge(8).is_ok());
        let err = table.enlarge(9).unwrap_err();
        assert!(err.is(ErrorKind::ValueOutOfRange));
    }

    #[test]
    fn test_compressed_entry() {
        let mut table = XrefTable::new(100);
        table
            .set(
                7,
                XrefEntry::Compressed {
                    stream_num: 10,
                    index: 3,
                },
            )
            .unwrap();
        match table.get(7) {
            XrefEntry::Compressed { stream_num, index } => {
                assert_eq!((stream_num, index), (10, 3));
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }
}
