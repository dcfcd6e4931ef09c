//! B-tree v2 page parsing, lookup, and in-place modification.
//!
//! A page is a fixed-size block: a 6-byte header, a slot array growing from
//! the front, a 6-byte trailer, and a variable-length record area growing
//! from the tail downward. See `SPEC_FULL.md` §4.3 for the full layout.
//! This module models the source's `Entry`/`IndexEntry`/`LeafEntry` class
//! hierarchy as a tagged [`Slot`] enum with a side vector of [`Record`]
//! payloads, per the redesign flags: no inheritance, and mutation is
//! applied directly to the page's in-memory fields rather than queued as
//! separate edit objects, since every mutating method here leaves the page
//! in a state that reserialises correctly on its own.

use byteorder::{BigEndian, ByteOrder};

use crate::core::constants::*;
use crate::core::paged_bytes::PagedBytes;
use crate::I64Error;

/// One slot-array entry: an index page points at a child page, a leaf page
/// points at a record via prefix-compressed key reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Index { child_page: u32, record_offset: u16 },
    Leaf { key_prefix_len: u16, record_offset: u16 },
}

impl Slot {
    pub fn record_offset(&self) -> u16 {
        match *self {
            Slot::Index { record_offset, .. } => record_offset,
            Slot::Leaf { record_offset, .. } => record_offset,
        }
    }

    fn with_record_offset(&self, new_offset: u16) -> Slot {
        match *self {
            Slot::Index { child_page, .. } => Slot::Index {
                child_page,
                record_offset: new_offset,
            },
            Slot::Leaf { key_prefix_len, .. } => Slot::Leaf {
                key_prefix_len,
                record_offset: new_offset,
            },
        }
    }
}

/// A `(key, value)` pair stored in the record area. `key` is the raw,
/// possibly prefix-compressed, on-disk key; use [`Page::effective_key`] for
/// the reconstructed full key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub raw_key: Vec<u8>,
    pub val: Vec<u8>,
}

/// The three-way (plus recurse) response to [`Page::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFind {
    /// Index page: descend into `preceding_page` (`-1`) or the child
    /// referenced by the slot at this index.
    Recurse(i32),
    /// Leaf page: exact match at this slot.
    Eq(usize),
    /// Leaf page: largest key `<=` the search key, but not equal.
    Lt(usize),
    /// Leaf page: no key `<=` the search key.
    Gt,
}

/// One parsed B-tree page.
#[derive(Debug, Clone)]
pub struct Page {
    pub index: u32,
    pub page_size: u32,
    pub preceding_page: u32,
    pub data_start: u16,
    unused_trailer: u32,
    pub slots: Vec<Slot>,
    pub records: Vec<Record>,
    effective_keys: Vec<Vec<u8>>,
    dirty: bool,
}

impl Page {
    /// Parse a page of exactly `page_size` bytes.
    pub fn parse(index: u32, page_size: u32, data: &[u8]) -> Result<Page, I64Error> {
        if data.len() != page_size as usize {
            return Err(I64Error::TreeCorrupt(format!(
                "page {}: expected {} bytes, got {}",
                index,
                page_size,
                data.len()
            )));
        }

        let mut pb = PagedBytes::new(data.to_vec());
        let preceding_page = pb.read_u32()?;
        let entry_count = pb.read_u16()? as usize;
        let is_leaf = preceding_page == LEAF_PRECEDING_PAGE;

        let slot_area_start = PAGE_HEADER_LEN;
        let slot_area_end = slot_area_start + SLOT_LEN * entry_count;
        let trailer_end = slot_area_end + PAGE_TRAILER_LEN;
        if trailer_end > data.len() {
            return Err(I64Error::TreeCorrupt(format!(
                "page {}: slot array ({} entries) overruns page",
                index, entry_count
            )));
        }

        let mut slots = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            if is_leaf {
                let key_prefix_len = pb.read_u16()?;
                pb.read_u16()?; // unused
                let record_offset = pb.read_u16()?;
                slots.push(Slot::Leaf {
                    key_prefix_len,
                    record_offset,
                });
            } else {
                let child_page = pb.read_u32()?;
                let record_offset = pb.read_u16()?;
                slots.push(Slot::Index {
                    child_page,
                    record_offset,
                });
            }
        }

        let unused_trailer = pb.read_u32()?;
        let data_start = pb.read_u16()?;

        if (trailer_end as u16) > data_start && entry_count > 0 {
            return Err(I64Error::TreeCorrupt(format!(
                "page {}: slot area end {} exceeds data_start {}",
                index, trailer_end, data_start
            )));
        }

        let mut records = Vec::with_capacity(entry_count);
        for slot in &slots {
            let off = slot.record_offset() as usize;
            if off < data_start as usize {
                return Err(I64Error::TreeCorrupt(format!(
                    "page {}: record at offset {} precedes data_start {}",
                    index, off, data_start
                )));
            }
            pb.seek(off)?;
            let key_len = pb.read_u16()? as usize;
            let raw_key = pb.read(key_len)?.to_vec();
            let val_len = pb.read_u16()? as usize;
            let val = pb.read(val_len)?.to_vec();
            records.push(Record { raw_key, val });
        }

        let mut page = Page {
            index,
            page_size,
            preceding_page,
            data_start,
            unused_trailer,
            slots,
            records,
            effective_keys: Vec::new(),
            dirty: false,
        };
        page.rebuild_effective_keys();
        page.check_keys_ascending()?;
        Ok(page)
    }

    pub fn is_leaf(&self) -> bool {
        self.preceding_page == LEAF_PRECEDING_PAGE
    }

    pub fn entry_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn effective_key(&self, i: usize) -> &[u8] {
        &self.effective_keys[i]
    }

    fn slot_area_end(&self) -> usize {
        PAGE_HEADER_LEN + SLOT_LEN * self.slots.len() + PAGE_TRAILER_LEN
    }

    /// Bytes available for record growth without restructuring the page.
    pub fn free_bytes(&self) -> i64 {
        self.data_start as i64 - self.slot_area_end() as i64
    }

    fn rebuild_effective_keys(&mut self) {
        let mut keys = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.iter().enumerate() {
            let key = match slot {
                Slot::Index { .. } => self.records[i].raw_key.clone(),
                Slot::Leaf { key_prefix_len, .. } => {
                    let prefix_len = *key_prefix_len as usize;
                    let mut k = if i == 0 {
                        Vec::new()
                    } else {
                        keys[i - 1][..prefix_len.min(keys[i - 1].len())].to_vec()
                    };
                    k.extend_from_slice(&self.records[i].raw_key);
                    k
                }
            };
            keys.push(key);
        }
        self.effective_keys = keys;
    }

    fn check_keys_ascending(&self) -> Result<(), I64Error> {
        for i in 1..self.effective_keys.len() {
            if self.effective_keys[i - 1] >= self.effective_keys[i] {
                return Err(I64Error::TreeCorrupt(format!(
                    "page {}: keys not strictly ascending at slot {}",
                    self.index, i
                )));
            }
        }
        Ok(())
    }

    /// Binary search by effective key. See `SPEC_FULL.md` §4.3 for the
    /// three-way-plus-recurse response.
    pub fn find(&self, key: &[u8]) -> PageFind {
        // i = largest index with effective_key(i) <= key, or -1.
        let i = match self
            .effective_keys
            .binary_search_by(|k| k.as_slice().cmp(key))
        {
            Ok(exact) => exact as i64,
            Err(insert_at) => insert_at as i64 - 1,
        };

        if !self.is_leaf() {
            return PageFind::Recurse(i as i32);
        }

        if i < 0 {
            return PageFind::Gt;
        }
        let i = i as usize;
        if self.effective_keys[i] == key {
            PageFind::Eq(i)
        } else {
            PageFind::Lt(i)
        }
    }

    /// Which page to descend into for a `Recurse` response.
    pub fn child_for(&self, recurse_ix: i32) -> u32 {
        if recurse_ix < 0 {
            self.preceding_page
        } else {
            match self.slots[recurse_ix as usize] {
                Slot::Index { child_page, .. } => child_page,
                Slot::Leaf { .. } => unreachable!("recurse response only on index pages"),
            }
        }
    }

    /// Replace the value of the record at `slot_ix` in place.
    pub fn modify(&mut self, slot_ix: usize, new_val: Vec<u8>) -> Result<(), I64Error> {
        let old_len = self.records[slot_ix].val.len() as i64;
        let delta = new_val.len() as i64 - old_len;
        let free = self.free_bytes();
        if delta > free {
            return Err(I64Error::PageFull {
                page: self.index,
                needed: delta as usize,
                free: free.max(0) as usize,
            });
        }

        let edited_offset = self.slots[slot_ix].record_offset();
        for i in 0..self.slots.len() {
            let off = self.slots[i].record_offset();
            if off <= edited_offset {
                let new_off = (off as i64 - delta) as u16;
                self.slots[i] = self.slots[i].with_record_offset(new_off);
            }
        }
        self.records[slot_ix].val = new_val;
        self.data_start = (self.data_start as i64 - delta) as u16;
        self.dirty = true;
        Ok(())
    }

    /// Insert a new leaf record at slot position `slot_ix`.
    ///
    /// `slot_ix` must already be the correct ordered position; this page
    /// never splits, rebalances, or re-derives the prefix of the slot that
    /// follows the new one, so callers must only insert where the
    /// following slot (if any) does not need its `key_prefix_len` adjusted
    /// — in practice, appending to the end of a contiguous run of keys.
    pub fn insert(&mut self, slot_ix: usize, key: &[u8], val: Vec<u8>) -> Result<(), I64Error> {
        if !self.is_leaf() {
            return Err(I64Error::TreeCorrupt(format!(
                "page {}: insert is only supported on leaf pages",
                self.index
            )));
        }

        let prev_key = if slot_ix > 0 {
            self.effective_keys[slot_ix - 1].clone()
        } else {
            Vec::new()
        };
        let key_prefix_len = common_prefix_len(key, &prev_key);
        let raw_key = key[key_prefix_len..].to_vec();

        let record_size = 2 + raw_key.len() + 2 + val.len();
        let needed = SLOT_LEN + record_size;
        let free = self.free_bytes();
        if needed as i64 > free {
            return Err(I64Error::PageFull {
                page: self.index,
                needed,
                free: free.max(0) as usize,
            });
        }

        let new_offset = self.data_start - record_size as u16;
        let new_slot = Slot::Leaf {
            key_prefix_len: key_prefix_len as u16,
            record_offset: new_offset,
        };
        self.slots.insert(slot_ix, new_slot);
        self.records.insert(
            slot_ix,
            Record {
                raw_key,
                val,
            },
        );
        self.data_start = new_offset;
        self.rebuild_effective_keys();
        self.dirty = true;
        Ok(())
    }

    /// Serialise this page back into a `page_size`-byte image.
    pub fn serialize(&self) -> Vec<u8> {
        let ps = self.page_size as usize;
        let mut pb = PagedBytes::new(vec![0u8; ps]);
        const INVARIANT: &str = "page layout invariant violated at serialize time";
        pb.write_u32(self.preceding_page).expect(INVARIANT);
        pb.write_u16(self.slots.len() as u16).expect(INVARIANT);

        for slot in &self.slots {
            match *slot {
                Slot::Index {
                    child_page,
                    record_offset,
                } => {
                    pb.write_u32(child_page).expect(INVARIANT);
                    pb.write_u16(record_offset).expect(INVARIANT);
                }
                Slot::Leaf {
                    key_prefix_len,
                    record_offset,
                } => {
                    pb.write_u16(key_prefix_len).expect(INVARIANT);
                    pb.write_u16(0).expect(INVARIANT);
                    pb.write_u16(record_offset).expect(INVARIANT);
                }
            }
        }

        pb.write_u32(self.unused_trailer).expect(INVARIANT);
        pb.write_u16(self.data_start).expect(INVARIANT);

        for (slot, record) in self.slots.iter().zip(self.records.iter()) {
            let off = slot.record_offset() as usize;
            pb.seek(off).expect(INVARIANT);
            pb.write_u16(record.raw_key.len() as u16).expect(INVARIANT);
            pb.write(&record.raw_key).expect(INVARIANT);
            pb.write_u16(record.val.len() as u16).expect(INVARIANT);
            pb.write(&record.val).expect(INVARIANT);
        }

        pb.into_inner()
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Build a `.`-addressed per-node record key: `. node_id:be64 tag index:be64`.
pub fn node_record_key(node_id: u64, tag: u8, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(NODE_KEY_LEN);
    key.push(NODE_KEY_PREFIX);
    let mut be = [0u8; 8];
    BigEndian::write_u64(&mut be, node_id);
    key.extend_from_slice(&be);
    key.push(tag);
    BigEndian::write_u64(&mut be, index);
    key.extend_from_slice(&be);
    key
}

/// Build a name-to-node-id key: `N<name>`.
pub fn name_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(NAME_KEY_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::LittleEndian;

    /// Build a leaf page with the given `(key, val)` pairs (keys must
    /// already be sorted ascending) and `free` extra bytes of headroom.
    fn build_leaf_page(index: u32, page_size: u32, entries: &[(&[u8], &[u8])], free: usize) -> Page {
        let mut records_bytes: Vec<u8> = Vec::new();
        let mut slots = Vec::new();
        let mut offsets = Vec::new();

        // Lay out records from the tail, smallest offset first.
        let mut running_offset = page_size as usize;
        let mut raw_records: Vec<(u16, Vec<u8>, Vec<u8>)> = Vec::new();
        let mut prev_key: &[u8] = &[];
        for (key, val) in entries {
            let prefix_len = common_prefix_len(key, prev_key);
            let raw_key = key[prefix_len..].to_vec();
            let record_size = 2 + raw_key.len() + 2 + val.len();
            running_offset -= record_size;
            raw_records.push((prefix_len as u16, raw_key, val.to_vec()));
            offsets.push(running_offset as u16);
            prev_key = key;
        }
        running_offset -= free;
        let data_start = running_offset as u16;

        for ((prefix_len, raw_key, val), offset) in raw_records.iter().zip(offsets.iter()) {
            slots.push(Slot::Leaf {
                key_prefix_len: *prefix_len,
                record_offset: *offset,
            });
            records_bytes.extend_from_slice(raw_key);
            records_bytes.extend_from_slice(val);
        }

        let mut buf = vec![0u8; page_size as usize];
        LittleEndian::write_u32(&mut buf[0..4], 0); // leaf
        LittleEndian::write_u16(&mut buf[4..6], slots.len() as u16);
        let slot_area_start = PAGE_HEADER_LEN;
        for (i, slot) in slots.iter().enumerate() {
            let s = &mut buf[slot_area_start + i * SLOT_LEN..slot_area_start + (i + 1) * SLOT_LEN];
            if let Slot::Leaf {
                key_prefix_len,
                record_offset,
            } = slot
            {
                LittleEndian::write_u16(&mut s[0..2], *key_prefix_len);
                LittleEndian::write_u16(&mut s[4..6], *record_offset);
            }
        }
        let slot_area_end = slot_area_start + SLOT_LEN * slots.len();
        LittleEndian::write_u16(&mut buf[slot_area_end + 4..slot_area_end + 6], data_start);

        for ((_, raw_key, val), offset) in raw_records.iter().zip(offsets.iter()) {
            let off = *offset as usize;
            LittleEndian::write_u16(&mut buf[off..off + 2], raw_key.len() as u16);
            let key_start = off + 2;
            let key_end = key_start + raw_key.len();
            buf[key_start..key_end].copy_from_slice(raw_key);
            LittleEndian::write_u16(&mut buf[key_end..key_end + 2], val.len() as u16);
            let val_start = key_end + 2;
            buf[val_start..val_start + val.len()].copy_from_slice(val);
        }

        Page::parse(index, page_size, &buf).unwrap()
    }

    #[test]
    fn parses_effective_keys_with_prefix_compression() {
        let page = build_leaf_page(
            0,
            256,
            &[(b"apple", b"1"), (b"applesauce", b"2"), (b"banana", b"3")],
            16,
        );
        assert_eq!(page.effective_key(0), b"apple");
        assert_eq!(page.effective_key(1), b"applesauce");
        assert_eq!(page.effective_key(2), b"banana");
    }

    #[test]
    fn find_matches_each_response_kind() {
        let page = build_leaf_page(0, 256, &[(b"b", b"1"), (b"d", b"2"), (b"f", b"3")], 16);
        assert_eq!(page.find(b"d"), PageFind::Eq(1));
        assert_eq!(page.find(b"c"), PageFind::Lt(0));
        assert_eq!(page.find(b"a"), PageFind::Gt);
        assert_eq!(page.find(b"z"), PageFind::Lt(2));
    }

    #[test]
    fn modify_shrinks_and_grows_value_in_place() {
        let mut page = build_leaf_page(0, 256, &[(b"a", b"1"), (b"b", b"22")], 16);
        let free_before = page.free_bytes();
        page.modify(0, b"1234".to_vec()).unwrap();
        assert_eq!(page.records[0].val, b"1234");
        assert_eq!(page.free_bytes(), free_before - 3);
        assert!(page.is_dirty());

        // Round-trip through serialize/parse.
        let bytes = page.serialize();
        let reparsed = Page::parse(0, 256, &bytes).unwrap();
        assert_eq!(reparsed.effective_key(0), b"a");
        assert_eq!(reparsed.records[0].val, b"1234");
        assert_eq!(reparsed.records[1].val, b"22");
    }

    #[test]
    fn modify_rejects_growth_beyond_free_space() {
        let mut page = build_leaf_page(0, 256, &[(b"a", b"1")], 0);
        assert!(page.modify(0, b"12".to_vec()).is_err());
    }

    #[test]
    fn insert_appends_at_tail_and_reserialises() {
        let mut page = build_leaf_page(0, 256, &[(b"a", b"1"), (b"b", b"2")], 64);
        page.insert(2, b"c", b"3".to_vec()).unwrap();
        assert_eq!(page.entry_count(), 3);
        assert_eq!(page.effective_key(2), b"c");
        assert_eq!(page.free_bytes(), 64 - (SLOT_LEN as i64 + 2 + 1 + 2 + 1));

        let bytes = page.serialize();
        let reparsed = Page::parse(0, 256, &bytes).unwrap();
        assert_eq!(reparsed.entry_count(), 3);
        assert_eq!(reparsed.effective_key(2), b"c");
        assert_eq!(reparsed.records[2].val, b"3");
    }

    #[test]
    fn insert_rejects_when_page_full() {
        let mut page = build_leaf_page(0, 256, &[(b"a", b"1")], 4);
        assert!(page.insert(1, b"zzzzzzzzzzzz", b"value-too-big".to_vec()).is_err());
    }

    #[test]
    fn serialize_roundtrip_preserves_free_region_size() {
        let page = build_leaf_page(0, 256, &[(b"a", b"1"), (b"bb", b"22")], 30);
        let bytes = page.serialize();
        let reparsed = Page::parse(0, 256, &bytes).unwrap();
        assert_eq!(reparsed.free_bytes(), page.free_bytes());
        assert_eq!(reparsed.slots, page.slots);
        assert_eq!(reparsed.records, page.records);
    }
}
