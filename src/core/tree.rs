//! B-tree traversal: descent from the root index page, a forward/backward
//! cursor, and blob reassembly across multiple records.
//!
//! Pages are materialised lazily through an [`EditBuffer`]: a read returns
//! the dirty in-session copy if one exists, otherwise a fresh parse from
//! the section's decompressed byte buffer. The buffer itself is owned by
//! `Id0Section`, not by `Tree`, so every method here takes it as an
//! explicit `&[u8]` parameter rather than the source's approach of caching
//! a `bw`/reader handle on the tree object lazily.

use crate::core::constants::*;
use crate::core::edit_buffer::EditBuffer;
use crate::core::page::{node_record_key, Page, PageFind};
use crate::I64Error;

/// The requested relational position for [`Tree::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindRequest {
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

/// A position in the tree: a stack of ancestor `(page, chosen slot)` pairs
/// taken during descent, plus the current leaf and its slot index. `leaf_pos`
/// may transiently be `-1` (before the first slot) or `entry_count` (after
/// the last) while `next`/`prev` resolve which adjacent leaf to move into.
#[derive(Debug, Clone)]
pub struct Cursor {
    ancestors: Vec<(u32, i32)>,
    leaf_page: u32,
    leaf_pos: i64,
}

impl Cursor {
    pub fn page_and_slot(&self) -> (u32, usize) {
        (self.leaf_page, self.leaf_pos as usize)
    }

    pub fn key(&self, tree: &mut Tree, buf: &[u8]) -> Result<Vec<u8>, I64Error> {
        let page = tree.read_page(buf, self.leaf_page)?;
        Ok(page.effective_key(self.leaf_pos as usize).to_vec())
    }

    pub fn val(&self, tree: &mut Tree, buf: &[u8]) -> Result<Vec<u8>, I64Error> {
        let page = tree.read_page(buf, self.leaf_page)?;
        Ok(page.records[self.leaf_pos as usize].val.clone())
    }

    /// Advance to the next leaf entry. Returns `false` if this was the last
    /// entry in the tree.
    pub fn next(&mut self, tree: &mut Tree, buf: &[u8]) -> Result<bool, I64Error> {
        self.leaf_pos += 1;
        loop {
            let page = tree.read_page(buf, self.leaf_page)?;
            if (self.leaf_pos as usize) < page.entry_count() {
                return Ok(true);
            }
            // This leaf is exhausted; pop ancestors looking for a sibling.
            match self.ancestors.pop() {
                None => return Ok(false),
                Some((page_idx, slot_ix)) => {
                    let idx_page = tree.read_page(buf, page_idx)?;
                    let next_slot = slot_ix + 1;
                    if (next_slot as usize) < idx_page.entry_count() {
                        let child = idx_page.child_for(next_slot);
                        self.ancestors.push((page_idx, next_slot));
                        let (mut new_ancestors, leaf) = descend_leftmost(tree, buf, child)?;
                        self.ancestors.append(&mut new_ancestors);
                        self.leaf_page = leaf;
                        self.leaf_pos = 0;
                        let leaf_page = tree.read_page(buf, self.leaf_page)?;
                        if (self.leaf_pos as usize) < leaf_page.entry_count() {
                            return Ok(true);
                        }
                        // degenerate empty leaf; keep unwinding
                        continue;
                    }
                }
            }
        }
    }

    /// Retreat to the previous leaf entry. Returns `false` if this was the
    /// first entry in the tree.
    pub fn prev(&mut self, tree: &mut Tree, buf: &[u8]) -> Result<bool, I64Error> {
        self.leaf_pos -= 1;
        loop {
            if self.leaf_pos >= 0 {
                return Ok(true);
            }
            match self.ancestors.pop() {
                None => return Ok(false),
                Some((page_idx, slot_ix)) => {
                    if slot_ix - 1 >= -1 {
                        let idx_page = tree.read_page(buf, page_idx)?;
                        let prev_slot = slot_ix - 1;
                        let child = idx_page.child_for(prev_slot);
                        self.ancestors.push((page_idx, prev_slot));
                        let (mut new_ancestors, leaf) = descend_rightmost(tree, buf, child)?;
                        self.ancestors.append(&mut new_ancestors);
                        self.leaf_page = leaf;
                        let leaf_page = tree.read_page(buf, self.leaf_page)?;
                        self.leaf_pos = leaf_page.entry_count() as i64 - 1;
                        if self.leaf_pos >= 0 {
                            return Ok(true);
                        }
                        continue;
                    }
                }
            }
        }
    }
}

fn descend_leftmost(
    tree: &mut Tree,
    buf: &[u8],
    mut page_idx: u32,
) -> Result<(Vec<(u32, i32)>, u32), I64Error> {
    let mut ancestors = Vec::new();
    for _ in 0..MAX_TREE_DEPTH {
        let page = tree.read_page(buf, page_idx)?;
        if page.is_leaf() {
            return Ok((ancestors, page_idx));
        }
        ancestors.push((page_idx, -1));
        page_idx = page.preceding_page;
    }
    Err(I64Error::TreeCorrupt(
        "max tree depth exceeded while descending to leftmost leaf".into(),
    ))
}

fn descend_rightmost(
    tree: &mut Tree,
    buf: &[u8],
    mut page_idx: u32,
) -> Result<(Vec<(u32, i32)>, u32), I64Error> {
    let mut ancestors = Vec::new();
    for _ in 0..MAX_TREE_DEPTH {
        let page = tree.read_page(buf, page_idx)?;
        if page.is_leaf() {
            return Ok((ancestors, page_idx));
        }
        let last_slot = page.entry_count() as i32 - 1;
        ancestors.push((page_idx, last_slot));
        page_idx = page.child_for(last_slot);
    }
    Err(I64Error::TreeCorrupt(
        "max tree depth exceeded while descending to rightmost leaf".into(),
    ))
}

/// Owns the page store within `ID0`: materialises pages on demand and
/// descends from the root index page to the matching leaf.
pub struct Tree {
    pub page_size: u32,
    pub first_index_page: u32,
    pub record_count: u32,
    pub page_count: u32,
    pages_start: usize,
    edit_buffer: EditBuffer,
}

impl Tree {
    pub fn new(
        page_size: u32,
        first_index_page: u32,
        record_count: u32,
        page_count: u32,
        pages_start: usize,
    ) -> Self {
        Tree {
            page_size,
            first_index_page,
            record_count,
            page_count,
            pages_start,
            edit_buffer: EditBuffer::new(),
        }
    }

    pub fn edit_buffer(&self) -> &EditBuffer {
        &self.edit_buffer
    }

    /// Byte offset, within the section buffer, of page 0.
    pub fn pages_start(&self) -> usize {
        self.pages_start
    }

    fn page_offset(&self, n: u32) -> usize {
        self.pages_start + n as usize * self.page_size as usize
    }

    /// Materialise page `n`: the dirty copy if one exists, else a fresh
    /// parse from `buf`.
    pub fn read_page(&mut self, buf: &[u8], n: u32) -> Result<&Page, I64Error> {
        if !self.edit_buffer.contains(n) {
            let offset = self.page_offset(n);
            let end = offset + self.page_size as usize;
            let slice = buf.get(offset..end).ok_or_else(|| {
                I64Error::ReadOverrun {
                    offset,
                    len: self.page_size as usize,
                }
            })?;
            let page = Page::parse(n, self.page_size, slice)?;
            self.edit_buffer.insert(page);
        }
        Ok(self.edit_buffer.get(n).unwrap())
    }

    /// Materialise page `n` for mutation; always enters the edit buffer.
    pub fn read_page_mut(&mut self, buf: &[u8], n: u32) -> Result<&mut Page, I64Error> {
        self.read_page(buf, n)?;
        Ok(self.edit_buffer.get_mut(n).unwrap())
    }

    fn descend(&mut self, buf: &[u8], key: &[u8]) -> Result<(Vec<(u32, i32)>, u32, PageFind), I64Error> {
        let mut ancestors = Vec::new();
        let mut page_idx = self.first_index_page;
        for _ in 0..MAX_TREE_DEPTH {
            let page = self.read_page(buf, page_idx)?;
            match page.find(key) {
                PageFind::Recurse(i) => {
                    let child = page.child_for(i);
                    ancestors.push((page_idx, i));
                    page_idx = child;
                }
                terminal => return Ok((ancestors, page_idx, terminal)),
            }
        }
        Err(I64Error::TreeCorrupt(
            "max tree depth exceeded while descending to key".into(),
        ))
    }

    /// Find the cursor position satisfying `request` relative to `key`, per
    /// the reconciliation table in `SPEC_FULL.md` §4.4. Returns `None` if
    /// no position in the tree satisfies the request.
    pub fn find(
        &mut self,
        buf: &[u8],
        request: FindRequest,
        key: &[u8],
    ) -> Result<Option<Cursor>, I64Error> {
        let (ancestors, leaf_page, response) = self.descend(buf, key)?;

        // floor_ix: largest slot index whose key <= search key, or None.
        let (floor_ix, exact) = match response {
            PageFind::Eq(i) => (Some(i as i64), true),
            PageFind::Lt(i) => (Some(i as i64), false),
            PageFind::Gt => (None, false),
            PageFind::Recurse(_) => unreachable!("descend only returns terminal responses"),
        };

        let mut cursor = Cursor {
            ancestors,
            leaf_page,
            leaf_pos: floor_ix.unwrap_or(-1),
        };

        match (request, floor_ix, exact) {
            (FindRequest::Eq, Some(_), true) => Ok(Some(cursor)),
            (FindRequest::Eq, _, _) => Ok(None),

            (FindRequest::Ge, Some(_), true) => Ok(Some(cursor)),
            (FindRequest::Ge, _, false) => {
                if cursor.next(self, buf)? {
                    Ok(Some(cursor))
                } else {
                    Ok(None)
                }
            }

            (FindRequest::Le, Some(_), _) => Ok(Some(cursor)),
            (FindRequest::Le, None, _) => {
                if cursor.prev(self, buf)? {
                    Ok(Some(cursor))
                } else {
                    Ok(None)
                }
            }

            (FindRequest::Gt, _, _) => {
                if cursor.next(self, buf)? {
                    Ok(Some(cursor))
                } else {
                    Ok(None)
                }
            }

            (FindRequest::Lt, Some(_), true) => {
                if cursor.prev(self, buf)? {
                    Ok(Some(cursor))
                } else {
                    Ok(None)
                }
            }
            (FindRequest::Lt, Some(_), false) => Ok(Some(cursor)),
            (FindRequest::Lt, None, _) => {
                if cursor.prev(self, buf)? {
                    Ok(Some(cursor))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Assemble the blob for `node_id`/`tag` over `[start_ix, end_ix]`:
    /// concatenate the `val` of every record whose key falls in that range,
    /// and report the `(page, slot)` of each contributing record.
    pub fn blob(
        &mut self,
        buf: &[u8],
        node_id: u64,
        tag: u8,
        start_ix: u64,
        end_ix: u64,
    ) -> Result<(Vec<u8>, Vec<(u32, usize)>), I64Error> {
        let start_key = node_record_key(node_id, tag, start_ix);
        let end_key = node_record_key(node_id, tag, end_ix);

        let mut cursor = match self.find(buf, FindRequest::Ge, &start_key)? {
            Some(c) => c,
            None => return Ok((Vec::new(), Vec::new())),
        };

        let mut data = Vec::new();
        let mut affected = Vec::new();
        loop {
            let key = cursor.key(self, buf)?;
            if key.as_slice() > end_key.as_slice() {
                break;
            }
            let pos = cursor.page_and_slot();
            if affected.last() != Some(&pos) {
                affected.push(pos);
            }
            data.extend_from_slice(&cursor.val(self, buf)?);
            if !cursor.next(self, buf)? {
                break;
            }
        }
        Ok((data, affected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};

    /// Builds one leaf page's bytes over sorted `(key, val)` pairs,
    /// prefix-compressing each key against its predecessor.
    fn build_leaf_page_bytes(page_size: u32, entries: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut offsets = Vec::new();
        let mut running_offset = page_size as usize;
        let mut raw_records: Vec<(u16, Vec<u8>, Vec<u8>)> = Vec::new();
        let mut prev_key: &[u8] = &[];
        for (key, val) in entries {
            let prefix_len = key
                .iter()
                .zip(prev_key.iter())
                .take_while(|(a, b)| a == b)
                .count();
            let raw_key = key[prefix_len..].to_vec();
            let record_size = 2 + raw_key.len() + 2 + val.len();
            running_offset -= record_size;
            raw_records.push((prefix_len as u16, raw_key, val.to_vec()));
            offsets.push(running_offset as u16);
            prev_key = key;
        }
        let data_start = running_offset as u16;

        let mut page = vec![0u8; page_size as usize];
        LittleEndian::write_u32(&mut page[0..4], 0);
        LittleEndian::write_u16(&mut page[4..6], raw_records.len() as u16);
        for (i, (prefix_len, _raw_key, _val)) in raw_records.iter().enumerate() {
            let s = &mut page[6 + i * 6..6 + (i + 1) * 6];
            LittleEndian::write_u16(&mut s[0..2], *prefix_len);
            LittleEndian::write_u16(&mut s[4..6], offsets[i]);
        }
        let slot_area_end = 6 + 6 * raw_records.len();
        LittleEndian::write_u16(&mut page[slot_area_end + 4..slot_area_end + 6], data_start);
        for ((_, raw_key, val), off) in raw_records.iter().zip(offsets.iter()) {
            let off = *off as usize;
            LittleEndian::write_u16(&mut page[off..off + 2], raw_key.len() as u16);
            let ks = off + 2;
            page[ks..ks + raw_key.len()].copy_from_slice(raw_key);
            let ke = ks + raw_key.len();
            LittleEndian::write_u16(&mut page[ke..ke + 2], val.len() as u16);
            let vs = ke + 2;
            page[vs..vs + val.len()].copy_from_slice(val);
        }
        page
    }

    /// Builds one index page's bytes: `preceding_page` is the child for
    /// keys below the first separator, and `children` is a sorted list of
    /// `(child_page, separator_key)` pairs. Index keys are never
    /// prefix-compressed.
    fn build_index_page_bytes(page_size: u32, preceding_page: u32, children: &[(u32, &[u8])]) -> Vec<u8> {
        let mut offsets = Vec::new();
        let mut running_offset = page_size as usize;
        for (_, key) in children {
            let record_size = 2 + key.len() + 2;
            running_offset -= record_size;
            offsets.push(running_offset as u16);
        }
        let data_start = running_offset as u16;

        let mut page = vec![0u8; page_size as usize];
        LittleEndian::write_u32(&mut page[0..4], preceding_page);
        LittleEndian::write_u16(&mut page[4..6], children.len() as u16);
        for (i, (child_page, _key)) in children.iter().enumerate() {
            let s = &mut page[6 + i * 6..6 + (i + 1) * 6];
            LittleEndian::write_u32(&mut s[0..4], *child_page);
            LittleEndian::write_u16(&mut s[4..6], offsets[i]);
        }
        let slot_area_end = 6 + 6 * children.len();
        LittleEndian::write_u16(&mut page[slot_area_end + 4..slot_area_end + 6], data_start);
        for ((_, key), off) in children.iter().zip(offsets.iter()) {
            let off = *off as usize;
            LittleEndian::write_u16(&mut page[off..off + 2], key.len() as u16);
            let ks = off + 2;
            page[ks..ks + key.len()].copy_from_slice(key);
            let ke = ks + key.len();
            LittleEndian::write_u16(&mut page[ke..ke + 2], 0);
        }
        page
    }

    /// Builds a tiny single-leaf tree (one page, no index level) over
    /// caller-supplied sorted `(key, val)` pairs.
    fn single_leaf_tree(entries: &[(&[u8], &[u8])]) -> (Tree, Vec<u8>) {
        let page_size = 512u32;
        let page = build_leaf_page_bytes(page_size, entries);
        let tree = Tree::new(page_size, 0, entries.len() as u32, 1, 0);
        (tree, page)
    }

    /// Builds a two-level tree: a root index page (page 0) whose
    /// `preceding_page` points at a leaf holding `a`, `b`, `c`, and whose
    /// single index slot points at a second leaf holding `d`, `e`, `f`,
    /// separated by the key `d`.
    fn multi_level_tree() -> (Tree, Vec<u8>) {
        let page_size = 512u32;
        let leaf1 = build_leaf_page_bytes(page_size, &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let leaf2 = build_leaf_page_bytes(page_size, &[(b"d", b"4"), (b"e", b"5"), (b"f", b"6")]);
        let root = build_index_page_bytes(page_size, 1, &[(2, b"d")]);

        let mut buf = Vec::with_capacity(page_size as usize * 3);
        buf.extend_from_slice(&root);
        buf.extend_from_slice(&leaf1);
        buf.extend_from_slice(&leaf2);

        let tree = Tree::new(page_size, 0, 6, 3, 0);
        (tree, buf)
    }

    #[test]
    fn find_eq_and_ge_on_single_leaf() {
        let (mut tree, buf) = single_leaf_tree(&[(b"b", b"2"), (b"d", b"4"), (b"f", b"6")]);
        let cur = tree.find(&buf, FindRequest::Eq, b"d").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (0, 1));

        assert!(tree.find(&buf, FindRequest::Eq, b"c").unwrap().is_none());

        let mut cur = tree.find(&buf, FindRequest::Ge, b"c").unwrap().unwrap();
        assert_eq!(cur.key(&mut tree, &buf).unwrap(), b"d");

        let cur = tree.find(&buf, FindRequest::Le, b"e").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (0, 1));

        let cur = tree.find(&buf, FindRequest::Gt, b"d").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (0, 2));

        let cur = tree.find(&buf, FindRequest::Lt, b"d").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (0, 0));

        assert!(tree.find(&buf, FindRequest::Lt, b"a").unwrap().is_none());
        assert!(tree.find(&buf, FindRequest::Gt, b"f").unwrap().is_none());
    }

    #[test]
    fn forward_walk_visits_all_in_order() {
        let (mut tree, buf) = single_leaf_tree(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let mut cur = tree.find(&buf, FindRequest::Ge, b"").unwrap().unwrap();
        let mut seen = Vec::new();
        loop {
            seen.push(cur.key(&mut tree, &buf).unwrap());
            if !cur.next(&mut tree, &buf).unwrap() {
                break;
            }
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn backward_walk_mirrors_forward() {
        let (mut tree, buf) = single_leaf_tree(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let mut cur = tree
            .find(&buf, FindRequest::Le, &[0xFF, 0xFF])
            .unwrap()
            .unwrap();
        let mut seen = Vec::new();
        loop {
            seen.push(cur.key(&mut tree, &buf).unwrap());
            if !cur.prev(&mut tree, &buf).unwrap() {
                break;
            }
        }
        assert_eq!(seen, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn find_recurses_through_index_page_to_correct_leaf() {
        let (mut tree, buf) = multi_level_tree();
        let cur = tree.find(&buf, FindRequest::Eq, b"b").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (1, 1));

        let cur = tree.find(&buf, FindRequest::Eq, b"e").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (2, 1));
    }

    #[test]
    fn forward_walk_crosses_leaf_boundary_via_index_page() {
        let (mut tree, buf) = multi_level_tree();
        let mut cur = tree.find(&buf, FindRequest::Eq, b"c").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (1, 2));

        assert!(cur.next(&mut tree, &buf).unwrap());
        assert_eq!(cur.page_and_slot(), (2, 0));
        assert_eq!(cur.key(&mut tree, &buf).unwrap(), b"d");
    }

    #[test]
    fn backward_walk_crosses_leaf_boundary_via_index_page() {
        let (mut tree, buf) = multi_level_tree();
        let mut cur = tree.find(&buf, FindRequest::Eq, b"d").unwrap().unwrap();
        assert_eq!(cur.page_and_slot(), (2, 0));

        assert!(cur.prev(&mut tree, &buf).unwrap());
        assert_eq!(cur.page_and_slot(), (1, 2));
        assert_eq!(cur.key(&mut tree, &buf).unwrap(), b"c");
    }

    #[test]
    fn forward_walk_visits_all_entries_across_leaves() {
        let (mut tree, buf) = multi_level_tree();
        let mut cur = tree.find(&buf, FindRequest::Ge, b"").unwrap().unwrap();
        let mut seen = Vec::new();
        loop {
            seen.push(cur.key(&mut tree, &buf).unwrap());
            if !cur.next(&mut tree, &buf).unwrap() {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                b"a".to_vec(),
                b"b".to_vec(),
                b"c".to_vec(),
                b"d".to_vec(),
                b"e".to_vec(),
                b"f".to_vec(),
            ]
        );
    }

    #[test]
    fn backward_walk_visits_all_entries_across_leaves() {
        let (mut tree, buf) = multi_level_tree();
        let mut cur = tree
            .find(&buf, FindRequest::Le, &[0xFF, 0xFF])
            .unwrap()
            .unwrap();
        let mut seen = Vec::new();
        loop {
            seen.push(cur.key(&mut tree, &buf).unwrap());
            if !cur.prev(&mut tree, &buf).unwrap() {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                b"f".to_vec(),
                b"e".to_vec(),
                b"d".to_vec(),
                b"c".to_vec(),
                b"b".to_vec(),
                b"a".to_vec(),
            ]
        );
    }

    #[test]
    fn blob_concatenates_matching_records() {
        let node_id = 7u64;
        let k0 = node_record_key(node_id, b'S', 0);
        let k1 = node_record_key(node_id, b'S', 1);
        let (mut tree, buf) = single_leaf_tree(&[
            (k0.as_slice(), b"hello-"),
            (k1.as_slice(), b"world"),
        ]);
        let (data, affected) = tree.blob(&buf, node_id, b'S', 0, 1).unwrap();
        assert_eq!(data, b"hello-world");
        assert_eq!(affected, vec![(0, 0), (0, 1)]);
    }
}
