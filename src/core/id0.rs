//! The `ID0` section: the (optionally deflated) byte range hosting the
//! B-tree v2 control block, blank page, and page store.

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::core::constants::*;
use crate::core::container::{read_section_prefix, IdbContainer};
use crate::core::page::Page;
use crate::core::tree::{Cursor, FindRequest, Tree};
use crate::I64Error;

fn inflate(payload: &[u8]) -> Result<Vec<u8>, I64Error> {
    let mut decoder = DeflateDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| I64Error::Io(format!("inflating ID0 section: {e}")))?;
    Ok(out)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, I64Error> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| I64Error::Io(format!("deflating ID0 section: {e}")))?;
    encoder
        .finish()
        .map_err(|e| I64Error::Io(format!("deflating ID0 section: {e}")))
}

/// The `ID0` section's decompressed byte buffer, plus the `Tree` over it.
pub struct Id0Section {
    compression_flag: u8,
    old_payload_length: u64,
    buf: Vec<u8>,
    pub tree: Tree,
    pending: Option<(u8, Vec<u8>)>,
}

impl Id0Section {
    /// Open from `container`'s section 0: decompress if flagged, verify the
    /// `"B-tree v2"` marker, and bootstrap a `Tree` over the page store that
    /// follows the control block and the blank page.
    pub fn open(container: &IdbContainer) -> Result<Self, I64Error> {
        let offset = container.section_offset(0) as usize;
        let raw = container.raw();
        let (compression_flag, payload_length) = read_section_prefix(raw, offset)?;
        let payload_start = offset + SECTION_PREFIX_LEN;
        let payload_end = payload_start + payload_length as usize;
        let payload = raw.get(payload_start..payload_end).ok_or(I64Error::ReadOverrun {
            offset: payload_start,
            len: payload_length as usize,
        })?;

        let buf = match compression_flag {
            COMPRESSION_NONE => payload.to_vec(),
            COMPRESSION_DEFLATE => inflate(payload)?,
            other => return Err(I64Error::UnsupportedCompression(other)),
        };

        if buf.len() < ID0_CONTROL_BLOCK_LEN {
            return Err(I64Error::TreeCorrupt(
                "ID0 payload shorter than the control block".into(),
            ));
        }
        let marker_end = BTREE_MARKER_OFFSET + BTREE_MARKER.len();
        if &buf[BTREE_MARKER_OFFSET..marker_end] != BTREE_MARKER {
            return Err(I64Error::UnknownBTreeFormat);
        }

        let first_index_page = LittleEndian::read_u32(&buf[6..10]);
        let record_count = LittleEndian::read_u32(&buf[10..14]);
        let page_count = LittleEndian::read_u32(&buf[14..18]);
        let page_size = LittleEndian::read_u16(&buf[4..6]) as u32;

        // The control block is itself padded out to one page, followed by a
        // second page left intentionally blank; the page store starts at the
        // third page-sized slot.
        let pages_start = 2 * page_size as usize;

        let tree = Tree::new(page_size, first_index_page, record_count, page_count, pages_start);

        Ok(Id0Section {
            compression_flag,
            old_payload_length: payload_length,
            buf,
            tree,
            pending: None,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.tree.page_size
    }

    /// Find a cursor satisfying `request` relative to `key`. Thin wrapper
    /// over `Tree::find` that supplies this section's own decompressed
    /// buffer, so callers above this layer never touch it directly.
    pub fn find(&mut self, request: FindRequest, key: &[u8]) -> Result<Option<Cursor>, I64Error> {
        self.tree.find(&self.buf, request, key)
    }

    pub fn blob(
        &mut self,
        node_id: u64,
        tag: u8,
        start_ix: u64,
        end_ix: u64,
    ) -> Result<(Vec<u8>, Vec<(u32, usize)>), I64Error> {
        self.tree.blob(&self.buf, node_id, tag, start_ix, end_ix)
    }

    pub fn read_page_mut(&mut self, page_idx: u32) -> Result<&mut Page, I64Error> {
        self.tree.read_page_mut(&self.buf, page_idx)
    }

    pub fn cursor_val(&mut self, cursor: &Cursor) -> Result<Vec<u8>, I64Error> {
        cursor.val(&mut self.tree, &self.buf)
    }

    /// Flush every dirty page into the in-memory buffer and recompress,
    /// without writing anything back to the container. Returns the signed
    /// change in payload length; callers must relocate the container's
    /// following sections (using their still-intact old bytes) before
    /// calling [`Self::pending_write`] to learn what to write back.
    pub fn recompute(&mut self) -> Result<i64, I64Error> {
        let dirty: Vec<(u32, Vec<u8>)> = self
            .tree
            .edit_buffer()
            .dirty_pages()
            .map(|p| (p.index, p.serialize()))
            .collect();

        let pages_start = self.tree.pages_start();
        let page_size = self.tree.page_size as usize;
        for (index, bytes) in dirty {
            let start = pages_start + index as usize * page_size;
            let end = start + page_size;
            if end > self.buf.len() {
                return Err(I64Error::WriteOverrun { offset: start, len: page_size });
            }
            self.buf[start..end].copy_from_slice(&bytes);
        }

        let (flag, payload) = match self.compression_flag {
            COMPRESSION_DEFLATE => (COMPRESSION_DEFLATE, deflate(&self.buf)?),
            _ => (COMPRESSION_NONE, self.buf.clone()),
        };
        let size_delta = payload.len() as i64 - self.old_payload_length as i64;
        self.pending = Some((flag, payload));
        Ok(size_delta)
    }

    /// The `(compression_flag, payload)` computed by [`Self::recompute`],
    /// ready to write at the section's unchanged offset.
    pub fn pending_write(&mut self) -> Option<(u8, Vec<u8>)> {
        self.pending.take()
    }
}
