//! Fixed offsets and magic values for the `.i64` container and B-tree v2 format.

// ── Container header ──
/// Magic bytes every `.i64` file must begin with.
pub const MAGIC: &[u8; 4] = b"IDA2";
/// Length of the magic prefix (4 bytes of `MAGIC` plus 2 version bytes).
pub const MAGIC_FIELD_LEN: usize = 6;
/// Number of fields in the fixed header vector that follows the magic.
pub const HEADER_FIELD_COUNT: usize = 15;
/// Byte width of each header field, in field order. Matches the on-disk
/// `QQLLHQQQ5LQL` layout: two 64-bit, two 32-bit, one 16-bit, three 64-bit,
/// five 32-bit, one 64-bit, one 32-bit.
pub const HEADER_FIELD_WIDTHS: [u8; HEADER_FIELD_COUNT] =
    [8, 8, 4, 4, 2, 8, 8, 8, 4, 4, 4, 4, 4, 8, 4];
/// Header field indices holding the six section offsets, in storage order
/// of the logical offset slots (not file storage order).
pub const OFFSET_FIELD_INDICES: [usize; 6] = [0, 1, 5, 6, 7, 13];
/// Header field indices holding the six section checksums.
pub const CHECKSUM_FIELD_INDICES: [usize; 6] = [8, 9, 10, 11, 12, 14];

// ── Section prefix ──
/// Section is stored as-is.
pub const COMPRESSION_NONE: u8 = 0;
/// Section payload is raw-deflate compressed (window bits 15).
pub const COMPRESSION_DEFLATE: u8 = 2;
/// Byte length of the `(compression_flag, payload_length)` prefix.
pub const SECTION_PREFIX_LEN: usize = 9;

// ── ID0 preamble ──
/// Size of the control block preceding the blank page.
pub const ID0_CONTROL_BLOCK_LEN: usize = 64;
/// Offset, within the control block, of the `"B-tree v2"` marker.
pub const BTREE_MARKER_OFFSET: usize = 19;
/// The marker every B-tree v2 control block must carry.
pub const BTREE_MARKER: &[u8] = b"B-tree v2";

// ── Page layout ──
/// `preceding_page:u32, entry_count:u16`.
pub const PAGE_HEADER_LEN: usize = 6;
/// Both index and leaf slots are 6 bytes wide.
pub const SLOT_LEN: usize = 6;
/// `unused:u32, data_start:u16`.
pub const PAGE_TRAILER_LEN: usize = 6;
/// `preceding_page == 0` marks a leaf page.
pub const LEAF_PRECEDING_PAGE: u32 = 0;
/// Traversal depth beyond which the tree is considered corrupt.
pub const MAX_TREE_DEPTH: usize = 256;

// ── Directory key schema ──
/// Prefix byte of a name→node_id mapping key.
pub const NAME_KEY_PREFIX: u8 = b'N';
/// Prefix byte of a `.`-addressed per-node record key.
pub const NODE_KEY_PREFIX: u8 = b'.';
/// Tag byte for the directory-tree overview record.
pub const DIR_OVERVIEW_TAG: u8 = b'B';
/// Tag byte for a per-directory record.
pub const DIR_RECORD_TAG: u8 = b'S';
/// Name key for the root of the directory tree.
pub const DIR_TREE_ROOT_NAME: &str = "$ dirtree/funcs";
/// Spacing between consecutive directory ids in the index space.
pub const DIR_RECORD_STRIDE: u64 = 0x10000;
/// Length of a `.`-addressed key: tag(1) + node_id(8) + tag(1) + index(8).
pub const NODE_KEY_LEN: usize = 1 + 8 + 1 + 8;
