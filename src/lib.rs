//! `.i64` directory-tree editor.
//!
//! The `i64dir` crate (binary name `i64ed`) performs in-place structural
//! edits on a proprietary disassembler database file (extension `.i64`).
//! The file is a container of named sections; the first section (`ID0`)
//! holds a persistent B-tree v2 that stores a flat key/value namespace.
//! Inside this namespace a hierarchical "function directory" tree is
//! encoded as a set of blob records. This crate lists, validates, renames,
//! moves, and inserts directory nodes in that tree while preserving the
//! byte-exact layout expected by the host application on reopen.
//!
//! # CLI Reference
//!
//! ```text
//! i64ed <target> [--copyfrom <path>] [--list] [--check]
//!       [--rename <from> <to>] [--move <id> <new_parent>]
//!       [--insert <id> <new_parent>]
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`core::varint`] | Proprietary variable-length integer codec |
//! | [`core::paged_bytes`] | Bounds-checked mutable byte buffer |
//! | [`core::page`] | B-tree v2 page parsing, lookup, in-place modify/insert |
//! | [`core::edit_buffer`] | Tracks pages mutated in a session |
//! | [`core::tree`] | B-tree traversal, cursors, blob reassembly |
//! | [`core::id0`] | The `ID0` section: decompress/recompress, page store |
//! | [`core::container`] | Outer file header and section relocation |
//! | [`core::dirtree`] | Directory-tree domain layer: list/check/rename/move/insert |
//! | [`core::session`] | Ties the above together into one open/commit session |
//!
//! ## Quick example
//!
//! ```no_run
//! use i64dir::core::session::Session;
//!
//! let mut session = Session::open("project.i64").unwrap();
//! for dir in session.dirtree().dirs() {
//!     println!("{}", dir.name);
//! }
//! ```

pub mod cli;
pub mod core;

use thiserror::Error;

/// Errors returned by `i64dir` operations.
#[derive(Error, Debug)]
pub enum I64Error {
    /// An I/O error occurred (file open, read, seek, or write failure).
    #[error("I/O error: {0}")]
    Io(String),

    /// The file does not begin with the `IDA2` magic.
    #[error("bad magic: expected file to start with \"IDA2\"")]
    BadMagic,

    /// The `ID0` control block does not carry the `"B-tree v2"` marker.
    #[error("unknown B-tree format marker")]
    UnknownBTreeFormat,

    /// A section's compression flag is neither 0 (none) nor 2 (deflate).
    #[error("unsupported section compression flag {0}")]
    UnsupportedCompression(u8),

    /// A read ran past the end of a buffer.
    #[error("read past end of buffer at offset {offset} (wanted {len} bytes)")]
    ReadOverrun { offset: usize, len: usize },

    /// A write ran past the end of a buffer.
    #[error("write past end of buffer at offset {offset} (wanted {len} bytes)")]
    WriteOverrun { offset: usize, len: usize },

    /// The B-tree's structural invariants were violated during traversal.
    #[error("tree corrupt: {0}")]
    TreeCorrupt(String),

    /// A page has no room to host an edit (no split support).
    #[error("page {page} has no room for this edit ({needed} bytes needed, {free} free)")]
    PageFull { page: u32, needed: usize, free: usize },

    /// A directory record spans more than one B-tree record, which the
    /// rename/insert operations that rewrite a record in place cannot handle.
    #[error("directory record for id {0} spans more than one B-tree record")]
    MultiRecordBlobUnsupported(u64),

    /// `N$ dirtree/funcs` was not found in the B-tree namespace.
    #[error("no directory tree (\"N$ dirtree/funcs\" not found)")]
    NoDirectoryTree,

    /// A directory record failed to parse.
    #[error("directory record parse error at id {id}: {reason}")]
    DirParseError { id: u64, reason: String },

    /// `--insert` was asked to create a directory id that already exists.
    #[error("directory {0} already exists")]
    DuplicateDirectory(u64),

    /// `--insert` found no existing sibling with a smaller id to insert after.
    #[error("no directory with id less than {0} to insert after")]
    NoLeftSibling(u64),

    /// A consistency violation that blocks an edit (rather than merely
    /// being reported, as `--check` does for non-fatal inconsistencies).
    #[error("tree inconsistent: {0}")]
    InconsistentTree(String),

    /// An invalid CLI argument or operation precondition.
    #[error("invalid argument: {0}")]
    Argument(String),
}
