//! The `.i64` editing engine: container, section, B-tree, and directory-tree layers.
//!
//! Leaf to root: [`varint`] and [`paged_bytes`] are the bottom-level codecs;
//! [`page`] parses one fixed-size B-tree page; [`edit_buffer`] tracks pages
//! mutated in a session; [`tree`] traverses pages and assembles blobs;
//! [`id0`] owns the `ID0` section's decompressed byte buffer; [`container`]
//! owns the outer file and relocates sections on commit; [`dirtree`] is the
//! domain layer that resolves directory records from `Tree` blobs and
//! schedules their rewrites; [`session`] wires all of the above into one
//! open/commit unit.

pub mod constants;
pub mod container;
pub mod dirtree;
pub mod edit_buffer;
pub mod id0;
pub mod page;
pub mod paged_bytes;
pub mod session;
pub mod tree;
pub mod varint;
