//! Ties `IdbContainer`, `Id0Section`, and `DirTree` into one open/commit unit.
//!
//! A session is the entire lifetime of one edit: open the file, run any
//! number of directory-tree operations, then commit. Commit follows the
//! ordering in `SPEC_FULL.md` §4.9: `Id0Section` recomputes its bytes in
//! memory only, `IdbContainer` relocates every section after `ID0` using
//! their still-intact old bytes, and only then is `ID0`'s new payload
//! written at its own unchanged offset, followed by the header rewrite.

use std::path::{Path, PathBuf};

use crate::core::container::IdbContainer;
use crate::core::dirtree::DirTree;
use crate::core::id0::Id0Section;
use crate::I64Error;

pub struct Session {
    path: PathBuf,
    container: IdbContainer,
    id0: Id0Section,
    dirtree: DirTree,
}

impl Session {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, I64Error> {
        let path = path.as_ref().to_path_buf();
        let container = IdbContainer::open(&path)?;
        let mut id0 = Id0Section::open(&container)?;
        let dirtree = DirTree::open(&mut id0)?;
        Ok(Session {
            path,
            container,
            id0,
            dirtree,
        })
    }

    pub fn dirtree(&self) -> &DirTree {
        &self.dirtree
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<bool, I64Error> {
        self.dirtree.rename(&mut self.id0, from, to)
    }

    pub fn move_dir(&mut self, id: u64, new_parent: u64) -> Result<(), I64Error> {
        self.dirtree.move_dir(&mut self.id0, id, new_parent)
    }

    pub fn insert_dir(&mut self, id: u64, new_parent: u64) -> Result<(), I64Error> {
        self.dirtree.insert(&mut self.id0, id, new_parent)
    }

    /// Recompress `ID0`, relocate trailing sections, rewrite the header, and
    /// write the whole file back to its original path.
    pub fn commit(&mut self) -> Result<(), I64Error> {
        let size_delta = self.id0.recompute()?;
        self.container.relocate_following_sections(size_delta)?;
        let (flag, payload) = self
            .id0
            .pending_write()
            .expect("recompute always leaves a pending write");
        self.container.write_id0_section(flag, &payload)?;
        self.container.rewrite_header()?;
        self.container.save(&self.path)
    }
}
