//! The directory-tree domain layer: resolves the `"$ dirtree/funcs"` root
//! node, loads the overview and every directory record, and implements
//! list/check/rename/move/insert as sequences of `Tree` edits scheduled
//! through `Id0Section`.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::core::constants::*;
use crate::core::id0::Id0Section;
use crate::core::page::{name_key, node_record_key};
use crate::core::tree::FindRequest;
use crate::core::varint::{decode_vi64, decode_vu32, decode_vu64, encode_vi64, encode_vu32, encode_vu64};
use crate::I64Error;

/// One directory node: name, parent, and the ids of its subdirectories and
/// functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDir {
    pub id: u64,
    pub name: String,
    pub parent: u64,
    pub unknown: u32,
    pub subdirs: Vec<u64>,
    pub funcs: Vec<u64>,
}

/// The directory-tree overview: the lowest populated id, the total count of
/// directories, and an opaque sort-order payload carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Overview {
    first_dir: u32,
    dir_count: u32,
    sort_info: Vec<u8>,
}

fn parse_overview(data: &[u8]) -> Result<Overview, I64Error> {
    let mut pos = 0;
    let first_dir = decode_vu32(data, &mut pos)?;
    let dir_count = decode_vu32(data, &mut pos)?;
    let sort_info = data[pos..].to_vec();
    Ok(Overview {
        first_dir,
        dir_count,
        sort_info,
    })
}

fn pack_overview(o: &Overview) -> Vec<u8> {
    let mut out = Vec::new();
    encode_vu32(o.first_dir, &mut out);
    encode_vu32(o.dir_count, &mut out);
    out.extend_from_slice(&o.sort_info);
    out
}

/// Decode a delta-compressed id list of `count` entries: the first as an
/// unsigned varint, every subsequent one as a signed varint relative to the
/// previous entry.
fn decode_delta_ids(data: &[u8], pos: &mut usize, count: u32) -> Result<Vec<u64>, I64Error> {
    let mut ids = Vec::with_capacity(count as usize);
    for i in 0..count {
        if i == 0 {
            ids.push(decode_vu64(data, pos)?);
        } else {
            let delta = decode_vi64(data, pos)?;
            let prev = *ids.last().unwrap() as i64;
            ids.push((prev + delta) as u64);
        }
    }
    Ok(ids)
}

fn encode_delta_ids(ids: &[u64], out: &mut Vec<u8>) {
    encode_vu32(ids.len() as u32, out);
    if let Some(&first) = ids.first() {
        encode_vu64(first, out);
        let mut prev = first as i64;
        for &id in &ids[1..] {
            encode_vi64(id as i64 - prev, out);
            prev = id as i64;
        }
    }
}

fn parse_dir_record(id: u64, data: &[u8]) -> Result<FuncDir, I64Error> {
    if data.first() != Some(&0) {
        return Err(I64Error::DirParseError {
            id,
            reason: "record does not start with a NUL".into(),
        });
    }
    let terminator = data[1..].iter().position(|&b| b == 0).ok_or_else(|| I64Error::DirParseError {
        id,
        reason: "unterminated name".into(),
    })?;
    let name = std::str::from_utf8(&data[1..1 + terminator])
        .map_err(|e| I64Error::DirParseError {
            id,
            reason: format!("invalid UTF-8 name: {e}"),
        })?
        .to_string();

    let mut pos = 1 + terminator + 1;
    let parent = decode_vu64(data, &mut pos)?;
    let unknown = decode_vu32(data, &mut pos)?;
    let subdir_count = decode_vu32(data, &mut pos)?;
    let subdirs = decode_delta_ids(data, &mut pos, subdir_count)?;
    let func_count = decode_vu32(data, &mut pos)?;
    let funcs = decode_delta_ids(data, &mut pos, func_count)?;

    if pos != data.len() {
        return Err(I64Error::DirParseError {
            id,
            reason: format!("{} trailing bytes after record", data.len() - pos),
        });
    }

    Ok(FuncDir {
        id,
        name,
        parent,
        unknown,
        subdirs,
        funcs,
    })
}

fn pack_dir_record(d: &FuncDir) -> Vec<u8> {
    let mut out = Vec::with_capacity(d.name.len() + 16);
    out.push(0);
    out.extend_from_slice(d.name.as_bytes());
    out.push(0);
    encode_vu64(d.parent, &mut out);
    encode_vu32(d.unknown, &mut out);
    encode_delta_ids(&d.subdirs, &mut out);
    encode_delta_ids(&d.funcs, &mut out);
    out
}

/// The parsed directory tree, plus enough bookkeeping to rewrite exactly the
/// B-tree records an edit touches.
pub struct DirTree {
    root_node: u64,
    overview: Overview,
    overview_affected: Vec<(u32, usize)>,
    dirs: BTreeMap<u64, FuncDir>,
    /// `(page, slot)` of the single record each directory id was parsed
    /// from. `insert` relies on new records always landing at the tail of a
    /// page's used slots (see `Page::insert`'s doc comment), so an insertion
    /// never invalidates another directory's recorded slot index.
    dir_affected: BTreeMap<u64, Vec<(u32, usize)>>,
}

impl DirTree {
    /// Resolve the `"$ dirtree/funcs"` root node and load the overview and
    /// every directory record reachable from it.
    pub fn open(id0: &mut Id0Section) -> Result<Self, I64Error> {
        let root_key = name_key(DIR_TREE_ROOT_NAME);
        let cursor = id0.find(FindRequest::Eq, &root_key)?.ok_or(I64Error::NoDirectoryTree)?;
        let val = id0.cursor_val(&cursor)?;
        if val.len() < 8 {
            return Err(I64Error::NoDirectoryTree);
        }
        let root_node = LittleEndian::read_u64(&val[0..8]);

        let (overview_bytes, overview_affected) = id0.blob(root_node, DIR_OVERVIEW_TAG, 0, 0xFFFF)?;
        let overview = parse_overview(&overview_bytes)?;

        let mut dirs = BTreeMap::new();
        let mut dir_affected = BTreeMap::new();
        let mut i: u64 = 0;
        while i < overview.dir_count as u64 {
            if i > 0 && i < overview.first_dir as u64 {
                i = overview.first_dir as u64;
                continue;
            }
            let start = i * DIR_RECORD_STRIDE;
            let end = start + 0xFFFF;
            let (data, affected) = id0.blob(root_node, DIR_RECORD_TAG, start, end)?;
            if data.is_empty() {
                // Gap in the id sequence: log and move on, per the directory
                // record walk's "if empty, log and continue" rule.
                i += 1;
                continue;
            }
            let dir = parse_dir_record(i, &data)?;
            dirs.insert(i, dir);
            dir_affected.insert(i, affected);
            i += 1;
        }

        if dirs.len() as u32 > overview.dir_count {
            return Err(I64Error::InconsistentTree(format!(
                "parsed {} directories but the overview declares dir_count {}",
                dirs.len(),
                overview.dir_count
            )));
        }

        Ok(DirTree {
            root_node,
            overview,
            overview_affected,
            dirs,
            dir_affected,
        })
    }

    pub fn dirs(&self) -> impl Iterator<Item = &FuncDir> {
        self.dirs.values()
    }

    pub fn dir(&self, id: u64) -> Option<&FuncDir> {
        self.dirs.get(&id)
    }

    pub fn dir_count(&self) -> u32 {
        self.overview.dir_count
    }

    /// Verify every directory's parent/subdir links are reciprocal. Returns
    /// one message per violation found; an empty result means the tree is
    /// consistent.
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (&id, dir) in &self.dirs {
            if id != 0 {
                match self.dirs.get(&dir.parent) {
                    None => problems.push(format!(
                        "dir {id} has parent {} but {} is not in tree",
                        dir.parent, dir.parent
                    )),
                    Some(parent) => {
                        if !parent.subdirs.contains(&id) {
                            problems.push(format!(
                                "dir {id} has parent {} but {} does not list it as a subdir",
                                dir.parent, dir.parent
                            ));
                        }
                    }
                }
            }
            for &sub_id in &dir.subdirs {
                match self.dirs.get(&sub_id) {
                    None => problems.push(format!("dir {id} lists subdir {sub_id} but {sub_id} is not in tree")),
                    Some(sub) if sub.parent != id => problems.push(format!(
                        "dir {id} lists subdir {sub_id} but its parent is {}",
                        sub.parent
                    )),
                    Some(_) => {}
                }
            }
        }
        problems
    }

    fn rewrite_dir(&mut self, id0: &mut Id0Section, id: u64) -> Result<(), I64Error> {
        let affected = self
            .dir_affected
            .get(&id)
            .ok_or_else(|| I64Error::DirParseError {
                id,
                reason: "no source record to rewrite".into(),
            })?;
        if affected.len() != 1 {
            return Err(I64Error::MultiRecordBlobUnsupported(id));
        }
        let (page_idx, slot_ix) = affected[0];
        let packed = pack_dir_record(&self.dirs[&id]);
        id0.read_page_mut(page_idx)?.modify(slot_ix, packed)?;
        Ok(())
    }

    fn rewrite_overview(&mut self, id0: &mut Id0Section) -> Result<(), I64Error> {
        if self.overview_affected.len() != 1 {
            return Err(I64Error::MultiRecordBlobUnsupported(self.root_node));
        }
        let (page_idx, slot_ix) = self.overview_affected[0];
        let packed = pack_overview(&self.overview);
        id0.read_page_mut(page_idx)?.modify(slot_ix, packed)?;
        Ok(())
    }

    /// Replace every occurrence of `from` with `to` in each directory's
    /// name. Returns whether anything changed.
    pub fn rename(&mut self, id0: &mut Id0Section, from: &str, to: &str) -> Result<bool, I64Error> {
        let mut changed = false;
        let ids: Vec<u64> = self.dirs.keys().copied().collect();
        for id in ids {
            let new_name = self.dirs[&id].name.replace(from, to);
            if new_name != self.dirs[&id].name {
                self.dirs.get_mut(&id).unwrap().name = new_name;
                self.rewrite_dir(id0, id)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Move directory `id` from its current parent to `new_parent`.
    pub fn move_dir(&mut self, id0: &mut Id0Section, id: u64, new_parent: u64) -> Result<(), I64Error> {
        let old_parent = self
            .dirs
            .get(&id)
            .ok_or_else(|| I64Error::DirParseError {
                id,
                reason: "directory does not exist".into(),
            })?
            .parent;
        if !self.dirs.contains_key(&new_parent) {
            return Err(I64Error::InconsistentTree(format!("new parent {new_parent} does not exist")));
        }

        if let Some(old) = self.dirs.get_mut(&old_parent) {
            old.subdirs.retain(|&s| s != id);
        }
        self.rewrite_dir(id0, old_parent)?;

        self.dirs.get_mut(&new_parent).unwrap().subdirs.push(id);
        self.rewrite_dir(id0, new_parent)?;

        self.dirs.get_mut(&id).unwrap().parent = new_parent;
        self.rewrite_dir(id0, id)?;

        Ok(())
    }

    /// Create a new, empty directory `id` under `new_parent`, inserted into
    /// the B-tree immediately after the nearest existing directory with a
    /// smaller id.
    pub fn insert(&mut self, id0: &mut Id0Section, id: u64, new_parent: u64) -> Result<(), I64Error> {
        if self.dirs.contains_key(&id) {
            return Err(I64Error::DuplicateDirectory(id));
        }
        if !self.dirs.contains_key(&new_parent) {
            return Err(I64Error::InconsistentTree(format!("new parent {new_parent} does not exist")));
        }

        let key = node_record_key(self.root_node, DIR_RECORD_TAG, id * DIR_RECORD_STRIDE);
        let predecessor = id0.find(FindRequest::Lt, &key)?.ok_or(I64Error::NoLeftSibling(id))?;
        let (page_idx, slot_ix) = predecessor.page_and_slot();

        let new_dir = FuncDir {
            id,
            name: format!("newfolder_{id}"),
            parent: new_parent,
            unknown: 0,
            subdirs: Vec::new(),
            funcs: Vec::new(),
        };
        let packed = pack_dir_record(&new_dir);
        let insert_ix = slot_ix + 1;
        id0.read_page_mut(page_idx)?.insert(insert_ix, &key, packed)?;

        self.dirs.insert(id, new_dir);
        self.dir_affected.insert(id, vec![(page_idx, insert_ix)]);

        self.dirs.get_mut(&new_parent).unwrap().subdirs.push(id);
        self.rewrite_dir(id0, new_parent)?;

        self.overview.dir_count += 1;
        self.rewrite_overview(id0)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_round_trips_through_pack_and_parse() {
        let overview = Overview {
            first_dir: 2,
            dir_count: 4,
            sort_info: vec![1, 2, 3],
        };
        let bytes = pack_overview(&overview);
        let reparsed = parse_overview(&bytes).unwrap();
        assert_eq!(reparsed, overview);
    }

    #[test]
    fn dir_record_round_trips_with_delta_compressed_lists() {
        let dir = FuncDir {
            id: 3,
            name: "CRijndael".to_string(),
            parent: 0,
            unknown: 0,
            subdirs: vec![10, 12, 11],
            funcs: vec![100, 50, 75],
        };
        let bytes = pack_dir_record(&dir);
        let reparsed = parse_dir_record(3, &bytes).unwrap();
        assert_eq!(reparsed, dir);
    }

    #[test]
    fn dir_record_rejects_trailing_bytes() {
        let dir = FuncDir {
            id: 1,
            name: "x".to_string(),
            parent: 0,
            unknown: 0,
            subdirs: vec![],
            funcs: vec![],
        };
        let mut bytes = pack_dir_record(&dir);
        bytes.push(0xAB);
        assert!(matches!(
            parse_dir_record(1, &bytes),
            Err(I64Error::DirParseError { id: 1, .. })
        ));
    }

    #[test]
    fn empty_delta_lists_round_trip() {
        let dir = FuncDir {
            id: 0,
            name: String::new(),
            parent: 0,
            unknown: 7,
            subdirs: vec![],
            funcs: vec![],
        };
        let bytes = pack_dir_record(&dir);
        assert_eq!(parse_dir_record(0, &bytes).unwrap(), dir);
    }

    #[test]
    fn check_reports_no_problems_for_reciprocal_tree() {
        let mut dirs = BTreeMap::new();
        dirs.insert(
            0,
            FuncDir {
                id: 0,
                name: String::new(),
                parent: 0,
                unknown: 0,
                subdirs: vec![2],
                funcs: vec![],
            },
        );
        dirs.insert(
            2,
            FuncDir {
                id: 2,
                name: "A".to_string(),
                parent: 0,
                unknown: 0,
                subdirs: vec![],
                funcs: vec![],
            },
        );
        let tree = DirTree {
            root_node: 1,
            overview: Overview {
                first_dir: 2,
                dir_count: 2,
                sort_info: vec![],
            },
            overview_affected: vec![],
            dirs,
            dir_affected: BTreeMap::new(),
        };
        assert!(tree.check().is_empty());
    }

    #[test]
    fn check_flags_parent_not_in_tree() {
        let mut dirs = BTreeMap::new();
        dirs.insert(
            3,
            FuncDir {
                id: 3,
                name: "C".to_string(),
                parent: 9,
                unknown: 0,
                subdirs: vec![],
                funcs: vec![],
            },
        );
        let tree = DirTree {
            root_node: 1,
            overview: Overview {
                first_dir: 3,
                dir_count: 1,
                sort_info: vec![],
            },
            overview_affected: vec![],
            dirs,
            dir_affected: BTreeMap::new(),
        };
        let problems = tree.check();
        assert_eq!(problems, vec!["dir 3 has parent 9 but 9 is not in tree".to_string()]);
    }
}
