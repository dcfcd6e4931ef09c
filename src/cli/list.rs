//! `--list`: print every directory node with its name, parent, and subdirs.

use std::io::Write;

use serde::Serialize;

use crate::cli::wprintln;
use crate::core::dirtree::DirTree;
use crate::I64Error;

/// Options for `--list`.
pub struct Options {
    /// Emit output as JSON.
    pub json: bool,
}

#[derive(Serialize)]
struct ListReport {
    dir_count: u32,
    dirs: Vec<DirEntry>,
}

#[derive(Serialize)]
struct DirEntry {
    id: u64,
    name: String,
    parent: u64,
    subdirs: Vec<u64>,
}

pub fn execute(opts: &Options, tree: &DirTree, writer: &mut dyn Write) -> Result<(), I64Error> {
    if opts.json {
        let report = ListReport {
            dir_count: tree.dir_count(),
            dirs: tree
                .dirs()
                .map(|d| DirEntry {
                    id: d.id,
                    name: d.name.clone(),
                    parent: d.parent,
                    subdirs: d.subdirs.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| I64Error::Argument(format!("JSON serialization error: {e}")))?;
        wprintln!(writer, "{}", json)?;
    } else {
        for dir in tree.dirs() {
            let mut line = format!("dir {} = {}", dir.id, dir.name);
            if dir.id != 0 {
                line.push_str(&format!(" parent {}", dir.parent));
            }
            if !dir.subdirs.is_empty() {
                line.push_str(&format!(" subdirs: {:?}", dir.subdirs));
            }
            wprintln!(writer, "{}", line)?;
        }
    }
    Ok(())
}
