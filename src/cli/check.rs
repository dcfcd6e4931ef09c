//! `--check`: verify parent/subdir reciprocity across the directory tree.
//!
//! Inconsistencies are reported, not raised as errors: the caller is
//! expected to set the process exit code to 1 when [`execute`] returns a
//! non-empty problem list.

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::cli::wprintln;
use crate::core::dirtree::DirTree;
use crate::I64Error;

/// Options for `--check`.
pub struct Options {
    /// Emit output as JSON.
    pub json: bool,
}

#[derive(Serialize)]
struct CheckReport {
    ok: bool,
    problems: Vec<String>,
}

/// Run the consistency check and print its findings. Returns the list of
/// problems found (empty means the tree is consistent).
pub fn execute(opts: &Options, tree: &DirTree, writer: &mut dyn Write) -> Result<Vec<String>, I64Error> {
    let problems = tree.check();

    if opts.json {
        let report = CheckReport {
            ok: problems.is_empty(),
            problems: problems.clone(),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| I64Error::Argument(format!("JSON serialization error: {e}")))?;
        wprintln!(writer, "{}", json)?;
    } else {
        for problem in &problems {
            wprintln!(writer, "{}", problem)?;
        }
        if problems.is_empty() {
            wprintln!(writer, "{}", "check complete".green())?;
        } else {
            wprintln!(writer, "check complete")?;
        }
    }

    Ok(problems)
}
