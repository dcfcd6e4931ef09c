//! `--move <id> <new_parent>`: reparent a directory node.

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::cli::wprintln;
use crate::core::session::Session;
use crate::I64Error;

/// Options for `--move`.
pub struct Options {
    pub id: u64,
    pub new_parent: u64,
    /// Emit output as JSON.
    pub json: bool,
}

#[derive(Serialize)]
struct MoveReport {
    id: u64,
    new_parent: u64,
}

pub fn execute(opts: &Options, session: &mut Session, writer: &mut dyn Write) -> Result<(), I64Error> {
    session.move_dir(opts.id, opts.new_parent)?;

    if opts.json {
        let report = MoveReport {
            id: opts.id,
            new_parent: opts.new_parent,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| I64Error::Argument(format!("JSON serialization error: {e}")))?;
        wprintln!(writer, "{}", json)?;
    } else {
        wprintln!(
            writer,
            "{}",
            format!("moved {} -> parent {}", opts.id, opts.new_parent).green()
        )?;
    }

    Ok(())
}
