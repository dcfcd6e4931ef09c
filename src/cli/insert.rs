//! `--insert <id> <new_parent>`: create a new empty directory node.

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::cli::wprintln;
use crate::core::session::Session;
use crate::I64Error;

/// Options for `--insert`.
pub struct Options {
    pub id: u64,
    pub new_parent: u64,
    /// Emit output as JSON.
    pub json: bool,
}

#[derive(Serialize)]
struct InsertReport {
    id: u64,
    new_parent: u64,
    name: String,
}

pub fn execute(opts: &Options, session: &mut Session, writer: &mut dyn Write) -> Result<(), I64Error> {
    session.insert_dir(opts.id, opts.new_parent)?;
    let name = format!("newfolder_{}", opts.id);

    if opts.json {
        let report = InsertReport {
            id: opts.id,
            new_parent: opts.new_parent,
            name,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| I64Error::Argument(format!("JSON serialization error: {e}")))?;
        wprintln!(writer, "{}", json)?;
    } else {
        wprintln!(
            writer,
            "{}",
            format!("inserted {} ({}) -> parent {}", opts.id, name, opts.new_parent).green()
        )?;
    }

    Ok(())
}
