//! `--rename <from> <to>`: substring-replace a name across every directory.

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use crate::cli::wprintln;
use crate::core::session::Session;
use crate::I64Error;

/// Options for `--rename`.
pub struct Options {
    pub from: String,
    pub to: String,
    /// Emit output as JSON.
    pub json: bool,
}

#[derive(Serialize)]
struct RenameReport {
    from: String,
    to: String,
    changed: bool,
}

pub fn execute(opts: &Options, session: &mut Session, writer: &mut dyn Write) -> Result<(), I64Error> {
    let changed = session.rename(&opts.from, &opts.to)?;

    if opts.json {
        let report = RenameReport {
            from: opts.from.clone(),
            to: opts.to.clone(),
            changed,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| I64Error::Argument(format!("JSON serialization error: {e}")))?;
        wprintln!(writer, "{}", json)?;
    } else if changed {
        wprintln!(writer, "{}", format!("renamed {} -> {}", opts.from, opts.to).green())?;
    } else {
        wprintln!(writer, "no directory name contained {}", opts.from)?;
    }

    Ok(())
}
