//! `--copyfrom <path>`: copy a source file onto the target before opening it,
//! so edits can be made non-destructively against a fresh copy.

use std::fs;
use std::path::Path;

use crate::I64Error;

pub fn execute(source: &str, target: &str) -> Result<(), I64Error> {
    let src = Path::new(source);
    if !src.exists() {
        return Err(I64Error::Argument(format!("copyfrom source not found: {source}")));
    }
    fs::copy(src, target)
        .map_err(|e| I64Error::Io(format!("cannot copy {source} to {target}: {e}")))?;
    Ok(())
}
