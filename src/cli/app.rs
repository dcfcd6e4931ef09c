use clap::{Parser, ValueEnum};

/// In-place structural editor for `.i64` directory trees.
#[derive(Parser)]
#[command(name = "i64ed")]
#[command(about = "Edit the function directory tree in a .i64 database")]
#[command(version)]
pub struct Cli {
    /// The database file to modify in place.
    pub target: String,

    /// Copy this file onto `target` before opening it.
    #[arg(long)]
    pub copyfrom: Option<String>,

    /// Print every directory node.
    #[arg(long)]
    pub list: bool,

    /// Verify parent/subdir reciprocity across the tree.
    #[arg(long)]
    pub check: bool,

    /// Replace every occurrence of `from` with `to` in directory names.
    #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
    pub rename: Option<Vec<String>>,

    /// Move directory `id` to be a child of `new_parent`.
    #[arg(long, num_args = 2, value_names = ["ID", "NEW_PARENT"])]
    pub r#move: Option<Vec<u64>>,

    /// Insert a new empty directory `id` as a child of `new_parent`.
    #[arg(long, num_args = 2, value_names = ["ID", "NEW_PARENT"])]
    pub insert: Option<Vec<u64>>,

    /// Control colored output.
    #[arg(long, default_value = "auto")]
    pub color: ColorMode,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,

    /// Write output to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}
