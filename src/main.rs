#[cfg(not(feature = "cli"))]
compile_error!("The `i64ed` binary requires the `cli` feature. Build with `--features cli`.");

use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::process;

use i64dir::cli;
use i64dir::cli::app::{Cli, ColorMode};
use i64dir::core::session::Session;
use i64dir::I64Error;

fn main() {
    let cli = Cli::parse();

    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {} // colored auto-detects tty
    }

    let writer_result: Result<Box<dyn Write>, I64Error> = match &cli.output {
        Some(path) => File::create(path)
            .map(|f| Box::new(f) as Box<dyn Write>)
            .map_err(|e| I64Error::Io(format!("cannot create {}: {}", path, e))),
        None => Ok(Box::new(std::io::stdout()) as Box<dyn Write>),
    };

    let mut writer = match writer_result {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli, &mut writer) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli, writer: &mut Box<dyn Write>) -> Result<(), I64Error> {
    if let Some(source) = &cli.copyfrom {
        cli::copyfrom::execute(source, &cli.target)?;
    }

    let mut session = Session::open(&cli.target)?;
    let mut mutated = false;
    let mut inconsistent = false;

    if cli.list {
        cli::list::execute(&cli::list::Options { json: cli.json }, session.dirtree(), writer.as_mut())?;
    }

    if cli.check {
        let problems = cli::check::execute(&cli::check::Options { json: cli.json }, session.dirtree(), writer.as_mut())?;
        inconsistent = !problems.is_empty();
    }

    if let Some(args) = &cli.rename {
        let opts = cli::rename::Options {
            from: args[0].clone(),
            to: args[1].clone(),
            json: cli.json,
        };
        cli::rename::execute(&opts, &mut session, writer.as_mut())?;
        mutated = true;
    }

    if let Some(args) = &cli.r#move {
        let opts = cli::move_dir::Options {
            id: args[0],
            new_parent: args[1],
            json: cli.json,
        };
        cli::move_dir::execute(&opts, &mut session, writer.as_mut())?;
        mutated = true;
    }

    if let Some(args) = &cli.insert {
        let opts = cli::insert::Options {
            id: args[0],
            new_parent: args[1],
            json: cli.json,
        };
        cli::insert::execute(&opts, &mut session, writer.as_mut())?;
        mutated = true;
    }

    if mutated {
        session.commit()?;
    }

    if inconsistent {
        process::exit(1);
    }

    Ok(())
}
