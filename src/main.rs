#![allow(dead_code)]
/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */
mod libdelve;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Parser, Subcommand};

use libdelve::blockdev::FileBlockDevice;
use libdelve::cursor::Cursor;
use libdelve::error::{Error, Result};
use libdelve::model::{Handler, Model, Registry, UnknownBlob};
use libdelve::source::{BlockSource, SourceRef};

const COPY_CHUNK: usize = 4096;

#[derive(Parser)]
#[command(version, about = "Read-only explorer for nested disk images and filesystems")]
struct Cli {
    /// Disk image, container, or filesystem to open
    image: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the children of a node
    List {
        /// Slash-separated chain of child names to descend first
        path: Option<String>,
    },
    /// Report every format whose magic accepts a node
    Scan { path: Option<String> },
    /// Render a node's decoded metadata
    Info { path: Option<String> },
    /// Copy a node's bytes to stdout or a file
    Copy {
        path: Option<String>,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn open_image(path: &PathBuf) -> Result<SourceRef> {
    let device = FileBlockDevice::open(path)?;
    Ok(Rc::new(BlockSource::new(
        path.display().to_string(),
        Rc::new(device),
    )))
}

/// Recognise a sourceable handler's bytes until something listable (or
/// nothing recognisable) comes up.
fn surface(registry: &Registry, mut handler: Handler) -> Result<Handler> {
    while handler.is_sourceable() {
        let source = handler.source()?;
        match registry.first_match(&source) {
            Some(format) => handler = format.instantiate(source)?,
            None => break,
        }
    }
    Ok(handler)
}

/// Descend a slash-separated path, recognising between steps.
fn descend(registry: &Registry, mut handler: Handler, path: Option<&str>) -> Result<Handler> {
    let Some(path) = path else {
        return Ok(handler);
    };
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        handler = surface(registry, handler)?;
        if !handler.is_listable() {
            return Err(Error::InvalidArgument(format!(
                "nothing recognisable to descend into at {segment:?}"
            )));
        }
        handler = handler.select(segment)?.ok_or_else(|| {
            Error::InvalidArgument(format!("no child named {segment:?}"))
        })?;
    }
    Ok(handler)
}

fn run(cli: &Cli) -> Result<()> {
    let registry = Registry::builtin();
    let root: Handler = UnknownBlob::new(open_image(&cli.image)?).into();

    match &cli.command {
        Command::List { path } => {
            let handler = surface(&registry, descend(&registry, root, path.as_deref())?)?;
            if !handler.is_listable() {
                return Err(Error::InvalidArgument(format!(
                    "{} is not listable",
                    handler.name()
                )));
            }
            for child in handler.list()? {
                println!("{}\t{}", child.name, child.hint);
            }
        }
        Command::Scan { path } => {
            let handler = descend(&registry, root, path.as_deref())?;
            let source = handler.source()?;
            let mut any = false;
            for format in registry.formats() {
                if format.probe(&source) {
                    any = true;
                    println!("== {}", format.name());
                } else {
                    println!("!= {}", format.name());
                }
            }
            if !any {
                println!("# no matching formats");
            }
        }
        Command::Info { path } => {
            let handler = descend(&registry, root, path.as_deref())?;
            println!("# {}", handler.name());
            println!("{}", handler.describe());
        }
        Command::Copy { path, output } => {
            let handler = descend(&registry, root, path.as_deref())?;
            let source = handler.source()?;
            let mut cursor = Cursor::new(source);

            let stdout = std::io::stdout();
            let mut sink: Box<dyn Write> = match output {
                Some(path) => Box::new(File::create(path)?),
                None => Box::new(stdout.lock()),
            };
            loop {
                let chunk = cursor.read(COPY_CHUNK)?;
                if chunk.is_empty() {
                    break;
                }
                sink.write_all(&chunk)?;
            }
            sink.flush()?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("delve: {e}");
            ExitCode::FAILURE
        }
    }
}
