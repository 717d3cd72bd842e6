//! Errors raised while assembling a process manager.
//!
//! Everything here is fatal before the first child is spawned. Failures that
//! happen once processes are running are rendered as output lines instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A configuration problem that prevents the supervisor from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No command lines were supplied.
    #[error("no commands given")]
    NoCommands,

    /// The working directory could not be resolved.
    #[error("could not resolve directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The working directory exists but is not a directory.
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// `package.json` was needed for an `npm:` alias but could not be read.
    #[error("reading package.json: {0}")]
    ReadPackageJson(#[source] io::Error),

    /// `package.json` is not valid JSON.
    #[error("parsing package.json: {0}")]
    ParsePackageJson(#[source] serde_json::Error),

    /// One or more exact `npm:` aliases have no matching script.
    #[error("no npm {} named {:?} found in package.json", noun(.0.len()), .0.join(","))]
    MissingScripts(Vec<String>),

    /// A wildcard `npm:` alias matched nothing.
    #[error("no npm scripts matching {0:?} found in package.json")]
    NoMatchingScripts(String),
}

fn noun(count: usize) -> &'static str {
    if count == 1 {
        "script"
    } else {
        "scripts"
    }
}
