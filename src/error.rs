// Copyright 2023 Mikael Lund
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! Error type shared by the whole crate.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while setting up or driving a constant-potential run.
///
/// Only [`Error::InvariantViolation`] is fatal by construction; the remaining
/// variants surface configuration, file and collaborator failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Electrode membership does not match the configured atom count,
    /// or a sheet is empty.
    #[error("electrode invariant violated: {0}")]
    InvariantViolation(String),

    /// A run parameter failed validation.
    #[error("invalid configuration for `{field}`: {detail}")]
    Config {
        /// Offending field, dotted path into the TOML layout.
        field: &'static str,
        /// What is wrong with it.
        detail: String,
    },

    /// The configuration file is not valid TOML for [`crate::RunConfig`].
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O failure, with the path when one is known.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// File being read or written.
        path: Option<PathBuf>,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed line in a system file or profile table.
    #[error("parse error at line {line}: {detail}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        detail: String,
    },

    /// Atom index outside the range known to the engine.
    #[error("atom index {index} out of range for {len} atoms")]
    UnknownAtom {
        /// Requested index.
        index: usize,
        /// Number of atoms available.
        len: usize,
    },

    /// The physics collaborator failed or returned inconsistent data.
    #[error("engine error: {0}")]
    Engine(String),

    /// The charge solver did not reach tolerance and the run policy is to abort.
    #[error(
        "charge solve did not converge in macro-iteration {iteration}: deviation {deviation:.3e} after {iterations_used} steps"
    )]
    NonConvergence {
        /// Macro-iteration index (one-based).
        iteration: usize,
        /// Solver steps spent.
        iterations_used: usize,
        /// Last mean absolute charge deviation.
        deviation: f64,
    },
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { path: None, source }
    }
}

impl Error {
    /// Creates a [`Config`](Error::Config) error.
    pub fn config(field: &'static str, detail: impl Into<String>) -> Self {
        Self::Config {
            field,
            detail: detail.into(),
        }
    }

    /// Creates an [`Io`](Error::Io) error tagged with the file involved.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Creates a [`Parse`](Error::Parse) error.
    pub fn parse(line: usize, detail: impl Into<String>) -> Self {
        Self::Parse {
            line,
            detail: detail.into(),
        }
    }
}
