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

use clap::{ArgAction, Parser};
use conpot::RunConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "conpot")]
#[command(about = "Constant-potential electrode charge driver", long_about = None)]
pub struct Cli {
    /// System file with topology and one or more frames
    #[arg(value_name = "SYSTEM")]
    pub system: PathBuf,

    /// Run configuration (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// MD steps per macro-iteration
    #[arg(long)]
    pub nstep: Option<usize>,

    /// Applied voltage (V)
    #[arg(long)]
    pub volt: Option<f64>,

    /// Simulated time (ns)
    #[arg(long)]
    pub nsec: Option<f64>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// More log output; repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Applies command line overrides on top of `config`.
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(nstep) = self.nstep {
            config.steps_per_iteration = nstep;
        }
        if let Some(volt) = self.volt {
            config.voltage = volt;
        }
        if let Some(nsec) = self.nsec {
            config.simulated_ns = nsec;
        }
        if let Some(output) = &self.output {
            config.output.directory = Some(output.clone());
        }
    }
}
