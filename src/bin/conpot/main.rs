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

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use conpot::engine::{CoulombEngine, FieldContext};
use conpot::io::SystemFile;
use conpot::orchestrator::SimulationGroups;
use conpot::{RunConfig, Simulation};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    cli.apply(&mut config);

    let system = SystemFile::from_file(&cli.system)
        .with_context(|| format!("reading system {}", cli.system.display()))?;
    let box_vectors = config
        .engine
        .box_override()
        .or(system.box_vectors)
        .context("no box vectors in the system file or the configuration")?;
    log::info!(
        "{} atoms, {} frame(s) from {}",
        system.topology.len(),
        system.frames.len(),
        cli.system.display()
    );

    let charges = system.topology.charges();
    let positions = system.initial_positions().to_vec();
    let field = CoulombEngine::new(
        config.engine.coulomb(),
        positions.clone(),
        charges.clone(),
        box_vectors,
    )?;
    let production = CoulombEngine::new(config.engine.coulomb(), positions, charges, box_vectors)?
        .with_frames(system.frames.iter().skip(1).cloned().collect())?;

    let groups = SimulationGroups::select(&system.topology, &config.groups);
    let mut simulation = Simulation::new(config, production, FieldContext::new(field), groups)
        .context("setting up the constant-potential run")?;
    let summary = simulation.run().context("constant-potential run failed")?;

    log::info!(
        "done: {} macro-iterations ({} not converged), Q_cathode {:.5} Q_anode {:.5} e",
        summary.macro_iterations,
        summary.nonconverged,
        summary.cathode_charge,
        summary.anode_charge
    );
    Ok(())
}
