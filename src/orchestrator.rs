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

//! # Constant-potential run
//!
//! [`Simulation`] drives a fixed number of macro-iterations. Each one
//!
//! 1. propagates the production context,
//! 2. copies its positions into the field-only context,
//! 3. re-solves the electrode charges and pushes them into both contexts,
//! 4. samples the field in the electrolyte and in the vacuum probe,
//! 5. reports the induced-charge estimate.
//!
//! At the end the per-iteration profiles are averaged and written out together
//! with the charge log.

use crate::charge_log::ChargeLog;
use crate::config::{GroupConfig, NonConvergencePolicy, RunConfig, SpeciesSelection};
use crate::engine::{Engine, FieldContext};
use crate::histogram::{
    persist, FieldProfile, HistogramSpec, ProfileAccumulator, SpatialHistogram,
};
use crate::sampler::{FieldSampler, InducedCharge, InducedChargeModel};
use crate::solver::{AppliedPotential, ConvergenceCriteria, ElectrodeChargeSolver};
use crate::state::{BoxVectors, StateFlags};
use crate::topology::{
    AtomGroup, ElectrodeAtomSet, ElectrodeRole, GroupUnion, Selection, Topology,
};
use crate::{mean, Error, Result, Vector3, FIELD_TO_CHARGE};
use log::{debug, error, info, warn};
use std::io::Write;
use std::path::Path;

/// File name of the charge log
pub const CHARGE_LOG: &str = "charges.dat";
/// Electrolyte z-field profile
pub const ELECTROLYTE_EZ: &str = "Ez_cell_hist.dat";
/// Probe x-field profile
pub const PROBE_EX: &str = "Ex_hist.dat";
/// Probe y-field profile
pub const PROBE_EY: &str = "Ey_hist.dat";
/// Probe z-field profile
pub const PROBE_EZ: &str = "Ez_hist.dat";

/// Where a [`Simulation`] is in its life cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Equilibrating,
    Initializing,
    Iterating,
    Solving,
    Sampling,
    Finalizing,
    Done,
}

/// Atom groups resolved against the topology.
#[derive(Clone, Debug)]
pub struct SimulationGroups {
    pub cathode: AtomGroup,
    pub dummy: AtomGroup,
    pub anode: AtomGroup,
    /// Field-sampled atoms of each electrolyte species
    pub cation_field: AtomGroup,
    pub anion_field: AtomGroup,
    pub solvent_field: AtomGroup,
    /// All atoms of each electrolyte species
    pub cation: AtomGroup,
    pub anion: AtomGroup,
    pub solvent: AtomGroup,
    pub probe: AtomGroup,
}

impl SimulationGroups {
    pub fn select(topology: &Topology, groups: &GroupConfig) -> Self {
        let field = |s: &SpeciesSelection| topology.select(&s.residue, &s.field_atoms);
        let all = |residue: &str| topology.select(residue, "");
        Self {
            cathode: all(&groups.cathode),
            dummy: all(&groups.dummy),
            anode: all(&groups.anode),
            cation_field: field(&groups.cation),
            anion_field: field(&groups.anion),
            solvent_field: field(&groups.solvent),
            cation: all(&groups.cation.residue),
            anion: all(&groups.anion.residue),
            solvent: all(&groups.solvent.residue),
            probe: field(&groups.probe),
        }
    }

    /// Electrode sheets checked against `expected_total`
    pub fn electrodes(&self, expected_total: usize) -> Result<ElectrodeAtomSet> {
        ElectrodeAtomSet::new(&self.cathode, &self.dummy, &self.anode, expected_total)
    }

    /// Atoms whose field is binned as the bulk electrolyte profile
    pub fn electrolyte_field(&self) -> GroupUnion<'_> {
        GroupUnion::new(vec![&self.cation_field, &self.anion_field, &self.solvent_field])
    }

    /// Atoms entering the induced-charge estimate
    pub fn electrolyte(&self) -> GroupUnion<'_> {
        GroupUnion::new(vec![&self.cation, &self.anion, &self.solvent])
    }
}

/// Cell geometry measured from the initial state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    /// Distance between the mean cathode and anode planes (nm)
    pub cell_distance: f64,
    /// Box length along z minus the cell distance (nm)
    pub vacuum_gap: f64,
    /// Cross-section area per atom of one sheet (nm²)
    pub area_per_atom: f64,
}

impl Geometry {
    pub fn measure(
        electrodes: &ElectrodeAtomSet,
        positions: &[Vector3],
        box_vectors: &BoxVectors,
    ) -> Result<Self> {
        let plane = |atoms: &[usize]| -> Result<f64> {
            let z = atoms
                .iter()
                .map(|&index| {
                    positions.get(index).map(|r| r.z).ok_or(Error::UnknownAtom {
                        index,
                        len: positions.len(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            mean(&z).ok_or_else(|| Error::InvariantViolation("empty electrode sheet".into()))
        };
        let cell_distance = (plane(electrodes.cathode())? - plane(electrodes.anode())?).abs();
        if !(cell_distance > 0.0) {
            return Err(Error::InvariantViolation(
                "cathode and anode sheets coincide".into(),
            ));
        }
        Ok(Self {
            cell_distance,
            vacuum_gap: box_vectors.z_length() - cell_distance,
            area_per_atom: box_vectors.cross_section_area() / (electrodes.len() as f64 / 2.0),
        })
    }
}

/// Outcome of a completed run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub macro_iterations: usize,
    /// Macro-iterations whose solve stopped short of tolerance
    pub nonconverged: usize,
    pub geometry: Geometry,
    /// Total cathode charge after the last solve (e)
    pub cathode_charge: f64,
    /// Total anode charge after the last solve (e)
    pub anode_charge: f64,
    /// Estimate from the last macro-iteration
    pub induced: Option<InducedCharge>,
    pub electrolyte_ez: FieldProfile,
    pub probe_ex: FieldProfile,
    pub probe_ey: FieldProfile,
    pub probe_ez: FieldProfile,
}

impl RunSummary {
    /// Final profiles with their file names
    pub fn tables(&self) -> [(&'static str, &FieldProfile); 4] {
        [
            (ELECTROLYTE_EZ, &self.electrolyte_ez),
            (PROBE_EX, &self.probe_ex),
            (PROBE_EY, &self.probe_ey),
            (PROBE_EZ, &self.probe_ez),
        ]
    }

    /// Writes the four profile tables into `directory`.
    pub fn persist(&self, directory: &Path) -> Result<()> {
        for (name, profile) in self.tables() {
            let empty = profile.empty_bins();
            if empty > 0 {
                warn!("{name}: {empty} of {} bins have no data", profile.len());
            }
            persist(profile, directory.join(name))?;
        }
        Ok(())
    }
}

/// Per-component profile lists
#[derive(Default)]
struct Profiles {
    electrolyte_ez: ProfileAccumulator,
    probe_ex: ProfileAccumulator,
    probe_ey: ProfileAccumulator,
    probe_ez: ProfileAccumulator,
}

fn energy(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |e| format!("{e:.3}"))
}

/// Constant-potential driver over a production and a field-only context.
pub struct Simulation<P, F> {
    config: RunConfig,
    production: P,
    field: FieldContext<F>,
    groups: SimulationGroups,
    electrodes: ElectrodeAtomSet,
    phase: Phase,
}

impl<P: Engine, F: Engine> Simulation<P, F> {
    /// Validates `config` and checks the electrode atom count.
    ///
    /// Fails with [`Error::InvariantViolation`] before anything is run if the
    /// electrode sheets do not add up to `config.electrode_atom_count`.
    pub fn new(
        config: RunConfig,
        production: P,
        field: FieldContext<F>,
        groups: SimulationGroups,
    ) -> Result<Self> {
        config.validate()?;
        let electrodes = groups.electrodes(config.electrode_atom_count)?;
        if production.atom_count() != field.atom_count() {
            return Err(Error::Engine(format!(
                "production context has {} atoms, field context {}",
                production.atom_count(),
                field.atom_count()
            )));
        }
        if groups.electrolyte_field().is_empty() {
            warn!("electrolyte field group is empty");
        }
        if groups.probe.is_empty() {
            warn!("probe group is empty");
        }
        Ok(Self {
            config,
            production,
            field,
            groups,
            electrodes,
            phase: Phase::Equilibrating,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn production(&self) -> &P {
        &self.production
    }

    pub fn field(&self) -> &FieldContext<F> {
        &self.field
    }

    /// Runs to completion and writes the charge log and profiles into the
    /// configured output directory.
    pub fn run(&mut self) -> Result<RunSummary> {
        let directory = self.config.output_directory();
        std::fs::create_dir_all(&directory).map_err(|e| Error::io_at(&directory, e))?;
        info!("writing output to {}", directory.display());
        let mut log = ChargeLog::create(
            directory.join(CHARGE_LOG),
            self.config.output.per_atom_charges,
        )?;
        let summary = self.run_with_log(&mut log)?;
        summary.persist(&directory)?;
        self.phase = Phase::Done;
        Ok(summary)
    }

    /// Runs every macro-iteration, logging charges to `log`, and reduces the
    /// profiles. Nothing else is written.
    pub fn run_with_log<W: Write>(&mut self, log: &mut ChargeLog<W>) -> Result<RunSummary> {
        if self.phase != Phase::Equilibrating {
            return Err(Error::Engine(format!(
                "simulation cannot restart from phase {:?}",
                self.phase
            )));
        }
        self.production.equilibrate()?;

        self.phase = Phase::Initializing;
        let config = &self.config;
        let electrode_atoms = self.electrodes.atoms().to_vec();
        self.production.exclude_pairs_within(&electrode_atoms)?;
        self.field.exclude_pairs_within(&electrode_atoms)?;
        self.production.reinitialize()?;
        self.field.reinitialize()?;

        let initial = self.production.state(StateFlags::POSITIONS)?;
        let box_vectors = self.production.box_vectors();
        let geometry = Geometry::measure(&self.electrodes, initial.positions()?, &box_vectors)?;
        info!(
            "cell distance {:.4} nm, vacuum gap {:.4} nm, area per atom {:.5} nm²",
            geometry.cell_distance, geometry.vacuum_gap, geometry.area_per_atom
        );
        let potential = AppliedPotential {
            voltage: config.voltage_kj_per_mol(),
            area_per_atom: geometry.area_per_atom,
            vacuum_gap: geometry.vacuum_gap,
            conversion: FIELD_TO_CHARGE,
        };
        let mut solver = ElectrodeChargeSolver::initialize(
            config.electrode_atom_count,
            self.electrodes.clone(),
            &potential,
            config.solver.seed_offset,
        )?;
        self.production.set_charges(&electrode_atoms, solver.charges())?;
        self.field.set_charges(&electrode_atoms, solver.charges())?;

        let criteria = ConvergenceCriteria {
            max_iterations: config.solver.max_iterations,
            tolerance: config.solver.tolerance,
            charge_cap: config.solver.charge_cap,
        };
        let spec = HistogramSpec::from(config.histogram);
        let induced_model = InducedChargeModel {
            cathode_plane: config.induced.cathode_plane,
            anode_plane: config.induced.anode_plane,
        };
        let electrolyte_field = self.groups.electrolyte_field();
        let electrolyte = self.groups.electrolyte();
        let bulk_sampler = FieldSampler::new(&electrolyte_field);
        let probe_sampler = FieldSampler::new(&self.groups.probe);

        let macro_iterations = config.macro_iterations();
        let mut profiles = Profiles::default();
        let mut nonconverged = 0;
        let mut induced = None;
        info!("running {macro_iterations} macro-iterations of {} steps", config.steps_per_iteration);

        for iteration in 1..=macro_iterations {
            self.phase = Phase::Iterating;
            self.production.step(config.steps_per_iteration)?;
            let state = self.production.state(StateFlags {
                positions: true,
                forces: false,
                energy: true,
            })?;
            info!(
                "iteration {iteration}/{macro_iterations}: kinetic {} potential {} kJ/mol",
                energy(state.kinetic_energy),
                energy(state.potential_energy)
            );

            self.phase = Phase::Solving;
            let mut synced = self.field.synchronize(state.positions()?)?;
            let result = solver.solve(&mut synced, &potential, &criteria)?;
            if !result.converged {
                nonconverged += 1;
                match config.solver.on_nonconvergence {
                    NonConvergencePolicy::Ignore => {}
                    NonConvergencePolicy::Warn => warn!(
                        "iteration {iteration}: charges not converged after {} steps (deviation {:.3e})",
                        result.iterations_used, result.final_deviation
                    ),
                    NonConvergencePolicy::Abort => {
                        error!("iteration {iteration}: charge solve did not converge, aborting");
                        return Err(Error::NonConvergence {
                            iteration,
                            iterations_used: result.iterations_used,
                            deviation: result.final_deviation,
                        });
                    }
                }
            }
            self.production.set_charges(&electrode_atoms, solver.charges())?;
            log.record(iteration, &solver, &result)?;
            info!(
                "iteration {iteration}: Q_cathode {:.5} Q_anode {:.5} e",
                solver.total(ElectrodeRole::Cathode),
                solver.total(ElectrodeRole::Anode)
            );

            self.phase = Phase::Sampling;
            let field_state = synced.state(StateFlags::ALL)?;
            debug!(
                "iteration {iteration}: field context potential {} kJ/mol",
                energy(field_state.potential_energy)
            );
            let bulk = bulk_sampler.sample(&field_state)?;
            let vacuum = probe_sampler.sample(&field_state)?;
            let profile = |z: &[f64], values: &[f64]| {
                SpatialHistogram::construct(spec, z, values).map(|h| h.profile())
            };
            profiles.electrolyte_ez.accumulate(profile(&bulk.z, &bulk.field.z)?)?;
            profiles.probe_ex.accumulate(profile(&vacuum.z, &vacuum.field.x)?)?;
            profiles.probe_ey.accumulate(profile(&vacuum.z, &vacuum.field.y)?)?;
            profiles.probe_ez.accumulate(profile(&vacuum.z, &vacuum.field.z)?)?;

            let estimate = induced_model.estimate(
                geometry.cell_distance,
                &synced,
                &electrolyte,
                field_state.positions()?,
            )?;
            info!(
                "iteration {iteration}: induced charge cathode {:.5} anode {:.5} e",
                estimate.cathode, estimate.anode
            );
            induced = Some(estimate);
        }

        self.phase = Phase::Finalizing;
        if nonconverged > 0 {
            warn!("{nonconverged} of {macro_iterations} charge solves did not converge");
        }
        let reduce = |acc: &ProfileAccumulator| acc.mean().unwrap_or_else(|| spec.empty_profile());
        Ok(RunSummary {
            macro_iterations,
            nonconverged,
            geometry,
            cathode_charge: solver.total(ElectrodeRole::Cathode),
            anode_charge: solver.total(ElectrodeRole::Anode),
            induced,
            electrolyte_ez: reduce(&profiles.electrolyte_ez),
            probe_ex: reduce(&profiles.probe_ex),
            probe_ey: reduce(&profiles.probe_ey),
            probe_ez: reduce(&profiles.probe_ez),
        })
    }
}
