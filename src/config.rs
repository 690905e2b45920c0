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

//! Run parameters.
//!
//! Everything the driver needs is collected in [`RunConfig`], read from TOML
//! and checked once by [`RunConfig::validate`]. Defaults reproduce the
//! reference graphene/ionic-liquid run.
//!
//! ```
//! use conpot::RunConfig;
//! let config: RunConfig = toml::from_str(r#"
//!     steps_per_iteration = 50
//!     voltage = 2.0
//!     simulated_ns = 0.001
//!     [solver]
//!     max_iterations = 5
//! "#).unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.macro_iterations(), 20);
//! assert_eq!(config.solver.tolerance, 0.01);
//! ```

use crate::electrostatic::Coulomb;
use crate::state::BoxVectors;
use crate::{Error, Result, Vector3, VOLT_TO_KJ_PER_MOL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper limit on `simulated_ns × 10⁶ / steps_per_iteration`
const MAX_MACRO_ITERATIONS: f64 = 1e12;

/// What to do when a macro-iteration's charge solve stops short of tolerance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonConvergencePolicy {
    /// Accept the best-effort charges silently
    Ignore,
    /// Accept the best-effort charges and log a warning
    #[default]
    Warn,
    /// Stop the run with [`Error::NonConvergence`]
    Abort,
}

/// Charge solver settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Fixed-point steps per macro-iteration
    pub max_iterations: usize,
    /// Mean absolute charge change (e) below which the solve stops
    pub tolerance: f64,
    /// Magnitude cap on any electrode charge (e)
    pub charge_cap: f64,
    /// Offset added to the analytic seed so no charge starts at zero (e)
    pub seed_offset: f64,
    pub on_nonconvergence: NonConvergencePolicy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            tolerance: 0.01,
            charge_cap: 2.0,
            seed_offset: 1e-4,
            on_nonconvergence: NonConvergencePolicy::Warn,
        }
    }
}

/// Axial histogram settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistogramConfig {
    /// nm
    pub bin_width: f64,
    pub bin_count: usize,
    /// Lower edge of the first bin (nm)
    pub origin: f64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bin_width: 0.025,
            bin_count: 14,
            origin: 0.0,
        }
    }
}

/// Selection of one species: residue label and the atom-name prefix of the atoms
/// whose field is sampled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeciesSelection {
    pub residue: String,
    /// Empty selects every atom of the residue
    #[serde(default)]
    pub field_atoms: String,
}

impl SpeciesSelection {
    pub fn new(residue: &str, field_atoms: &str) -> Self {
        Self {
            residue: residue.into(),
            field_atoms: field_atoms.into(),
        }
    }
}

/// Residue labels of the electrode sheets and electrolyte species
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupConfig {
    pub cathode: String,
    pub anode: String,
    pub dummy: String,
    pub cation: SpeciesSelection,
    pub anion: SpeciesSelection,
    pub solvent: SpeciesSelection,
    pub probe: SpeciesSelection,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            cathode: "cathode".into(),
            anode: "anode".into(),
            dummy: "dummy".into(),
            cation: SpeciesSelection::new("BMIM", "H"),
            anion: SpeciesSelection::new("BF4", "B"),
            solvent: SpeciesSelection::new("acnt", "H"),
            probe: SpeciesSelection::new("Hel", ""),
        }
    }
}

/// Planes bounding the electrolyte for the induced-charge estimate (nm)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InducedChargeConfig {
    pub cathode_plane: f64,
    pub anode_plane: f64,
}

impl Default for InducedChargeConfig {
    fn default() -> Self {
        Self {
            cathode_plane: 1.15,
            anode_plane: 5.8402,
        }
    }
}

/// Output locations
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Defaults to `output_{nstep}step_{volt}V_{nsec}ns`
    pub directory: Option<PathBuf>,
    /// Append every electrode charge to each line of the charge log
    pub per_atom_charges: bool,
}

/// Reference engine settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Relative permittivity of the background
    pub permittivity: f64,
    /// Real-space cutoff (nm); infinite when absent
    pub cutoff: Option<f64>,
    /// Overrides box vectors given in the system file, rows are a, b, c (nm)
    #[serde(rename = "box")]
    pub box_vectors: Option<[[f64; 3]; 3]>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            permittivity: 1.0,
            cutoff: None,
            box_vectors: None,
        }
    }
}

impl EngineConfig {
    /// Coulomb scheme of the reference engine
    pub fn coulomb(&self) -> Coulomb {
        Coulomb::new(
            self.permittivity,
            self.cutoff.unwrap_or(f64::INFINITY),
            None,
        )
    }

    /// Box override as vectors
    pub fn box_override(&self) -> Option<BoxVectors> {
        self.box_vectors
            .map(|[a, b, c]| BoxVectors::new(Vector3::from(a), Vector3::from(b), Vector3::from(c)))
    }
}

/// All parameters of one constant-potential run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// MD steps between charge solves
    pub steps_per_iteration: usize,
    /// Applied voltage (V)
    pub voltage: f64,
    /// Simulated time (ns); only sets the number of macro-iterations
    pub simulated_ns: f64,
    /// Required size of cathode + dummy + anode
    pub electrode_atom_count: usize,
    pub solver: SolverConfig,
    pub histogram: HistogramConfig,
    pub groups: GroupConfig,
    pub induced: InducedChargeConfig,
    pub output: OutputConfig,
    pub engine: EngineConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps_per_iteration: 50,
            voltage: 0.0,
            simulated_ns: 0.0,
            electrode_atom_count: 2400,
            solver: SolverConfig::default(),
            histogram: HistogramConfig::default(),
            groups: GroupConfig::default(),
            induced: InducedChargeConfig::default(),
            output: OutputConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl RunConfig {
    /// Reads and validates a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every parameter the driver relies on.
    pub fn validate(&self) -> Result<()> {
        if self.steps_per_iteration == 0 {
            return Err(Error::config("steps_per_iteration", "must be positive"));
        }
        if !self.voltage.is_finite() {
            return Err(Error::config("voltage", "must be finite"));
        }
        if !(self.simulated_ns.is_finite() && self.simulated_ns >= 0.0) {
            return Err(Error::config("simulated_ns", "must be finite and not negative"));
        }
        if self.simulated_ns * 1e6 / self.steps_per_iteration as f64 > MAX_MACRO_ITERATIONS {
            return Err(Error::config(
                "simulated_ns",
                format!("more than {MAX_MACRO_ITERATIONS:e} macro-iterations"),
            ));
        }
        if self.electrode_atom_count == 0 {
            return Err(Error::config("electrode_atom_count", "must be positive"));
        }
        if self.solver.max_iterations == 0 {
            return Err(Error::config("solver.max_iterations", "must be positive"));
        }
        if !(self.solver.tolerance > 0.0) {
            return Err(Error::config("solver.tolerance", "must be positive"));
        }
        if !(self.solver.charge_cap > 0.0) {
            return Err(Error::config("solver.charge_cap", "must be positive"));
        }
        if !(self.histogram.bin_width > 0.0) {
            return Err(Error::config("histogram.bin_width", "must be positive"));
        }
        if self.histogram.bin_count == 0 {
            return Err(Error::config("histogram.bin_count", "must be positive"));
        }
        if self.induced.cathode_plane == self.induced.anode_plane {
            return Err(Error::config(
                "induced",
                "cathode and anode planes must differ",
            ));
        }
        if !(self.engine.permittivity > 0.0) {
            return Err(Error::config("engine.permittivity", "must be positive"));
        }
        if matches!(self.engine.cutoff, Some(c) if !(c > 0.0)) {
            return Err(Error::config("engine.cutoff", "must be positive"));
        }
        Ok(())
    }

    /// Applied voltage in kJ/mol per elementary charge
    pub fn voltage_kj_per_mol(&self) -> f64 {
        self.voltage * VOLT_TO_KJ_PER_MOL
    }

    /// Loop bound `floor(ns × 10⁶ / nstep) + 1`; the run performs one fewer
    /// macro-iterations than this.
    ///
    /// Steps are 1 fs. A 1e-9 guard keeps exact multiples from truncating down.
    pub fn iteration_bound(&self) -> usize {
        let iterations = (self.simulated_ns * 1e6 / self.steps_per_iteration as f64 + 1e-9).floor();
        (iterations as usize).saturating_add(1)
    }

    /// Number of macro-iterations actually performed
    pub fn macro_iterations(&self) -> usize {
        self.iteration_bound() - 1
    }

    /// Output directory, explicit or derived from the run parameters.
    ///
    /// Floats keep a decimal point, so a voltage of 2 gives `2.0V`.
    pub fn output_directory(&self) -> PathBuf {
        self.output.directory.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "output_{}step_{:?}V_{:?}ns",
                self.steps_per_iteration, self.voltage, self.simulated_ns
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrostatic::{Cutoff, ShortRangeFunction};
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_match_reference_run() {
        let config = RunConfig::default();
        assert_eq!(config.electrode_atom_count, 2400);
        assert_eq!(config.solver.max_iterations, 3);
        assert_eq!(config.solver.tolerance, 0.01);
        assert_eq!(config.solver.charge_cap, 2.0);
        assert_eq!(config.histogram.bin_width, 0.025);
        assert_eq!(config.histogram.bin_count, 14);
        assert_eq!(config.solver.on_nonconvergence, NonConvergencePolicy::Warn);
        config.validate().unwrap();
    }

    #[test]
    fn test_iteration_count() {
        let config = RunConfig {
            steps_per_iteration: 2,
            simulated_ns: 4e-6,
            ..Default::default()
        };
        assert_eq!(config.iteration_bound(), 3);
        assert_eq!(config.macro_iterations(), 2);

        let config = RunConfig {
            steps_per_iteration: 50,
            simulated_ns: 1.0,
            ..Default::default()
        };
        assert_eq!(config.macro_iterations(), 20000);

        let config = RunConfig {
            steps_per_iteration: 3,
            simulated_ns: 1e-5,
            ..Default::default()
        };
        // 10 / 3 truncates
        assert_eq!(config.macro_iterations(), 3);
    }

    #[test]
    fn test_voltage_conversion() {
        let config = RunConfig {
            voltage: 2.0,
            ..Default::default()
        };
        assert_relative_eq!(config.voltage_kj_per_mol(), 192.974);
    }

    #[test]
    fn test_validation_rejects() {
        let bad = RunConfig {
            steps_per_iteration: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(Error::Config {
                field: "steps_per_iteration",
                ..
            })
        ));

        let mut bad = RunConfig::default();
        bad.solver.tolerance = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = RunConfig::default();
        bad.histogram.bin_count = 0;
        assert!(bad.validate().is_err());

        let mut bad = RunConfig::default();
        bad.induced.anode_plane = bad.induced.cathode_plane;
        assert!(bad.validate().is_err());

        let mut bad = RunConfig::default();
        bad.simulated_ns = f64::NAN;
        assert!(bad.validate().is_err());

        let endless: RunConfig = toml::from_str("simulated_ns = inf\nvoltage = 1.0").unwrap();
        assert!(matches!(
            endless.validate(),
            Err(Error::Config {
                field: "simulated_ns",
                ..
            })
        ));
        // saturates instead of overflowing when validation is skipped
        assert_eq!(endless.iteration_bound(), usize::MAX);

        let mut bad = RunConfig::default();
        bad.simulated_ns = 1e300;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_toml_layout() {
        let config: RunConfig = toml::from_str(
            r#"
            voltage = 1.5
            [solver]
            on_nonconvergence = "abort"
            [groups]
            probe = { residue = "He" }
            [engine]
            cutoff = 1.2
            box = [[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 12.0]]
            "#,
        )
        .unwrap();
        assert_eq!(config.solver.on_nonconvergence, NonConvergencePolicy::Abort);
        assert_eq!(config.groups.probe, SpeciesSelection::new("He", ""));
        assert_eq!(config.groups.cation, SpeciesSelection::new("BMIM", "H"));
        assert_eq!(config.engine.cutoff, Some(1.2));
        assert_eq!(config.engine.box_vectors.unwrap()[2][2], 12.0);
        let cell = config.engine.box_override().unwrap();
        assert_relative_eq!(cell.z_length(), 12.0);
        assert_relative_eq!(cell.cross_section_area(), 9.0);
        let scheme = config.engine.coulomb();
        assert_relative_eq!(scheme.cutoff(), 1.2);
        assert_relative_eq!(scheme.prefactor(), crate::ELECTRIC_PREFACTOR);
        assert!(RunConfig::default().engine.coulomb().cutoff().is_infinite());
        assert!(RunConfig::default().engine.box_override().is_none());

        assert!(toml::from_str::<RunConfig>("unknown_key = 1").is_err());
    }

    #[test]
    fn test_output_directory_name() {
        let config = RunConfig {
            steps_per_iteration: 50,
            voltage: 2.0,
            simulated_ns: 0.5,
            ..Default::default()
        };
        assert_eq!(
            config.output_directory(),
            PathBuf::from("output_50step_2.0V_0.5ns")
        );
    }
}
