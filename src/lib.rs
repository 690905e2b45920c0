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

//! # Conpot
//!
//! Constant-potential driver for electrochemical molecular dynamics.
//!
//! Two charged electrode sheets are held at a fixed applied voltage by re-solving
//! the per-atom electrode charges once per macro-iteration, while the electric field
//! sampled in the electrolyte and in a vacuum probe region is accumulated into
//! axial profiles.
//!
//! The physics engines doing the actual force evaluation are collaborators behind
//! the [`engine::Engine`] trait. A direct-sum [`engine::CoulombEngine`] is included
//! as a reference implementation.
//!
//! Units are nm, e, kJ/mol and femtosecond steps throughout.

#[cfg(test)]
extern crate approx;

/// A point in 3D space
pub type Vector3 = nalgebra::Vector3<f64>;
/// A stack-allocated 3x3 square matrix
pub type Matrix3 = nalgebra::Matrix3<f64>;

pub mod charge_log;
pub mod config;
pub mod electrostatic;
pub mod engine;
mod error;
pub mod histogram;
pub mod io;
pub mod orchestrator;
pub mod sampler;
pub mod solver;
pub mod state;
pub mod topology;

pub use config::RunConfig;
pub use error::{Error, Result};
pub use orchestrator::{RunSummary, Simulation};
pub use solver::{ElectrodeChargeSolver, SolveResult};

use num::Float;
use physical_constants::{AVOGADRO_CONSTANT, ELEMENTARY_CHARGE, VACUUM_ELECTRIC_PERMITTIVITY};
use std::f64::consts::PI;

/// Electrostatic prefactor, e²/4πε₀ × 10⁹ × NA × 10⁻³ (nm × kJ / mol).
///
/// Examples:
/// ```
/// use conpot::ELECTRIC_PREFACTOR;
/// let energy = ELECTRIC_PREFACTOR * 1.0 * -1.0 / 0.7; // two unit charges 0.7 nm apart
/// assert!((energy + 198.479).abs() < 1e-3);
/// ```
pub const ELECTRIC_PREFACTOR: f64 = ELEMENTARY_CHARGE * ELEMENTARY_CHARGE * 1.0e9
    * AVOGADRO_CONSTANT
    * 1e-3
    / (4.0 * PI * VACUUM_ELECTRIC_PERMITTIVITY);

/// Volt to kJ/mol per elementary charge, as used by the reference electrode runs.
pub const VOLT_TO_KJ_PER_MOL: f64 = 96.487;

/// Bohr radii per nanometer.
pub const BOHR_PER_NM: f64 = 18.8973;

/// Hartree in kJ/mol.
pub const HARTREE_IN_KJ_PER_MOL: f64 = 2625.5;

/// Converts area × field (nm² × kJ/mol/nm/e) into an electrode charge (e):
/// bohr/nm × au/(kJ/mol).
pub const FIELD_TO_CHARGE: f64 = BOHR_PER_NM / HARTREE_IN_KJ_PER_MOL;

/// Arithmetic mean of a slice; `None` when empty.
pub(crate) fn mean<T: Float>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let sum = values.iter().fold(T::zero(), |acc, &v| acc + v);
    Some(sum / T::from(values.len())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use physical_constants::{BOHR_RADIUS, HARTREE_ENERGY};

    #[test]
    fn test_unit_conversions() {
        assert_relative_eq!(
            VOLT_TO_KJ_PER_MOL,
            ELEMENTARY_CHARGE * AVOGADRO_CONSTANT * 1e-3,
            max_relative = 1e-4
        );
        assert_relative_eq!(BOHR_PER_NM, 1e-9 / BOHR_RADIUS, max_relative = 1e-5);
        assert_relative_eq!(
            HARTREE_IN_KJ_PER_MOL,
            HARTREE_ENERGY * AVOGADRO_CONSTANT * 1e-3,
            max_relative = 1e-4
        );
        assert_relative_eq!(FIELD_TO_CHARGE, 0.0071976, epsilon = 1e-6);
    }

    #[test]
    fn test_electric_prefactor() {
        assert_relative_eq!(ELECTRIC_PREFACTOR, 138.935458, epsilon = 1e-4);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean::<f64>(&[]), None);
        assert_relative_eq!(mean(&[1.0, 2.0, 6.0]).unwrap(), 3.0);
    }
}
