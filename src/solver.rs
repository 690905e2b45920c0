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

//! # Electrode charge equalization
//!
//! Bounded fixed-point iteration for the electrode charges that hold the
//! sheets at the applied potential. For an atom of sign _s_ (+1 cathode,
//! -1 anode) with charge _q_ and axial force _F<sub>z</sub>_, the local field is
//! _E<sub>z</sub>_ = _F<sub>z</sub>_ / _q_ and the update reads
//!
//! $$ q' = s \frac{2}{4\pi} A \left(\frac{V}{L_{gap}} + E_z\right) c $$
//!
//! where _A_ is the area per electrode atom, _L<sub>gap</sub>_ the vacuum gap
//! and _c_ the field-to-charge conversion. Every update is clamped to
//! ±`charge_cap`. Interior dummy sheets stay neutral.

use crate::engine::{Engine, SyncedContext};
use crate::topology::{ElectrodeAtomSet, ElectrodeRole};
use crate::{Error, Result};
use itertools::Itertools;
use std::f64::consts::PI;

/// Applied voltage and electrode geometry entering the charge update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AppliedPotential {
    /// kJ/mol per elementary charge
    pub voltage: f64,
    /// Surface area per electrode atom (nm²)
    pub area_per_atom: f64,
    /// Length of the vacuum gap (nm)
    pub vacuum_gap: f64,
    /// See [`crate::FIELD_TO_CHARGE`]
    pub conversion: f64,
}

impl AppliedPotential {
    fn check(&self) -> Result<()> {
        if !(self.vacuum_gap > 0.0) {
            return Err(Error::InvariantViolation(format!(
                "vacuum gap must be positive, got {} nm",
                self.vacuum_gap
            )));
        }
        if !(self.area_per_atom > 0.0) {
            return Err(Error::InvariantViolation(format!(
                "area per electrode atom must be positive, got {} nm²",
                self.area_per_atom
            )));
        }
        Ok(())
    }

    /// Field of the applied voltage across the gap
    fn gap_field(&self) -> f64 {
        self.voltage / self.vacuum_gap
    }

    /// Analytic starting charge for `role`, before the seed offset
    pub fn seed_charge(&self, role: ElectrodeRole) -> f64 {
        role.sign() / (4.0 * PI) * self.area_per_atom * self.gap_field() * self.conversion
    }

    /// Charge consistent with the applied potential under `external_field`
    pub fn updated_charge(&self, role: ElectrodeRole, external_field: f64) -> f64 {
        role.sign() * 2.0 / (4.0 * PI)
            * self.area_per_atom
            * (self.gap_field() + external_field)
            * self.conversion
    }
}

/// Stopping rules for one solve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvergenceCriteria {
    pub max_iterations: usize,
    /// Mean absolute charge change (e)
    pub tolerance: f64,
    /// Largest charge magnitude any electrode atom may carry (e)
    pub charge_cap: f64,
}

impl ConvergenceCriteria {
    fn check(&self) -> Result<()> {
        if !(self.charge_cap > 0.0) {
            return Err(Error::config(
                "solver.charge_cap",
                format!("must be positive, got {}", self.charge_cap),
            ));
        }
        if !(self.tolerance > 0.0) {
            return Err(Error::config(
                "solver.tolerance",
                format!("must be positive, got {}", self.tolerance),
            ));
        }
        Ok(())
    }
}

/// Progress of a single solve call.
#[derive(Clone, Debug)]
pub struct ConvergenceState {
    criteria: ConvergenceCriteria,
    deviations: Vec<f64>,
}

impl ConvergenceState {
    pub fn new(criteria: ConvergenceCriteria) -> Self {
        Self {
            criteria,
            deviations: Vec::with_capacity(criteria.max_iterations),
        }
    }

    pub fn record(&mut self, deviation: f64) {
        self.deviations.push(deviation);
    }

    pub fn iteration(&self) -> usize {
        self.deviations.len()
    }

    /// Last deviation, infinite before the first step
    pub fn deviation(&self) -> f64 {
        self.deviations.last().copied().unwrap_or(f64::INFINITY)
    }

    pub fn converged(&self) -> bool {
        self.deviation() < self.criteria.tolerance
    }

    pub fn exhausted(&self) -> bool {
        self.iteration() >= self.criteria.max_iterations
    }

    fn into_result(self, charges: Vec<f64>) -> SolveResult {
        SolveResult {
            charges,
            converged: self.converged(),
            iterations_used: self.iteration(),
            final_deviation: self.deviation(),
            deviations: self.deviations,
        }
    }
}

/// Outcome of [`ElectrodeChargeSolver::solve`].
///
/// A solve that runs out of iterations still yields its last charges, with
/// `converged == false`.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveResult {
    /// Charges in electrode order (cathode, dummy, anode)
    pub charges: Vec<f64>,
    pub converged: bool,
    pub iterations_used: usize,
    pub final_deviation: f64,
    /// Deviation after every step
    pub deviations: Vec<f64>,
}

/// Owner of the electrode charge vector.
///
/// Only [`solve`](Self::solve) writes the charges; everyone else reads them.
#[derive(Clone, Debug)]
pub struct ElectrodeChargeSolver {
    electrodes: ElectrodeAtomSet,
    charges: Vec<f64>,
}

impl ElectrodeChargeSolver {
    /// Seeds every electrode charge with the analytic estimate for `potential`,
    /// shifted by `seed_offset` away from zero.
    ///
    /// Fails with [`Error::InvariantViolation`] unless `expected_count` equals the
    /// number of electrode atoms.
    pub fn initialize(
        expected_count: usize,
        electrodes: ElectrodeAtomSet,
        potential: &AppliedPotential,
        seed_offset: f64,
    ) -> Result<Self> {
        if electrodes.len() != expected_count {
            return Err(Error::InvariantViolation(format!(
                "expected {expected_count} electrode atoms, got {}",
                electrodes.len()
            )));
        }
        potential.check()?;
        let charges = electrodes
            .iter_roles()
            .map(|(_, role)| match role {
                ElectrodeRole::Dummy => 0.0,
                _ => potential.seed_charge(role) + role.sign() * seed_offset,
            })
            .collect();
        Ok(Self {
            electrodes,
            charges,
        })
    }

    /// Runs up to `criteria.max_iterations` fixed-point steps.
    ///
    /// Each step reads the forces of the synchronized field context, computes
    /// clamped new charges, writes them back into the context and records the
    /// mean absolute change over cathode and anode atoms. Stops as soon as the
    /// change drops below the tolerance.
    pub fn solve<E: Engine>(
        &mut self,
        context: &mut SyncedContext<'_, E>,
        potential: &AppliedPotential,
        criteria: &ConvergenceCriteria,
    ) -> Result<SolveResult> {
        potential.check()?;
        criteria.check()?;
        let mut state = ConvergenceState::new(*criteria);
        let cap = criteria.charge_cap;

        while !state.exhausted() {
            let forces = context.forces()?;
            let mut updated = self.charges.clone();
            for (pos, (atom, role)) in self.electrodes.iter_roles().enumerate() {
                if role == ElectrodeRole::Dummy {
                    continue;
                }
                let force = forces.get(atom).ok_or(Error::UnknownAtom {
                    index: atom,
                    len: forces.len(),
                })?;
                let old = self.charges[pos];
                let field = if old != 0.0 { force.z / old } else { 0.0 };
                let charge = potential.updated_charge(role, field);
                if !charge.is_finite() {
                    return Err(Error::Engine(format!(
                        "non-finite charge update on electrode atom {atom}"
                    )));
                }
                updated[pos] = charge.clamp(-cap, cap);
            }

            let deviation = self.mean_abs_change(&updated);
            self.charges = updated;
            context.set_charges(self.electrodes.atoms(), &self.charges)?;
            state.record(deviation);
            log::debug!(
                "charge step {}: mean |dq| = {:.4e}",
                state.iteration(),
                deviation
            );
            if state.converged() {
                break;
            }
        }
        Ok(state.into_result(self.charges.clone()))
    }

    /// Mean absolute difference to the current charges over cathode and anode atoms
    fn mean_abs_change(&self, updated: &[f64]) -> f64 {
        let total: f64 = self
            .charges
            .iter()
            .zip_eq(updated)
            .enumerate()
            .filter(|(pos, _)| self.electrodes.role(*pos) != ElectrodeRole::Dummy)
            .map(|(_, (old, new))| (new - old).abs())
            .sum();
        total / self.electrodes.charged_len() as f64
    }

    /// Charges in electrode order
    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    pub fn electrodes(&self) -> &ElectrodeAtomSet {
        &self.electrodes
    }

    /// Summed charge of the atoms with `role`
    pub fn total(&self, role: ElectrodeRole) -> f64 {
        self.charges
            .iter()
            .enumerate()
            .filter(|(pos, _)| self.electrodes.role(*pos) == role)
            .map(|(_, q)| q)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FieldContext;
    use crate::state::{BoxVectors, SimulationState, StateFlags};
    use crate::topology::AtomGroup;
    use crate::Vector3;
    use approx::assert_relative_eq;

    /// Axial field on atom i is `e0 - alpha * s_i * q_i`, giving a linear
    /// contraction towards q* = s (V/L + e0) / (1 + alpha) with unit prefactor.
    #[derive(Debug)]
    struct LinearResponse {
        signs: Vec<f64>,
        charges: Vec<f64>,
        e0: f64,
        alpha: f64,
    }

    impl LinearResponse {
        fn new(e0: f64, alpha: f64) -> Self {
            Self {
                signs: vec![1.0, 1.0, 0.0, -1.0, -1.0],
                charges: vec![0.0; 5],
                e0,
                alpha,
            }
        }
    }

    impl Engine for LinearResponse {
        fn atom_count(&self) -> usize {
            self.charges.len()
        }
        fn step(&mut self, _: usize) -> Result<()> {
            Ok(())
        }
        fn state(&mut self, _: StateFlags) -> Result<SimulationState> {
            let forces = self
                .charges
                .iter()
                .zip(&self.signs)
                .map(|(q, s)| Vector3::new(0.0, 0.0, q * (self.e0 - self.alpha * s * q)))
                .collect();
            Ok(SimulationState {
                forces: Some(forces),
                ..Default::default()
            })
        }
        fn reinitialize(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_positions(&mut self, _: &[Vector3]) -> Result<()> {
            Ok(())
        }
        fn box_vectors(&self) -> BoxVectors {
            BoxVectors::orthorhombic(1.0, 1.0, 1.0)
        }
        fn charge(&self, index: usize) -> Result<f64> {
            Ok(self.charges[index])
        }
        fn set_charges(&mut self, indices: &[usize], charges: &[f64]) -> Result<()> {
            for (&i, &q) in indices.iter().zip(charges) {
                self.charges[i] = q;
            }
            Ok(())
        }
        fn exclude_pairs_within(&mut self, _: &[usize]) -> Result<()> {
            Ok(())
        }
    }

    fn electrodes() -> ElectrodeAtomSet {
        ElectrodeAtomSet::new(
            &AtomGroup::new("cathode", vec![0, 1]),
            &AtomGroup::new("dummy", vec![2]),
            &AtomGroup::new("anode", vec![3, 4]),
            5,
        )
        .unwrap()
    }

    /// Unit update prefactor: 2/(4π) · 2π · 1 = 1, and V/L = 1
    fn unit_potential() -> AppliedPotential {
        AppliedPotential {
            voltage: 2.0,
            area_per_atom: 2.0 * PI,
            vacuum_gap: 2.0,
            conversion: 1.0,
        }
    }

    fn criteria(max_iterations: usize) -> ConvergenceCriteria {
        ConvergenceCriteria {
            max_iterations,
            tolerance: 0.01,
            charge_cap: 2.0,
        }
    }

    fn solve(
        engine: LinearResponse,
        max_iterations: usize,
    ) -> (ElectrodeChargeSolver, SolveResult) {
        let potential = unit_potential();
        let mut solver =
            ElectrodeChargeSolver::initialize(5, electrodes(), &potential, 1e-4).unwrap();
        let mut context = FieldContext::new(engine);
        context
            .set_charges(solver.electrodes().atoms(), solver.charges())
            .unwrap();
        let mut synced = context.synchronize(&[]).unwrap();
        let result = solver
            .solve(&mut synced, &potential, &criteria(max_iterations))
            .unwrap();
        (solver, result)
    }

    #[test]
    fn test_seed_charges_are_symmetric() {
        let potential = AppliedPotential {
            voltage: 1.0,
            area_per_atom: 0.01,
            vacuum_gap: 2.0,
            conversion: 0.0072,
        };
        let set = ElectrodeAtomSet::new(
            &AtomGroup::new("cathode", vec![0, 1]),
            &AtomGroup::new("dummy", vec![]),
            &AtomGroup::new("anode", vec![2, 3]),
            4,
        )
        .unwrap();
        let solver = ElectrodeChargeSolver::initialize(4, set, &potential, 1e-4).unwrap();
        let q = solver.charges();
        let expected = 0.01 * 0.5 * 0.0072 / (4.0 * PI) + 1e-4;
        assert!(q.iter().all(|&qi| qi != 0.0));
        assert_relative_eq!(q[0], expected, epsilon = 1e-15);
        assert_relative_eq!(q[1], q[0]);
        assert_relative_eq!(q[2], -q[0]);
        assert_relative_eq!(q[3], -q[0]);
        assert_relative_eq!(solver.total(ElectrodeRole::Cathode), 2.0 * expected);
    }

    #[test]
    fn test_invalid_criteria_are_rejected() {
        let potential = unit_potential();
        let mut solver =
            ElectrodeChargeSolver::initialize(5, electrodes(), &potential, 1e-4).unwrap();
        let seeded = solver.charges().to_vec();
        let mut context = FieldContext::new(LinearResponse::new(0.5, 0.3));
        let mut synced = context.synchronize(&[]).unwrap();
        for (cap, tolerance) in [(-1.0, 0.01), (f64::NAN, 0.01), (2.0, 0.0)] {
            let criteria = ConvergenceCriteria {
                max_iterations: 3,
                tolerance,
                charge_cap: cap,
            };
            let err = solver.solve(&mut synced, &potential, &criteria).unwrap_err();
            assert!(matches!(err, Error::Config { .. }));
        }
        assert_eq!(solver.charges(), seeded.as_slice());
    }

    #[test]
    fn test_count_mismatch_is_fatal() {
        let err =
            ElectrodeChargeSolver::initialize(2400, electrodes(), &unit_potential(), 1e-4)
                .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));

        let closed_gap = AppliedPotential {
            vacuum_gap: 0.0,
            ..unit_potential()
        };
        assert!(ElectrodeChargeSolver::initialize(5, electrodes(), &closed_gap, 1e-4).is_err());
    }

    #[test]
    fn test_converges_to_fixed_point() {
        let (solver, result) = solve(LinearResponse::new(0.5, 0.3), 10);
        assert!(result.converged);
        assert_eq!(result.iterations_used, 5);
        assert!(result.final_deviation < 0.01);
        assert_relative_eq!(result.deviations[0], 0.84987, epsilon = 1e-9);
        assert_relative_eq!(result.deviations[3], 0.84987 * 0.3f64.powi(3), epsilon = 1e-9);

        let fixed_point = 1.5 / 1.3;
        let q = solver.charges();
        assert_relative_eq!(q[0], fixed_point, epsilon = 0.01);
        assert_relative_eq!(q[1], fixed_point, epsilon = 0.01);
        assert_eq!(q[2], 0.0);
        assert_relative_eq!(q[3], -fixed_point, epsilon = 0.01);
        assert_relative_eq!(q[4], -fixed_point, epsilon = 0.01);
        assert_eq!(result.charges, q);
    }

    #[test]
    fn test_exact_fixed_point() {
        // field independent of charge: the first step lands on the fixed point
        let (solver, result) = solve(LinearResponse::new(0.5, 0.0), 3);
        assert!(result.converged);
        assert_eq!(result.iterations_used, 2);
        assert_eq!(result.final_deviation, 0.0);
        assert_relative_eq!(solver.charges()[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(solver.charges()[4], -1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_iteration_cap_reports_nonconvergence() {
        let (_, result) = solve(LinearResponse::new(0.5, 0.3), 3);
        assert!(!result.converged);
        assert_eq!(result.iterations_used, 3);
        assert_eq!(result.deviations.len(), 3);
        assert_relative_eq!(result.final_deviation, 0.84987 * 0.09, epsilon = 1e-9);
    }

    #[test]
    fn test_charges_are_capped_from_first_step() {
        let (solver, result) = solve(LinearResponse::new(100.0, 0.0), 1);
        assert_eq!(result.iterations_used, 1);
        assert!(solver.charges().iter().all(|q| q.abs() <= 2.0));
        assert_eq!(solver.charges()[0], 2.0);
        assert_eq!(solver.charges()[3], -2.0);
    }

    #[test]
    fn test_solve_is_deterministic() {
        let (a, ra) = solve(LinearResponse::new(0.7, 0.4), 4);
        let (b, rb) = solve(LinearResponse::new(0.7, 0.4), 4);
        assert_eq!(a.charges(), b.charges());
        assert_eq!(ra, rb);
    }
}
