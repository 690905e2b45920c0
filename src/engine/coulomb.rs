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

//! Direct-sum Coulomb reference engine.

use super::Engine;
use crate::electrostatic::{ChargeField, ChargePotential, Coulomb, ShortRangeFunction};
use crate::state::{BoxVectors, SimulationState, StateFlags};
use crate::{Error, Result, Vector3};

/// Pairwise Coulomb forces in a slab: periodic in x and y, open along z.
///
/// Dynamics are not integrated. [`Engine::step`] replays the next stored frame,
/// if any, so a precomputed trajectory can be post-processed at constant potential.
/// Without frames the positions stay where they are.
#[derive(Clone, Debug)]
pub struct CoulombEngine<S = Coulomb> {
    scheme: S,
    positions: Vec<Vector3>,
    charges: Vec<f64>,
    box_vectors: BoxVectors,
    /// Atoms sharing a group id do not interact
    exclusion_group: Vec<Option<usize>>,
    exclusion_groups: usize,
    frames: Vec<Vec<Vector3>>,
    next_frame: usize,
    steps_taken: usize,
    /// Forces and potential energy for the current positions and charges
    cache: Option<(Vec<Vector3>, f64)>,
}

impl<S: ChargeField + ChargePotential> CoulombEngine<S> {
    pub fn new(
        scheme: S,
        positions: Vec<Vector3>,
        charges: Vec<f64>,
        box_vectors: BoxVectors,
    ) -> Result<Self> {
        if positions.len() != charges.len() {
            return Err(Error::Engine(format!(
                "{} positions but {} charges",
                positions.len(),
                charges.len()
            )));
        }
        let n = positions.len();
        Ok(Self {
            scheme,
            positions,
            charges,
            box_vectors,
            exclusion_group: vec![None; n],
            exclusion_groups: 0,
            frames: Vec::new(),
            next_frame: 0,
            steps_taken: 0,
            cache: None,
        })
    }

    /// Frames replayed one per call to [`Engine::step`]
    pub fn with_frames(mut self, frames: Vec<Vec<Vector3>>) -> Result<Self> {
        if let Some(bad) = frames.iter().position(|f| f.len() != self.positions.len()) {
            return Err(Error::Engine(format!(
                "frame {bad} has {} atoms, expected {}",
                frames[bad].len(),
                self.positions.len()
            )));
        }
        self.frames = frames;
        self.next_frame = 0;
        Ok(self)
    }

    /// Total sub-steps requested so far
    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    fn excluded(&self, i: usize, j: usize) -> bool {
        matches!(
            (self.exclusion_group[i], self.exclusion_group[j]),
            (Some(a), Some(b)) if a == b
        )
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.positions.len() {
            return Err(Error::UnknownAtom {
                index,
                len: self.positions.len(),
            });
        }
        Ok(())
    }

    /// Forces and potential energy by direct summation over all pairs
    fn evaluate(&self) -> (Vec<Vector3>, f64) {
        let n = self.positions.len();
        let prefactor = self.scheme.prefactor();
        let mut forces = vec![Vector3::zeros(); n];
        let mut energy = 0.0;
        for i in 0..n {
            let qi = self.charges[i];
            for j in (i + 1)..n {
                let qj = self.charges[j];
                if (qi == 0.0 && qj == 0.0) || self.excluded(i, j) {
                    continue;
                }
                let dr = self
                    .box_vectors
                    .minimum_image_xy(self.positions[i] - self.positions[j]);
                let force = prefactor * qi * self.scheme.ion_field(qj, &dr);
                forces[i] += force;
                forces[j] -= force;
                energy += prefactor * qi * self.scheme.ion_potential(qj, dr.norm());
            }
        }
        (forces, energy)
    }

    fn cached(&mut self) -> &(Vec<Vector3>, f64) {
        let evaluated = match self.cache.take() {
            Some(cache) => cache,
            None => self.evaluate(),
        };
        self.cache.insert(evaluated)
    }
}

impl<S: ChargeField + ChargePotential> Engine for CoulombEngine<S> {
    fn atom_count(&self) -> usize {
        self.positions.len()
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.steps_taken += steps;
        if let Some(frame) = self.frames.get(self.next_frame) {
            self.positions.clone_from(frame);
            self.next_frame += 1;
            self.cache = None;
        }
        Ok(())
    }

    fn state(&mut self, flags: StateFlags) -> Result<SimulationState> {
        let mut state = SimulationState {
            box_vectors: Some(self.box_vectors),
            ..Default::default()
        };
        if flags.positions {
            state.positions = Some(self.positions.clone());
        }
        if flags.forces || flags.energy {
            let (forces, energy) = self.cached();
            if flags.forces {
                state.forces = Some(forces.clone());
            }
            if flags.energy {
                state.potential_energy = Some(*energy);
            }
        }
        Ok(state)
    }

    fn reinitialize(&mut self) -> Result<()> {
        self.cache = None;
        Ok(())
    }

    fn set_positions(&mut self, positions: &[Vector3]) -> Result<()> {
        if positions.len() != self.positions.len() {
            return Err(Error::Engine(format!(
                "got {} positions for {} atoms",
                positions.len(),
                self.positions.len()
            )));
        }
        self.positions.copy_from_slice(positions);
        self.cache = None;
        Ok(())
    }

    fn box_vectors(&self) -> BoxVectors {
        self.box_vectors
    }

    fn charge(&self, index: usize) -> Result<f64> {
        self.check_index(index)?;
        Ok(self.charges[index])
    }

    fn set_charges(&mut self, indices: &[usize], charges: &[f64]) -> Result<()> {
        if indices.len() != charges.len() {
            return Err(Error::Engine(format!(
                "{} indices but {} charges",
                indices.len(),
                charges.len()
            )));
        }
        for (&index, &charge) in indices.iter().zip(charges) {
            self.check_index(index)?;
            self.charges[index] = charge;
        }
        self.cache = None;
        Ok(())
    }

    /// An atom belongs to at most one exclusion group; a later call takes it over.
    fn exclude_pairs_within(&mut self, atoms: &[usize]) -> Result<()> {
        for &index in atoms {
            self.check_index(index)?;
        }
        let group = self.exclusion_groups;
        self.exclusion_groups += 1;
        for &index in atoms {
            self.exclusion_group[index] = Some(group);
        }
        self.cache = None;
        Ok(())
    }
}
