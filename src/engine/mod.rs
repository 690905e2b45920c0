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

//! # Physics evaluation contexts
//!
//! The driver talks to two independent contexts through [`Engine`]: the
//! production context that propagates dynamics, and a field-only context used to
//! re-evaluate forces under new electrode charges.
//!
//! The field-only context is wrapped in a [`FieldContext`]. Its forces can only be
//! read through a [`SyncedContext`] guard, which is handed out by
//! [`FieldContext::synchronize`] after the production positions have been copied
//! in. Reading stale forces is therefore not expressible.

mod coulomb;
pub use coulomb::CoulombEngine;

use crate::state::{BoxVectors, SimulationState, StateFlags};
use crate::{Result, Vector3};

/// Interface of a physics evaluation context.
///
/// All calls block until the underlying evaluation, however parallel, is done.
pub trait Engine {
    /// Number of atoms in the context
    fn atom_count(&self) -> usize;

    /// Advances the dynamics by `steps` sub-steps.
    fn step(&mut self, steps: usize) -> Result<()>;

    /// Reads back the quantities selected by `flags`.
    fn state(&mut self, flags: StateFlags) -> Result<SimulationState>;

    /// Rebuilds internal state after topology-level changes such as exclusions.
    fn reinitialize(&mut self) -> Result<()>;

    fn set_positions(&mut self, positions: &[Vector3]) -> Result<()>;

    fn box_vectors(&self) -> BoxVectors;

    /// Current charge of one atom (e)
    fn charge(&self, index: usize) -> Result<f64>;

    /// Sets `charges[k]` on atom `indices[k]` and makes them effective.
    fn set_charges(&mut self, indices: &[usize], charges: &[f64]) -> Result<()>;

    /// Removes non-bonded interactions between every pair within `atoms`.
    fn exclude_pairs_within(&mut self, atoms: &[usize]) -> Result<()>;

    /// Runs the context's own equilibration protocol.
    ///
    /// The default does nothing.
    fn equilibrate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Field-only evaluation context.
///
/// Configuration (charges, exclusions) may be changed at any time; force and
/// energy reads require a [`SyncedContext`].
#[derive(Debug)]
pub struct FieldContext<E> {
    engine: E,
    syncs: usize,
}

impl<E: Engine> FieldContext<E> {
    pub fn new(engine: E) -> Self {
        Self { engine, syncs: 0 }
    }

    /// Copies `positions` into the context and returns a guard that can read it.
    pub fn synchronize(&mut self, positions: &[Vector3]) -> Result<SyncedContext<'_, E>> {
        self.engine.set_positions(positions)?;
        self.syncs += 1;
        Ok(SyncedContext {
            engine: &mut self.engine,
        })
    }

    /// Number of synchronizations so far
    pub fn sync_count(&self) -> usize {
        self.syncs
    }

    pub fn set_charges(&mut self, indices: &[usize], charges: &[f64]) -> Result<()> {
        self.engine.set_charges(indices, charges)
    }

    pub fn exclude_pairs_within(&mut self, atoms: &[usize]) -> Result<()> {
        self.engine.exclude_pairs_within(atoms)
    }

    pub fn reinitialize(&mut self) -> Result<()> {
        self.engine.reinitialize()
    }

    pub fn box_vectors(&self) -> BoxVectors {
        self.engine.box_vectors()
    }

    pub fn atom_count(&self) -> usize {
        self.engine.atom_count()
    }

    /// Gives back the wrapped engine
    pub fn into_inner(self) -> E {
        self.engine
    }
}

/// Field-only context whose positions match the production context.
#[derive(Debug)]
pub struct SyncedContext<'a, E> {
    engine: &'a mut E,
}

impl<E: Engine> SyncedContext<'_, E> {
    /// Forces (kJ/mol/nm) under the current charges
    pub fn forces(&mut self) -> Result<Vec<Vector3>> {
        let forces = self
            .engine
            .state(StateFlags {
                positions: false,
                forces: true,
                energy: false,
            })?
            .forces;
        forces.ok_or_else(|| crate::Error::Engine("engine returned no forces".into()))
    }

    pub fn state(&mut self, flags: StateFlags) -> Result<SimulationState> {
        self.engine.state(flags)
    }

    pub fn charge(&self, index: usize) -> Result<f64> {
        self.engine.charge(index)
    }

    pub fn set_charges(&mut self, indices: &[usize], charges: &[f64]) -> Result<()> {
        self.engine.set_charges(indices, charges)
    }

    pub fn atom_count(&self) -> usize {
        self.engine.atom_count()
    }
}
