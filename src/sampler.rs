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

//! Field and position samples from an atom group, plus the induced-charge
//! cross-check.
//!
//! The force acting on an atom is used as the proxy for the local field.

use crate::engine::{Engine, SyncedContext};
use crate::state::SimulationState;
use crate::topology::Selection;
use crate::{Error, Result, Vector3};

fn lookup<'a>(values: &'a [Vector3], index: usize) -> Result<&'a Vector3> {
    values.get(index).ok_or(Error::UnknownAtom {
        index,
        len: values.len(),
    })
}

/// Per-atom field components in group order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldComponents {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl FieldComponents {
    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

/// Axial positions and fields of one group at one instant
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupSample {
    /// Coordinate along the sheet normal (nm)
    pub z: Vec<f64>,
    pub field: FieldComponents,
}

/// Reads field samples for one group.
pub struct FieldSampler<'a> {
    group: &'a dyn Selection,
}

impl<'a> FieldSampler<'a> {
    pub fn new(group: &'a dyn Selection) -> Self {
        Self { group }
    }

    /// x/y/z force components of every group atom
    pub fn field_components(&self, forces: &[Vector3]) -> Result<FieldComponents> {
        let mut field = FieldComponents {
            x: Vec::with_capacity(self.group.len()),
            y: Vec::with_capacity(self.group.len()),
            z: Vec::with_capacity(self.group.len()),
        };
        for index in self.group.atoms() {
            let f = lookup(forces, index)?;
            field.x.push(f.x);
            field.y.push(f.y);
            field.z.push(f.z);
        }
        Ok(field)
    }

    /// Coordinate along the sheet normal of every group atom
    pub fn axial_positions(&self, positions: &[Vector3]) -> Result<Vec<f64>> {
        self.group
            .atoms()
            .map(|index| lookup(positions, index).map(|r| r.z))
            .collect()
    }

    /// Positions and forces from one state
    pub fn sample(&self, state: &SimulationState) -> Result<GroupSample> {
        Ok(GroupSample {
            z: self.axial_positions(state.positions()?)?,
            field: self.field_components(state.forces()?)?,
        })
    }
}

/// Image-charge response of two planar electrodes bounding the electrolyte.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InducedChargeModel {
    /// z of the cathode plane (nm)
    pub cathode_plane: f64,
    /// z of the anode plane (nm)
    pub anode_plane: f64,
}

/// Total induced charge on each electrode (e)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InducedCharge {
    pub cathode: f64,
    pub anode: f64,
}

impl InducedChargeModel {
    /// Green's reciprocity estimate of the charge induced by the electrolyte.
    ///
    /// A charge _q_ at height _z_ induces `q (z - z_anode) / L` on the cathode and
    /// `-q (z - z_cathode) / L` on the anode, with _L_ = `cell_distance`.
    /// Diagnostic only; the solver never sees the result.
    pub fn estimate<E: Engine>(
        &self,
        cell_distance: f64,
        context: &SyncedContext<'_, E>,
        group: &dyn Selection,
        positions: &[Vector3],
    ) -> Result<InducedCharge> {
        if !(cell_distance > 0.0) {
            return Err(Error::InvariantViolation(format!(
                "electrode separation must be positive, got {cell_distance} nm"
            )));
        }
        let mut induced = InducedCharge::default();
        for index in group.atoms() {
            let charge = context.charge(index)?;
            let z = lookup(positions, index)?.z;
            induced.cathode += (z - self.anode_plane) / cell_distance * charge;
            induced.anode -= (z - self.cathode_plane) / cell_distance * charge;
        }
        Ok(induced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrostatic::Coulomb;
    use crate::engine::{CoulombEngine, FieldContext};
    use crate::state::BoxVectors;
    use crate::topology::{AtomGroup, GroupUnion};
    use approx::assert_relative_eq;

    #[test]
    fn test_components_follow_group_order() {
        let forces = vec![
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(4.0, 5.0, 6.0),
            Vector3::new(7.0, 8.0, 9.0),
        ];
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.1),
            Vector3::new(0.0, 0.0, 0.2),
            Vector3::new(0.0, 0.0, 0.3),
        ];
        let a = AtomGroup::new("a", vec![2]);
        let b = AtomGroup::new("b", vec![0]);
        let union = GroupUnion::new(vec![&a, &b]);
        let sampler = FieldSampler::new(&union);

        let field = sampler.field_components(&forces).unwrap();
        assert_eq!(field.x, vec![7.0, 1.0]);
        assert_eq!(field.y, vec![8.0, 2.0]);
        assert_eq!(field.z, vec![9.0, 3.0]);
        assert_eq!(sampler.axial_positions(&positions).unwrap(), vec![0.3, 0.1]);

        let state = SimulationState {
            positions: Some(positions),
            forces: Some(forces),
            ..Default::default()
        };
        let sample = sampler.sample(&state).unwrap();
        assert_eq!(sample.z.len(), sample.field.len());
    }

    #[test]
    fn test_unknown_atom() {
        let group = AtomGroup::new("g", vec![5]);
        let err = FieldSampler::new(&group)
            .field_components(&[Vector3::zeros()])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAtom { index: 5, len: 1 }));
        assert!(FieldSampler::new(&group)
            .sample(&SimulationState::default())
            .is_err());
    }

    #[test]
    fn test_induced_charge() {
        let positions = vec![Vector3::new(0.0, 0.0, 2.0), Vector3::new(0.0, 0.0, 1.0)];
        let engine = CoulombEngine::new(
            Coulomb::vacuum(),
            positions.clone(),
            vec![1.0, -1.0],
            BoxVectors::orthorhombic(1.0, 1.0, 4.0),
        )
        .unwrap();
        let mut context = FieldContext::new(engine);
        let synced = context.synchronize(&positions).unwrap();
        let model = InducedChargeModel {
            cathode_plane: 1.0,
            anode_plane: 3.0,
        };

        // midway charge splits its image evenly
        let mid = AtomGroup::new("mid", vec![0]);
        let q = model.estimate(2.0, &synced, &mid, &positions).unwrap();
        assert_relative_eq!(q.cathode, -0.5);
        assert_relative_eq!(q.anode, -0.5);

        // charge on the cathode plane is fully imaged there
        let wall = AtomGroup::new("wall", vec![1]);
        let q = model.estimate(2.0, &synced, &wall, &positions).unwrap();
        assert_relative_eq!(q.cathode, 1.0);
        assert_relative_eq!(q.anode, 0.0);

        assert!(model.estimate(0.0, &synced, &wall, &positions).is_err());
    }
}
