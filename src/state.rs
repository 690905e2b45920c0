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

//! Snapshots read back from an evaluation context.

use crate::{Error, Matrix3, Result, Vector3};
use serde::{Deserialize, Serialize};

/// Periodic box vectors (nm).
///
/// The electrode sheets lie in the plane spanned by `a` and `b`;
/// `c` is the axis perpendicular to them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxVectors {
    pub a: Vector3,
    pub b: Vector3,
    pub c: Vector3,
}

impl BoxVectors {
    pub fn new(a: Vector3, b: Vector3, c: Vector3) -> Self {
        Self { a, b, c }
    }

    /// Rectangular box with the given side lengths
    pub fn orthorhombic(x: f64, y: f64, z: f64) -> Self {
        Self::new(
            Vector3::new(x, 0.0, 0.0),
            Vector3::new(0.0, y, 0.0),
            Vector3::new(0.0, 0.0, z),
        )
    }

    /// Box vectors as matrix columns
    pub fn matrix(&self) -> Matrix3 {
        Matrix3::from_columns(&[self.a, self.b, self.c])
    }

    /// Area of the sheet plane, |a × b| (nm²)
    pub fn cross_section_area(&self) -> f64 {
        self.a.cross(&self.b).norm()
    }

    /// Box extent along the sheet normal (nm)
    pub fn z_length(&self) -> f64 {
        self.c.z
    }

    /// Minimum image of a distance vector, periodic in the sheet plane only.
    ///
    /// Assumes the reduced form where `a` lies along x and `b` in the xy-plane.
    pub fn minimum_image_xy(&self, mut dr: Vector3) -> Vector3 {
        if self.b.y != 0.0 {
            dr -= self.b * (dr.y / self.b.y).round();
        }
        if self.a.x != 0.0 {
            dr -= self.a * (dr.x / self.a.x).round();
        }
        dr
    }
}

/// Which quantities a state read should populate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateFlags {
    pub positions: bool,
    pub forces: bool,
    pub energy: bool,
}

impl StateFlags {
    pub const ALL: Self = Self {
        positions: true,
        forces: true,
        energy: true,
    };
    pub const POSITIONS: Self = Self {
        positions: true,
        forces: false,
        energy: false,
    };
}

/// Positions, forces and energies of one context at one point in time.
///
/// Quantities not asked for in [`StateFlags`] are `None`.
#[derive(Clone, Debug, Default)]
pub struct SimulationState {
    pub positions: Option<Vec<Vector3>>,
    pub forces: Option<Vec<Vector3>>,
    /// kJ/mol
    pub potential_energy: Option<f64>,
    /// kJ/mol
    pub kinetic_energy: Option<f64>,
    pub box_vectors: Option<BoxVectors>,
}

impl SimulationState {
    pub fn positions(&self) -> Result<&[Vector3]> {
        self.positions
            .as_deref()
            .ok_or_else(|| Error::Engine("state was read without positions".into()))
    }

    pub fn forces(&self) -> Result<&[Vector3]> {
        self.forces
            .as_deref()
            .ok_or_else(|| Error::Engine("state was read without forces".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_geometry() {
        let cell = BoxVectors::orthorhombic(2.0, 3.0, 10.0);
        assert_relative_eq!(cell.cross_section_area(), 6.0);
        assert_relative_eq!(cell.z_length(), 10.0);
        assert_relative_eq!(cell.matrix().determinant(), 60.0);

        // hexagonal sheet cell
        let a = 2.0;
        let hex = BoxVectors::new(
            Vector3::new(a, 0.0, 0.0),
            Vector3::new(0.5 * a, 0.5 * 3f64.sqrt() * a, 0.0),
            Vector3::new(0.0, 0.0, 8.0),
        );
        assert_relative_eq!(hex.cross_section_area(), 0.5 * 3f64.sqrt() * a * a);
    }

    #[test]
    fn test_minimum_image() {
        let cell = BoxVectors::orthorhombic(2.0, 3.0, 10.0);
        let dr = cell.minimum_image_xy(Vector3::new(1.9, -2.0, 7.0));
        assert_relative_eq!(dr.x, -0.1, epsilon = 1e-12);
        assert_relative_eq!(dr.y, 1.0, epsilon = 1e-12);
        // z is not periodic
        assert_relative_eq!(dr.z, 7.0);
    }

    #[test]
    fn test_missing_quantities() {
        let state = SimulationState::default();
        assert!(state.positions().is_err());
        assert!(matches!(state.forces(), Err(Error::Engine(_))));
    }
}
