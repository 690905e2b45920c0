// Copyright 2023 Björn Stenqvist and Mikael Lund
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

use super::{ChargeField, ChargePotential, Cutoff, ShortRangeFunction};
use crate::ELECTRIC_PREFACTOR;
#[cfg(test)]
use crate::Vector3;
#[cfg(test)]
use approx::assert_relative_eq;
use serde::{Deserialize, Serialize};

impl ChargePotential for Coulomb {}
impl ChargeField for Coulomb {}

/// # Scheme for vanilla coulomb interactions
///
/// In this scheme, the short-range function is _S(q)_ = 1.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Coulomb {
    /// Cut-off distance (nm)
    cutoff: f64,
    /// Optional inverse Debye length (1/nm)
    kappa: Option<f64>,
    /// Prefactor in units of nm × kJ / mol
    prefactor: f64,
}

impl Coulomb {
    pub fn new(permittivity: f64, cutoff: f64, debye_length: Option<f64>) -> Self {
        Self {
            cutoff,
            kappa: debye_length.map(f64::recip),
            prefactor: ELECTRIC_PREFACTOR / permittivity,
        }
    }

    /// Unscreened vacuum Coulomb with no cutoff
    pub fn vacuum() -> Self {
        Self::new(1.0, f64::INFINITY, None)
    }
}

impl Cutoff for Coulomb {
    #[inline]
    fn cutoff(&self) -> f64 {
        self.cutoff
    }
}

impl ShortRangeFunction for Coulomb {
    #[inline]
    fn prefactor(&self) -> f64 {
        self.prefactor
    }
    #[inline]
    fn kappa(&self) -> Option<f64> {
        self.kappa
    }
    #[inline]
    fn short_range_f0(&self, _q: f64) -> f64 {
        1.0
    }
    #[inline]
    fn short_range_f1(&self, _q: f64) -> f64 {
        0.0
    }
}

#[test]
fn test_coulomb() {
    let cutoff: f64 = 2.9;
    let z1 = 2.0;
    let r = Vector3::new(2.3, 0.0, 0.0);
    let rh = Vector3::new(1.0, 0.0, 0.0);

    let pot = Coulomb::new(80.0, cutoff, None);
    let eps = 1e-9;

    assert_eq!(pot.short_range_f0(0.5), 1.0);
    assert_eq!(pot.short_range_f1(0.5), 0.0);
    assert_relative_eq!(pot.prefactor(), ELECTRIC_PREFACTOR / 80.0);

    // potential
    assert_eq!(pot.ion_potential(z1, cutoff + 0.1), 0.0);
    assert_relative_eq!(pot.ion_potential(z1, r.norm()), z1 / 2.3, epsilon = eps);

    // field
    assert_relative_eq!(
        pot.ion_field(z1, &((cutoff + 0.1) * rh)).norm(),
        0.0,
        epsilon = eps
    );
    let field = pot.ion_field(z1, &r);
    assert_relative_eq!(field[0], z1 / (2.3 * 2.3), epsilon = eps);
    assert_relative_eq!(field[1], 0.0, epsilon = eps);

    // field points away from a positive charge in every direction
    let diagonal = Vector3::new(0.3, -0.4, 0.0);
    let field = pot.ion_field(1.0, &diagonal);
    assert_relative_eq!(field.norm(), 1.0 / 0.25, epsilon = eps);
    assert_relative_eq!(field.normalize().dot(&diagonal.normalize()), 1.0, epsilon = eps);

    // screened
    let pot = Coulomb::new(80.0, cutoff, Some(2.3));
    assert_relative_eq!(pot.kappa().unwrap(), 1.0 / 2.3, epsilon = eps);
    assert_relative_eq!(
        pot.ion_potential(z1, r.norm()),
        z1 / 2.3 * (-1.0f64).exp(),
        epsilon = eps
    );
    let field = pot.ion_field(z1, &r);
    assert_relative_eq!(
        field[0],
        z1 / (2.3 * 2.3) * 2.0 * (-1.0f64).exp(),
        epsilon = eps
    );
}
