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

//! # Pair electrostatics
//!
//! Potential and field from point charges under a short-range scheme.
//! The reference engine sums these over all pairs to get the per-atom force
//! that the charge solver and the field sampler read back.
//!
//! ## Examples
//! ~~~
//! use conpot::electrostatic::*;
//! let plain = Coulomb::new(1.0, 2.0, None); // cutoff at 2 nm
//! assert_eq!(plain.ion_potential(1.0, 0.5), 2.0);
//! assert_eq!(plain.ion_potential(1.0, 2.5), 0.0);
//! ~~~

mod coulomb;
pub use coulomb::*;

use crate::Vector3;

/// Defines a cutoff distance
pub trait Cutoff {
    /// Squared cutoff distance
    fn cutoff_squared(&self) -> f64 {
        self.cutoff().powi(2)
    }

    /// Cutoff distance
    fn cutoff(&self) -> f64;
}

/// # Short-range function for electrostatic interaction schemes
///
/// The short-range function, _S(q)_, is a function of the reduced distance _q_ = _r_ / _r<sub>c</sub>_.
/// The energy between two point charges is
/// $$ u(r) = \frac{q_1 q_2}{r} \cdot e^{-\kappa r} \cdot S(q) $$
/// and the potential and field below are derived from this.
pub trait ShortRangeFunction: Cutoff {
    /// Inverse Debye screening length.
    ///
    /// The default implementation returns `None`.
    fn kappa(&self) -> Option<f64> {
        None
    }
    /// Prefactor in LENGTH × ENERGY / CHARGE² units
    fn prefactor(&self) -> f64;
    /// Short-range function.
    fn short_range_f0(&self, q: f64) -> f64;
    /// First derivative of the short-range function.
    fn short_range_f1(&self, q: f64) -> f64;
}

/// # Potential from point charges
pub trait ChargePotential: ShortRangeFunction {
    /// Potential at `distance` from `charge`, UNIT: [(input charge) / (input length)]
    #[inline]
    fn ion_potential(&self, charge: f64, distance: f64) -> f64 {
        if distance >= self.cutoff() {
            return 0.0;
        }
        let q = distance / self.cutoff();
        charge / distance
            * self.short_range_f0(q)
            * self.kappa().map_or(1.0, |kappa| (-kappa * distance).exp())
    }
}

/// # Field from point charges
pub trait ChargeField: ShortRangeFunction {
    /// Electrostatic field from a point charge.
    ///
    /// - `charge`: Point charge [UNIT: input charge]
    /// - `r`: Distance vector from the charge to the field point [UNIT: input length]
    ///
    /// Returns the field, UNIT: [(input charge) / (input length)²]
    ///
    /// E(z, r) = z * r / |r|^3 * (s(q)(1 + kr) - q * s'(q)) * exp(-kr)
    fn ion_field(&self, charge: f64, r: &Vector3) -> Vector3 {
        let r2 = r.norm_squared();
        if r2 >= self.cutoff_squared() {
            return Vector3::zeros();
        }
        let r1 = r.norm();
        let q = r1 / self.cutoff();
        let kr = self.kappa().unwrap_or(0.0) * r1;
        charge * r / (r2 * r1)
            * (self.short_range_f0(q) * (1.0 + kr) - q * self.short_range_f1(q))
            * (-kr).exp()
    }
}
