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

//! Atom groups and the electrode atom set.
//!
//! Groups are immutable index lists into one backing atom array. Composite
//! groups such as "all electrolyte hydrogens" are unions over references to
//! their parts rather than copied lists.

use crate::{Error, Result};
use std::ops::Range;

/// One atom as read from a system file.
#[derive(Clone, Debug, PartialEq)]
pub struct AtomRecord {
    /// Residue or group label used for selection
    pub residue: String,
    /// Atom name; its leading characters select e.g. hydrogens
    pub name: String,
    /// Initial partial charge (e)
    pub charge: f64,
}

/// Ordered atom records of a system
#[derive(Clone, Debug, Default)]
pub struct Topology {
    atoms: Vec<AtomRecord>,
}

impl Topology {
    pub fn new(atoms: Vec<AtomRecord>) -> Self {
        Self { atoms }
    }

    pub fn atoms(&self) -> &[AtomRecord] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Initial charges in atom order
    pub fn charges(&self) -> Vec<f64> {
        self.atoms.iter().map(|a| a.charge).collect()
    }

    /// Atoms of `residue` whose name starts with `name_prefix` (empty prefix matches all).
    pub fn select(&self, residue: &str, name_prefix: &str) -> AtomGroup {
        let indices = self
            .atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.residue == residue && a.name.starts_with(name_prefix))
            .map(|(i, _)| i)
            .collect();
        AtomGroup::new(format!("{residue}:{name_prefix}"), indices)
    }
}

/// Anything that enumerates atom indices in a fixed order.
pub trait Selection {
    fn atoms(&self) -> Box<dyn Iterator<Item = usize> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable, ordered list of atoms belonging to one species or probe.
#[derive(Clone, Debug, PartialEq)]
pub struct AtomGroup {
    name: String,
    indices: Vec<usize>,
}

impl AtomGroup {
    pub fn new(name: impl Into<String>, indices: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            indices,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Selection for AtomGroup {
    fn atoms(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        Box::new(self.indices.iter().copied())
    }
    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Ordered union of groups, e.g. cation + anion + solvent hydrogens.
#[derive(Clone, Debug)]
pub struct GroupUnion<'a> {
    parts: Vec<&'a AtomGroup>,
}

impl<'a> GroupUnion<'a> {
    pub fn new(parts: Vec<&'a AtomGroup>) -> Self {
        Self { parts }
    }
}

impl Selection for GroupUnion<'_> {
    fn atoms(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        Box::new(self.parts.iter().flat_map(|g| g.atoms()))
    }
    fn len(&self) -> usize {
        self.parts.iter().map(|g| g.len()).sum()
    }
}

/// Role of an electrode atom
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectrodeRole {
    /// Positively charged sheet
    Cathode,
    /// Neutral interior sheet; charge is never updated
    Dummy,
    /// Negatively charged sheet
    Anode,
}

impl ElectrodeRole {
    /// Sign of the charge carried by this role
    pub fn sign(&self) -> f64 {
        match self {
            Self::Cathode => 1.0,
            Self::Dummy => 0.0,
            Self::Anode => -1.0,
        }
    }
}

/// Electrode atoms laid out as `cathode | dummy | anode` over one backing list.
///
/// Positions into [`ElectrodeAtomSet::atoms`] are the positions used for the
/// solver's charge vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ElectrodeAtomSet {
    atoms: Vec<usize>,
    cathode: Range<usize>,
    dummy: Range<usize>,
    anode: Range<usize>,
}

impl ElectrodeAtomSet {
    /// Composes the electrode from its three sheets and checks the total count.
    ///
    /// Fails with [`Error::InvariantViolation`] if the total differs from
    /// `expected_total`, if either charged sheet is empty, or if an atom
    /// appears in more than one sheet.
    pub fn new(
        cathode: &AtomGroup,
        dummy: &AtomGroup,
        anode: &AtomGroup,
        expected_total: usize,
    ) -> Result<Self> {
        let total = cathode.len() + dummy.len() + anode.len();
        if total != expected_total {
            return Err(Error::InvariantViolation(format!(
                "expected {expected_total} electrode atoms, found {total} (cathode {}, dummy {}, anode {})",
                cathode.len(),
                dummy.len(),
                anode.len()
            )));
        }
        if cathode.is_empty() || anode.is_empty() {
            return Err(Error::InvariantViolation(
                "cathode and anode must each contain at least one atom".into(),
            ));
        }
        let atoms: Vec<usize> = cathode
            .atoms()
            .chain(dummy.atoms())
            .chain(anode.atoms())
            .collect();

        let mut sorted = atoms.clone();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::InvariantViolation(format!(
                "atom {} belongs to more than one electrode sheet",
                w[0]
            )));
        }

        let c_end = cathode.len();
        let d_end = c_end + dummy.len();
        Ok(Self {
            atoms,
            cathode: 0..c_end,
            dummy: c_end..d_end,
            anode: d_end..total,
        })
    }

    /// All electrode atom indices, cathode first
    pub fn atoms(&self) -> &[usize] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn cathode(&self) -> &[usize] {
        &self.atoms[self.cathode.clone()]
    }

    pub fn dummy(&self) -> &[usize] {
        &self.atoms[self.dummy.clone()]
    }

    pub fn anode(&self) -> &[usize] {
        &self.atoms[self.anode.clone()]
    }

    /// Role of the atom at `position` in [`Self::atoms`]
    pub fn role(&self, position: usize) -> ElectrodeRole {
        if self.cathode.contains(&position) {
            ElectrodeRole::Cathode
        } else if self.dummy.contains(&position) {
            ElectrodeRole::Dummy
        } else {
            ElectrodeRole::Anode
        }
    }

    /// `(atom index, role)` in electrode order
    pub fn iter_roles(&self) -> impl Iterator<Item = (usize, ElectrodeRole)> + '_ {
        self.atoms
            .iter()
            .enumerate()
            .map(|(pos, &atom)| (atom, self.role(pos)))
    }

    /// Number of cathode plus anode atoms
    pub fn charged_len(&self) -> usize {
        self.cathode.len() + self.anode.len()
    }
}

impl Selection for ElectrodeAtomSet {
    fn atoms(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        Box::new(self.atoms.iter().copied())
    }
    fn len(&self) -> usize {
        self.atoms.len()
    }
}
