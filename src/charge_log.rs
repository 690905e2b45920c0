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

//! Per-iteration electrode charge log.
//!
//! One whitespace separated line per macro-iteration:
//!
//! ```text
//! iteration Q_cathode Q_anode converged iterations_used deviation [q_0 q_1 ...]
//! ```
//!
//! The trailing per-atom charges, in electrode order, are only written when
//! requested.

use crate::solver::{ElectrodeChargeSolver, SolveResult};
use crate::topology::ElectrodeRole;
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Line-oriented sink for the solved electrode charges.
#[derive(Debug)]
pub struct ChargeLog<W: Write> {
    writer: W,
    per_atom: bool,
    records: usize,
}

impl ChargeLog<BufWriter<File>> {
    /// Creates (truncates) the log file at `path`.
    pub fn create(path: impl AsRef<Path>, per_atom: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io_at(path, e))?;
        Self::new(BufWriter::new(file), per_atom)
    }
}

impl<W: Write> ChargeLog<W> {
    /// Wraps `writer` and writes the column header.
    pub fn new(mut writer: W, per_atom: bool) -> Result<Self> {
        write!(
            writer,
            "# iteration Q_cathode Q_anode converged iterations_used deviation"
        )?;
        if per_atom {
            write!(writer, " charges")?;
        }
        writeln!(writer)?;
        Ok(Self {
            writer,
            per_atom,
            records: 0,
        })
    }

    /// Appends the charge state after the solve of macro-iteration `iteration`.
    pub fn record(
        &mut self,
        iteration: usize,
        solver: &ElectrodeChargeSolver,
        result: &SolveResult,
    ) -> Result<()> {
        write!(
            self.writer,
            "{} {:.8} {:.8} {} {} {:.6e}",
            iteration,
            solver.total(ElectrodeRole::Cathode),
            solver.total(ElectrodeRole::Anode),
            u8::from(result.converged),
            result.iterations_used,
            result.final_deviation
        )?;
        if self.per_atom {
            for charge in solver.charges() {
                write!(self.writer, " {charge:.8}")?;
            }
        }
        writeln!(self.writer)?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Lines written so far, header excluded
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::AppliedPotential;
    use crate::topology::{AtomGroup, ElectrodeAtomSet};

    fn solver() -> ElectrodeChargeSolver {
        let electrodes = ElectrodeAtomSet::new(
            &AtomGroup::new("cathode", vec![0]),
            &AtomGroup::new("dummy", vec![1]),
            &AtomGroup::new("anode", vec![2]),
            3,
        )
        .unwrap();
        let potential = AppliedPotential {
            voltage: 0.0,
            area_per_atom: 1.0,
            vacuum_gap: 1.0,
            conversion: 1.0,
        };
        ElectrodeChargeSolver::initialize(3, electrodes, &potential, 0.5).unwrap()
    }

    fn result(converged: bool) -> SolveResult {
        SolveResult {
            charges: vec![0.5, 0.0, -0.5],
            converged,
            iterations_used: 2,
            final_deviation: 0.25,
            deviations: vec![0.5, 0.25],
        }
    }

    #[test]
    fn test_aggregate_lines() {
        let solver = solver();
        let mut log = ChargeLog::new(Vec::new(), false).unwrap();
        log.record(1, &solver, &result(true)).unwrap();
        log.record(2, &solver, &result(false)).unwrap();
        assert_eq!(log.records(), 2);
        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('#'));
        assert_eq!(lines[1], "1 0.50000000 -0.50000000 1 2 2.500000e-1");
        assert!(lines[2].starts_with("2 ") && lines[2].contains(" 0 2 "));
    }

    #[test]
    fn test_per_atom_columns() {
        let solver = solver();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charges.dat");
        let mut log = ChargeLog::create(&path, true).unwrap();
        log.record(7, &solver, &result(true)).unwrap();
        drop(log);
        let text = std::fs::read_to_string(&path).unwrap();
        let last = text.lines().last().unwrap();
        let columns: Vec<&str> = last.split_whitespace().collect();
        assert_eq!(columns.len(), 6 + 3);
        assert_eq!(columns[0], "7");
        assert_eq!(&columns[6..], &["0.50000000", "0.00000000", "-0.50000000"]);
    }
}
