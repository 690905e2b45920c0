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

//! # System files
//!
//! Multi-frame plain text, each frame being
//!
//! ```text
//! 3
//! box=3.0,0.0,0.0 0.0,3.0,0.0 0.0,0.0,9.0
//! cathode C0  0.0 0.0 1.0  0.0
//! BMIM    H1  0.0 0.0 2.5  0.2
//! anode   C0  0.0 0.0 5.0  0.0
//! ```
//!
//! with coordinates in nm and charges in e. Atom names and charges are taken
//! from the first frame; later frames only contribute positions.

use crate::state::BoxVectors;
use crate::topology::{AtomRecord, Topology};
use crate::{Error, Result, Vector3};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Topology and positions read from a system file.
#[derive(Clone, Debug)]
pub struct SystemFile {
    pub topology: Topology,
    /// Positions per frame; the first frame is the initial state
    pub frames: Vec<Vec<Vector3>>,
    /// Box from the first comment line, if given
    pub box_vectors: Option<BoxVectors>,
}

impl SystemFile {
    /// Reads and parses `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
        Self::read(BufReader::new(file))
    }

    /// Parses all frames from `reader`.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader
            .lines()
            .enumerate()
            .map(|(n, line)| line.map(|l| (n + 1, l)));
        let mut records: Option<Vec<AtomRecord>> = None;
        let mut frames = Vec::new();
        let mut box_vectors = None;

        while let Some(line) = lines.next() {
            let (number, count_line) = line?;
            if count_line.trim().is_empty() {
                continue;
            }
            let count: usize = count_line
                .trim()
                .parse()
                .map_err(|e| Error::parse(number, format!("atom count: {e}")))?;
            let (number, comment) = lines
                .next()
                .ok_or_else(|| Error::parse(number, "missing comment line"))??;
            if frames.is_empty() {
                box_vectors = parse_box(&comment).map_err(|detail| Error::parse(number, detail))?;
            }

            let mut atoms = Vec::with_capacity(count);
            let mut positions = Vec::with_capacity(count);
            let mut last = number;
            for _ in 0..count {
                let (number, text) = lines
                    .next()
                    .ok_or_else(|| Error::parse(last, format!("frame ends before {count} atoms")))??;
                let (record, position) = parse_atom(&text).map_err(|d| Error::parse(number, d))?;
                atoms.push(record);
                positions.push(position);
                last = number;
            }

            match &records {
                None => records = Some(atoms),
                Some(first) => {
                    if first.len() != count {
                        return Err(Error::parse(
                            last,
                            format!("frame {} has {count} atoms, expected {}", frames.len(), first.len()),
                        ));
                    }
                    if let Some(k) = first
                        .iter()
                        .zip(&atoms)
                        .position(|(a, b)| a.residue != b.residue || a.name != b.name)
                    {
                        return Err(Error::parse(
                            last,
                            format!("atom {k} of frame {} does not match the first frame", frames.len()),
                        ));
                    }
                }
            }
            frames.push(positions);
        }

        let records = records.ok_or_else(|| Error::parse(0, "no frames"))?;
        log::debug!("read {} atoms in {} frame(s)", records.len(), frames.len());
        Ok(Self {
            topology: Topology::new(records),
            frames,
            box_vectors,
        })
    }

    /// Positions of the first frame
    pub fn initial_positions(&self) -> &[Vector3] {
        self.frames.first().map_or(&[], Vec::as_slice)
    }
}

fn parse_atom(line: &str) -> std::result::Result<(AtomRecord, Vector3), String> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    let [residue, name, x, y, z, charge] = columns[..] else {
        return Err(format!(
            "expected `residue name x y z charge`, got {} columns",
            columns.len()
        ));
    };
    let number = |s: &str| s.parse::<f64>().map_err(|e| format!("`{s}`: {e}"));
    let record = AtomRecord {
        residue: residue.to_string(),
        name: name.to_string(),
        charge: number(charge)?,
    };
    Ok((record, Vector3::new(number(x)?, number(y)?, number(z)?)))
}

/// Extracts `box=ax,ay,az bx,by,bz cx,cy,cz` from a comment line.
fn parse_box(comment: &str) -> std::result::Result<Option<BoxVectors>, String> {
    let Some(start) = comment.find("box=") else {
        return Ok(None);
    };
    let vectors = comment[start + 4..]
        .split_whitespace()
        .take(3)
        .map(|triplet| {
            let values = triplet
                .split(',')
                .map(|v| v.parse::<f64>().map_err(|e| format!("box `{v}`: {e}")))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            match values[..] {
                [x, y, z] => Ok(Vector3::new(x, y, z)),
                _ => Err(format!("box vector `{triplet}` needs three components")),
            }
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    match vectors[..] {
        [a, b, c] => Ok(Some(BoxVectors::new(a, b, c))),
        _ => Err("box needs three vectors".to_string()),
    }
}
