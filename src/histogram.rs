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

//! # Axial field histograms
//!
//! Field samples are binned by their coordinate along the sheet normal into a
//! fixed-width histogram, averaged per bin, and the per-iteration profiles are
//! reduced to an elementwise mean at the end of a run.
//!
//! Empty bins carry no value (`None`) rather than NaN. Persisted tables write
//! them as [`NO_DATA`].
//!
//! ```
//! use conpot::histogram::{HistogramSpec, SpatialHistogram};
//! let spec = HistogramSpec::new(0.025, 14, 0.0);
//! let hist = SpatialHistogram::construct(spec, &[0.3], &[5.0]).unwrap();
//! assert_eq!(hist.counts()[12], 1);
//! assert_eq!(hist.mean(12), Some(5.0));
//! ```

use crate::config::HistogramConfig;
use crate::{mean, Error, Result};
use itertools::izip;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Marker written for bins without samples
pub const NO_DATA: &str = "nodata";

/// Bins closer than this fraction of a width to an edge snap onto the edge
const EDGE_SNAP: f64 = 1e-9;

/// Fixed-width binning along the sheet normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistogramSpec {
    /// nm
    pub bin_width: f64,
    pub bin_count: usize,
    /// Lower edge of bin 0 (nm)
    pub origin: f64,
}

impl From<HistogramConfig> for HistogramSpec {
    fn from(config: HistogramConfig) -> Self {
        Self::new(config.bin_width, config.bin_count, config.origin)
    }
}

impl HistogramSpec {
    pub fn new(bin_width: f64, bin_count: usize, origin: f64) -> Self {
        Self {
            bin_width,
            bin_count,
            origin,
        }
    }

    /// `floor((z - origin) / width)` clipped to `[0, bin_count - 1]`.
    ///
    /// A coordinate within rounding error of a bin edge belongs to the bin
    /// above the edge.
    pub fn bin_index(&self, z: f64) -> usize {
        let t = (z - self.origin) / self.bin_width;
        let nearest = t.round();
        let floor = if (t - nearest).abs() < EDGE_SNAP {
            nearest
        } else {
            t.floor()
        };
        let last = self.bin_count.saturating_sub(1);
        if floor <= 0.0 || floor.is_nan() {
            0
        } else if floor >= last as f64 {
            last
        } else {
            floor as usize
        }
    }

    /// Center of bin `index` (nm)
    pub fn bin_center(&self, index: usize) -> f64 {
        self.origin + (index as f64 + 0.5) * self.bin_width
    }

    pub fn bin_centers(&self) -> Vec<f64> {
        (0..self.bin_count).map(|i| self.bin_center(i)).collect()
    }

    /// Profile with no data in any bin
    pub fn empty_profile(&self) -> FieldProfile {
        FieldProfile {
            centers: self.bin_centers(),
            values: vec![None; self.bin_count],
        }
    }
}

/// Binned field values of one macro-iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialHistogram {
    spec: HistogramSpec,
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl SpatialHistogram {
    /// Bins every `(positions[k], values[k])` pair.
    pub fn construct(spec: HistogramSpec, positions: &[f64], values: &[f64]) -> Result<Self> {
        if positions.len() != values.len() {
            return Err(Error::Engine(format!(
                "{} positions but {} field values",
                positions.len(),
                values.len()
            )));
        }
        if spec.bin_count == 0 || !(spec.bin_width > 0.0) {
            return Err(Error::config(
                "histogram",
                format!(
                    "need at least one bin of positive width, got {} of {}",
                    spec.bin_count, spec.bin_width
                ),
            ));
        }
        let mut sums = vec![0.0; spec.bin_count];
        let mut counts = vec![0; spec.bin_count];
        for (&z, &value) in izip!(positions, values) {
            let bin = spec.bin_index(z);
            sums[bin] += value;
            counts[bin] += 1;
        }
        Ok(Self { spec, sums, counts })
    }

    pub fn spec(&self) -> &HistogramSpec {
        &self.spec
    }

    /// Samples per bin
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Samples over all bins
    pub fn total_count(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Mean field in `bin`, `None` if it holds no samples
    pub fn mean(&self, bin: usize) -> Option<f64> {
        match self.counts.get(bin) {
            Some(&n) if n > 0 => Some(self.sums[bin] / n as f64),
            _ => None,
        }
    }

    /// Per-bin means as a profile
    pub fn profile(&self) -> FieldProfile {
        FieldProfile {
            centers: self.spec.bin_centers(),
            values: (0..self.spec.bin_count).map(|i| self.mean(i)).collect(),
        }
    }
}

/// `(bin center, mean field)` pairs for one field component.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldProfile {
    centers: Vec<f64>,
    values: Vec<Option<f64>>,
}

impl FieldProfile {
    pub fn new(centers: Vec<f64>, values: Vec<Option<f64>>) -> Result<Self> {
        if centers.len() != values.len() {
            return Err(Error::Engine(format!(
                "{} bin centers but {} values",
                centers.len(),
                values.len()
            )));
        }
        Ok(Self { centers, values })
    }

    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// Number of bins without data
    pub fn empty_bins(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// Writes a two-column `center value` table.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        for (center, value) in self.centers.iter().zip(&self.values) {
            match value {
                Some(v) => writeln!(writer, "{center:.6} {v:.12e}")?,
                None => writeln!(writer, "{center:.6} {NO_DATA}")?,
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Parses a table written by [`write`](Self::write). Blank lines and `#`
    /// comments are skipped.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut centers = Vec::new();
        let mut values = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut columns = line.split_whitespace();
            let (Some(center), Some(value), None) =
                (columns.next(), columns.next(), columns.next())
            else {
                return Err(Error::parse(n + 1, "expected two columns"));
            };
            let center: f64 = center
                .parse()
                .map_err(|e| Error::parse(n + 1, format!("bin center: {e}")))?;
            let value = match value {
                NO_DATA => None,
                v => Some(
                    v.parse::<f64>()
                        .map_err(|e| Error::parse(n + 1, format!("value: {e}")))?,
                ),
            };
            centers.push(center);
            values.push(value);
        }
        Self::new(centers, values)
    }
}

/// Ordered list of per-iteration profiles for one field component.
///
/// The mean is only formed on request, as an elementwise mean over the
/// iterations in which each bin had data.
#[derive(Clone, Debug, Default)]
pub struct ProfileAccumulator {
    profiles: Vec<FieldProfile>,
}

impl ProfileAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one iteration's profile.
    pub fn accumulate(&mut self, profile: FieldProfile) -> Result<()> {
        if let Some(first) = self.profiles.first() {
            if first.centers != profile.centers {
                return Err(Error::Engine(
                    "profile binning differs from earlier iterations".into(),
                ));
            }
        }
        self.profiles.push(profile);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn profiles(&self) -> &[FieldProfile] {
        &self.profiles
    }

    /// Elementwise mean of all collected profiles; `None` when nothing was collected.
    pub fn mean(&self) -> Option<FieldProfile> {
        let first = self.profiles.first()?;
        let values = (0..first.len())
            .map(|bin| {
                let present: Vec<f64> =
                    self.profiles.iter().filter_map(|p| p.values[bin]).collect();
                mean(&present)
            })
            .collect();
        Some(FieldProfile {
            centers: first.centers.clone(),
            values,
        })
    }
}

/// Writes `profile` to `path` as a two-column table.
pub fn persist(profile: &FieldProfile, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io_at(path, e))?;
    profile.write(BufWriter::new(file))
}

/// Reads a table written by [`persist`].
pub fn load_profile(path: impl AsRef<Path>) -> Result<FieldProfile> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    FieldProfile::read(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reference() -> HistogramSpec {
        HistogramSpec::new(0.025, 14, 0.0)
    }

    #[test]
    fn test_single_atom_bin() {
        let spec = reference();
        assert_eq!(spec.bin_index(0.3), 12);
        let hist = SpatialHistogram::construct(spec, &[0.3], &[5.0]).unwrap();
        assert_eq!(hist.counts()[12], 1);
        assert_eq!(hist.mean(12), Some(5.0));
        assert_eq!(hist.total_count(), 1);
        assert_eq!(hist.mean(11), None);
        assert_eq!(hist.mean(99), None);
    }

    #[test]
    fn test_bin_edges_and_clipping() {
        let spec = reference();
        assert_eq!(spec.bin_index(0.0), 0);
        assert_eq!(spec.bin_index(0.025), 1);
        assert_eq!(spec.bin_index(0.0249), 0);
        assert_eq!(spec.bin_index(0.075), 3);
        assert_eq!(spec.bin_index(-1.0), 0);
        assert_eq!(spec.bin_index(0.35), 13);
        assert_eq!(spec.bin_index(10.0), 13);
        assert_eq!(spec.bin_index(f64::NAN), 0);

        let shifted = HistogramSpec::new(0.5, 4, 1.0);
        assert_eq!(shifted.bin_index(1.6), 1);
        assert_relative_eq!(shifted.bin_center(1), 1.75);
    }

    #[test]
    fn test_bin_conservation() {
        let spec = reference();
        let positions: Vec<f64> = (0..400).map(|i| -0.05 + i as f64 * 0.00125).collect();
        let values = vec![1.0; positions.len()];
        let hist = SpatialHistogram::construct(spec, &positions, &values).unwrap();
        assert_eq!(hist.total_count(), positions.len());
        // every edge k * 0.025 lands in bin k
        let edges: Vec<f64> = (0..14).map(|k| k as f64 * 0.025).collect();
        let hist = SpatialHistogram::construct(spec, &edges, &vec![0.0; 14]).unwrap();
        assert!(hist.counts().iter().all(|&n| n == 1));
    }

    #[test]
    fn test_bin_means() {
        let spec = HistogramSpec::new(1.0, 3, 0.0);
        let hist =
            SpatialHistogram::construct(spec, &[0.2, 0.7, 2.5], &[1.0, 3.0, -4.0]).unwrap();
        let profile = hist.profile();
        assert_eq!(profile.centers(), &[0.5, 1.5, 2.5]);
        assert_eq!(profile.values(), &[Some(2.0), None, Some(-4.0)]);
        assert_eq!(profile.empty_bins(), 1);
        assert_eq!(spec.empty_profile().empty_bins(), 3);
        assert!(SpatialHistogram::construct(spec, &[0.1], &[]).is_err());
    }

    #[test]
    fn test_degenerate_binning_is_an_error() {
        let no_bins = HistogramSpec::new(0.025, 0, 0.0);
        assert!(matches!(
            SpatialHistogram::construct(no_bins, &[0.3], &[5.0]),
            Err(Error::Config { .. })
        ));
        let flat = HistogramSpec::new(0.0, 14, 0.0);
        assert!(SpatialHistogram::construct(flat, &[0.3], &[5.0]).is_err());
    }

    #[test]
    fn test_accumulated_mean_skips_empty_bins() {
        let spec = HistogramSpec::new(1.0, 3, 0.0);
        let mut acc = ProfileAccumulator::new();
        assert!(acc.mean().is_none());
        acc.accumulate(
            SpatialHistogram::construct(spec, &[0.5, 1.5], &[2.0, 6.0])
                .unwrap()
                .profile(),
        )
        .unwrap();
        acc.accumulate(
            SpatialHistogram::construct(spec, &[0.5], &[4.0])
                .unwrap()
                .profile(),
        )
        .unwrap();
        assert_eq!(acc.len(), 2);
        let mean = acc.mean().unwrap();
        assert_eq!(mean.values(), &[Some(3.0), Some(6.0), None]);

        let other = HistogramSpec::new(0.5, 3, 0.0);
        let mismatched = SpatialHistogram::construct(other, &[], &[]).unwrap().profile();
        assert!(acc.accumulate(mismatched).is_err());
    }

    #[test]
    fn test_persist_round_trip() {
        let profile = FieldProfile::new(
            vec![0.0125, 0.0375, 0.0625],
            vec![Some(-12.345678901234), None, Some(3.0e-7)],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Ez_hist.dat");
        persist(&profile, &path).unwrap();
        let loaded = load_profile(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        for (a, b) in loaded.centers().iter().zip(profile.centers()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
        assert_relative_eq!(loaded.values()[0].unwrap(), -12.345678901234, epsilon = 1e-9);
        assert_eq!(loaded.values()[1], None);
        assert_relative_eq!(loaded.values()[2].unwrap(), 3.0e-7, epsilon = 1e-18);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let text = "# z field\n0.1 1.0\n0.2\n";
        let err = FieldProfile::read(text.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 3, .. }));
        assert!(FieldProfile::read("0.1 abc\n".as_bytes()).is_err());
        assert!(load_profile("/nonexistent/profile.dat").is_err());
    }
}
