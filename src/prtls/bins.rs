use crate::prtls::BeamData;
use crate::Geom;
use std::ops::Range;

/// Indices of the beam particles of each slice of one box.
#[derive(Clone, Debug, Default)]
pub struct BeamBins {
    islice_lo: usize,
    pub permutation: Vec<usize>,
    pub offsets: Vec<usize>,
}

impl BeamBins {
    /// Counting sort by slice of the particles in `range`. Invalid particles
    /// and particles outside `islice_lo..islice_lo + nslices` are left out.
    pub fn build(
        beam: &BeamData,
        range: Range<usize>,
        geom: &Geom,
        islice_lo: usize,
        nslices: usize,
    ) -> BeamBins {
        let bin_of = |i: usize| -> Option<usize> {
            if beam.id[i] < 0 {
                return None;
            }
            let s = geom.slice_index(beam.z[i]) - islice_lo as i64;
            if s >= 0 && (s as usize) < nslices {
                Some(s as usize)
            } else {
                None
            }
        };
        let mut offsets = vec![0usize; nslices + 1];
        for i in range.clone() {
            if let Some(b) = bin_of(i) {
                offsets[b + 1] += 1;
            }
        }
        for b in 0..nslices {
            offsets[b + 1] += offsets[b];
        }
        let mut next = offsets.clone();
        let mut permutation = vec![0usize; offsets[nslices]];
        for i in range {
            if let Some(b) = bin_of(i) {
                permutation[next[b]] = i;
                next[b] += 1;
            }
        }
        BeamBins {
            islice_lo,
            permutation,
            offsets,
        }
    }

    /// Particle indices of slice `islice`; empty outside the box.
    pub fn slice(&self, islice: usize) -> &[usize] {
        if islice < self.islice_lo || islice + 1 >= self.islice_lo + self.offsets.len() {
            return &[];
        }
        let b = islice - self.islice_lo;
        &self.permutation[self.offsets[b]..self.offsets[b + 1]]
    }

    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{build_test_config, BeamConfig, PhysConst};

    #[test]
    fn bins_by_slice() {
        let geom = Geom::new(&build_test_config().grid);
        let beam = BeamData::empty(&BeamConfig::default(), &PhysConst::new(true));
        let mut beam = beam.sized_like(6);
        // slices 5, 4, 5, 6, 4, 5
        beam.z.copy_from_slice(&[0.3, 0.1, 0.4, 0.6, 0.0, 0.26]);
        beam.id.copy_from_slice(&[1, 2, 3, 4, 5, -6]);
        let bins = BeamBins::build(&beam, 0..5, &geom, 4, 2);
        assert_eq!(bins.slice(4), &[1, 4]);
        assert_eq!(bins.slice(5), &[0, 2]);
        assert!(bins.slice(6).is_empty());
        assert!(bins.slice(3).is_empty());
        assert_eq!(bins.len(), 4);
    }
}
