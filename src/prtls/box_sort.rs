use crate::prtls::{invalidate, BeamData};
use crate::Geom;
use std::ops::Range;
use strength_reduce::StrengthReducedUsize;

/// Longitudinal boxes of a rank: `num_boxes` runs of `box_nz` slices
/// starting at slice `islice_lo`.
#[derive(Clone, Copy, Debug)]
pub struct BoxLayout {
    pub islice_lo: usize,
    pub box_nz: usize,
    pub num_boxes: usize,
}

impl BoxLayout {
    pub fn slices(&self, ibox: usize) -> Range<usize> {
        let lo = self.islice_lo + ibox * self.box_nz;
        lo..lo + self.box_nz
    }

    pub fn box_of_slice(&self, islice: usize) -> usize {
        (islice - self.islice_lo) / self.box_nz
    }
}

/// Result of sorting a beam by box. Box `num_boxes` collects the invalid
/// particles.
#[derive(Clone, Debug)]
pub struct BoxSorter {
    pub box_counts: Vec<usize>,
    pub box_offsets: Vec<usize>,
}

impl BoxSorter {
    /// Reorders `beam` so the particles of every box are contiguous.
    /// Particles outside the boxes are invalidated.
    pub fn sort(beam: &mut BeamData, geom: &Geom, boxes: &BoxLayout) -> BoxSorter {
        let nb = boxes.num_boxes;
        let div = StrengthReducedUsize::new(boxes.box_nz);
        let hi = (boxes.islice_lo + nb * boxes.box_nz) as i64;
        let mut which = vec![nb; beam.len()];
        for (i, b) in which.iter_mut().enumerate() {
            if beam.id[i] < 0 {
                continue;
            }
            let s = geom.slice_index(beam.z[i]);
            if s < boxes.islice_lo as i64 || s >= hi {
                invalidate(&mut beam.id[i]);
            } else {
                *b = (s as usize - boxes.islice_lo) / div;
            }
        }

        let mut box_counts = vec![0usize; nb + 1];
        for &b in which.iter() {
            box_counts[b] += 1;
        }
        let mut box_offsets = vec![0usize; nb + 2];
        for b in 0..=nb {
            box_offsets[b + 1] = box_offsets[b] + box_counts[b];
        }

        let mut next = box_offsets.clone();
        let mut sorted = beam.sized_like(beam.len());
        for (i, &b) in which.iter().enumerate() {
            sorted.copy_particle(next[b], beam, i);
            next[b] += 1;
        }
        *beam = sorted;
        BoxSorter {
            box_counts,
            box_offsets,
        }
    }

    /// Indices into the sorted beam of the particles of box `ibox`.
    pub fn range(&self, ibox: usize) -> Range<usize> {
        self.box_offsets[ibox]..self.box_offsets[ibox + 1]
    }

    pub fn num_invalid(&self) -> usize {
        self.box_counts[self.box_counts.len() - 1]
    }

    /// Lowest box holding valid particles, `None` for an empty beam.
    pub fn leftmost_box_with_particles(&self) -> Option<usize> {
        let nb = self.box_counts.len() - 1;
        self.box_counts[..nb].iter().position(|&c| c > 0)
    }
}
