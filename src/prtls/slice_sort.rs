use crate::prtls::BeamData;
use crate::Geom;
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SliceSortCounts {
    pub stay: usize,
    pub slipped: usize,
    pub invalid: usize,
}

impl SliceSortCounts {
    pub fn total(&self) -> usize {
        self.stay + self.slipped + self.invalid
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Category {
    Stay = 0,
    Slipped = 1,
    Invalid = 2,
}

#[inline(always)]
fn category(beam: &BeamData, i: usize, islice: usize, geom: &Geom) -> Category {
    if beam.id[i] < 0 {
        Category::Invalid
    } else if geom.slice_index(beam.z[i]) < islice as i64 {
        Category::Slipped
    } else {
        Category::Stay
    }
}

/// Compacts the particles of slice `islice` after their push. Particles that
/// moved to a lower slice are appended to `slipped_out`, invalid ones are
/// dropped and the rest stay in `buffer`, keeping their relative order.
pub fn slice_sort(
    buffer: &mut BeamData,
    islice: usize,
    geom: &Geom,
    slipped_out: &mut BeamData,
) -> SliceSortCounts {
    let n = buffer.len();
    let cats: Vec<Category> = (0..n)
        .into_par_iter()
        .map(|i| category(buffer, i, islice, geom))
        .collect();

    let counts = cats
        .par_iter()
        .fold(SliceSortCounts::default, |mut acc, c| {
            match c {
                Category::Stay => acc.stay += 1,
                Category::Slipped => acc.slipped += 1,
                Category::Invalid => acc.invalid += 1,
            }
            acc
        })
        .reduce(SliceSortCounts::default, |a, b| SliceSortCounts {
            stay: a.stay + b.stay,
            slipped: a.slipped + b.slipped,
            invalid: a.invalid + b.invalid,
        });
    if counts.stay == n {
        return counts;
    }

    // exclusive scan per category
    let mut next = [0usize; 3];
    let mut stay = buffer.sized_like(counts.stay);
    let mut slipped = buffer.sized_like(counts.slipped);
    for (i, c) in cats.iter().enumerate() {
        let k = next[*c as usize];
        match c {
            Category::Stay => stay.copy_particle(k, buffer, i),
            Category::Slipped => slipped.copy_particle(k, buffer, i),
            Category::Invalid => {}
        }
        next[*c as usize] += 1;
    }
    std::mem::swap(buffer, &mut stay);
    slipped_out.append(&mut slipped);
    counts
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{build_test_config, BeamConfig, Float, PhysConst};

    fn beam_at(zs: &[Float], ids: &[i64]) -> BeamData {
        let mut beam = BeamData::empty(&BeamConfig::default(), &PhysConst::new(true));
        beam = beam.sized_like(zs.len());
        beam.z.copy_from_slice(zs);
        beam.id.copy_from_slice(ids);
        beam
    }

    #[test]
    fn fast_path_keeps_buffer() {
        let geom = Geom::new(&build_test_config().grid);
        // slice 4 covers z in [0, 0.25)
        let mut beam = beam_at(&[0.1, 0.2, 0.0], &[1, 2, 3]);
        let mut out = beam.sized_like(0);
        let counts = slice_sort(&mut beam, 4, &geom, &mut out);
        assert_eq!(counts.stay, 3);
        assert_eq!(beam.id, vec![1, 2, 3]);
        assert!(out.is_empty());
    }

    #[test]
    fn splits_categories_in_order() {
        let geom = Geom::new(&build_test_config().grid);
        let mut beam = beam_at(
            &[0.1, -0.01, 0.2, -0.5, 0.05, 0.3],
            &[1, 2, -3, 4, 5, 6],
        );
        let mut out = beam.sized_like(0);
        let counts = slice_sort(&mut beam, 4, &geom, &mut out);
        assert_eq!(
            counts,
            SliceSortCounts {
                stay: 3,
                slipped: 2,
                invalid: 1
            }
        );
        assert_eq!(beam.id, vec![1, 5, 6]);
        assert_eq!(out.id, vec![2, 4]);
        assert_eq!(out.z, vec![-0.01, -0.5]);
    }

    #[test]
    fn large_buffer_counts_match_positions() {
        let geom = Geom::new(&build_test_config().grid);
        let n = 20000;
        let zs: Vec<Float> = (0..n).map(|i| -0.5 + 0.75 * i as Float / n as Float).collect();
        let ids: Vec<i64> = (0..n as i64).map(|i| if i % 7 == 0 { -i - 1 } else { i + 1 }).collect();
        let expected_stay = (0..n).filter(|&i| ids[i] > 0 && zs[i] >= 0.0).count();
        let expected_slipped = (0..n).filter(|&i| ids[i] > 0 && zs[i] < 0.0).count();

        let mut beam = beam_at(&zs, &ids);
        let mut out = beam.sized_like(0);
        let counts = slice_sort(&mut beam, 4, &geom, &mut out);
        assert_eq!(counts.stay, expected_stay);
        assert_eq!(counts.slipped, expected_slipped);
        assert_eq!(counts.total(), n);
        assert!(beam.id.windows(2).all(|w| w[0] < w[1]));
        assert!(out.id.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_buffer() {
        let geom = Geom::new(&build_test_config().grid);
        let mut beam = beam_at(&[], &[]);
        let mut out = beam.sized_like(0);
        let counts = slice_sort(&mut beam, 0, &geom, &mut out);
        assert_eq!(counts.total(), 0);
    }
}
