mod common;

use proptest::prelude::*;
use wakefield_rs::prtls::bins::BeamBins;
use wakefield_rs::prtls::box_sort::{BoxLayout, BoxSorter};
use wakefield_rs::prtls::slice_sort::slice_sort;
use wakefield_rs::prtls::BeamData;
use wakefield_rs::{BeamConfig, Float, PhysConst};

fn beam_from(zs: &[Float], invalid: &[bool]) -> BeamData {
    let mut beam = BeamData::empty(&BeamConfig::default(), &PhysConst::new(true)).sized_like(zs.len());
    beam.z.copy_from_slice(zs);
    for (i, id) in beam.id.iter_mut().enumerate() {
        *id = if invalid[i] { -(i as i64) - 1 } else { i as i64 + 1 };
    }
    beam
}

fn particles() -> impl Strategy<Value = (Vec<Float>, Vec<bool>)> {
    prop::collection::vec((-2.5..2.5f64, prop::bool::weighted(0.1)), 0..200)
        .prop_map(|v| v.into_iter().map(|(z, inv)| (z as Float, inv)).unzip())
}

proptest! {
    #[test]
    fn slice_sort_conserves_particles((zs, invalid) in particles(), islice in 0usize..8) {
        let (_, geom) = common::setup_geom();
        let mut buffer = beam_from(&zs, &invalid);
        let mut slipped = buffer.sized_like(0);
        let valid_before = buffer.num_valid();
        let counts = slice_sort(&mut buffer, islice, &geom, &mut slipped);

        prop_assert_eq!(counts.total(), zs.len());
        prop_assert_eq!(counts.stay, buffer.len());
        prop_assert_eq!(counts.slipped, slipped.len());
        prop_assert_eq!(counts.stay + counts.slipped, valid_before);
        prop_assert!(buffer.z.iter().all(|&z| geom.slice_index(z) >= islice as i64));
        prop_assert!(slipped.z.iter().all(|&z| geom.slice_index(z) < islice as i64));
        // staying particles keep their order
        prop_assert!(buffer.id.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn box_sort_and_bins_cover_every_slice((zs, invalid) in particles(), box_nz in prop::sample::select(vec![1usize, 2, 4, 8])) {
        let (_, geom) = common::setup_geom();
        let mut beam = beam_from(&zs, &invalid);
        let layout = BoxLayout { islice_lo: 0, box_nz, num_boxes: geom.nz / box_nz };
        let in_box = zs
            .iter()
            .zip(invalid.iter())
            .filter(|(z, inv)| !**inv && (0..geom.nz as i64).contains(&geom.slice_index(**z)))
            .count();
        let sorter = BoxSorter::sort(&mut beam, &geom, &layout);
        prop_assert_eq!(sorter.num_invalid(), zs.len() - in_box);

        let mut binned = 0;
        for ibox in 0..layout.num_boxes {
            let slices = layout.slices(ibox);
            let bins = BeamBins::build(&beam, sorter.range(ibox), &geom, slices.start, slices.len());
            for islice in slices {
                for &i in bins.slice(islice) {
                    prop_assert_eq!(geom.slice_index(beam.z[i]), islice as i64);
                    prop_assert!(beam.id[i] >= 0);
                }
                binned += bins.slice(islice).len();
            }
        }
        prop_assert_eq!(binned, in_box);
    }
}
