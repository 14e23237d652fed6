mod common;

use rand::rngs::StdRng;
use rand::SeedableRng;
use wakefield_rs::flds::diag::DiagBuffer;
use wakefield_rs::flds::{Comp, Fields, Level};
use wakefield_rs::pred_corr::{SliceIo, SliceSolver};
use wakefield_rs::prtls::BeamData;
use wakefield_rs::{Config, Float, Geom, PhysConst, PlasmaConfig, SolverMode};

fn init_beam(cfg: &Config, geom: &Geom, num_particles: usize) -> BeamData {
    let mut beam_cfg = cfg.beams[0].clone();
    beam_cfg.num_particles = num_particles;
    let phys = PhysConst::new(cfg.run.normalized_units);
    let mut rng = StdRng::seed_from_u64(cfg.run.seed);
    BeamData::init(&beam_cfg, geom, &phys, &mut rng).unwrap()
}

fn slice_particles(beam: &BeamData, geom: &Geom, islice: usize) -> BeamData {
    let idx: Vec<usize> = (0..beam.len())
        .filter(|&i| beam.id[i] >= 0 && geom.slice_index(beam.z[i]) == islice as i64)
        .collect();
    beam.gather(&idx)
}

/// Runs every slice head to tail and returns the pushed beam and the
/// diagnostic of Bx and By.
fn sweep(cfg: &Config, geom: &Geom, beam: &BeamData, dt: Float) -> (BeamData, DiagBuffer, Vec<usize>) {
    let mut solver = SliceSolver::new(cfg, geom).unwrap();
    let mut fields = Fields::new(geom, cfg.solver.mode, cfg.solver.boundary);
    let mut diag = DiagBuffer::new(vec![Comp::Bx, Comp::By], geom.nx, geom.ny, 0, geom.nz, 1);
    let mut out = beam.sized_like(0);
    let mut slipped = vec![beam.sized_like(0)];
    let mut iterations = Vec::new();
    for islice in (0..geom.nz).rev() {
        let mut beams = vec![slice_particles(beam, geom, islice)];
        let mut io = SliceIo {
            beams: &mut beams,
            slipped: &mut slipped,
            diag: Some(&mut diag),
            adaptive: None,
            dt,
        };
        let report = solver.run_slice(islice, &mut fields, &mut [], &mut io).unwrap();
        iterations.push(report.iterations);
        out.append(&mut beams[0]);
    }
    out.append(&mut slipped[0]);
    (out, diag, iterations)
}

#[test]
fn vacuum_beam_keeps_transverse_positions() {
    let (cfg, geom) = common::setup_geom();
    let beam = init_beam(&cfg, &geom, 10000);
    let (pushed, diag, iterations) = sweep(&cfg, &geom, &beam, 0.1);

    // without plasma every slice is a single solve
    assert!(iterations.iter().all(|&n| n == 1));
    let peak = diag.data[1].iter().fold(0.0 as Float, |m, v| m.max(v.abs()));
    assert!(peak > 0.0);

    assert_eq!(pushed.num_valid(), beam.num_valid());
    let mut moved = 0.0 as Float;
    for i in 0..pushed.len() {
        let j = (pushed.id[i] - 1) as usize;
        assert_eq!(beam.id[j], pushed.id[i]);
        moved = moved.max((pushed.x[i] - beam.x[j]).abs());
        moved = moved.max((pushed.y[i] - beam.y[j]).abs());
    }
    assert!(moved < 1e-6, "largest transverse displacement {}", moved);
}

#[test]
fn explicit_and_predictor_corrector_agree_in_vacuum() {
    let (mut cfg, geom) = common::setup_geom();
    let beam = init_beam(&cfg, &geom, 5000);
    let (_, pc, _) = sweep(&cfg, &geom, &beam, 0.1);

    cfg.solver.mode = SolverMode::Explicit;
    cfg.solver.mg_tol_rel = 1e-8;
    let mut solver = SliceSolver::new(&cfg, &geom).unwrap();
    let mut fields = Fields::new(&geom, cfg.solver.mode, cfg.solver.boundary);
    let mut diag = DiagBuffer::new(vec![Comp::Bx, Comp::By], geom.nx, geom.ny, 0, geom.nz, 1);
    let mut slipped = vec![beam.sized_like(0)];
    for islice in (0..geom.nz).rev() {
        let this = slice_particles(&beam, &geom, islice);
        if islice + 1 == geom.nz {
            let idx: Vec<usize> = (0..this.len()).collect();
            solver.deposit_beam_jperp(&mut fields, Level::This, &this, &idx);
        }
        if islice > 0 {
            let next = slice_particles(&beam, &geom, islice - 1);
            let idx: Vec<usize> = (0..next.len()).collect();
            solver.deposit_beam_jperp(&mut fields, Level::Next, &next, &idx);
        }
        let mut beams = vec![this];
        let mut io = SliceIo {
            beams: &mut beams,
            slipped: &mut slipped,
            diag: Some(&mut diag),
            adaptive: None,
            dt: 0.1,
        };
        solver.run_slice(islice, &mut fields, &mut [], &mut io).unwrap();
    }

    // the transverse field of the beam only depends on its jz in both modes
    let peak = pc.data[1].iter().fold(0.0 as Float, |m, v| m.max(v.abs()));
    for (a, b) in pc.data[1].iter().zip(diag.data[1].iter()) {
        assert!((a - b).abs() < 0.05 * peak);
    }
}

#[test]
fn plasma_with_unreachable_tolerance_diverges() {
    let mut cfg = common::setup_config();
    cfg.solver.predcorr_b_error_tolerance = 1e-12;
    cfg.solver.predcorr_max_iterations = 1;
    cfg.plasmas = vec![PlasmaConfig::default()];
    let err = wakefield_rs::run(cfg).unwrap_err();
    let diverged = err.chain().any(|c| {
        matches!(
            c.downcast_ref::<wakefield_rs::error::WakeError>(),
            Some(wakefield_rs::error::WakeError::PredictorCorrectorDiverged { .. })
        )
    });
    assert!(diverged, "unexpected error: {:#}", err);
}
