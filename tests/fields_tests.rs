mod common;

use wakefield_rs::flds::diag::DiagBuffer;
use wakefield_rs::flds::field::Field;
use wakefield_rs::flds::{Comp, Fields, Level};
use wakefield_rs::solver::{build_solver, BoundaryValues};
use wakefield_rs::{FieldBoundary, Float, PoissonKind, SolverMode, NGUARDS};

fn init_fields(mode: SolverMode) -> Fields {
    let (cfg, geom) = common::setup_geom();
    assert_eq!(geom.nx, 32);
    assert_eq!(geom.ny, 32);
    Fields::new(&geom, mode, cfg.solver.boundary)
}

#[test]
fn test_field_init() {
    let expected_len = (32 + 2 * NGUARDS) * (32 + 2 * NGUARDS);
    for &mode in [SolverMode::PredictorCorrector, SolverMode::Explicit].iter() {
        let fields = init_fields(mode);
        for (level, comps) in Fields::layout(mode) {
            for comp in comps {
                let fld = fields.get(level, comp);
                assert_eq!(fld.data.len(), expected_len);
                assert!(fld.data.iter().all(|&v| v == 0.0));
            }
        }
    }
}

#[test]
fn window_keeps_two_finished_slices() {
    let mut fields = init_fields(SolverMode::PredictorCorrector);
    for islice in 0..3 {
        let bx = fields.get_mut(Level::This, Comp::Bx);
        for j in 0..bx.ny() {
            for i in 0..bx.nx() {
                *bx.at_mut(i, j) = islice as Float;
            }
        }
        fields.shift_window();
    }
    assert_eq!(fields.get(Level::Previous1, Comp::Bx).at(4, 4), 2.0);
    assert_eq!(fields.get(Level::Previous2, Comp::Bx).at(4, 4), 1.0);
}

#[test]
fn converged_slices_land_in_the_diagnostic() {
    let (cfg, geom) = common::setup_geom();
    let mut fields = Fields::new(&geom, cfg.solver.mode, cfg.solver.boundary);
    let mut diag = DiagBuffer::new(vec![Comp::Ez, Comp::Psi], geom.nx, geom.ny, 0, geom.nz, 1);
    for islice in (0..geom.nz).rev() {
        *fields.get_mut(Level::This, Comp::Ez).at_mut(3, 5) = islice as Float;
        fields.copy_to_diag(islice, &mut diag);
    }
    for k in 0..geom.nz {
        assert_eq!(diag.layer(0, k)[5 * geom.nx + 3], k as Float);
        assert!(diag.layer(1, k).iter().all(|&v| v == 0.0));
    }
}

/// Gaussian source centred in the box, solved with every Dirichlet solver.
fn solve_gaussian(poisson: PoissonKind) -> Field {
    let (mut cfg, geom) = common::setup_geom();
    cfg.solver.poisson = poisson;
    cfg.solver.boundary = FieldBoundary::Dirichlet;
    cfg.solver.mg_tol_rel = 1e-8;
    let mut solver = build_solver(&cfg, &geom).unwrap();
    let stg = solver.staging_area();
    for j in 0..geom.ny {
        for i in 0..geom.nx {
            let x = geom.x_center(i as isize);
            let y = geom.y_center(j as isize);
            *stg.at_mut(i, j) = (-(x * x + y * y) / (2.0 * 0.15 * 0.15)).exp();
        }
    }
    let mut out = Field::new(geom.nx, geom.ny);
    solver.solve(&mut out, BoundaryValues::Homogeneous).unwrap();
    out
}

#[test]
fn spectral_and_multigrid_agree() {
    let fft = solve_gaussian(PoissonKind::Fft);
    let mg = solve_gaussian(PoissonKind::Multigrid);
    let peak = fft.max_abs();
    assert!(peak > 0.0);
    // potential of a positive source is a minimum at the centre
    assert!(fft.at(16, 16) < 0.0 && mg.at(16, 16) < 0.0);
    let diff = fft.diff_norm_sq(&mg).sqrt() / (fft.norm_sq().sqrt());
    assert!(diff < 0.1, "relative difference {}", diff);
}
