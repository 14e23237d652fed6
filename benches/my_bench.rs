#[macro_use]
extern crate criterion;

use criterion::Criterion;
use wakefield_rs::flds::field::Field;
use wakefield_rs::solver::{build_solver, BoundaryValues, PoissonSolver};
use wakefield_rs::{
    Adaptive, BeamConfig, Config, ExternalFields, FieldBoundary, Geom, Grid, Output, PoissonKind,
    Run, Solver,
};

fn bench_config(poisson: PoissonKind, boundary: FieldBoundary) -> Config {
    Config {
        grid: Grid {
            nx: 128,
            ny: 128,
            nz: 4,
            lo: [-4.0, -4.0, -2.0],
            hi: [4.0, 4.0, 2.0],
        },
        run: Run::default(),
        solver: Solver {
            poisson,
            boundary,
            ..Solver::default()
        },
        adaptive: Adaptive::default(),
        external: ExternalFields::default(),
        beams: vec![BeamConfig::default()],
        plasmas: vec![],
        output: Output::default(),
    }
}

fn fill_source(solver: &mut dyn PoissonSolver, geom: &Geom) {
    let stg = solver.staging_area();
    for j in 0..geom.ny {
        for i in 0..geom.nx {
            let x = geom.x_center(i as isize);
            let y = geom.y_center(j as isize);
            *stg.at_mut(i, j) = (-(x * x + y * y)).exp();
        }
    }
}

fn poisson_benchmark(c: &mut Criterion) {
    let cases = [
        ("fft periodic 128x128", PoissonKind::Fft, FieldBoundary::Periodic),
        ("fft dirichlet 128x128", PoissonKind::Fft, FieldBoundary::Dirichlet),
        ("multigrid 128x128", PoissonKind::Multigrid, FieldBoundary::Dirichlet),
    ];
    for &(name, poisson, boundary) in cases.iter() {
        let cfg = bench_config(poisson, boundary);
        let geom = Geom::new(&cfg.grid);
        let mut solver = build_solver(&cfg, &geom).unwrap();
        let mut lhs = Field::new(geom.nx, geom.ny);
        c.bench_function(name, move |b| {
            b.iter(|| {
                fill_source(solver.as_mut(), &geom);
                lhs.zero();
                solver.solve(&mut lhs, BoundaryValues::Homogeneous).unwrap();
            })
        });
    }
}

criterion_group!(benches, poisson_benchmark);
criterion_main!(benches);
