#![allow(dead_code)]

use wakefield_rs::{
    Adaptive, BeamConfig, Config, ExternalFields, Geom, Grid, Output, Run, Solver,
};

pub const E_TOL: wakefield_rs::Float = 1e-10;

pub fn setup_config() -> Config {
    // A small box used in testing: 32x32 cells on [-1, 1]^2, 8 slices.
    Config {
        grid: Grid {
            nx: 32,
            ny: 32,
            nz: 8,
            lo: [-1.0, -1.0, -2.0],
            hi: [1.0, 1.0, 2.0],
        },
        run: Run::default(),
        solver: Solver::default(),
        adaptive: Adaptive::default(),
        external: ExternalFields::default(),
        beams: vec![BeamConfig::default()],
        plasmas: vec![],
        output: Output::default(),
    }
}

pub fn setup_geom() -> (Config, Geom) {
    let cfg = setup_config();
    let geom = Geom::new(&cfg.grid);
    (cfg, geom)
}
