use serde::Deserialize;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod adaptive_dt;
pub mod error;
pub mod flds;
pub mod pipeline;
pub mod pred_corr;
pub mod prtls;
pub mod save;
pub mod simulation;
pub mod solver;

pub use crate::error::{WakeError, WakeResult};
use crate::flds::Comp;

// We use a type alias for f64/Float to easily support
// double and single precision.
#[cfg(feature = "dprec")]
pub type Float = f64;

#[cfg(not(feature = "dprec"))]
pub type Float = f32;

pub const PI: Float = std::f64::consts::PI as Float;

/// Number of guard cells on every side of a field slice. Enough for
/// cubic shape factors.
pub const NGUARDS: usize = 2;

/// Particles handed to one rayon task at a time.
pub const PRTL_CHUNK_SIZE: usize = 4096;

/// Message tag of the longitudinal slice handoff between ranks.
pub const COMM_Z_TAG: i32 = 1000;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub grid: Grid,
    #[serde(default)]
    pub run: Run,
    #[serde(default)]
    pub solver: Solver,
    #[serde(default)]
    pub adaptive: Adaptive,
    #[serde(default)]
    pub external: ExternalFields,
    #[serde(default)]
    pub beams: Vec<BeamConfig>,
    #[serde(default)]
    pub plasmas: Vec<PlasmaConfig>,
    #[serde(default)]
    pub output: Output,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub lo: [Float; 3],
    pub hi: [Float; 3],
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Run {
    pub max_step: usize,
    pub dt: Float,
    pub normalized_units: bool,
    pub numprocs_z: usize,
    /// Slices per box inside a rank. 0 means one box per rank.
    pub grid_size_z: usize,
    pub seed: u64,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SolverMode {
    PredictorCorrector,
    Explicit,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoissonKind {
    Fft,
    Multigrid,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldBoundary {
    Dirichlet,
    Periodic,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Solver {
    pub mode: SolverMode,
    pub poisson: PoissonKind,
    pub boundary: FieldBoundary,
    pub open_boundary: bool,
    pub multipole_order: usize,
    pub multipole_cutoff: Float,
    pub mg_tol_rel: Float,
    pub mg_tol_abs: Float,
    pub mg_max_iters: usize,
    pub predcorr_b_error_tolerance: Float,
    pub predcorr_max_iterations: usize,
    pub predcorr_b_mixing_factor: Float,
    pub depos_order_xy: usize,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Adaptive {
    pub enabled: bool,
    pub nt_per_betatron: Float,
    pub dt_max: Float,
    pub threshold_uz: Float,
    pub predict_step: bool,
    pub control_phase_advance: bool,
    pub phase_tolerance: Float,
    pub phase_substeps: usize,
    pub gather_ez: bool,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ExternalFields {
    /// Focusing gradient added to ExmBy and EypBx.
    pub focusing_slope: Float,
    pub ez_slope: Float,
    pub ez_uniform: Float,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BeamProfile {
    Gaussian,
    FixedPpc,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BeamConfig {
    pub name: String,
    /// In units of the elementary charge.
    pub charge: Float,
    /// In units of the electron mass.
    pub mass: Float,
    pub profile: BeamProfile,
    pub density: Float,
    pub num_particles: usize,
    pub position_mean: [Float; 3],
    pub position_std: [Float; 3],
    pub u_mean: [Float; 3],
    pub u_std: [Float; 3],
    pub ppc: [usize; 3],
    pub min: [Float; 3],
    pub max: [Float; 3],
    pub n_subcycles: usize,
    pub do_z_push: bool,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlasmaPusher {
    DualNumber,
    Ab5,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PlasmaConfig {
    pub name: String,
    pub charge: Float,
    pub mass: Float,
    pub density: Float,
    pub ppc: [usize; 2],
    pub radius: Float,
    pub parabolic_curvature: Float,
    pub upramp_length: Float,
    pub neutralize_background: bool,
    pub ion_level: i32,
    pub pusher: PlasmaPusher,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Output {
    pub write_output: bool,
    pub output_interval: usize,
    pub dir: String,
    pub field_data: Vec<String>,
    pub beam_data: Vec<String>,
    pub stride: usize,
    pub coarsen_z: usize,
}

impl Default for Run {
    fn default() -> Self {
        Run {
            max_step: 1,
            dt: 1.0,
            normalized_units: true,
            numprocs_z: 1,
            grid_size_z: 0,
            seed: 42,
        }
    }
}

impl Default for Solver {
    fn default() -> Self {
        Solver {
            mode: SolverMode::PredictorCorrector,
            poisson: PoissonKind::Fft,
            boundary: FieldBoundary::Dirichlet,
            open_boundary: false,
            multipole_order: 5,
            multipole_cutoff: 0.5,
            mg_tol_rel: 1e-4,
            mg_tol_abs: 0.0,
            mg_max_iters: 200,
            predcorr_b_error_tolerance: 4e-2,
            predcorr_max_iterations: 5,
            predcorr_b_mixing_factor: 0.1,
            depos_order_xy: 2,
        }
    }
}

impl Default for Adaptive {
    fn default() -> Self {
        Adaptive {
            enabled: false,
            nt_per_betatron: 40.0,
            dt_max: Float::MAX,
            threshold_uz: 2.0,
            predict_step: true,
            control_phase_advance: false,
            phase_tolerance: 2e-3,
            phase_substeps: 2000,
            gather_ez: false,
        }
    }
}

impl Default for BeamConfig {
    fn default() -> Self {
        BeamConfig {
            name: "beam".to_string(),
            charge: -1.0,
            mass: 1.0,
            profile: BeamProfile::Gaussian,
            density: 1.0,
            num_particles: 1000,
            position_mean: [0.0; 3],
            position_std: [0.1; 3],
            u_mean: [0.0, 0.0, 1000.0],
            u_std: [0.0; 3],
            ppc: [1, 1, 1],
            min: [Float::MIN, Float::MIN, Float::MIN],
            max: [Float::MAX, Float::MAX, Float::MAX],
            n_subcycles: 1,
            do_z_push: true,
        }
    }
}

impl Default for PlasmaConfig {
    fn default() -> Self {
        PlasmaConfig {
            name: "plasma".to_string(),
            charge: -1.0,
            mass: 1.0,
            density: 1.0,
            ppc: [1, 1],
            radius: Float::MAX,
            parabolic_curvature: 0.0,
            upramp_length: 0.0,
            neutralize_background: true,
            ion_level: 1,
            pusher: PlasmaPusher::DualNumber,
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Output {
            write_output: false,
            output_interval: 1,
            dir: "output".to_string(),
            field_data: vec!["all".to_string()],
            beam_data: vec!["all".to_string()],
            stride: 1,
            coarsen_z: 1,
        }
    }
}

impl Config {
    pub fn new() -> Result<Config> {
        Config::from_file("config.toml")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Could not open the {} file", path.display()))?;
        toml::from_str(&contents).with_context(|| "Could not parse Config file")
    }

    /// Checks every setting once, before anything is allocated.
    pub fn validate(&self) -> WakeResult<()> {
        let g = &self.grid;
        if g.nx < 2 || g.ny < 2 || g.nz == 0 {
            return Err(WakeError::Config(format!(
                "grid must have nx, ny >= 2 and nz >= 1, got {}x{}x{}",
                g.nx, g.ny, g.nz
            )));
        }
        for d in 0..3 {
            if !(g.hi[d] > g.lo[d]) {
                return Err(WakeError::Config(format!(
                    "grid.hi[{}] must be larger than grid.lo[{}]",
                    d, d
                )));
            }
        }
        let np = self.run.numprocs_z;
        if np == 0 || g.nz % np != 0 {
            return Err(WakeError::Config(format!(
                "run.numprocs_z = {} must divide grid.nz = {}",
                np, g.nz
            )));
        }
        let per_rank = g.nz / np;
        if self.run.grid_size_z != 0 && per_rank % self.run.grid_size_z != 0 {
            return Err(WakeError::Config(format!(
                "run.grid_size_z = {} must divide the {} slices owned by each rank",
                self.run.grid_size_z, per_rank
            )));
        }
        if !(self.run.dt > 0.0) {
            return Err(WakeError::Config("run.dt must be positive".to_string()));
        }
        let s = &self.solver;
        if s.depos_order_xy > 3 {
            return Err(WakeError::Config(format!(
                "solver.depos_order_xy must be 0, 1, 2 or 3, got {}",
                s.depos_order_xy
            )));
        }
        if s.poisson == PoissonKind::Multigrid && s.boundary == FieldBoundary::Periodic {
            return Err(WakeError::Config(
                "solver.poisson = multigrid requires solver.boundary = dirichlet".to_string(),
            ));
        }
        if s.mode == SolverMode::Explicit && s.boundary == FieldBoundary::Periodic {
            return Err(WakeError::Config(
                "solver.mode = explicit uses the multigrid solver and requires dirichlet boundaries"
                    .to_string(),
            ));
        }
        if s.predcorr_max_iterations == 0 {
            return Err(WakeError::Config(
                "solver.predcorr_max_iterations must be at least 1".to_string(),
            ));
        }
        if !(s.predcorr_b_mixing_factor > 0.0 && s.predcorr_b_mixing_factor <= 1.0) {
            return Err(WakeError::Config(
                "solver.predcorr_b_mixing_factor must be in (0, 1]".to_string(),
            ));
        }
        for beam in &self.beams {
            if beam.n_subcycles == 0 {
                return Err(WakeError::Config(format!(
                    "beam {}: n_subcycles must be at least 1",
                    beam.name
                )));
            }
            if beam.mass <= 0.0 {
                return Err(WakeError::Config(format!(
                    "beam {}: mass must be positive",
                    beam.name
                )));
            }
        }
        for plasma in &self.plasmas {
            if plasma.ppc[0] == 0 || plasma.ppc[1] == 0 || plasma.mass <= 0.0 {
                return Err(WakeError::Config(format!(
                    "plasma {}: ppc entries and mass must be positive",
                    plasma.name
                )));
            }
        }
        if self.adaptive.enabled {
            if self.adaptive.nt_per_betatron <= 0.0 {
                return Err(WakeError::Config(
                    "adaptive.nt_per_betatron must be positive".to_string(),
                ));
            }
            if self.plasmas.iter().map(|p| p.density).sum::<Float>() <= 0.0 {
                return Err(WakeError::DegenerateInput(
                    "the adaptive time step needs a plasma with positive density".to_string(),
                ));
            }
        }
        if self.output.output_interval == 0 || self.output.stride == 0 {
            return Err(WakeError::Config(
                "output.output_interval and output.stride must be positive".to_string(),
            ));
        }
        if self.output.coarsen_z == 0 {
            return Err(WakeError::Config("output.coarsen_z must be positive".to_string()));
        }
        Comp::parse_list(&self.output.field_data)?;
        for name in &self.output.beam_data {
            if name != "all" && name != "none" && !self.beams.iter().any(|b| &b.name == name) {
                return Err(WakeError::Config(format!(
                    "output.beam_data names unknown beam '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Physical constants, either SI or normalized to the plasma skin depth.
#[derive(Clone, Copy, Debug)]
pub struct PhysConst {
    pub c: Float,
    pub ep0: Float,
    pub mu0: Float,
    pub q_e: Float,
    pub m_e: Float,
}

impl PhysConst {
    pub fn new(normalized_units: bool) -> PhysConst {
        if normalized_units {
            PhysConst {
                c: 1.0,
                ep0: 1.0,
                mu0: 1.0,
                q_e: 1.0,
                m_e: 1.0,
            }
        } else {
            PhysConst {
                c: 299_792_458.0,
                ep0: 8.854_187_812_8e-12,
                mu0: 1.256_637_062_12e-6,
                q_e: 1.602_176_634e-19,
                m_e: 9.109_383_701_5e-31,
            }
        }
    }
}

/// Grid geometry shared by every component.
#[derive(Clone, Debug)]
pub struct Geom {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub lo: [Float; 3],
    pub hi: [Float; 3],
    pub dx: [Float; 3],
}

impl Geom {
    pub fn new(grid: &Grid) -> Geom {
        let dx = [
            (grid.hi[0] - grid.lo[0]) / grid.nx as Float,
            (grid.hi[1] - grid.lo[1]) / grid.ny as Float,
            (grid.hi[2] - grid.lo[2]) / grid.nz as Float,
        ];
        Geom {
            nx: grid.nx,
            ny: grid.ny,
            nz: grid.nz,
            lo: grid.lo,
            hi: grid.hi,
            dx,
        }
    }

    /// Longitudinal slice index of a position, may lie outside `0..nz`.
    #[inline(always)]
    pub fn slice_index(&self, z: Float) -> i64 {
        ((z - self.lo[2]) / self.dx[2]).floor() as i64
    }

    #[inline(always)]
    pub fn x_center(&self, i: isize) -> Float {
        self.lo[0] + (i as Float + 0.5) * self.dx[0]
    }

    #[inline(always)]
    pub fn y_center(&self, j: isize) -> Float {
        self.lo[1] + (j as Float + 0.5) * self.dx[1]
    }

    #[inline(always)]
    pub fn z_center(&self, islice: usize) -> Float {
        self.lo[2] + (islice as Float + 0.5) * self.dx[2]
    }

    pub fn cell_volume(&self) -> Float {
        self.dx[0] * self.dx[1] * self.dx[2]
    }
}

pub fn run(cfg: Config) -> Result<()> {
    cfg.validate().context("Invalid configuration")?;
    simulation::run_ranks(&cfg)
}

#[cfg(test)]
pub(crate) const E_TOL: Float = 1E-10;

#[cfg(test)]
pub(crate) fn build_test_config() -> Config {
    // A small vacuum-beam setup used by the unit tests.
    Config {
        grid: Grid {
            nx: 16,
            ny: 16,
            nz: 8,
            lo: [-1.0, -1.0, -1.0],
            hi: [1.0, 1.0, 1.0],
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

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn geometry_and_slice_index() {
        let cfg = build_test_config();
        let geom = Geom::new(&cfg.grid);
        assert!((geom.dx[0] - 0.125).abs() < E_TOL);
        assert!((geom.dx[2] - 0.25).abs() < E_TOL);
        assert_eq!(geom.slice_index(-1.0), 0);
        assert_eq!(geom.slice_index(-0.76), 0);
        assert_eq!(geom.slice_index(-0.74), 1);
        assert_eq!(geom.slice_index(-1.01), -1);
        assert!((geom.x_center(0) - (-0.9375)).abs() < E_TOL);
    }

    #[test]
    fn parse_toml_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [grid]
            nx = 32
            ny = 32
            nz = 16
            lo = [-2.0, -2.0, -4.0]
            hi = [2.0, 2.0, 4.0]

            [solver]
            poisson = "multigrid"

            [[beams]]
            name = "driver"
            u_mean = [0.0, 0.0, 2000.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.solver.poisson, PoissonKind::Multigrid);
        assert_eq!(cfg.solver.predcorr_max_iterations, 5);
        assert_eq!(cfg.beams[0].name, "driver");
        assert_eq!(cfg.beams[0].n_subcycles, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_decomposition() {
        let mut cfg = build_test_config();
        cfg.run.numprocs_z = 3;
        assert!(matches!(cfg.validate(), Err(WakeError::Config(_))));
    }

    #[test]
    fn rejects_unknown_component() {
        let mut cfg = build_test_config();
        cfg.output.field_data = vec!["Ex".to_string()];
        match cfg.validate() {
            Err(WakeError::UnknownComponent { name, valid }) => {
                assert_eq!(name, "Ex");
                assert!(valid.contains("ExmBy"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_periodic_multigrid() {
        let mut cfg = build_test_config();
        cfg.solver.poisson = PoissonKind::Multigrid;
        cfg.solver.boundary = FieldBoundary::Periodic;
        assert!(cfg.validate().is_err());
    }
}
