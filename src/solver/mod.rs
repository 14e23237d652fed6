pub mod boundary;
pub mod fft_2d;
pub mod multigrid;
pub mod spectral;
pub mod wave_num;

use crate::flds::field::Field;
use crate::solver::multigrid::MultiGridPoisson;
use crate::solver::spectral::{FftDirichlet, FftPeriodic};
use crate::{Config, FieldBoundary, Float, Geom, PoissonKind, WakeResult};

/// Boundary values of a Dirichlet solve.
#[derive(Clone, Copy)]
pub enum BoundaryValues<'a> {
    Homogeneous,
    /// Potential as a function of the transverse position.
    Function(&'a dyn Fn(Float, Float) -> Float),
}

/// Solves `Laplacian(phi) = staging` on one transverse slice.
pub trait PoissonSolver: Send {
    /// Source term of the next solve. The caller fills the valid region.
    fn staging_area(&mut self) -> &mut Field;

    /// Writes the solution into the valid region of `lhs` and fills its
    /// guard cells. The previous content of `lhs` may serve as initial
    /// guess.
    fn solve(&mut self, lhs: &mut Field, boundary: BoundaryValues) -> WakeResult<()>;

    /// Offset in cells of the points where Dirichlet values are imposed,
    /// measured from the first valid cell centre minus one half, and the
    /// weight with which they enter the source. `None` when periodic.
    fn dirichlet_stencil(&self) -> Option<(Float, Float)>;
}

pub fn build_solver(cfg: &Config, geom: &Geom) -> WakeResult<Box<dyn PoissonSolver>> {
    Ok(match (cfg.solver.poisson, cfg.solver.boundary) {
        (PoissonKind::Fft, FieldBoundary::Periodic) => Box::new(FftPeriodic::new(geom)),
        (PoissonKind::Fft, FieldBoundary::Dirichlet) => Box::new(FftDirichlet::new(geom)),
        (PoissonKind::Multigrid, _) => Box::new(MultiGridPoisson::new(
            geom,
            cfg.solver.mg_tol_rel,
            cfg.solver.mg_tol_abs,
            cfg.solver.mg_max_iters,
        )?),
    })
}

/// Position of the left/right (bottom/top) Dirichlet points along one axis.
pub fn boundary_positions(lo: Float, hi: Float, d: Float, offset: Float) -> (Float, Float) {
    (lo + (offset + 0.5) * d, hi - (offset + 0.5) * d)
}

/// Moves non-homogeneous Dirichlet values into the source of a
/// homogeneous solve: `weight * g / d^2` is subtracted at the outermost
/// valid cells, corners receive both contributions.
pub fn inject_boundary(
    staging: &mut Field,
    geom: &Geom,
    offset: Float,
    weight: Float,
    g: &dyn Fn(Float, Float) -> Float,
) {
    let (nx, ny) = (staging.nx(), staging.ny());
    let (dx, dy) = (geom.dx[0], geom.dx[1]);
    let (x_lo, x_hi) = boundary_positions(geom.lo[0], geom.hi[0], dx, offset);
    let (y_lo, y_hi) = boundary_positions(geom.lo[1], geom.hi[1], dy, offset);
    for j in 0..ny {
        let y = geom.y_center(j as isize);
        *staging.at_mut(0, j) -= weight * g(x_lo, y) / (dx * dx);
        *staging.at_mut(nx - 1, j) -= weight * g(x_hi, y) / (dx * dx);
    }
    for i in 0..nx {
        let x = geom.x_center(i as isize);
        *staging.at_mut(i, 0) -= weight * g(x, y_lo) / (dy * dy);
        *staging.at_mut(i, ny - 1) -= weight * g(x, y_hi) / (dy * dy);
    }
}

/// Writes Dirichlet values into the first guard ring of a solved field.
pub fn fill_boundary_guards(lhs: &mut Field, geom: &Geom, g: &dyn Fn(Float, Float) -> Float) {
    let (nx, ny) = (lhs.nx() as isize, lhs.ny() as isize);
    lhs.zero_guards();
    for j in -1..=ny {
        let y = geom.y_center(j);
        lhs.set(-1, j, g(geom.x_center(-1), y));
        lhs.set(nx, j, g(geom.x_center(nx), y));
    }
    for i in 0..nx {
        let x = geom.x_center(i);
        lhs.set(i, -1, g(x, geom.y_center(-1)));
        lhs.set(i, ny, g(x, geom.y_center(ny)));
    }
}
