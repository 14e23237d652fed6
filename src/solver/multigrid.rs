use crate::flds::field::Field;
use crate::solver::{fill_boundary_guards, inject_boundary, BoundaryValues, PoissonSolver};
use crate::{Float, Geom, WakeError, WakeResult};
use log::{trace, warn};

const MAX_LEVELS: usize = 30;
const N_BOTTOM_SWEEPS: usize = 16;
const N_COLOR_SWEEPS: usize = 4;
const FOUR_THIRDS: Float = 4.0 / 3.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum System {
    /// Two independent real equations `lap(phi_n) - a phi_n = rhs_n`.
    Real,
    /// One complex equation `lap(phi) - (ar + i ai) phi = rhs`, components
    /// are the real and imaginary parts.
    Complex,
}

/// One level of the hierarchy. Every array holds two components,
/// component-major, `x` fastest.
struct MgLevel {
    nx: usize,
    ny: usize,
    facx: Float,
    facy: Float,
    acf: Vec<Float>,
    res: Vec<Float>,
    cor: Vec<Float>,
    rescor: Vec<Float>,
}

impl MgLevel {
    fn new(nx: usize, ny: usize, dx: Float, dy: Float) -> MgLevel {
        MgLevel {
            nx,
            ny,
            facx: 1.0 / (dx * dx),
            facy: 1.0 / (dy * dy),
            acf: vec![0.0; 2 * nx * ny],
            res: vec![0.0; 2 * nx * ny],
            cor: vec![0.0; 2 * nx * ny],
            rescor: vec![0.0; 2 * nx * ny],
        }
    }
}

/// Neighbour sum of the Laplacian at (i, j) and its diagonal coefficient.
/// Cells next to the domain edge use the quadratic stencil for a zero
/// value on the cell face.
#[inline(always)]
fn stencil(
    phi: &[Float],
    nx: usize,
    ny: usize,
    i: usize,
    j: usize,
    facx: Float,
    facy: Float,
) -> (Float, Float) {
    let ij = j * nx + i;
    let mut c0 = -2.0 * (facx + facy);
    let mut lap = if i == 0 {
        c0 -= 2.0 * facx;
        facx * FOUR_THIRDS * phi[ij + 1]
    } else if i == nx - 1 {
        c0 -= 2.0 * facx;
        facx * FOUR_THIRDS * phi[ij - 1]
    } else {
        facx * (phi[ij - 1] + phi[ij + 1])
    };
    lap += if j == 0 {
        c0 -= 2.0 * facy;
        facy * FOUR_THIRDS * phi[ij + nx]
    } else if j == ny - 1 {
        c0 -= 2.0 * facy;
        facy * FOUR_THIRDS * phi[ij - nx]
    } else {
        facy * (phi[ij - nx] + phi[ij + nx])
    };
    (lap, c0)
}

/// out = rhs - (lap(phi) - a phi)
#[allow(clippy::too_many_arguments)]
fn compute_residual(
    system: System,
    nx: usize,
    ny: usize,
    facx: Float,
    facy: Float,
    phi: &[Float],
    rhs: &[Float],
    acf: &[Float],
    out: &mut [Float],
) {
    let n = nx * ny;
    let (phi0, phi1) = phi.split_at(n);
    let (rhs0, rhs1) = rhs.split_at(n);
    let (acf0, acf1) = acf.split_at(n);
    let (out0, out1) = out.split_at_mut(n);
    for j in 0..ny {
        for i in 0..nx {
            let ij = j * nx + i;
            let (l0, c0) = stencil(phi0, nx, ny, i, j, facx, facy);
            let (l1, _) = stencil(phi1, nx, ny, i, j, facx, facy);
            let lap0 = l0 + c0 * phi0[ij];
            let lap1 = l1 + c0 * phi1[ij];
            match system {
                System::Real => {
                    out0[ij] = rhs0[ij] + acf0[ij] * phi0[ij] - lap0;
                    out1[ij] = rhs1[ij] + acf0[ij] * phi1[ij] - lap1;
                }
                System::Complex => {
                    let (ar, ai) = (acf0[ij], acf1[ij]);
                    out0[ij] = rhs0[ij] + ar * phi0[ij] - ai * phi1[ij] - lap0;
                    out1[ij] = rhs1[ij] + ai * phi0[ij] + ar * phi1[ij] - lap1;
                }
            }
        }
    }
}

/// One colour of red-black Gauss-Seidel: cells with `(i + j + color)` even.
#[allow(clippy::too_many_arguments)]
fn gsrb(
    system: System,
    color: usize,
    nx: usize,
    ny: usize,
    facx: Float,
    facy: Float,
    phi: &mut [Float],
    rhs: &[Float],
    acf: &[Float],
) {
    let n = nx * ny;
    let (phi0, phi1) = phi.split_at_mut(n);
    let (rhs0, rhs1) = rhs.split_at(n);
    let (acf0, acf1) = acf.split_at(n);
    for j in 0..ny {
        for i in ((j + color) % 2..nx).step_by(2) {
            let ij = j * nx + i;
            let (l0, c0) = stencil(phi0, nx, ny, i, j, facx, facy);
            let (l1, _) = stencil(phi1, nx, ny, i, j, facx, facy);
            match system {
                System::Real => {
                    let c = c0 - acf0[ij];
                    phi0[ij] = (rhs0[ij] - l0) / c;
                    phi1[ij] = (rhs1[ij] - l1) / c;
                }
                System::Complex => {
                    let cr = c0 - acf0[ij];
                    let ci = -acf1[ij];
                    let cmag = 1.0 / (cr * cr + ci * ci);
                    let (zr, zi) = (rhs0[ij] - l0, rhs1[ij] - l1);
                    phi0[ij] = (zr * cr + zi * ci) * cmag;
                    phi1[ij] = (zi * cr - zr * ci) * cmag;
                }
            }
        }
    }
}

/// Cell average of 2x2 fine cells, both components.
fn restriction(fine: &[Float], nxf: usize, nyf: usize, crse: &mut [Float]) {
    let (nxc, nyc) = (nxf / 2, nyf / 2);
    let (nf, nc) = (nxf * nyf, nxc * nyc);
    for n in 0..2 {
        let f = &fine[n * nf..(n + 1) * nf];
        let c = &mut crse[n * nc..(n + 1) * nc];
        for jc in 0..nyc {
            for ic in 0..nxc {
                let f00 = (2 * jc) * nxf + 2 * ic;
                c[jc * nxc + ic] = 0.25 * (f[f00] + f[f00 + 1] + f[f00 + nxf] + f[f00 + nxf + 1]);
            }
        }
    }
}

/// Coarse value with odd reflection across the domain faces.
#[inline(always)]
fn crse_at(c: &[Float], nxc: usize, nyc: usize, i: isize, j: isize) -> Float {
    let mut sign = 1.0;
    let ii = if i < 0 {
        sign = -sign;
        0
    } else if i >= nxc as isize {
        sign = -sign;
        nxc - 1
    } else {
        i as usize
    };
    let jj = if j < 0 {
        sign = -sign;
        0
    } else if j >= nyc as isize {
        sign = -sign;
        nyc - 1
    } else {
        j as usize
    };
    sign * c[jj * nxc + ii]
}

/// fine += bilinear interpolation of crse, both components.
fn prolongation_add(crse: &[Float], nxc: usize, nyc: usize, fine: &mut [Float]) {
    let (nxf, nyf) = (2 * nxc, 2 * nyc);
    let (nf, nc) = (nxf * nyf, nxc * nyc);
    for n in 0..2 {
        let c = &crse[n * nc..(n + 1) * nc];
        let f = &mut fine[n * nf..(n + 1) * nf];
        for j in 0..nyf {
            let jc = (j / 2) as isize;
            let jn = if j % 2 == 0 { jc - 1 } else { jc + 1 };
            for i in 0..nxf {
                let ic = (i / 2) as isize;
                let in_ = if i % 2 == 0 { ic - 1 } else { ic + 1 };
                f[j * nxf + i] += (9.0 * crse_at(c, nxc, nyc, ic, jc)
                    + 3.0 * crse_at(c, nxc, nyc, in_, jc)
                    + 3.0 * crse_at(c, nxc, nyc, ic, jn)
                    + crse_at(c, nxc, nyc, in_, jn))
                    / 16.0;
            }
        }
    }
}

fn max_abs(v: &[Float]) -> Float {
    v.iter().fold(0.0, |m: Float, x| m.max(x.abs()))
}

/// Cell-centred geometric multigrid on one slice, Dirichlet zero on the
/// cell faces of the domain boundary.
pub struct MultiGrid {
    levels: Vec<MgLevel>,
    sol: Vec<Float>,
    rhs: Vec<Float>,
    system: System,
}

impl MultiGrid {
    pub fn new(nx: usize, ny: usize, dx: Float, dy: Float) -> WakeResult<MultiGrid> {
        if nx < 2 || ny < 2 {
            return Err(WakeError::Config(format!(
                "multigrid needs at least 2x2 cells, got {}x{}",
                nx, ny
            )));
        }
        let mut levels = vec![MgLevel::new(nx, ny, dx, dy)];
        let (mut cnx, mut cny, mut cdx, mut cdy) = (nx, ny, dx, dy);
        while levels.len() < MAX_LEVELS && cnx % 2 == 0 && cny % 2 == 0 && cnx >= 4 && cny >= 4
        {
            cnx /= 2;
            cny /= 2;
            cdx *= 2.0;
            cdy *= 2.0;
            levels.push(MgLevel::new(cnx, cny, cdx, cdy));
        }
        if levels.len() == 1 {
            warn!(
                "a {}x{} grid cannot be coarsened, multigrid reduces to Gauss-Seidel",
                nx, ny
            );
        }
        Ok(MultiGrid {
            levels,
            sol: vec![0.0; 2 * nx * ny],
            rhs: vec![0.0; 2 * nx * ny],
            system: System::Real,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level_size(&self, ilev: usize) -> (usize, usize) {
        (self.levels[ilev].nx, self.levels[ilev].ny)
    }

    /// Solves `lap(sol_n) - acf * sol_n = rhs_n` for the two components of
    /// `sol` and `rhs` (each `2 * nx * ny`, component-major). `acf` has one
    /// component. `sol` is the initial guess on entry. Returns the number of
    /// V-cycles.
    #[allow(clippy::too_many_arguments)]
    pub fn solve1(
        &mut self,
        sol: &mut [Float],
        rhs: &[Float],
        acf: &[Float],
        tol_rel: Float,
        tol_abs: Float,
        max_iters: usize,
    ) -> WakeResult<usize> {
        let n = self.levels[0].nx * self.levels[0].ny;
        if !cfg!(feature = "unchecked") {
            assert_eq!(sol.len(), 2 * n);
            assert_eq!(rhs.len(), 2 * n);
            assert_eq!(acf.len(), n);
        }
        self.system = System::Real;
        let l0 = &mut self.levels[0];
        l0.acf[..n].copy_from_slice(acf);
        for v in l0.acf[n..].iter_mut() {
            *v = 0.0;
        }
        self.run(sol, rhs, tol_rel, tol_abs, max_iters)
    }

    /// Solves `lap(sol) - (acf_re + i acf_im) sol = rhs` where component 0
    /// is the real and component 1 the imaginary part.
    #[allow(clippy::too_many_arguments)]
    pub fn solve2(
        &mut self,
        sol: &mut [Float],
        rhs: &[Float],
        acf_re: &[Float],
        acf_im: &[Float],
        tol_rel: Float,
        tol_abs: Float,
        max_iters: usize,
    ) -> WakeResult<usize> {
        let n = self.levels[0].nx * self.levels[0].ny;
        if !cfg!(feature = "unchecked") {
            assert_eq!(sol.len(), 2 * n);
            assert_eq!(rhs.len(), 2 * n);
            assert_eq!(acf_re.len(), n);
            assert_eq!(acf_im.len(), n);
        }
        self.system = System::Complex;
        let l0 = &mut self.levels[0];
        l0.acf[..n].copy_from_slice(acf_re);
        l0.acf[n..].copy_from_slice(acf_im);
        self.run(sol, rhs, tol_rel, tol_abs, max_iters)
    }

    fn run(
        &mut self,
        sol: &mut [Float],
        rhs: &[Float],
        tol_rel: Float,
        tol_abs: Float,
        max_iters: usize,
    ) -> WakeResult<usize> {
        self.sol.copy_from_slice(sol);
        self.rhs.copy_from_slice(rhs);
        self.average_down_acf();
        let iters = self.solve_doit(tol_rel, tol_abs, max_iters)?;
        sol.copy_from_slice(&self.sol);
        Ok(iters)
    }

    fn average_down_acf(&mut self) {
        for ilev in 0..self.levels.len() - 1 {
            let (upper, lower) = self.levels.split_at_mut(ilev + 1);
            let fine = &upper[ilev];
            restriction(&fine.acf, fine.nx, fine.ny, &mut lower[0].acf);
        }
    }

    fn residual0(&mut self) {
        let l0 = &mut self.levels[0];
        compute_residual(
            self.system,
            l0.nx,
            l0.ny,
            l0.facx,
            l0.facy,
            &self.sol,
            &self.rhs,
            &l0.acf,
            &mut l0.res,
        );
    }

    fn solve_doit(&mut self, tol_rel: Float, tol_abs: Float, max_iters: usize) -> WakeResult<usize> {
        self.residual0();
        let resnorm0 = max_abs(&self.levels[0].res);
        let rhsnorm0 = max_abs(&self.rhs);
        let max_norm = rhsnorm0.max(resnorm0);
        let target = tol_abs.max(tol_rel.max(1e-16) * max_norm);

        if resnorm0 <= target {
            trace!("multigrid: no iterations needed, residual {:e}", resnorm0);
            return Ok(0);
        }
        let mut norminf = resnorm0;
        for iter in 0..max_iters {
            self.vcycle();
            self.residual0();
            norminf = max_abs(&self.levels[0].res);
            trace!(
                "multigrid: iteration {:3} resid/max_norm = {:e}",
                iter + 1,
                norminf / max_norm
            );
            if norminf <= target {
                return Ok(iter + 1);
            } else if norminf > 1e20 * max_norm {
                return Err(WakeError::PoissonNotConverged {
                    iterations: iter + 1,
                    residual: norminf,
                    target,
                });
            }
        }
        Err(WakeError::PoissonNotConverged {
            iterations: max_iters,
            residual: norminf,
            target,
        })
    }

    /// One V-cycle on the correction equation `L(cor) = res`, then
    /// `sol += cor` on the finest level.
    fn vcycle(&mut self) {
        let system = self.system;
        let nlev = self.levels.len();
        for ilev in 0..nlev - 1 {
            let (upper, lower) = self.levels.split_at_mut(ilev + 1);
            let lev = &mut upper[ilev];
            for v in lev.cor.iter_mut() {
                *v = 0.0;
            }
            for is in 0..N_COLOR_SWEEPS {
                gsrb(
                    system, is, lev.nx, lev.ny, lev.facx, lev.facy, &mut lev.cor, &lev.res,
                    &lev.acf,
                );
            }
            compute_residual(
                system,
                lev.nx,
                lev.ny,
                lev.facx,
                lev.facy,
                &lev.cor,
                &lev.res,
                &lev.acf,
                &mut lev.rescor,
            );
            restriction(&lev.rescor, lev.nx, lev.ny, &mut lower[0].res);
        }

        {
            let bottom = &mut self.levels[nlev - 1];
            for v in bottom.cor.iter_mut() {
                *v = 0.0;
            }
            for is in 0..N_BOTTOM_SWEEPS {
                gsrb(
                    system,
                    is,
                    bottom.nx,
                    bottom.ny,
                    bottom.facx,
                    bottom.facy,
                    &mut bottom.cor,
                    &bottom.res,
                    &bottom.acf,
                );
            }
        }

        for ilev in (0..nlev - 1).rev() {
            let (upper, lower) = self.levels.split_at_mut(ilev + 1);
            let lev = &mut upper[ilev];
            let crse = &lower[0];
            prolongation_add(&crse.cor, crse.nx, crse.ny, &mut lev.cor);
            for is in 0..N_COLOR_SWEEPS {
                gsrb(
                    system, is, lev.nx, lev.ny, lev.facx, lev.facy, &mut lev.cor, &lev.res,
                    &lev.acf,
                );
            }
        }

        for (s, c) in self.sol.iter_mut().zip(self.levels[0].cor.iter()) {
            *s += c;
        }
    }
}

/// Poisson solver on top of the two-component multigrid, first component
/// only. Dirichlet values sit on the cell faces of the domain boundary.
pub struct MultiGridPoisson {
    geom: Geom,
    staging: Field,
    mg: MultiGrid,
    sol: Vec<Float>,
    rhs: Vec<Float>,
    acf: Vec<Float>,
    tol_rel: Float,
    tol_abs: Float,
    max_iters: usize,
}

impl MultiGridPoisson {
    pub fn new(
        geom: &Geom,
        tol_rel: Float,
        tol_abs: Float,
        max_iters: usize,
    ) -> WakeResult<MultiGridPoisson> {
        let n = geom.nx * geom.ny;
        Ok(MultiGridPoisson {
            geom: geom.clone(),
            staging: Field::new(geom.nx, geom.ny),
            mg: MultiGrid::new(geom.nx, geom.ny, geom.dx[0], geom.dx[1])?,
            sol: vec![0.0; 2 * n],
            rhs: vec![0.0; 2 * n],
            acf: vec![0.0; n],
            tol_rel,
            tol_abs,
            max_iters,
        })
    }
}

impl PoissonSolver for MultiGridPoisson {
    fn staging_area(&mut self) -> &mut Field {
        &mut self.staging
    }

    fn solve(&mut self, lhs: &mut Field, boundary: BoundaryValues) -> WakeResult<()> {
        if let BoundaryValues::Function(g) = boundary {
            inject_boundary(&mut self.staging, &self.geom, -0.5, 8.0 / 3.0, g);
        }
        let n = self.acf.len();
        let nx = self.geom.nx;
        for (j, row) in self.staging.valid_rows().enumerate() {
            self.rhs[j * nx..(j + 1) * nx].copy_from_slice(row);
        }
        for (j, row) in lhs.valid_rows().enumerate() {
            self.sol[j * nx..(j + 1) * nx].copy_from_slice(row);
        }
        for v in self.rhs[n..].iter_mut().chain(self.sol[n..].iter_mut()) {
            *v = 0.0;
        }
        let iters = self.mg.solve1(
            &mut self.sol,
            &self.rhs,
            &self.acf,
            self.tol_rel,
            self.tol_abs,
            self.max_iters,
        )?;
        trace!("multigrid Poisson solve took {} V-cycles", iters);
        lhs.valid_from_slice(&self.sol[..n]);
        match boundary {
            BoundaryValues::Homogeneous => lhs.zero_guards(),
            BoundaryValues::Function(g) => fill_boundary_guards(lhs, &self.geom, g),
        }
        Ok(())
    }

    fn dirichlet_stencil(&self) -> Option<(Float, Float)> {
        Some((-0.5, 8.0 / 3.0))
    }
}
