use crate::flds::field::Field;
use crate::{Float, Geom, PI};
use log::warn;

/// Free-space potential of a compact 2-D source, expanded in multipoles
/// around the centre of the slice. Used as Dirichlet values for open
/// boundaries.
#[derive(Clone, Debug)]
pub struct Multipole {
    center: (Float, Float),
    q0: Float,
    /// (C_m, S_m) for m = 1..=order
    moments: Vec<(Float, Float)>,
}

impl Multipole {
    /// Computes the moments of `source`. Returns `None` when the source
    /// extends beyond `cutoff` times the distance from the centre to the
    /// closest domain edge, where the expansion is not trustworthy.
    pub fn from_source(source: &Field, geom: &Geom, order: usize, cutoff: Float) -> Option<Multipole> {
        let center = (
            0.5 * (geom.lo[0] + geom.hi[0]),
            0.5 * (geom.lo[1] + geom.hi[1]),
        );
        let boundary_radius = (0.5 * (geom.hi[0] - geom.lo[0])).min(0.5 * (geom.hi[1] - geom.lo[1]));
        let da = geom.dx[0] * geom.dx[1];
        let smax = source.max_abs();

        let mut q0 = 0.0;
        let mut moments = vec![(0.0, 0.0); order];
        let mut support: Float = 0.0;
        for j in 0..source.ny() {
            let y = geom.y_center(j as isize) - center.1;
            for i in 0..source.nx() {
                let s = source.at(i, j);
                if s == 0.0 || s.abs() <= 1e-12 * smax {
                    continue;
                }
                let x = geom.x_center(i as isize) - center.0;
                let r = x.hypot(y);
                support = support.max(r);
                let theta = y.atan2(x);
                q0 += s * da;
                let mut rm = 1.0;
                for (m, (cm, sm)) in moments.iter_mut().enumerate() {
                    rm *= r;
                    let arg = (m + 1) as Float * theta;
                    *cm += s * rm * arg.cos() * da;
                    *sm += s * rm * arg.sin() * da;
                }
            }
        }
        if support > cutoff * boundary_radius {
            warn!(
                "source extends to r = {:.3e}, beyond {} x boundary radius {:.3e}; \
                 using homogeneous boundary values",
                support, cutoff, boundary_radius
            );
            return None;
        }
        Some(Multipole {
            center,
            q0,
            moments,
        })
    }

    pub fn potential(&self, x: Float, y: Float) -> Float {
        let (dx, dy) = (x - self.center.0, y - self.center.1);
        let r = dx.hypot(dy);
        if r == 0.0 {
            return 0.0;
        }
        let theta = dy.atan2(dx);
        let mut phi = self.q0 * r.ln();
        let mut rm = 1.0;
        for (m, (cm, sm)) in self.moments.iter().enumerate() {
            rm *= r;
            let mf = (m + 1) as Float;
            phi -= (cm * (mf * theta).cos() + sm * (mf * theta).sin()) / (mf * rm);
        }
        phi / (2.0 * PI)
    }
}

/// Quadratic interpolation of a solved coarse slice, giving boundary
/// values for a refined sub-domain inside it.
pub struct CoarseInterpolation<'a> {
    coarse: &'a Field,
    lo: (Float, Float),
    dx: (Float, Float),
}

impl<'a> CoarseInterpolation<'a> {
    pub fn new(coarse: &'a Field, geom: &Geom) -> CoarseInterpolation<'a> {
        CoarseInterpolation {
            coarse,
            lo: (geom.lo[0], geom.lo[1]),
            dx: (geom.dx[0], geom.dx[1]),
        }
    }

    /// Centre cell of the 3-point stencil and the offset from it in cells.
    #[inline(always)]
    fn stencil(pos: Float, lo: Float, d: Float, n: usize) -> (isize, Float) {
        let xmid = (pos - lo) / d - 0.5;
        let i0 = (xmid.round() as isize).max(1).min(n as isize - 2);
        (i0, xmid - i0 as Float)
    }

    #[inline(always)]
    fn weights(t: Float) -> [Float; 3] {
        [0.5 * t * (t - 1.0), 1.0 - t * t, 0.5 * t * (t + 1.0)]
    }

    pub fn value(&self, x: Float, y: Float) -> Float {
        let (i0, tx) = Self::stencil(x, self.lo.0, self.dx.0, self.coarse.nx());
        let (j0, ty) = Self::stencil(y, self.lo.1, self.dx.1, self.coarse.ny());
        let (wx, wy) = (Self::weights(tx), Self::weights(ty));
        let mut val = 0.0;
        for (jj, wyj) in wy.iter().enumerate() {
            for (ii, wxi) in wx.iter().enumerate() {
                val += wxi * wyj * self.coarse.get(i0 + ii as isize - 1, j0 + jj as isize - 1);
            }
        }
        val
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::solver::spectral::FftDirichlet;
    use crate::solver::{BoundaryValues, PoissonSolver};
    use crate::Grid;

    fn square_geom(n: usize) -> Geom {
        Geom::new(&Grid {
            nx: n,
            ny: n,
            nz: 2,
            lo: [-1.0, -1.0, 0.0],
            hi: [1.0, 1.0, 1.0],
        })
    }

    #[test]
    fn off_centre_point_source_matches_log_potential() {
        let geom = square_geom(32);
        let mut src = Field::new(32, 32);
        let (i, j) = (18, 16);
        *src.at_mut(i, j) = 1.0 / (geom.dx[0] * geom.dx[1]);
        let (x0, y0) = (geom.x_center(i as isize), geom.y_center(j as isize));

        let mp = Multipole::from_source(&src, &geom, 10, 0.5).unwrap();
        for &(x, y) in &[(1.0, 0.0), (0.0, -1.0), (-1.0, 0.7), (0.6, 1.0)] {
            let exact = ((x - x0).hypot(y - y0)).ln() / (2.0 * PI);
            assert!((mp.potential(x, y) - exact).abs() < 1e-7);
        }
    }

    #[test]
    fn wide_source_is_rejected() {
        let geom = square_geom(16);
        let mut src = Field::new(16, 16);
        *src.at_mut(8, 8) = 1.0;
        *src.at_mut(0, 15) = 1.0;
        assert!(Multipole::from_source(&src, &geom, 4, 0.5).is_none());
        assert!(Multipole::from_source(&src, &geom, 4, 2.0).is_some());
    }

    #[test]
    fn open_boundary_solve_approaches_free_space() {
        // Point source solved on a box with multipole boundary values; the
        // solution near the boundary follows ln(r)/2pi.
        let geom = square_geom(64);
        let mut solver = FftDirichlet::new(&geom);
        let (i, j) = (32, 32);
        let (x0, y0) = (geom.x_center(i), geom.y_center(j));
        let stg = solver.staging_area();
        stg.zero();
        *stg.at_mut(32, 32) = 1.0 / (geom.dx[0] * geom.dx[1]);
        let mp = Multipole::from_source(stg, &geom, 6, 0.5).unwrap();
        let g = |x: Float, y: Float| mp.potential(x, y);
        let mut phi = Field::new(64, 64);
        solver.solve(&mut phi, BoundaryValues::Function(&g)).unwrap();
        for &(ii, jj) in &[(2usize, 32usize), (60, 10), (32, 61)] {
            let (x, y) = (geom.x_center(ii as isize), geom.y_center(jj as isize));
            let exact = ((x - x0).hypot(y - y0)).ln() / (2.0 * PI);
            assert!((phi.at(ii, jj) - exact).abs() < 2e-3);
        }
    }

    #[test]
    fn quadratic_interpolation_is_exact_for_quadratics() {
        let geom = square_geom(10);
        let f = |x: Float, y: Float| 1.0 + 0.5 * x - y + 2.0 * x * y - 0.3 * x * x + y * y;
        let mut coarse = Field::new(10, 10);
        for j in 0..10 {
            for i in 0..10 {
                *coarse.at_mut(i, j) = f(geom.x_center(i as isize), geom.y_center(j as isize));
            }
        }
        let interp = CoarseInterpolation::new(&coarse, &geom);
        for &(x, y) in &[(0.0, 0.0), (0.33, -0.71), (-0.98, 0.97), (0.91, 0.02)] {
            assert!((interp.value(x, y) - f(x, y)).abs() < 1e-12);
        }
    }
}
