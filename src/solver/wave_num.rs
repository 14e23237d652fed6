use crate::{Float, PI};
use itertools::izip;

/// Mode numbers of a 2-D transform and the inverse eigenvalues of the
/// 5-point Laplacian for each mode.
pub struct WaveNumbers {
    pub k_x: Vec<Float>,
    pub k_y: Vec<Float>,
    pub inv_eigen: Vec<Float>,
}

impl WaveNumbers {
    /// Periodic box of `nx * ny` cells. The zero mode has no inverse and is
    /// set to zero.
    pub fn periodic(nx: usize, ny: usize, dx: Float, dy: Float) -> WaveNumbers {
        let mut k_x = vec![0.0; nx * ny];
        let mut k_y = vec![0.0; nx * ny];
        let mut inv_eigen = vec![0.0; nx * ny];

        for i in 0..ny {
            for j in 0..nx {
                let ind = i * nx + j;
                k_x[ind] = j as Float;
                if j >= nx / 2 + 1 {
                    k_x[ind] -= nx as Float;
                }
                k_x[ind] *= 2.0 * PI / (nx as Float);
                k_y[ind] = i as Float;
                if i >= ny / 2 + 1 {
                    k_y[ind] -= ny as Float;
                }
                k_y[ind] *= 2.0 * PI / (ny as Float);
            }
        }
        for (inv, kx, ky) in izip!(&mut inv_eigen, &k_x, &k_y) {
            let sx = (0.5 * kx).sin();
            let sy = (0.5 * ky).sin();
            let eigen = -4.0 * (sx * sx / (dx * dx) + sy * sy / (dy * dy));
            *inv = if eigen == 0.0 { 0.0 } else { 1.0 / eigen };
        }
        inv_eigen[0] = 0.0;

        WaveNumbers {
            k_x,
            k_y,
            inv_eigen,
        }
    }

    /// Sine modes of an `nx * ny` box with zero values one cell outside.
    /// The eigenvalues include the normalisation of the two forward
    /// transforms used by the expanded sine transform.
    pub fn dirichlet(nx: usize, ny: usize, dx: Float, dy: Float) -> WaveNumbers {
        let mut k_x = vec![0.0; nx * ny];
        let mut k_y = vec![0.0; nx * ny];
        let mut inv_eigen = vec![0.0; nx * ny];
        let norm = 1.0 / (4.0 * (nx + 1) as Float * (ny + 1) as Float);

        for i in 0..ny {
            for j in 0..nx {
                let ind = i * nx + j;
                k_x[ind] = (j + 1) as Float * PI / (nx + 1) as Float;
                k_y[ind] = (i + 1) as Float * PI / (ny + 1) as Float;
            }
        }
        for (inv, kx, ky) in izip!(&mut inv_eigen, &k_x, &k_y) {
            let sx = (0.5 * kx).sin();
            let sy = (0.5 * ky).sin();
            *inv = norm / (-4.0 * (sx * sx / (dx * dx) + sy * sy / (dy * dy)));
        }

        WaveNumbers {
            k_x,
            k_y,
            inv_eigen,
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;

    #[test]
    fn periodic_modes_wrap_and_zero_mode_is_zero() {
        let wn = WaveNumbers::periodic(8, 4, 0.5, 0.25);
        assert_eq!(wn.inv_eigen[0], 0.0);
        // j = 5 wraps to -3
        assert!((wn.k_x[5] + 3.0 * 2.0 * PI / 8.0).abs() < E_TOL);
        assert!((wn.k_y[3 * 8] + 2.0 * PI / 4.0).abs() < E_TOL);
        assert!(wn.inv_eigen.iter().skip(1).all(|&v| v < 0.0));
    }

    #[test]
    fn dirichlet_lowest_mode() {
        let (nx, ny, dx, dy) = (6, 6, 0.1, 0.1);
        let wn = WaveNumbers::dirichlet(nx, ny, dx, dy);
        let s = (PI / 14.0).sin();
        let expected = 1.0 / (4.0 * 49.0) / (-8.0 * s * s / (dx * dx));
        assert!((wn.inv_eigen[0] - expected).abs() < E_TOL);
    }
}
