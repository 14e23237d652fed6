use crate::flds::field::Field;
use crate::solver::fft_2d::Fft2D;
use crate::solver::wave_num::WaveNumbers;
use crate::solver::{fill_boundary_guards, inject_boundary, BoundaryValues, PoissonSolver};
use crate::{Float, Geom, WakeResult};
use log::debug;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

/// Spectral solver for a doubly periodic slice.
pub struct FftPeriodic {
    staging: Field,
    fft: Fft2D,
    buf: Vec<Complex<Float>>,
    wave_nums: WaveNumbers,
}

impl FftPeriodic {
    pub fn new(geom: &Geom) -> FftPeriodic {
        FftPeriodic {
            staging: Field::new(geom.nx, geom.ny),
            fft: Fft2D::new(geom.nx, geom.ny),
            buf: vec![Complex::zero(); geom.nx * geom.ny],
            wave_nums: WaveNumbers::periodic(geom.nx, geom.ny, geom.dx[0], geom.dx[1]),
        }
    }
}

impl PoissonSolver for FftPeriodic {
    fn staging_area(&mut self) -> &mut Field {
        &mut self.staging
    }

    fn solve(&mut self, lhs: &mut Field, boundary: BoundaryValues) -> WakeResult<()> {
        if let BoundaryValues::Function(_) = boundary {
            debug!("boundary values are ignored by the periodic solver");
        }
        let nx = self.staging.nx();
        for (j, row) in self.staging.valid_rows().enumerate() {
            for (i, v) in row.iter().enumerate() {
                self.buf[j * nx + i] = Complex::new(*v, 0.0);
            }
        }
        self.fft.fft(&mut self.buf);
        for (v, inv) in self.buf.iter_mut().zip(self.wave_nums.inv_eigen.iter()) {
            *v *= *inv;
        }
        self.fft.inv_fft(&mut self.buf);
        for j in 0..lhs.ny() {
            for i in 0..nx {
                *lhs.at_mut(i, j) = self.buf[j * nx + i].re;
            }
        }
        lhs.update_ghosts();
        Ok(())
    }

    fn dirichlet_stencil(&self) -> Option<(Float, Float)> {
        None
    }
}

/// Spectral solver with zero values one cell outside the valid region. The
/// sine transform is an FFT of the odd extension of the data to a
/// `(2nx+2) x (2ny+2)` array.
pub struct FftDirichlet {
    geom: Geom,
    staging: Field,
    fft: Fft2D,
    expanded: Vec<Complex<Float>>,
    work: Vec<Float>,
    wave_nums: WaveNumbers,
}

impl FftDirichlet {
    pub fn new(geom: &Geom) -> FftDirichlet {
        let (nx, ny) = (geom.nx, geom.ny);
        let (ex, ey) = (2 * nx + 2, 2 * ny + 2);
        FftDirichlet {
            geom: geom.clone(),
            staging: Field::new(nx, ny),
            fft: Fft2D::new(ex, ey),
            expanded: vec![Complex::zero(); ex * ey],
            work: vec![0.0; nx * ny],
            wave_nums: WaveNumbers::dirichlet(nx, ny, geom.dx[0], geom.dx[1]),
        }
    }

    fn expand(&mut self) {
        let (nx, ny) = (self.geom.nx, self.geom.ny);
        let (ex, ey) = (2 * nx + 2, 2 * ny + 2);
        for v in self.expanded.iter_mut() {
            *v = Complex::zero();
        }
        for j in 0..ny {
            for i in 0..nx {
                let s = self.work[j * nx + i];
                let (ip, im) = (i + 1, ex - 1 - i);
                let (jp, jm) = (j + 1, ey - 1 - j);
                self.expanded[jp * ex + ip] = Complex::new(s, 0.0);
                self.expanded[jp * ex + im] = Complex::new(-s, 0.0);
                self.expanded[jm * ex + ip] = Complex::new(-s, 0.0);
                self.expanded[jm * ex + im] = Complex::new(s, 0.0);
            }
        }
    }

    /// work <- -Re(FFT(odd extension of work)) at the interior modes.
    fn sine_transform(&mut self) {
        let nx = self.geom.nx;
        let ex = 2 * nx + 2;
        self.expand();
        self.fft.fft(&mut self.expanded);
        for (ij, w) in self.work.iter_mut().enumerate() {
            let (i, j) = (ij % nx, ij / nx);
            *w = -self.expanded[(j + 1) * ex + i + 1].re;
        }
    }
}

impl PoissonSolver for FftDirichlet {
    fn staging_area(&mut self) -> &mut Field {
        &mut self.staging
    }

    fn solve(&mut self, lhs: &mut Field, boundary: BoundaryValues) -> WakeResult<()> {
        if let BoundaryValues::Function(g) = boundary {
            inject_boundary(&mut self.staging, &self.geom, -1.0, 1.0, g);
        }
        let nx = self.geom.nx;
        for (j, row) in self.staging.valid_rows().enumerate() {
            self.work[j * nx..(j + 1) * nx].copy_from_slice(row);
        }
        self.sine_transform();
        for (w, inv) in self.work.iter_mut().zip(self.wave_nums.inv_eigen.iter()) {
            *w *= *inv;
        }
        self.sine_transform();
        lhs.valid_from_slice(&self.work);
        match boundary {
            BoundaryValues::Homogeneous => lhs.zero_guards(),
            BoundaryValues::Function(g) => fill_boundary_guards(lhs, &self.geom, g),
        }
        Ok(())
    }

    fn dirichlet_stencil(&self) -> Option<(Float, Float)> {
        Some((-1.0, 1.0))
    }
}
