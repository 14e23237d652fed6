use crate::flds::field::FieldDim;
use crate::Float;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;
use rustfft::FftPlanner;
use std::sync::Arc;

/// Unnormalised 2-D complex FFT of a row-major `nx * ny` buffer: row
/// transforms, transpose, column transforms, transpose back.
pub struct Fft2D {
    field_size: FieldDim,
    fft_x: Arc<dyn rustfft::Fft<Float>>,
    ifft_x: Arc<dyn rustfft::Fft<Float>>,
    fft_y: Arc<dyn rustfft::Fft<Float>>,
    ifft_y: Arc<dyn rustfft::Fft<Float>>,
    xscratch: Vec<Complex<Float>>,
    yscratch: Vec<Complex<Float>>,
    wrkspace: Vec<Complex<Float>>,
}

impl Fft2D {
    pub fn new(nx: usize, ny: usize) -> Fft2D {
        let mut planner = FftPlanner::new();
        let field_size = FieldDim {
            size_x: nx,
            size_y: ny,
        };
        let fft_x = planner.plan_fft_forward(nx);
        let ifft_x = planner.plan_fft_inverse(nx);
        let fft_y = planner.plan_fft_forward(ny);
        let ifft_y = planner.plan_fft_inverse(ny);
        let xscratch = vec![
            Complex::zero();
            fft_x
                .get_outofplace_scratch_len()
                .max(ifft_x.get_outofplace_scratch_len())
        ];
        let yscratch = vec![
            Complex::zero();
            fft_y
                .get_outofplace_scratch_len()
                .max(ifft_y.get_outofplace_scratch_len())
        ];
        Fft2D {
            field_size,
            fft_x,
            ifft_x,
            fft_y,
            ifft_y,
            xscratch,
            yscratch,
            wrkspace: vec![Complex::zero(); nx * ny],
        }
    }

    pub fn len(&self) -> usize {
        self.field_size.len()
    }

    fn transpose_out_of_place(
        in_vec: &[Complex<Float>],
        out_vec: &mut [Complex<Float>],
        dim: &mut FieldDim,
    ) {
        let size_x = dim.size_x;
        let size_y = dim.size_y;

        if !cfg!(feature = "unchecked") {
            assert_eq!(in_vec.len(), out_vec.len());
            assert_eq!(in_vec.len(), size_x * size_y);
        }
        for i in 0..size_y {
            for j in 0..size_x {
                unsafe {
                    // lengths checked above unless running unchecked
                    *out_vec.get_unchecked_mut(j * size_y + i) =
                        *in_vec.get_unchecked(i * size_x + j);
                }
            }
        }
        dim.size_x = size_y;
        dim.size_y = size_x;
    }

    pub fn fft(&mut self, data: &mut [Complex<Float>]) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(data.len(), self.field_size.len());
        }
        self.fft_x
            .process_outofplace_with_scratch(data, &mut self.wrkspace, &mut self.xscratch);
        Fft2D::transpose_out_of_place(&self.wrkspace, data, &mut self.field_size);
        self.fft_y
            .process_outofplace_with_scratch(data, &mut self.wrkspace, &mut self.yscratch);
        Fft2D::transpose_out_of_place(&self.wrkspace, data, &mut self.field_size);
    }

    /// Inverse transform including the `1/(nx*ny)` normalisation.
    pub fn inv_fft(&mut self, data: &mut [Complex<Float>]) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(data.len(), self.field_size.len());
        }
        self.ifft_x
            .process_outofplace_with_scratch(data, &mut self.wrkspace, &mut self.xscratch);
        Fft2D::transpose_out_of_place(&self.wrkspace, data, &mut self.field_size);
        self.ifft_y
            .process_outofplace_with_scratch(data, &mut self.wrkspace, &mut self.yscratch);
        Fft2D::transpose_out_of_place(&self.wrkspace, data, &mut self.field_size);

        let norm = (data.len() as Float).powi(-1);
        for v in data.iter_mut() {
            *v *= norm;
        }
    }
}
