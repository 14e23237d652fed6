use crate::flds::field::Field;
use crate::flds::Comp;
use crate::Float;

/// Persistent 3-D copy of the converged slices of one rank, possibly
/// coarsened along z. Layout per component: `data[(k * ny + j) * nx + i]`.
pub struct DiagBuffer {
    pub comps: Vec<Comp>,
    pub nx: usize,
    pub ny: usize,
    pub nz_diag: usize,
    pub islice_lo: usize,
    pub nslices: usize,
    pub coarsen_z: usize,
    pub data: Vec<Vec<Float>>,
}

impl DiagBuffer {
    pub fn new(
        comps: Vec<Comp>,
        nx: usize,
        ny: usize,
        islice_lo: usize,
        nslices: usize,
        coarsen_z: usize,
    ) -> DiagBuffer {
        let nz_diag = (nslices + coarsen_z - 1) / coarsen_z;
        let data = comps.iter().map(|_| vec![0.0; nz_diag * ny * nx]).collect();
        DiagBuffer {
            comps,
            nx,
            ny,
            nz_diag,
            islice_lo,
            nslices,
            coarsen_z,
            data,
        }
    }

    pub fn zero(&mut self) {
        for comp_data in self.data.iter_mut() {
            for v in comp_data.iter_mut() {
                *v = 0.0;
            }
        }
    }

    /// Diagnostic layers touched by a slice, with their linear weights.
    /// Weights are divided by `coarsen_z` so a uniform field keeps its value
    /// in interior layers.
    pub fn layer_weights(&self, islice: usize) -> [(isize, Float); 2] {
        let c = self.coarsen_z as Float;
        let local = islice as Float - self.islice_lo as Float;
        let zeta = (local + 0.5) / c - 0.5;
        let k0 = zeta.floor();
        let frac = zeta - k0;
        [
            (k0 as isize, (1.0 - frac) / c),
            (k0 as isize + 1, frac / c),
        ]
    }

    /// Adds the valid region of `fld` into the layers with nonzero weight.
    pub fn deposit_slice(&mut self, islice: usize, comp_idx: usize, fld: &Field) {
        let plane = self.nx * self.ny;
        let weights = self.layer_weights(islice);
        let dst = &mut self.data[comp_idx];
        for &(k, w) in weights.iter() {
            if w == 0.0 || k < 0 || k as usize >= self.nz_diag {
                continue;
            }
            let layer = &mut dst[k as usize * plane..(k as usize + 1) * plane];
            for (out, v) in layer
                .iter_mut()
                .zip(fld.valid_rows().flat_map(|row| row.iter()))
            {
                *out += w * v;
            }
        }
    }

    pub fn layer(&self, comp_idx: usize, k: usize) -> &[Float] {
        let plane = self.nx * self.ny;
        &self.data[comp_idx][k * plane..(k + 1) * plane]
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;

    fn constant_field(val: Float) -> Field {
        let mut fld = Field::new(4, 3);
        for j in 0..3 {
            for i in 0..4 {
                *fld.at_mut(i, j) = val;
            }
        }
        fld
    }

    #[test]
    fn uncoarsened_copy_is_exact() {
        let mut diag = DiagBuffer::new(vec![Comp::Ez], 4, 3, 8, 4, 1);
        assert_eq!(diag.nz_diag, 4);
        let mut fld = Field::new(4, 3);
        *fld.at_mut(2, 1) = 5.0;
        diag.deposit_slice(10, 0, &fld);
        assert_eq!(diag.layer(0, 2)[1 * 4 + 2], 5.0);
        for k in [0, 1, 3].iter() {
            assert!(diag.layer(0, *k).iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn coarsened_interior_layer_averages() {
        let mut diag = DiagBuffer::new(vec![Comp::Rho], 4, 3, 0, 8, 2);
        assert_eq!(diag.nz_diag, 4);
        for islice in 0..8 {
            diag.deposit_slice(islice, 0, &constant_field(2.0));
        }
        for k in 1..3 {
            assert!(diag.layer(0, k).iter().all(|&v| (v - 2.0).abs() < E_TOL));
        }
    }

    #[test]
    fn weights_sum_to_inverse_coarsening() {
        let diag = DiagBuffer::new(vec![Comp::Rho], 2, 2, 4, 12, 3);
        for islice in 4..16 {
            let w = diag.layer_weights(islice);
            assert!((w[0].1 + w[1].1 - 1.0 / 3.0).abs() < E_TOL);
            assert_eq!(w[1].0, w[0].0 + 1);
        }
    }
}
