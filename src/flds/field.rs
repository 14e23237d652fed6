use crate::{Float, NGUARDS};

pub struct Pos {
    pub row: usize,
    pub col: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDim {
    pub size_x: usize,
    pub size_y: usize,
}

/// One transverse plane: `nx * ny` valid cells surrounded by `NGUARDS`
/// guard cells on every side.
#[derive(Clone, Debug)]
pub struct Field {
    pub data: Vec<Float>,
    pub with_ghost_dim: FieldDim,
    pub no_ghost_dim: FieldDim,
}

impl FieldDim {
    pub fn get_index(&self, pos: Pos) -> usize {
        // Using a 1d vec to represent 2D array for speed.
        // Here is the layout if it were a 2d array,
        // with the 1D vec position in []
        // ----------------------------------
        // |   [0]    |   [1]    |   [2]    |
        // |  row: 0  |  row: 0  |  row: 0  |
        // |  col: 0  |  col: 1  |  col: 2  |
        // ----------------------------------
        // |   [3]    |   [4]    |   [5]    |
        // |  row: 1  |  row: 1  |  row: 1  |
        // |  col: 0  |  col: 1  |  col: 2  |
        // ----------------------------------
        // row is the y index, col the x index.

        if !cfg!(feature = "unchecked") {
            assert!(pos.col < self.size_x);
            assert!(pos.row < self.size_y);
        }

        pos.row * self.size_x + pos.col
    }

    pub fn len(&self) -> usize {
        self.size_x * self.size_y
    }
}

impl Field {
    pub fn new(nx: usize, ny: usize) -> Field {
        let with_ghost_dim = FieldDim {
            size_x: nx + 2 * NGUARDS,
            size_y: ny + 2 * NGUARDS,
        };
        Field {
            data: vec![0.0; with_ghost_dim.len()],
            with_ghost_dim,
            no_ghost_dim: FieldDim {
                size_x: nx,
                size_y: ny,
            },
        }
    }

    #[inline(always)]
    pub fn nx(&self) -> usize {
        self.no_ghost_dim.size_x
    }

    #[inline(always)]
    pub fn ny(&self) -> usize {
        self.no_ghost_dim.size_y
    }

    /// Index into `data` of cell (i, j), where (0, 0) is the first valid
    /// cell. `None` outside the allocated region.
    #[inline(always)]
    pub fn index(&self, i: isize, j: isize) -> Option<usize> {
        let ii = i + NGUARDS as isize;
        let jj = j + NGUARDS as isize;
        if ii < 0
            || jj < 0
            || ii >= self.with_ghost_dim.size_x as isize
            || jj >= self.with_ghost_dim.size_y as isize
        {
            None
        } else {
            Some(jj as usize * self.with_ghost_dim.size_x + ii as usize)
        }
    }

    /// Reads outside the allocated region return zero.
    #[inline(always)]
    pub fn get(&self, i: isize, j: isize) -> Float {
        match self.index(i, j) {
            Some(ij) => unsafe {
                // index() only returns in-bounds positions
                *self.data.get_unchecked(ij)
            },
            None => 0.0,
        }
    }

    /// Writes outside the allocated region are dropped.
    #[inline(always)]
    pub fn add(&mut self, i: isize, j: isize, val: Float) {
        if let Some(ij) = self.index(i, j) {
            unsafe { *self.data.get_unchecked_mut(ij) += val }
        }
    }

    #[inline(always)]
    pub fn set(&mut self, i: isize, j: isize, val: Float) {
        if let Some(ij) = self.index(i, j) {
            unsafe { *self.data.get_unchecked_mut(ij) = val }
        }
    }

    /// Valid-region access.
    #[inline(always)]
    pub fn at(&self, i: usize, j: usize) -> Float {
        if !cfg!(feature = "unchecked") {
            assert!(i < self.nx() && j < self.ny());
        }
        let ij = (j + NGUARDS) * self.with_ghost_dim.size_x + i + NGUARDS;
        unsafe { *self.data.get_unchecked(ij) }
    }

    #[inline(always)]
    pub fn at_mut(&mut self, i: usize, j: usize) -> &mut Float {
        if !cfg!(feature = "unchecked") {
            assert!(i < self.nx() && j < self.ny());
        }
        let ij = (j + NGUARDS) * self.with_ghost_dim.size_x + i + NGUARDS;
        unsafe { self.data.get_unchecked_mut(ij) }
    }

    pub fn zero(&mut self) {
        for v in self.data.iter_mut() {
            *v = 0.0;
        }
    }

    pub fn copy_from(&mut self, other: &Field) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(self.no_ghost_dim, other.no_ghost_dim);
        }
        self.data.copy_from_slice(&other.data);
    }

    /// self = a * x + b * y, guard cells included.
    pub fn lin_comb(&mut self, a: Float, x: &Field, b: Float, y: &Field) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(self.data.len(), x.data.len());
            assert_eq!(self.data.len(), y.data.len());
        }
        for (v, xv, yv) in itertools::izip!(&mut self.data, &x.data, &y.data) {
            *v = a * xv + b * yv;
        }
    }

    /// self += a * x, guard cells included.
    pub fn accumulate(&mut self, a: Float, x: &Field) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(self.data.len(), x.data.len());
        }
        for (v, xv) in self.data.iter_mut().zip(x.data.iter()) {
            *v += a * xv;
        }
    }

    pub fn scale(&mut self, a: Float) {
        for v in self.data.iter_mut() {
            *v *= a;
        }
    }

    /// Sum of squares over the valid region.
    pub fn norm_sq(&self) -> Float {
        self.valid_rows().flat_map(|row| row.iter()).map(|v| v * v).sum()
    }

    /// Sum of squared differences over the valid region.
    pub fn diff_norm_sq(&self, other: &Field) -> Float {
        self.valid_rows()
            .zip(other.valid_rows())
            .flat_map(|(a, b)| a.iter().zip(b.iter()))
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    pub fn max_abs(&self) -> Float {
        self.valid_rows()
            .flat_map(|row| row.iter())
            .fold(0.0, |m: Float, v| m.max(v.abs()))
    }

    /// Iterator over the valid part of each row, bottom to top.
    pub fn valid_rows(&self) -> impl Iterator<Item = &[Float]> {
        let sx = self.with_ghost_dim.size_x;
        let nx = self.nx();
        self.data
            .chunks(sx)
            .skip(NGUARDS)
            .take(self.ny())
            .map(move |row| &row[NGUARDS..NGUARDS + nx])
    }

    /// Valid region flattened row-major (x fastest).
    pub fn valid_to_vec(&self) -> Vec<Float> {
        let mut out = Vec::with_capacity(self.nx() * self.ny());
        for row in self.valid_rows() {
            out.extend_from_slice(row);
        }
        out
    }

    pub fn valid_from_slice(&mut self, src: &[Float]) {
        let nx = self.nx();
        let ny = self.ny();
        if !cfg!(feature = "unchecked") {
            assert_eq!(src.len(), nx * ny);
        }
        for j in 0..ny {
            for i in 0..nx {
                *self.at_mut(i, j) = src[j * nx + i];
            }
        }
    }

    pub fn zero_guards(&mut self) {
        let sx = self.with_ghost_dim.size_x as isize;
        let sy = self.with_ghost_dim.size_y as isize;
        let (nx, ny) = (self.nx() as isize, self.ny() as isize);
        let ng = NGUARDS as isize;
        for j in -ng..sy - ng {
            for i in -ng..sx - ng {
                if i < 0 || j < 0 || i >= nx || j >= ny {
                    self.set(i, j, 0.0);
                }
            }
        }
    }

    /// Periodic guard cell fill: every guard takes the value of the valid
    /// cell it wraps onto, corners included.
    pub fn update_ghosts(&mut self) {
        let sx = self.with_ghost_dim.size_x as isize;
        let sy = self.with_ghost_dim.size_y as isize;
        let (nx, ny) = (self.nx() as isize, self.ny() as isize);
        let ng = NGUARDS as isize;
        for j in -ng..sy - ng {
            for i in -ng..sx - ng {
                if i < 0 || j < 0 || i >= nx || j >= ny {
                    let v = self.get(i.rem_euclid(nx), j.rem_euclid(ny));
                    self.set(i, j, v);
                }
            }
        }
    }

    /// Periodic guard cell summation: deposits that landed in guard cells
    /// are added to the valid cell they wrap onto, then the guards are
    /// cleared.
    pub fn deposit_ghosts(&mut self) {
        let sx = self.with_ghost_dim.size_x as isize;
        let sy = self.with_ghost_dim.size_y as isize;
        let (nx, ny) = (self.nx() as isize, self.ny() as isize);
        let ng = NGUARDS as isize;
        for j in -ng..sy - ng {
            for i in -ng..sx - ng {
                if i < 0 || j < 0 || i >= nx || j >= ny {
                    let v = self.get(i, j);
                    if v != 0.0 {
                        self.add(i.rem_euclid(nx), j.rem_euclid(ny), v);
                        self.set(i, j, 0.0);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;

    #[test]
    fn field_init() {
        // checks that all fields are intialized to the correct
        // size and to zero
        let fld = Field::new(24, 12);
        assert_eq!(fld.with_ghost_dim.size_x, 24 + 2 * NGUARDS);
        assert_eq!(fld.with_ghost_dim.size_y, 12 + 2 * NGUARDS);
        assert_eq!(fld.no_ghost_dim.size_x, 24);
        assert_eq!(fld.no_ghost_dim.size_y, 12);
        assert_eq!(
            fld.data.len(),
            fld.with_ghost_dim.size_x * fld.with_ghost_dim.size_y
        );
        assert!(fld.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn row_major_order() {
        let fld = Field::new(24, 12);
        let mut index = 0;
        for i in 0..fld.with_ghost_dim.size_y {
            for j in 0..fld.with_ghost_dim.size_x {
                assert_eq!(fld.with_ghost_dim.get_index(Pos { row: i, col: j }), index);
                index += 1;
            }
        }
        assert_eq!(fld.index(-(NGUARDS as isize), -(NGUARDS as isize)), Some(0));
        assert_eq!(
            fld.index(0, 0),
            Some(NGUARDS * fld.with_ghost_dim.size_x + NGUARDS)
        );
    }

    #[test]
    fn reads_outside_are_zero_and_writes_dropped() {
        let mut fld = Field::new(4, 4);
        for v in fld.data.iter_mut() {
            *v = 1.0;
        }
        let far = -(NGUARDS as isize) - 1;
        assert_eq!(fld.get(far, 0), 0.0);
        assert_eq!(fld.get(0, 4 + NGUARDS as isize), 0.0);
        let before = fld.data.clone();
        fld.add(far, far, 5.0);
        fld.set(100, 2, 5.0);
        assert_eq!(before, fld.data);
        assert_eq!(fld.get(-1, -1), 1.0);
    }

    #[test]
    fn periodic_ghosts() {
        let mut fld = Field::new(6, 4);
        for j in 0..4 {
            for i in 0..6 {
                *fld.at_mut(i, j) = (10 * j + i) as Float;
            }
        }
        fld.update_ghosts();
        assert_eq!(fld.get(-1, 0), fld.at(5, 0));
        assert_eq!(fld.get(6, 3), fld.at(0, 3));
        assert_eq!(fld.get(2, -2), fld.at(2, 2));
        assert_eq!(fld.get(-1, -1), fld.at(5, 3));
        assert_eq!(fld.get(7, 5), fld.at(1, 1));
    }

    #[test]
    fn deposit_ghosts_conserves_sum() {
        let mut fld = Field::new(6, 4);
        fld.add(-1, 0, 1.0);
        fld.add(6, 3, 2.0);
        fld.add(-2, -1, 3.0);
        fld.add(2, 2, 0.5);
        let total: Float = fld.data.iter().sum();
        fld.deposit_ghosts();
        assert!((fld.norm_sq() - (1.0 + 4.0 + 9.0 + 0.25)).abs() < E_TOL);
        let valid_total: Float = fld.valid_to_vec().iter().sum();
        assert!((valid_total - total).abs() < E_TOL);
        assert_eq!(fld.at(5, 0), 1.0);
        assert_eq!(fld.at(0, 3), 2.0);
        assert_eq!(fld.at(4, 3), 3.0);
    }

    #[test]
    fn lin_comb_and_norms() {
        let mut a = Field::new(3, 3);
        let mut b = Field::new(3, 3);
        *a.at_mut(1, 1) = 2.0;
        *b.at_mut(1, 1) = 1.0;
        *b.at_mut(0, 2) = -1.0;
        let mut c = Field::new(3, 3);
        c.lin_comb(1.0, &a, -2.0, &b);
        assert_eq!(c.at(1, 1), 0.0);
        assert_eq!(c.at(0, 2), 2.0);
        assert!((a.diff_norm_sq(&b) - 2.0).abs() < E_TOL);
        assert_eq!(c.max_abs(), 2.0);
    }
}
