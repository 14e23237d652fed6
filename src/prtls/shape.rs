use crate::flds::field::Field;
use crate::{Float, Geom};

/// Calls `$f::<ORDER>(args)` for a deposition order known only at run
/// time. Orders above 3 are rejected by `Config::validate`.
macro_rules! dispatch_order {
    ($order:expr, $f:ident ( $($arg:expr),* $(,)? )) => {
        match $order {
            0 => $f::<0>($($arg),*),
            1 => $f::<1>($($arg),*),
            2 => $f::<2>($($arg),*),
            _ => $f::<3>($($arg),*),
        }
    };
}
pub(crate) use dispatch_order;

/// Shape factor along one axis. `xmid` is the position in units of the
/// cell size, measured from the first cell centre. Returns the first cell
/// of the stencil and its `ORDER + 1` weights.
#[inline(always)]
pub fn shape_factor<const ORDER: usize>(xmid: Float) -> (isize, [Float; 4]) {
    match ORDER {
        0 => {
            let j = (xmid + 0.5).floor();
            (j as isize, [1.0, 0.0, 0.0, 0.0])
        }
        1 => {
            let j = xmid.floor();
            let f = xmid - j;
            (j as isize, [1.0 - f, f, 0.0, 0.0])
        }
        2 => {
            let j = (xmid + 0.5).floor();
            let f = xmid - j;
            (
                j as isize - 1,
                [
                    0.5 * (0.5 - f) * (0.5 - f),
                    0.75 - f * f,
                    0.5 * (0.5 + f) * (0.5 + f),
                    0.0,
                ],
            )
        }
        _ => {
            let j = xmid.floor();
            let f = xmid - j;
            let g = 1.0 - f;
            (
                j as isize - 1,
                [
                    g * g * g / 6.0,
                    2.0 / 3.0 - f * f + 0.5 * f * f * f,
                    2.0 / 3.0 - g * g + 0.5 * g * g * g,
                    f * f * f / 6.0,
                ],
            )
        }
    }
}

/// Tensor-product stencil of one particle on a transverse slice.
#[derive(Clone, Copy, Debug)]
pub struct Stencil {
    pub i0: isize,
    pub j0: isize,
    pub wx: [Float; 4],
    pub wy: [Float; 4],
}

impl Stencil {
    #[inline(always)]
    pub fn new<const ORDER: usize>(x: Float, y: Float, geom: &Geom) -> Stencil {
        let (i0, wx) = shape_factor::<ORDER>((x - geom.lo[0]) / geom.dx[0] - 0.5);
        let (j0, wy) = shape_factor::<ORDER>((y - geom.lo[1]) / geom.dx[1] - 0.5);
        Stencil { i0, j0, wx, wy }
    }

    #[inline(always)]
    pub fn gather<const ORDER: usize>(&self, fld: &Field) -> Float {
        let mut val = 0.0;
        for jj in 0..=ORDER {
            for ii in 0..=ORDER {
                val += self.wx[ii]
                    * self.wy[jj]
                    * fld.get(self.i0 + ii as isize, self.j0 + jj as isize);
            }
        }
        val
    }

    #[inline(always)]
    pub fn deposit<const ORDER: usize>(&self, fld: &mut Field, val: Float) {
        for jj in 0..=ORDER {
            for ii in 0..=ORDER {
                fld.add(
                    self.i0 + ii as isize,
                    self.j0 + jj as isize,
                    self.wx[ii] * self.wy[jj] * val,
                );
            }
        }
    }
}
