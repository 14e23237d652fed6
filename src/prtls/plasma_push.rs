use crate::prtls::beam_push::SliceFields;
use crate::prtls::dual::DualNumber;
use crate::prtls::shape::{dispatch_order, Stencil};
use crate::prtls::{
    enforce_transverse_bc, invalidate, PlasmaData, PlasmaParticle, AB5_PSI, AB5_UX, AB5_UY, AB5_X,
    AB5_Y, PSI_MIN,
};
use crate::{Float, Geom, PhysConst, PlasmaPusher, PRTL_CHUNK_SIZE};
use log::warn;
use rayon::prelude::*;
use std::ops::{Add, Mul, Sub};

const N_SUB: usize = 4;

const AB5_COEFFS: [Float; 5] = [
    1901.0 / 720.0,
    -1387.0 / 360.0,
    109.0 / 30.0,
    -637.0 / 360.0,
    251.0 / 720.0,
];

/// Particles affected by the safety checks of one plasma push.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushStats {
    pub lost: usize,
    pub non_finite: usize,
    pub clamped_psi: usize,
}

impl Add for PushStats {
    type Output = PushStats;
    fn add(self, rhs: PushStats) -> PushStats {
        PushStats {
            lost: self.lost + rhs.lost,
            non_finite: self.non_finite + rhs.non_finite,
            clamped_psi: self.clamped_psi + rhs.clamped_psi,
        }
    }
}

pub struct PlasmaPushParams<'a> {
    pub fields: SliceFields<'a>,
    pub geom: &'a Geom,
    pub phys: &'a PhysConst,
    pub periodic: bool,
    /// Trial pushes of the predictor-corrector loop leave the committed
    /// half-step state alone.
    pub temp: bool,
}

/// Gathered fields with `Bx, By` in units of `E`.
#[derive(Clone, Copy)]
struct LocalFields {
    exmby: Float,
    eypbx: Float,
    ez: Float,
    bx: Float,
    by: Float,
    bz: Float,
}

/// `d/dzeta` of `ux, uy, psi`, for plain or dual numbers.
#[inline(always)]
fn momentum_derivatives<T>(ux: T, uy: T, psi_inv: T, f: &LocalFields, c_inv: Float, qmc: Float) -> [T; 3]
where
    T: Copy
        + Add<Output = T>
        + Add<Float, Output = T>
        + Sub<Output = T>
        + Mul<Output = T>
        + Mul<Float, Output = T>,
{
    let gamma_psi = ((ux * ux + uy * uy) * (c_inv * c_inv) + 1.0) * psi_inv * psi_inv * 0.5 + 0.5;
    let dz_ux = (gamma_psi * f.exmby + uy * psi_inv * f.bz + f.by) * qmc;
    let dz_uy = (gamma_psi * f.eypbx - ux * psi_inv * f.bz + (-f.bx)) * qmc;
    let dz_psi = ((ux * f.exmby + uy * f.eypbx) * c_inv * psi_inv + (-f.ez)) * (qmc * c_inv);
    [dz_ux, dz_uy, dz_psi]
}

/// Second order Taylor step of `ux, uy, psi`, the second derivative taken
/// through dual numbers.
#[inline(always)]
fn taylor_substep(u: &mut [Float; 3], h: Float, f: &LocalFields, c_inv: Float, qmc: Float) {
    let psi_inv = 1.0 / u[2];
    let d = momentum_derivatives(u[0], u[1], psi_inv, f, c_inv, qmc);
    let dd = momentum_derivatives(
        DualNumber::new(u[0], d[0]),
        DualNumber::new(u[1], d[1]),
        DualNumber::new(psi_inv, -psi_inv * psi_inv * d[2]),
        f,
        c_inv,
        qmc,
    );
    for k in 0..3 {
        u[k] += h * d[k] + 0.5 * h * h * dd[k].epsilon;
    }
}

fn clamp_psi(psi: &mut Float) -> bool {
    if *psi <= 0.0 {
        *psi = PSI_MIN;
        true
    } else {
        false
    }
}

/// Invalidates the particle and reports whether it had to.
fn reject_non_finite(p: &mut PlasmaParticle, vals: &[Float]) -> bool {
    if vals.iter().all(|v| v.is_finite()) {
        false
    } else {
        invalidate(&mut p.id);
        true
    }
}

struct Kernel<'a> {
    params: &'a PlasmaPushParams<'a>,
    dz: Float,
    c_inv: Float,
    qmc: Float,
}

impl<'a> Kernel<'a> {
    #[inline(always)]
    fn gather<const ORDER: usize>(&self, p: &PlasmaParticle) -> LocalFields {
        let st = Stencil::new::<ORDER>(p.x_prev, p.y_prev, self.params.geom);
        let c = self.params.phys.c;
        let flds = &self.params.fields;
        LocalFields {
            exmby: st.gather::<ORDER>(flds.exmby),
            eypbx: st.gather::<ORDER>(flds.eypbx),
            ez: st.gather::<ORDER>(flds.ez),
            bx: st.gather::<ORDER>(flds.bx) * c,
            by: st.gather::<ORDER>(flds.by) * c,
            bz: st.gather::<ORDER>(flds.bz),
        }
    }

    /// Writes the new position and, for final pushes, the half-step state.
    #[inline(always)]
    fn commit(&self, p: &mut PlasmaParticle, mut xp: Float, mut yp: Float, half: [Float; 3]) -> bool {
        let inside = enforce_transverse_bc(&mut xp, &mut yp, self.params.geom, self.params.periodic);
        p.x = xp;
        p.y = yp;
        if !inside {
            invalidate(&mut p.id);
            return false;
        }
        if !self.params.temp {
            p.ux_half = half[0];
            p.uy_half = half[1];
            p.psi_half = half[2];
            p.x_prev = xp;
            p.y_prev = yp;
        }
        true
    }

    fn dual<const ORDER: usize>(&self, p: &mut PlasmaParticle) -> PushStats {
        let mut stats = PushStats::default();
        if p.id < 0 {
            return stats;
        }
        let qmc = self.qmc * p.ion_lev as Float;
        let f = self.gather::<ORDER>(p);
        let sdz = self.dz / N_SUB as Float;

        let mut u = [p.ux_half, p.uy_half, p.psi_half];
        for _ in 0..N_SUB {
            taylor_substep(&mut u, sdz, &f, self.c_inv, qmc);
        }
        let mut clamped = clamp_psi(&mut u[2]);
        let xp = p.x_prev + self.dz * self.c_inv * u[0] / u[2];
        let yp = p.y_prev + self.dz * self.c_inv * u[1] / u[2];
        if reject_non_finite(p, &[u[0], u[1], u[2], xp, yp]) {
            stats.non_finite = 1;
            return stats;
        }
        if !self.commit(p, xp, yp, u) {
            stats.lost = 1;
            return stats;
        }

        for _ in 0..N_SUB / 2 {
            taylor_substep(&mut u, sdz, &f, self.c_inv, qmc);
        }
        clamped |= clamp_psi(&mut u[2]);
        if reject_non_finite(p, &u) {
            stats.non_finite = 1;
            return stats;
        }
        p.ux = u[0];
        p.uy = u[1];
        p.psi = u[2];
        stats.clamped_psi = clamped as usize;
        stats
    }

    fn ab5<const ORDER: usize>(
        &self,
        p: &mut PlasmaParticle,
        hist: &mut [[Float; 5]; 5],
        head: usize,
    ) -> PushStats {
        let mut stats = PushStats::default();
        if p.id < 0 {
            return stats;
        }
        let qmc = self.qmc * p.ion_lev as Float;
        let f = self.gather::<ORDER>(p);

        let psi_inv = 1.0 / p.psi_half;
        let [dz_ux, dz_uy, dz_psi] =
            momentum_derivatives(p.ux_half, p.uy_half, psi_inv, &f, self.c_inv, qmc);
        hist[AB5_X][head] = self.c_inv * p.ux_half * psi_inv;
        hist[AB5_Y][head] = self.c_inv * p.uy_half * psi_inv;
        hist[AB5_UX][head] = dz_ux;
        hist[AB5_UY][head] = dz_uy;
        hist[AB5_PSI][head] = dz_psi;

        let (mut xp, mut yp) = (p.x_prev, p.y_prev);
        let mut u = [p.ux_half, p.uy_half, p.psi_half];
        for (k, coeff) in AB5_COEFFS.iter().enumerate() {
            let slot = (head + k) % 5;
            let a = coeff * self.dz;
            xp += a * hist[AB5_X][slot];
            yp += a * hist[AB5_Y][slot];
            u[0] += a * hist[AB5_UX][slot];
            u[1] += a * hist[AB5_UY][slot];
            u[2] += a * hist[AB5_PSI][slot];
        }
        stats.clamped_psi = clamp_psi(&mut u[2]) as usize;
        if reject_non_finite(p, &[u[0], u[1], u[2], xp, yp]) {
            stats.non_finite = 1;
            return stats;
        }
        if !self.commit(p, xp, yp, u) {
            stats.lost = 1;
            return stats;
        }
        p.ux = u[0];
        p.uy = u[1];
        p.psi = u[2];
        stats
    }
}

fn push_impl<const ORDER: usize>(plasma: &mut PlasmaData, params: &PlasmaPushParams) -> PushStats {
    let c = params.phys.c;
    let kernel = Kernel {
        params,
        dz: params.geom.dx[2],
        c_inv: 1.0 / c,
        qmc: plasma.charge / (plasma.mass * c),
    };
    match plasma.pusher {
        PlasmaPusher::DualNumber => plasma
            .prtls
            .par_chunks_mut(PRTL_CHUNK_SIZE)
            .map(|chunk| {
                chunk
                    .iter_mut()
                    .fold(PushStats::default(), |s, p| s + kernel.dual::<ORDER>(p))
            })
            .reduce(PushStats::default, |a, b| a + b),
        PlasmaPusher::Ab5 => {
            let head = plasma.history.head();
            let stats = plasma
                .prtls
                .par_chunks_mut(PRTL_CHUNK_SIZE)
                .zip(plasma.history.slots.par_chunks_mut(PRTL_CHUNK_SIZE))
                .map(|(chunk, hist)| {
                    chunk
                        .iter_mut()
                        .zip(hist.iter_mut())
                        .fold(PushStats::default(), |s, (p, h)| s + kernel.ab5::<ORDER>(p, h, head))
                })
                .reduce(PushStats::default, |a, b| a + b);
            if !params.temp {
                plasma.history.rotate();
            }
            stats
        }
    }
}

/// Advances the plasma by one slice. Particles that left the domain or
/// whose state became non-finite are invalidated.
pub fn push_plasma(plasma: &mut PlasmaData, params: &PlasmaPushParams, order: usize) -> PushStats {
    let stats = dispatch_order!(order, push_impl(plasma, params));
    if stats.non_finite > 0 {
        warn!(
            "plasma {}: {} particles with non-finite momenta were removed",
            plasma.name, stats.non_finite
        );
    }
    if stats.clamped_psi > 0 {
        warn!(
            "plasma {}: psi clamped to {} for {} particles",
            plasma.name, PSI_MIN, stats.clamped_psi
        );
    }
    stats
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::flds::{Comp, Fields, Level};
    use crate::{build_test_config, FieldBoundary, PlasmaConfig, SolverMode, E_TOL};

    fn setup(pusher: PlasmaPusher) -> (PlasmaData, Fields, Geom, PhysConst) {
        let cfg = build_test_config();
        let geom = Geom::new(&cfg.grid);
        let phys = PhysConst::new(true);
        let plasma = PlasmaData::new(
            &PlasmaConfig {
                radius: 0.5,
                pusher,
                ..Default::default()
            },
            &geom,
            &phys,
        );
        let fields = Fields::new(&geom, SolverMode::PredictorCorrector, FieldBoundary::Dirichlet);
        (plasma, fields, geom, phys)
    }

    fn set_uniform(fields: &mut Fields, comp: Comp, val: Float) {
        let fld = fields.get_mut(Level::This, comp);
        for v in fld.data.iter_mut() {
            *v = val;
        }
    }

    fn push(plasma: &mut PlasmaData, fields: &Fields, geom: &Geom, phys: &PhysConst, temp: bool) -> PushStats {
        let params = PlasmaPushParams {
            fields: SliceFields::this_slice(fields),
            geom,
            phys,
            periodic: false,
            temp,
        };
        push_plasma(plasma, &params, 2)
    }

    #[test]
    fn rest_stays_at_rest_without_fields() {
        for &pusher in &[PlasmaPusher::DualNumber, PlasmaPusher::Ab5] {
            let (mut plasma, fields, geom, phys) = setup(pusher);
            let before = plasma.prtls.clone();
            let stats = push(&mut plasma, &fields, &geom, &phys, false);
            assert_eq!(stats, PushStats::default());
            for (a, b) in before.iter().zip(plasma.prtls.iter()) {
                assert_eq!(a.x, b.x);
                assert_eq!(b.ux, 0.0);
                assert!((b.psi - 1.0).abs() < E_TOL);
            }
        }
    }

    #[test]
    fn dual_scheme_follows_uniform_ez() {
        let (mut plasma, mut fields, geom, phys) = setup(PlasmaPusher::DualNumber);
        set_uniform(&mut fields, Comp::Ez, 0.2);
        // electrons: d psi / d zeta = Ez
        let dz = geom.dx[2];
        push(&mut plasma, &fields, &geom, &phys, true);
        let p = plasma.prtls[0];
        assert_eq!(p.psi_half, 1.0);
        assert!((p.psi - (1.0 + 1.5 * dz * 0.2)).abs() < 1e-12);

        push(&mut plasma, &fields, &geom, &phys, false);
        let p = plasma.prtls[0];
        assert!((p.psi_half - (1.0 + dz * 0.2)).abs() < 1e-12);
        assert_eq!(p.x_prev, p.x0);
    }

    #[test]
    fn ab5_reaches_exact_increment_once_history_is_full() {
        let (mut plasma, mut fields, geom, phys) = setup(PlasmaPusher::Ab5);
        set_uniform(&mut fields, Comp::Ez, 0.2);
        let dz = geom.dx[2];
        let mut last = 1.0;
        for step in 0..6 {
            push(&mut plasma, &fields, &geom, &phys, false);
            let psi = plasma.prtls[0].psi_half;
            if step >= 4 {
                assert!((psi - last - dz * 0.2).abs() < 1e-12);
            }
            last = psi;
        }
        // a trial push leaves the committed state alone
        let before = plasma.prtls[0];
        let head = plasma.history.head();
        push(&mut plasma, &fields, &geom, &phys, true);
        assert_eq!(plasma.prtls[0].psi_half, before.psi_half);
        assert_eq!(plasma.history.head(), head);
    }

    #[test]
    fn strong_field_clamps_psi() {
        let (mut plasma, mut fields, geom, phys) = setup(PlasmaPusher::DualNumber);
        set_uniform(&mut fields, Comp::Ez, -10.0);
        let stats = push(&mut plasma, &fields, &geom, &phys, false);
        assert_eq!(stats.clamped_psi, plasma.len());
        assert_eq!(plasma.prtls[0].psi_half, PSI_MIN);
        assert_eq!(plasma.prtls[0].psi, PSI_MIN);
    }

    #[test]
    fn non_finite_state_is_removed() {
        let (mut plasma, fields, geom, phys) = setup(PlasmaPusher::DualNumber);
        plasma.prtls[1].ux_half = Float::NAN;
        let stats = push(&mut plasma, &fields, &geom, &phys, false);
        assert_eq!(stats.non_finite, 1);
        assert!(plasma.prtls[1].id < 0);
        assert!(plasma.prtls[0].id > 0);
    }
}
