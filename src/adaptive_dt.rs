use crate::flds::field::Field;
use crate::prtls::shape::{dispatch_order, Stencil};
use crate::prtls::BeamData;
use crate::{Adaptive, Config, Float, Geom, PhysConst, WakeError, WakeResult, PI};
use log::{debug, warn};

/// Slots of the per-beam accumulator array.
pub const ACC_DT: usize = 0;
pub const ACC_MIN_UZ: usize = 1;
pub const ACC_MIN_ACC: usize = 2;
pub const ACC_SUM_W: usize = 3;
pub const ACC_SUM_WUZ: usize = 4;
pub const ACC_SUM_WUZ2: usize = 5;
pub const NACC: usize = 6;

pub type BeamAccumulators = [Float; NACC];

const MIN_UZ_INIT: Float = 1e30;

fn fresh_accumulators(dt: Float) -> BeamAccumulators {
    let mut acc = [0.0; NACC];
    acc[ACC_DT] = dt;
    acc[ACC_MIN_UZ] = MIN_UZ_INIT;
    acc
}

/// Combines the accumulators of two ranks: sums add, minima take the min.
pub fn reduce_accumulators(into: &mut [BeamAccumulators], other: &[BeamAccumulators]) {
    for (a, b) in into.iter_mut().zip(other.iter()) {
        a[ACC_MIN_UZ] = a[ACC_MIN_UZ].min(b[ACC_MIN_UZ]);
        a[ACC_MIN_ACC] = a[ACC_MIN_ACC].min(b[ACC_MIN_ACC]);
        a[ACC_SUM_W] += b[ACC_SUM_W];
        a[ACC_SUM_WUZ] += b[ACC_SUM_WUZ];
        a[ACC_SUM_WUZ2] += b[ACC_SUM_WUZ2];
    }
}

/// Betatron-resolving time step from the slowest beam particles.
#[derive(Clone, Debug)]
pub struct AdaptiveTimeStep {
    settings: Adaptive,
    numprocs_z: usize,
    mass_ratio: Vec<Float>,
    pub accs: Vec<BeamAccumulators>,
    /// Smallest `uz/c` over all beams from the last calculation.
    pub min_uz: Float,
}

impl AdaptiveTimeStep {
    pub fn new(cfg: &Config) -> AdaptiveTimeStep {
        AdaptiveTimeStep {
            settings: cfg.adaptive.clone(),
            numprocs_z: cfg.run.numprocs_z,
            mass_ratio: cfg.beams.iter().map(|b| b.mass).collect(),
            accs: vec![fresh_accumulators(cfg.run.dt); cfg.beams.len()],
            min_uz: MIN_UZ_INIT,
        }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Clears the particle statistics for a new step. The minimum
    /// acceleration is kept while phase advance control still needs it.
    pub fn reset(&mut self, dt: Float) {
        let keep_acc = self.settings.control_phase_advance;
        for acc in self.accs.iter_mut() {
            let min_acc = acc[ACC_MIN_ACC];
            *acc = fresh_accumulators(dt);
            if keep_acc {
                acc[ACC_MIN_ACC] = min_acc;
            }
        }
    }

    /// Adds the valid particles of one slice, one buffer per beam.
    pub fn accumulate_slice(&mut self, beams: &[BeamData], phys: &PhysConst) {
        let c_inv = 1.0 / phys.c;
        for (acc, beam) in self.accs.iter_mut().zip(beams.iter()) {
            for i in 0..beam.len() {
                if beam.id[i] < 0 {
                    continue;
                }
                let uz = beam.uz[i] * c_inv;
                let w = beam.w[i];
                acc[ACC_SUM_W] += w;
                acc[ACC_SUM_WUZ] += w * uz;
                acc[ACC_SUM_WUZ2] += w * uz * uz;
                acc[ACC_MIN_UZ] = acc[ACC_MIN_UZ].min(uz);
            }
        }
    }

    /// Tracks the strongest longitudinal deceleration `q/m Ez / c` seen by
    /// the beam particles of one slice.
    pub fn gather_min_acc_slice(
        &mut self,
        beams: &[BeamData],
        ez: &Field,
        geom: &Geom,
        phys: &PhysConst,
        order: usize,
    ) {
        if !self.settings.gather_ez {
            return;
        }
        for (acc, beam) in self.accs.iter_mut().zip(beams.iter()) {
            let qmc = beam.charge / (beam.mass * phys.c);
            let min_ez = dispatch_order!(order, min_gathered(beam, ez, geom, qmc));
            acc[ACC_MIN_ACC] = acc[ACC_MIN_ACC].min(min_ez);
        }
    }

    /// New time step at time `t` from the reduced accumulators.
    /// `density(z)` is the peak plasma density at lab position `z`.
    pub fn calculate<F>(&mut self, t: Float, dt: Float, phys: &PhysConst, density: F) -> WakeResult<Float>
    where
        F: Fn(Float) -> Float,
    {
        let s = &self.settings;
        let niter = if s.predict_step { self.numprocs_z } else { 1 };
        let mut new_dts = vec![dt; self.accs.len()];
        let mut min_uz_all = MIN_UZ_INIT;

        for (ib, acc) in self.accs.iter().enumerate() {
            let sum_w = acc[ACC_SUM_W];
            if !(sum_w > 0.0) {
                return Err(WakeError::DegenerateInput(format!(
                    "beam {} has zero total weight, the adaptive time step needs particles",
                    ib
                )));
            }
            let mean = acc[ACC_SUM_WUZ] / sum_w;
            let sigma = (acc[ACC_SUM_WUZ2] / sum_w - mean * mean).abs().sqrt();
            let ratio = self.mass_ratio[ib];
            let mut min_uz = (mean - 4.0 * sigma).max(acc[ACC_MIN_UZ]).min(MIN_UZ_INIT);
            min_uz *= ratio * ratio;
            if min_uz < s.threshold_uz {
                warn!(
                    "beam {}: uz/c = {:.3e} below the threshold {}, the adaptive time step \
                     assumes a relativistic beam",
                    ib, min_uz, s.threshold_uz
                );
            }
            min_uz = min_uz.max(s.threshold_uz);
            min_uz_all = min_uz_all.min(min_uz);

            let mut new_time = t;
            let mut new_dt = dt;
            for _ in 0..niter {
                let n = density(phys.c * new_time);
                if !(n > 0.0) {
                    return Err(WakeError::DegenerateInput(format!(
                        "plasma density {:e} at z = {:e}, the adaptive time step needs a \
                         positive density",
                        n,
                        phys.c * new_time
                    )));
                }
                min_uz = (min_uz + acc[ACC_MIN_ACC] * new_dt).max(0.001 * s.threshold_uz);
                let omega_b = plasma_frequency(n, phys) / (2.0 * min_uz).sqrt();
                new_dt = 2.0 * PI / omega_b / s.nt_per_betatron;
                new_time += new_dt;
                if min_uz > s.threshold_uz {
                    new_dts[ib] = new_dt;
                }
            }
        }

        self.min_uz = min_uz_all;
        let dt_new = new_dts
            .iter()
            .fold(Float::MAX, |m, &v| m.min(v))
            .min(s.dt_max);
        for acc in self.accs.iter_mut() {
            acc[ACC_DT] = dt_new;
        }
        debug!("adaptive time step: dt = {:.6e}, min uz/c = {:.3e}", dt_new, self.min_uz);
        Ok(dt_new)
    }

    /// Shortens `dt` until the betatron phase advance over the step,
    /// integrated through the density profile, stays within
    /// `2 pi phase_tolerance / nt_per_betatron` of the one at fixed density.
    pub fn calculate_from_density<F>(&mut self, t: Float, dt: Float, phys: &PhysConst, density: F) -> Float
    where
        F: Fn(Float) -> Float,
    {
        let s = &self.settings;
        if !s.control_phase_advance || s.phase_substeps == 0 {
            return dt;
        }
        let omega_b = |time: Float| {
            plasma_frequency(density(phys.c * time).max(0.0), phys) / (2.0 * self.min_uz).sqrt()
        };
        let dt_sub = dt / s.phase_substeps as Float;
        let omega_b0 = omega_b(t);
        let limit = 2.0 * PI * s.phase_tolerance / s.nt_per_betatron;
        let mut phase = 0.0;
        let mut phase0 = 0.0;
        for i in 0..s.phase_substeps {
            phase += omega_b(t + i as Float * dt_sub) * dt_sub;
            phase0 += omega_b0 * dt_sub;
            if (phase - phase0).abs() > limit {
                if i == 0 {
                    warn!("phase advance control cannot resolve the density gradient at t = {:e}", t);
                    return dt_sub;
                }
                debug!("phase advance control shortens dt to {} sub-steps", i);
                return i as Float * dt_sub;
            }
        }
        for acc in self.accs.iter_mut() {
            acc[ACC_MIN_ACC] = 0.0;
        }
        dt
    }
}

/// `sqrt(n q^2 / (ep0 m_e))`.
pub fn plasma_frequency(density: Float, phys: &PhysConst) -> Float {
    (density * phys.q_e * phys.q_e / (phys.ep0 * phys.m_e)).sqrt()
}

fn min_gathered<const ORDER: usize>(beam: &BeamData, ez: &Field, geom: &Geom, qmc: Float) -> Float {
    let mut min_acc: Float = 0.0;
    for i in 0..beam.len() {
        if beam.id[i] < 0 {
            continue;
        }
        let st = Stencil::new::<ORDER>(beam.x[i], beam.y[i], geom);
        min_acc = min_acc.min(qmc * st.gather::<ORDER>(ez));
    }
    min_acc
}
