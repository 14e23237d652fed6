pub mod beam_push;
pub mod bins;
pub mod box_sort;
pub mod deposit;
pub mod dual;
pub mod plasma_push;
pub mod shape;
pub mod slice_sort;

use crate::{
    BeamConfig, BeamProfile, Float, Geom, PhysConst, PlasmaConfig, PlasmaPusher, WakeError,
    WakeResult, PI,
};
use itertools::izip;
use rand::prelude::*;
use rand_distr::{Normal, StandardNormal};

/// Lower bound applied to the plasma pseudo-potential `psi`.
pub const PSI_MIN: Float = 1e-2;

/// Beam macro-particles of one species, struct of arrays. Momenta are
/// `gamma * v`.
#[derive(Clone, Debug)]
pub struct BeamData {
    pub name: String,
    pub charge: Float,
    pub mass: Float,
    pub n_subcycles: usize,
    pub do_z_push: bool,
    pub x: Vec<Float>,
    pub y: Vec<Float>,
    pub z: Vec<Float>,
    pub ux: Vec<Float>,
    pub uy: Vec<Float>,
    pub uz: Vec<Float>,
    pub w: Vec<Float>,
    pub id: Vec<i64>,
    pub cpu: Vec<i32>,
}

impl BeamData {
    pub fn empty(cfg: &BeamConfig, phys: &PhysConst) -> BeamData {
        BeamData {
            name: cfg.name.clone(),
            charge: cfg.charge * phys.q_e,
            mass: cfg.mass * phys.m_e,
            n_subcycles: cfg.n_subcycles,
            do_z_push: cfg.do_z_push,
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            ux: Vec::new(),
            uy: Vec::new(),
            uz: Vec::new(),
            w: Vec::new(),
            id: Vec::new(),
            cpu: Vec::new(),
        }
    }

    /// Same species, `n` zeroed particles.
    pub fn sized_like(&self, n: usize) -> BeamData {
        BeamData {
            name: self.name.clone(),
            charge: self.charge,
            mass: self.mass,
            n_subcycles: self.n_subcycles,
            do_z_push: self.do_z_push,
            x: vec![0.0; n],
            y: vec![0.0; n],
            z: vec![0.0; n],
            ux: vec![0.0; n],
            uy: vec![0.0; n],
            uz: vec![0.0; n],
            w: vec![0.0; n],
            id: vec![0; n],
            cpu: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn num_valid(&self) -> usize {
        self.id.iter().filter(|&&id| id >= 0).count()
    }

    /// Writes particle `src` of `other` to slot `dst`.
    #[inline(always)]
    pub fn copy_particle(&mut self, dst: usize, other: &BeamData, src: usize) {
        self.x[dst] = other.x[src];
        self.y[dst] = other.y[src];
        self.z[dst] = other.z[src];
        self.ux[dst] = other.ux[src];
        self.uy[dst] = other.uy[src];
        self.uz[dst] = other.uz[src];
        self.w[dst] = other.w[src];
        self.id[dst] = other.id[src];
        self.cpu[dst] = other.cpu[src];
    }

    /// Copies of the particles at `indices`, in that order.
    pub fn gather(&self, indices: &[usize]) -> BeamData {
        let mut out = self.sized_like(indices.len());
        for (dst, &src) in indices.iter().enumerate() {
            out.copy_particle(dst, self, src);
        }
        out
    }

    /// Moves every particle of `other` to the end of `self`.
    pub fn append(&mut self, other: &mut BeamData) {
        self.x.append(&mut other.x);
        self.y.append(&mut other.y);
        self.z.append(&mut other.z);
        self.ux.append(&mut other.ux);
        self.uy.append(&mut other.uy);
        self.uz.append(&mut other.uz);
        self.w.append(&mut other.w);
        self.id.append(&mut other.id);
        self.cpu.append(&mut other.cpu);
    }

    pub fn clear(&mut self) {
        *self = self.sized_like(0);
    }

    fn push_particle(&mut self, pos: [Float; 3], u: [Float; 3], w: Float, id: i64) {
        self.x.push(pos[0]);
        self.y.push(pos[1]);
        self.z.push(pos[2]);
        self.ux.push(u[0]);
        self.uy.push(u[1]);
        self.uz.push(u[2]);
        self.w.push(w);
        self.id.push(id);
        self.cpu.push(0);
    }

    /// Builds the initial particles of a beam over the whole domain.
    pub fn init<R: Rng>(
        cfg: &BeamConfig,
        geom: &Geom,
        phys: &PhysConst,
        rng: &mut R,
    ) -> WakeResult<BeamData> {
        let mut beam = BeamData::empty(cfg, phys);
        let inside = |p: &[Float; 3]| (0..3).all(|d| p[d] >= cfg.min[d] && p[d] < cfg.max[d]);
        let mut next_id = 1i64;
        match cfg.profile {
            BeamProfile::Gaussian => {
                if cfg.num_particles == 0 {
                    return Err(WakeError::Config(format!(
                        "beam {}: a gaussian profile needs num_particles > 0",
                        cfg.name
                    )));
                }
                let vol = (2.0 * PI).powf(1.5)
                    * cfg.position_std[0]
                    * cfg.position_std[1]
                    * cfg.position_std[2];
                let w = cfg.density * vol / cfg.num_particles as Float;
                for _ in 0..cfg.num_particles {
                    let mut pos = [0.0; 3];
                    for d in 0..3 {
                        let r: Float = rng.sample(StandardNormal);
                        pos[d] = cfg.position_mean[d] + cfg.position_std[d] * r;
                    }
                    let u = sample_momentum(cfg, phys, rng)?;
                    if inside(&pos) {
                        beam.push_particle(pos, u, w, next_id);
                        next_id += 1;
                    }
                }
            }
            BeamProfile::FixedPpc => {
                let nppc = cfg.ppc[0] * cfg.ppc[1] * cfg.ppc[2];
                if nppc == 0 {
                    return Err(WakeError::Config(format!(
                        "beam {}: ppc entries must be positive",
                        cfg.name
                    )));
                }
                let w = cfg.density * geom.cell_volume() / nppc as Float;
                let ncell = [geom.nx, geom.ny, geom.nz];
                for k in 0..ncell[2] {
                    for j in 0..ncell[1] {
                        for i in 0..ncell[0] {
                            let cell = [i, j, k];
                            for ipart in 0..nppc {
                                let sub = [
                                    ipart % cfg.ppc[0],
                                    (ipart / cfg.ppc[0]) % cfg.ppc[1],
                                    ipart / (cfg.ppc[0] * cfg.ppc[1]),
                                ];
                                let mut pos = [0.0; 3];
                                for d in 0..3 {
                                    let r = (sub[d] as Float + 0.5) / cfg.ppc[d] as Float;
                                    pos[d] = geom.lo[d] + (cell[d] as Float + r) * geom.dx[d];
                                }
                                if !inside(&pos) {
                                    continue;
                                }
                                let u = sample_momentum(cfg, phys, rng)?;
                                beam.push_particle(pos, u, w, next_id);
                                next_id += 1;
                            }
                        }
                    }
                }
            }
        }
        Ok(beam)
    }
}

fn sample_momentum<R: Rng>(cfg: &BeamConfig, phys: &PhysConst, rng: &mut R) -> WakeResult<[Float; 3]> {
    let mut u = [0.0; 3];
    for d in 0..3 {
        let dist = Normal::new(cfg.u_mean[d], cfg.u_std[d]).map_err(|e| {
            WakeError::Config(format!("beam {}: invalid u_std: {}", cfg.name, e))
        })?;
        u[d] = dist.sample(rng) * phys.c;
    }
    Ok(u)
}

/// One plasma macro-particle. The plasma is rebuilt from `x0, y0` at the
/// head of every time step.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlasmaParticle {
    pub x: Float,
    pub y: Float,
    pub x_prev: Float,
    pub y_prev: Float,
    pub x0: Float,
    pub y0: Float,
    pub ux: Float,
    pub uy: Float,
    pub psi: Float,
    pub ux_half: Float,
    pub uy_half: Float,
    pub psi_half: Float,
    pub w: Float,
    pub w0: Float,
    pub id: i64,
    pub cpu: i32,
    pub ion_lev: i32,
}

impl PlasmaParticle {
    fn reset(&mut self, ramp: Float) {
        self.x = self.x0;
        self.y = self.y0;
        self.x_prev = self.x0;
        self.y_prev = self.y0;
        self.ux = 0.0;
        self.uy = 0.0;
        self.psi = 1.0;
        self.ux_half = 0.0;
        self.uy_half = 0.0;
        self.psi_half = 1.0;
        self.w = self.w0 * ramp;
        self.id = self.id.abs();
    }
}

/// Attributes with an Adams-Bashforth history, in storage order.
pub const AB5_X: usize = 0;
pub const AB5_Y: usize = 1;
pub const AB5_UX: usize = 2;
pub const AB5_UY: usize = 3;
pub const AB5_PSI: usize = 4;

/// Five most recent derivatives of `x, y, ux, uy, psi` for every particle.
/// Slot `(head + k) % 5` holds the derivative from `k` pushes ago.
#[derive(Clone, Debug)]
pub struct Ab5History {
    head: usize,
    pub slots: Vec<[[Float; 5]; 5]>,
}

impl Ab5History {
    pub fn new(n: usize) -> Ab5History {
        Ab5History {
            head: 0,
            slots: vec![[[0.0; 5]; 5]; n],
        }
    }

    #[inline(always)]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Makes room for a new newest entry; the oldest one is overwritten by
    /// the next push.
    pub fn rotate(&mut self) {
        self.head = (self.head + 4) % 5;
    }

    pub fn clear(&mut self) {
        self.head = 0;
        for s in self.slots.iter_mut() {
            *s = [[0.0; 5]; 5];
        }
    }
}

pub struct PlasmaData {
    pub name: String,
    pub charge: Float,
    pub mass: Float,
    pub pusher: PlasmaPusher,
    pub neutralize_background: bool,
    density: Float,
    upramp_length: Float,
    pub prtls: Vec<PlasmaParticle>,
    pub history: Ab5History,
}

impl PlasmaData {
    /// Regular `ppc[0] x ppc[1]` particles per cell inside `radius`, with
    /// density `n0 (1 + curvature r^2)`.
    pub fn new(cfg: &PlasmaConfig, geom: &Geom, phys: &PhysConst) -> PlasmaData {
        let nppc = cfg.ppc[0] * cfg.ppc[1];
        let mut prtls = Vec::with_capacity(geom.nx * geom.ny * nppc);
        let mut next_id = 1i64;
        for j in 0..geom.ny {
            for i in 0..geom.nx {
                for ipart in 0..nppc {
                    let rx = ((ipart % cfg.ppc[0]) as Float + 0.5) / cfg.ppc[0] as Float;
                    let ry = ((ipart / cfg.ppc[0]) as Float + 0.5) / cfg.ppc[1] as Float;
                    let x = geom.lo[0] + (i as Float + rx) * geom.dx[0];
                    let y = geom.lo[1] + (j as Float + ry) * geom.dx[1];
                    let rsq = x * x + y * y;
                    if rsq >= cfg.radius * cfg.radius {
                        continue;
                    }
                    let n = cfg.density * (1.0 + cfg.parabolic_curvature * rsq);
                    let mut p = PlasmaParticle {
                        x0: x,
                        y0: y,
                        w0: n * geom.cell_volume() / nppc as Float,
                        id: next_id,
                        ion_lev: cfg.ion_level,
                        ..Default::default()
                    };
                    p.reset(1.0);
                    prtls.push(p);
                    next_id += 1;
                }
            }
        }
        let n = prtls.len();
        PlasmaData {
            name: cfg.name.clone(),
            charge: cfg.charge * phys.q_e,
            mass: cfg.mass * phys.m_e,
            pusher: cfg.pusher,
            neutralize_background: cfg.neutralize_background,
            density: cfg.density,
            upramp_length: cfg.upramp_length,
            prtls,
            history: Ab5History::new(n),
        }
    }

    pub fn len(&self) -> usize {
        self.prtls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prtls.is_empty()
    }

    /// Linear density up-ramp over `upramp_length`, seen at lab position
    /// `z_lab`.
    pub fn ramp(&self, z_lab: Float) -> Float {
        if self.upramp_length > 0.0 {
            (z_lab / self.upramp_length).max(0.0).min(1.0)
        } else {
            1.0
        }
    }

    /// Peak density at lab position `z_lab`.
    pub fn density_at(&self, z_lab: Float) -> Float {
        self.density * self.ramp(z_lab)
    }

    /// Restores the initial state at the head of a time step.
    pub fn reset(&mut self, z_lab: Float) {
        let ramp = self.ramp(z_lab);
        for p in self.prtls.iter_mut() {
            p.reset(ramp);
        }
        self.history.clear();
    }
}

/// Applies the transverse boundary to a position. Returns `false` when the
/// particle left an absorbing domain.
#[inline(always)]
pub fn enforce_transverse_bc(x: &mut Float, y: &mut Float, geom: &Geom, periodic: bool) -> bool {
    let (lx, ly) = (geom.hi[0] - geom.lo[0], geom.hi[1] - geom.lo[1]);
    if periodic {
        *x = geom.lo[0] + (*x - geom.lo[0]).rem_euclid(lx);
        *y = geom.lo[1] + (*y - geom.lo[1]).rem_euclid(ly);
        true
    } else {
        *x >= geom.lo[0] && *x < geom.hi[0] && *y >= geom.lo[1] && *y < geom.hi[1]
    }
}

/// Marks a particle invalid. Idempotent.
#[inline(always)]
pub fn invalidate(id: &mut i64) {
    *id = -id.abs();
}

/// Sum of weights and number of valid particles, for logging.
pub fn beam_summary(beam: &BeamData) -> (usize, Float) {
    izip!(&beam.id, &beam.w)
        .filter(|(id, _)| **id >= 0)
        .fold((0, 0.0), |(n, s), (_, w)| (n + 1, s + w))
}
