use crate::flds::field::Field;
use crate::flds::{Comp, Fields, Level};
use crate::prtls::shape::{dispatch_order, Stencil};
use crate::prtls::{enforce_transverse_bc, invalidate, BeamData};
use crate::{ExternalFields, Float, Geom, PhysConst, PRTL_CHUNK_SIZE};
use rayon::prelude::*;

/// Fields of the current slice seen by the beam.
pub struct SliceFields<'a> {
    pub exmby: &'a Field,
    pub eypbx: &'a Field,
    pub ez: &'a Field,
    pub bx: &'a Field,
    pub by: &'a Field,
    pub bz: &'a Field,
}

impl<'a> SliceFields<'a> {
    pub fn this_slice(fields: &'a Fields) -> SliceFields<'a> {
        SliceFields {
            exmby: fields.get(Level::This, Comp::ExmBy),
            eypbx: fields.get(Level::This, Comp::EypBx),
            ez: fields.get(Level::This, Comp::Ez),
            bx: fields.get(Level::This, Comp::Bx),
            by: fields.get(Level::This, Comp::By),
            bz: fields.get(Level::This, Comp::Bz),
        }
    }

    #[inline(always)]
    fn gather<const ORDER: usize>(&self, x: Float, y: Float, geom: &Geom) -> [Float; 6] {
        let st = Stencil::new::<ORDER>(x, y, geom);
        [
            st.gather::<ORDER>(self.exmby),
            st.gather::<ORDER>(self.eypbx),
            st.gather::<ORDER>(self.ez),
            st.gather::<ORDER>(self.bx),
            st.gather::<ORDER>(self.by),
            st.gather::<ORDER>(self.bz),
        ]
    }
}

/// Everything the beam push needs besides the particles.
pub struct BeamPushParams<'a> {
    pub fields: SliceFields<'a>,
    pub external: &'a ExternalFields,
    pub geom: &'a Geom,
    pub phys: &'a PhysConst,
    pub dt: Float,
    pub periodic: bool,
}

fn push_impl<const ORDER: usize>(beam: &mut BeamData, p: &BeamPushParams) -> usize {
    let n_sub = beam.n_subcycles;
    let dt = p.dt / n_sub as Float;
    let c = p.phys.c;
    let csq_inv = 1.0 / (c * c);
    let qm = beam.charge / beam.mass;
    let do_z_push = beam.do_z_push;
    let ext = p.external;
    let gamma_inv = |ux: Float, uy: Float, uz: Float| {
        1.0 / (1.0 + (ux * ux + uy * uy + uz * uz) * csq_inv).sqrt()
    };

    (
        &mut beam.x,
        &mut beam.y,
        &mut beam.z,
        &mut beam.ux,
        &mut beam.uy,
        &mut beam.uz,
        &mut beam.id,
    )
        .into_par_iter()
        .chunks(PRTL_CHUNK_SIZE)
        .map(|o| {
            let mut lost = 0;
            for (xp, yp, zp, uxp, uyp, uzp, id) in o.into_iter() {
                if *id < 0 {
                    continue;
                }
                let (mut x, mut y, mut z) = (*xp, *yp, *zp);
                let (mut ux, mut uy, mut uz) = (*uxp, *uyp, *uzp);
                let mut alive = true;
                for _ in 0..n_sub {
                    let g_inv = gamma_inv(ux, uy, uz);
                    x += dt * 0.5 * ux * g_inv;
                    y += dt * 0.5 * uy * g_inv;
                    if !enforce_transverse_bc(&mut x, &mut y, p.geom, p.periodic) {
                        alive = false;
                        break;
                    }

                    let [mut exmby, mut eypbx, mut ez, bx, by, _bz] =
                        p.fields.gather::<ORDER>(x, y, p.geom);
                    exmby += ext.focusing_slope * x;
                    eypbx += ext.focusing_slope * y;
                    ez += ext.ez_slope * z + ext.ez_uniform;

                    let ux_next = ux + dt * qm * (exmby + (c - uz * g_inv) * by);
                    let uy_next = uy + dt * qm * (eypbx + (uz * g_inv - c) * bx);
                    let ux_int = 0.5 * (ux_next + ux);
                    let uy_int = 0.5 * (uy_next + uy);
                    let uz_int = uz + dt * 0.5 * qm * ez;
                    let g_int_inv = gamma_inv(ux_int, uy_int, uz_int);
                    let uz_next = uz + dt * qm * (ez + (ux_int * by - uy_int * bx) * g_int_inv);

                    let g_next_inv = gamma_inv(ux_next, uy_next, uz_next);
                    x += dt * 0.5 * ux_next * g_next_inv;
                    y += dt * 0.5 * uy_next * g_next_inv;
                    if do_z_push {
                        z += dt * (uz_next * g_next_inv - c);
                    }
                    if !enforce_transverse_bc(&mut x, &mut y, p.geom, p.periodic) {
                        alive = false;
                        break;
                    }
                    ux = ux_next;
                    uy = uy_next;
                    uz = uz_next;
                }
                *xp = x;
                *yp = y;
                *zp = z;
                if alive {
                    *uxp = ux;
                    *uyp = uy;
                    *uzp = uz;
                } else {
                    invalidate(id);
                    lost += 1;
                }
            }
            lost
        })
        .sum()
}

/// Advances every valid particle of a beam slice by one time step.
/// Returns the number of particles that left the transverse domain.
pub fn push_beam_slice(beam: &mut BeamData, params: &BeamPushParams, order: usize) -> usize {
    dispatch_order!(order, push_impl(beam, params))
}
