use crate::flds::field::Field;
use crate::prtls::shape::{dispatch_order, Stencil};
use crate::prtls::{BeamData, PlasmaData};
use crate::{Float, Geom, PhysConst, PRTL_CHUNK_SIZE};
use rayon::prelude::*;

/// Current and charge densities of one slice.
pub struct Currents {
    pub jx: Field,
    pub jy: Field,
    pub jz: Field,
    pub rho: Field,
}

impl From<[Field; 4]> for Currents {
    fn from(flds: [Field; 4]) -> Currents {
        let [jx, jy, jz, rho] = flds;
        Currents { jx, jy, jz, rho }
    }
}

/// Source terms of the explicit B-field equation.
pub struct ExplicitSources {
    pub chi: Field,
    pub sx: Field,
    pub sy: Field,
}

/// Field values the explicit sources are built from, all on the current
/// slice.
pub struct ExplicitInputs<'a> {
    pub exmby: &'a Field,
    pub eypbx: &'a Field,
    pub ez: &'a Field,
    pub bz: &'a Field,
}

/// Runs `kernel` over `0..n` in parallel, each rayon task depositing into
/// private slices that are summed at the end.
fn reduce_deposit<const N: usize, F>(n: usize, geom: &Geom, kernel: F) -> [Field; N]
where
    F: Fn(usize, &mut [Field; N]) + Sync + Send,
{
    let (nx, ny) = (geom.nx, geom.ny);
    let zeroed = || [(); N].map(|_| Field::new(nx, ny));
    (0..n)
        .into_par_iter()
        .with_min_len(PRTL_CHUNK_SIZE)
        .fold(zeroed, |mut acc, i| {
            kernel(i, &mut acc);
            acc
        })
        .reduce(zeroed, |mut a, b| {
            for (fa, fb) in a.iter_mut().zip(b.iter()) {
                fa.accumulate(1.0, fb);
            }
            a
        })
}

fn plasma_currents_impl<const ORDER: usize>(
    plasma: &PlasmaData,
    geom: &Geom,
    phys: &PhysConst,
) -> [Field; 4] {
    let c = phys.c;
    let invvol = 1.0 / geom.cell_volume();
    reduce_deposit(plasma.len(), geom, |i, acc| {
        let p = &plasma.prtls[i];
        if p.id < 0 {
            return;
        }
        let psi_inv = 1.0 / p.psi;
        let gamma_psi =
            0.5 * ((1.0 + (p.ux * p.ux + p.uy * p.uy) / (c * c)) * psi_inv * psi_inv + 1.0);
        let qw = plasma.charge * p.w * invvol;
        let st = Stencil::new::<ORDER>(p.x, p.y, geom);
        st.deposit::<ORDER>(&mut acc[0], qw * p.ux * psi_inv);
        st.deposit::<ORDER>(&mut acc[1], qw * p.uy * psi_inv);
        st.deposit::<ORDER>(&mut acc[2], qw * c * (gamma_psi - 1.0));
        st.deposit::<ORDER>(&mut acc[3], qw * gamma_psi);
    })
}

/// Plasma `jx, jy, jz, rho` at the current particle positions and momenta.
pub fn plasma_currents(plasma: &PlasmaData, geom: &Geom, phys: &PhysConst, order: usize) -> Currents {
    dispatch_order!(order, plasma_currents_impl(plasma, geom, phys)).into()
}

fn ion_density_impl<const ORDER: usize>(plasma: &PlasmaData, geom: &Geom) -> [Field; 1] {
    let invvol = 1.0 / geom.cell_volume();
    reduce_deposit(plasma.len(), geom, |i, acc| {
        let p = &plasma.prtls[i];
        let q = -plasma.charge * p.ion_lev as Float * p.w * invvol;
        Stencil::new::<ORDER>(p.x0, p.y0, geom).deposit::<ORDER>(&mut acc[0], q);
    })
}

/// Charge density of the immobile ion background at the initial plasma
/// positions. Zero unless the plasma neutralizes its background.
pub fn ion_density(plasma: &PlasmaData, geom: &Geom, order: usize) -> Field {
    if !plasma.neutralize_background {
        return Field::new(geom.nx, geom.ny);
    }
    let [rho] = dispatch_order!(order, ion_density_impl(plasma, geom));
    rho
}

fn beam_currents_impl<const ORDER: usize>(
    beam: &BeamData,
    indices: &[usize],
    geom: &Geom,
    phys: &PhysConst,
) -> [Field; 4] {
    let csq_inv = 1.0 / (phys.c * phys.c);
    let invvol = 1.0 / geom.cell_volume();
    reduce_deposit(indices.len(), geom, |k, acc| {
        let i = indices[k];
        if beam.id[i] < 0 {
            return;
        }
        let (ux, uy, uz) = (beam.ux[i], beam.uy[i], beam.uz[i]);
        let gamma_inv = 1.0 / (1.0 + (ux * ux + uy * uy + uz * uz) * csq_inv).sqrt();
        let qw = beam.charge * beam.w[i] * invvol;
        let st = Stencil::new::<ORDER>(beam.x[i], beam.y[i], geom);
        st.deposit::<ORDER>(&mut acc[0], qw * ux * gamma_inv);
        st.deposit::<ORDER>(&mut acc[1], qw * uy * gamma_inv);
        st.deposit::<ORDER>(&mut acc[2], qw * uz * gamma_inv);
        st.deposit::<ORDER>(&mut acc[3], qw);
    })
}

/// Beam `jx, jy, jz, rho` of the particles at `indices`.
pub fn beam_currents(
    beam: &BeamData,
    indices: &[usize],
    geom: &Geom,
    phys: &PhysConst,
    order: usize,
) -> Currents {
    dispatch_order!(order, beam_currents_impl(beam, indices, geom, phys)).into()
}

/// Weights of the centred derivative of the shape along one axis, for the
/// `ORDER + 3` cells starting one cell before the shape stencil.
#[inline(always)]
fn extended_shape<const ORDER: usize>(s: &[Float; 4], k: usize) -> (Float, Float) {
    let val = if k != 0 && k != ORDER + 2 { s[k - 1] } else { 0.0 };
    let mut der = if k < ORDER + 1 { s[k] } else { 0.0 };
    if k > 1 {
        der -= s[k - 2];
    }
    (val, der)
}

fn explicit_sources_impl<const ORDER: usize>(
    plasma: &PlasmaData,
    inputs: &ExplicitInputs,
    geom: &Geom,
    phys: &PhysConst,
) -> [Field; 3] {
    let c = phys.c;
    let invvol = 1.0 / geom.cell_volume();
    let (dx_inv, dy_inv) = (1.0 / geom.dx[0], 1.0 / geom.dx[1]);
    let (q, m) = (plasma.charge, plasma.mass);
    reduce_deposit(plasma.len(), geom, |n, acc| {
        let p = &plasma.prtls[n];
        if p.id < 0 {
            return;
        }
        let st = Stencil::new::<ORDER>(p.x, p.y, geom);
        st.deposit::<ORDER>(&mut acc[0], phys.mu0 * q * q * p.w * invvol / (m * p.psi));

        let vx = p.ux / (p.psi * c);
        let vy = p.uy / (p.psi * c);
        let gamma_psi = 0.5 * (1.0 / (p.psi * p.psi) + vx * vx + vy * vy + 1.0);
        let global_fac = q * p.w * invvol * phys.mu0;
        let qm_psi = q / (p.psi * m);
        for iy in 0..=ORDER + 2 {
            let (sy, sdy) = extended_shape::<ORDER>(&st.wy, iy);
            let shape_y = sy * global_fac;
            let shape_dy = sdy * dy_inv * 0.5 * c * global_fac;
            for ix in 0..=ORDER + 2 {
                // corners of the extended stencil carry no weight
                if (ix == 0 || ix == ORDER + 2) && (iy == 0 || iy == ORDER + 2) {
                    continue;
                }
                let (shape_x, sdx) = extended_shape::<ORDER>(&st.wx, ix);
                let shape_dx = sdx * dx_inv * 0.5 * c;
                let i = st.i0 + ix as isize - 1;
                let j = st.j0 + iy as isize - 1;
                let bz = inputs.bz.get(i, j);
                let ez = inputs.ez.get(i, j);
                let exmby = inputs.exmby.get(i, j);
                let eypbx = inputs.eypbx.get(i, j);

                let sy_val = -shape_x
                    * shape_y
                    * (-bz * vx + (ez * vy - exmby * vx * vy + eypbx * (gamma_psi - vy * vy)) / c)
                    * qm_psi
                    + shape_dx * shape_y * vx * vy
                    - shape_x * shape_dy * (gamma_psi - vy * vy - 1.0);
                let sx_val = shape_x
                    * shape_y
                    * (bz * vy + (ez * vx + exmby * (gamma_psi - vx * vx) - eypbx * vx * vy) / c)
                    * qm_psi
                    + shape_dx * shape_y * (gamma_psi - vx * vx - 1.0)
                    - shape_x * shape_dy * vx * vy;
                acc[1].add(i, j, sx_val);
                acc[2].add(i, j, sy_val);
            }
        }
    })
}

/// Plasma susceptibility `chi` and the `Sx, Sy` sources of the explicit
/// transverse B-field solve.
pub fn explicit_sources(
    plasma: &PlasmaData,
    inputs: &ExplicitInputs,
    geom: &Geom,
    phys: &PhysConst,
    order: usize,
) -> ExplicitSources {
    let [chi, sx, sy] = dispatch_order!(order, explicit_sources_impl(plasma, inputs, geom, phys));
    ExplicitSources { chi, sx, sy }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{build_test_config, BeamConfig, PlasmaConfig, E_TOL};

    fn uniform_plasma() -> (PlasmaData, Geom, PhysConst) {
        let cfg = build_test_config();
        let geom = Geom::new(&cfg.grid);
        let phys = PhysConst::new(true);
        let plasma = PlasmaData::new(
            &PlasmaConfig {
                ppc: [2, 2],
                ..Default::default()
            },
            &geom,
            &phys,
        );
        (plasma, geom, phys)
    }

    #[test]
    fn plasma_at_rest_deposits_its_density() {
        let (plasma, geom, phys) = uniform_plasma();
        for order in 0..=3 {
            let cur = plasma_currents(&plasma, &geom, &phys, order);
            // interior cells see -n0, no currents
            assert!((cur.rho.at(8, 8) + 1.0).abs() < 1e-12);
            assert!(cur.jz.at(8, 8).abs() < E_TOL);
            assert!(cur.jx.max_abs() < E_TOL);
            let ions = ion_density(&plasma, &geom, order);
            assert!((ions.at(8, 8) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn total_beam_charge_is_conserved() {
        let cfg = build_test_config();
        let geom = Geom::new(&cfg.grid);
        let phys = PhysConst::new(true);
        let beam = BeamData::empty(&BeamConfig::default(), &phys);
        let mut beam = beam.sized_like(3);
        beam.x.copy_from_slice(&[0.0, 0.31, -0.52]);
        beam.y.copy_from_slice(&[0.0, -0.1, 0.77]);
        beam.uz.copy_from_slice(&[1e3, 1e3, 1e3]);
        beam.w.copy_from_slice(&[1.0, 2.0, 0.5]);
        beam.id.copy_from_slice(&[1, 2, -3]);
        let cur = beam_currents(&beam, &[0, 1, 2], &geom, &phys, 3);
        let da = geom.dx[0] * geom.dx[1];
        let q: Float = cur.rho.valid_to_vec().iter().sum::<Float>() * da * geom.dx[2];
        assert!((q - 3.0 * beam.charge).abs() < 1e-12);
        // ultra-relativistic: jz close to c rho
        let jz: Float = cur.jz.valid_to_vec().iter().sum::<Float>() * da * geom.dx[2];
        assert!((jz / q - 1.0).abs() < 1e-6);
    }

    #[test]
    fn explicit_sources_vanish_for_plasma_at_rest_in_zero_fields() {
        let (plasma, geom, phys) = uniform_plasma();
        let zero = Field::new(geom.nx, geom.ny);
        let inputs = ExplicitInputs {
            exmby: &zero,
            eypbx: &zero,
            ez: &zero,
            bz: &zero,
        };
        let src = explicit_sources(&plasma, &inputs, &geom, &phys, 2);
        // gamma/psi - 1 = 0 at rest, so only chi survives
        assert!(src.sx.max_abs() < 1e-12);
        assert!(src.sy.max_abs() < 1e-12);
        assert!((src.chi.at(8, 8) - 1.0).abs() < 1e-12);
    }
}
