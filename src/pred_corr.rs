use crate::adaptive_dt::AdaptiveTimeStep;
use crate::flds::diag::DiagBuffer;
use crate::flds::field::Field;
use crate::flds::{Comp, Dir, Fields, Level, SliceOp};
use crate::prtls::beam_push::{push_beam_slice, BeamPushParams, SliceFields};
use crate::prtls::deposit::{beam_currents, explicit_sources, plasma_currents, Currents, ExplicitInputs};
use crate::prtls::plasma_push::{push_plasma, PlasmaPushParams, PushStats};
use crate::prtls::slice_sort::{slice_sort, SliceSortCounts};
use crate::prtls::{BeamData, PlasmaData};
use crate::solver::boundary::Multipole;
use crate::solver::multigrid::MultiGrid;
use crate::solver::{build_solver, BoundaryValues, PoissonSolver};
use crate::{
    Config, ExternalFields, FieldBoundary, Float, Geom, PhysConst, SolverMode, WakeError,
    WakeResult,
};
use log::{debug, warn};

/// Below this value of `|B|_2 / npts` the relative B-field error is zero.
const B_NORM_FLOOR: Float = 1e-10;

/// Beyond `DIVERGENCE_FACTOR * tolerance` the loop is considered diverged.
const DIVERGENCE_FACTOR: Float = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SliceState {
    GuessB,
    Converge { iter: usize, err_prev: Float },
    Finalize,
}

#[derive(Clone, Debug, Default)]
pub struct SliceReport {
    pub iterations: usize,
    pub rel_error: Float,
    pub sorted: Vec<SliceSortCounts>,
    pub beam_lost: usize,
    pub plasma: PushStats,
}

/// Particles and outputs that belong to one slice.
pub struct SliceIo<'a> {
    /// Particles of the slice, one buffer per beam. Compacted on return.
    pub beams: &'a mut [BeamData],
    /// Receives, per beam, the particles that moved to a lower slice.
    pub slipped: &'a mut [BeamData],
    pub diag: Option<&'a mut DiagBuffer>,
    pub adaptive: Option<&'a mut AdaptiveTimeStep>,
    pub dt: Float,
}

/// `|B - B_ref|_2 / |B|_2` over both transverse components.
pub fn rel_error(bx: &Field, by: &Field, bx_ref: &Field, by_ref: &Field) -> Float {
    let norm_b = (bx.norm_sq() + by.norm_sq()).sqrt();
    let norm_diff = (bx.diff_norm_sq(bx_ref) + by.diff_norm_sq(by_ref)).sqrt();
    let npts = (bx.nx() * bx.ny()) as Float;
    if norm_b / npts > B_NORM_FLOOR {
        norm_diff / norm_b
    } else {
        0.0
    }
}

/// Weight of the newly solved field and of the previous iterate.
pub fn mixing_weights(err: Float, err_prev: Float) -> (Float, Float) {
    if err != 0.0 || err_prev != 0.0 {
        (err_prev / (err + err_prev), err / (err + err_prev))
    } else {
        (0.5, 0.5)
    }
}

/// Extrapolation weight of the initial B-field guess.
pub fn guess_mix(err: Float, tolerance: Float) -> Float {
    (-0.5 * (err / (2.5 * tolerance)).powi(2)).exp()
}

/// `b = (1 - mix) b + mix (w_iter b_iter + w_prev b_prev_iter)`, then
/// `b_prev_iter = b_iter`.
pub fn mix_and_shift(
    b: &mut Field,
    b_iter: &Field,
    b_prev_iter: &mut Field,
    tmp: &mut Field,
    weights: (Float, Float),
    mix_factor: Float,
) {
    tmp.lin_comb(weights.0, b_iter, weights.1, b_prev_iter);
    b.scale(1.0 - mix_factor);
    b.accumulate(mix_factor, tmp);
    b_prev_iter.copy_from(b_iter);
}

fn add_currents(fields: &mut Fields, level: Level, cur: &Currents) {
    fields.get_mut(level, Comp::Jx).accumulate(1.0, &cur.jx);
    fields.get_mut(level, Comp::Jy).accumulate(1.0, &cur.jy);
    fields.get_mut(level, Comp::Jz).accumulate(1.0, &cur.jz);
    fields.get_mut(level, Comp::Rho).accumulate(1.0, &cur.rho);
}

const SOURCES: [Comp; 4] = [Comp::Jx, Comp::Jy, Comp::Jz, Comp::Rho];

/// Solves the fields of one slice and advances its particles.
pub struct SliceSolver {
    geom: Geom,
    phys: PhysConst,
    mode: SolverMode,
    periodic: bool,
    open_boundary: bool,
    multipole_order: usize,
    multipole_cutoff: Float,
    tolerance: Float,
    max_iterations: usize,
    mix_factor: Float,
    mg_tol_rel: Float,
    mg_tol_abs: Float,
    mg_max_iters: usize,
    order: usize,
    external: ExternalFields,
    poisson: Box<dyn PoissonSolver>,
    mg: Option<MultiGrid>,
    bx_iter: Field,
    by_iter: Field,
    bx_prev_iter: Field,
    by_prev_iter: Field,
    tmp: Field,
}

impl SliceSolver {
    pub fn new(cfg: &Config, geom: &Geom) -> WakeResult<SliceSolver> {
        let s = &cfg.solver;
        let mg = match s.mode {
            SolverMode::Explicit => Some(MultiGrid::new(geom.nx, geom.ny, geom.dx[0], geom.dx[1])?),
            SolverMode::PredictorCorrector => None,
        };
        let blank = || Field::new(geom.nx, geom.ny);
        Ok(SliceSolver {
            geom: geom.clone(),
            phys: PhysConst::new(cfg.run.normalized_units),
            mode: s.mode,
            periodic: s.boundary == FieldBoundary::Periodic,
            open_boundary: s.open_boundary && s.boundary == FieldBoundary::Dirichlet,
            multipole_order: s.multipole_order,
            multipole_cutoff: s.multipole_cutoff,
            tolerance: s.predcorr_b_error_tolerance,
            max_iterations: s.predcorr_max_iterations,
            mix_factor: s.predcorr_b_mixing_factor,
            mg_tol_rel: s.mg_tol_rel,
            mg_tol_abs: s.mg_tol_abs,
            mg_max_iters: s.mg_max_iters,
            order: s.depos_order_xy,
            external: cfg.external.clone(),
            poisson: build_solver(cfg, geom)?,
            mg,
            bx_iter: blank(),
            by_iter: blank(),
            bx_prev_iter: blank(),
            by_prev_iter: blank(),
            tmp: blank(),
        })
    }

    pub fn phys(&self) -> &PhysConst {
        &self.phys
    }

    pub fn mode(&self) -> SolverMode {
        self.mode
    }

    /// Adds the transverse current of the beam particles at `indices` to
    /// `JxBeam, JyBeam` of `level`. Explicit mode only.
    pub fn deposit_beam_jperp(&self, fields: &mut Fields, level: Level, beam: &BeamData, indices: &[usize]) {
        let cur = beam_currents(beam, indices, &self.geom, &self.phys, self.order);
        fields.get_mut(level, Comp::JxBeam).accumulate(1.0, &cur.jx);
        fields.get_mut(level, Comp::JyBeam).accumulate(1.0, &cur.jy);
        fields.sum_guards(level, &[Comp::JxBeam, Comp::JyBeam]);
    }

    /// Solves the staged source into `lhs`, with multipole boundary values
    /// when open boundaries are requested.
    fn solve_staged(&mut self, lhs: &mut Field) -> WakeResult<()> {
        let multipole = if self.open_boundary {
            Multipole::from_source(
                self.poisson.staging_area(),
                &self.geom,
                self.multipole_order,
                self.multipole_cutoff,
            )
        } else {
            None
        };
        match multipole {
            Some(mp) => {
                let g = |x: Float, y: Float| mp.potential(x, y);
                self.poisson.solve(lhs, BoundaryValues::Function(&g))
            }
            None => self.poisson.solve(lhs, BoundaryValues::Homogeneous),
        }
    }

    /// Solves a component of `This` in place.
    fn solve_this(&mut self, fields: &mut Fields, comp: Comp) -> WakeResult<()> {
        let mut lhs = std::mem::replace(fields.get_mut(Level::This, comp), Field::new(0, 0));
        let res = self.solve_staged(&mut lhs);
        *fields.get_mut(Level::This, comp) = lhs;
        res
    }

    /// `This.dst = d/dir This.Psi`, guards filled.
    fn psi_gradient(&mut self, fields: &mut Fields, dir: Dir, dst: Comp) {
        fields.transverse_derivative(Level::This, Comp::Psi, dir, 1.0, SliceOp::Assign, &mut self.tmp);
        fields.get_mut(Level::This, dst).copy_from(&self.tmp);
        fields.fill_guards(Level::This, dst);
    }

    /// Sources and fields that do not depend on the transverse B-field:
    /// plasma and beam currents, Psi, `ExmBy`, `EypBx`, `Ez` and `Bz`.
    fn solve_longitudinal(
        &mut self,
        fields: &mut Fields,
        plasmas: &[PlasmaData],
        beams: &[BeamData],
    ) -> WakeResult<()> {
        let (c, ep0, mu0) = (self.phys.c, self.phys.ep0, self.phys.mu0);
        for &comp in SOURCES.iter() {
            fields.zero(Level::This, comp);
        }
        for plasma in plasmas {
            let cur = plasma_currents(plasma, &self.geom, &self.phys, self.order);
            add_currents(fields, Level::This, &cur);
        }
        {
            let (rho, ions) = fields.get_pair_mut((Level::This, Comp::Rho), (Level::RhoIons, Comp::Rho));
            rho.accumulate(1.0, ions);
        }
        fields.sum_guards(Level::This, &SOURCES);

        // lap(Psi) = (rho - jz / c) / ep0
        let stg = self.poisson.staging_area();
        stg.lin_comb(
            1.0 / ep0,
            fields.get(Level::This, Comp::Rho),
            -1.0 / (c * ep0),
            fields.get(Level::This, Comp::Jz),
        );
        self.solve_this(fields, Comp::Psi)?;
        self.psi_gradient(fields, Dir::X, Comp::ExmBy);
        self.psi_gradient(fields, Dir::Y, Comp::EypBx);

        for beam in beams {
            let idx: Vec<usize> = (0..beam.len()).collect();
            let cur = beam_currents(beam, &idx, &self.geom, &self.phys, self.order);
            add_currents(fields, Level::This, &cur);
        }
        fields.sum_guards(Level::This, &SOURCES);

        // lap(Ez) = (dx jx + dy jy) / (ep0 c)
        let stg = self.poisson.staging_area();
        let fac = 1.0 / (ep0 * c);
        fields.transverse_derivative(Level::This, Comp::Jx, Dir::X, fac, SliceOp::Assign, stg);
        fields.transverse_derivative(Level::This, Comp::Jy, Dir::Y, fac, SliceOp::Add, stg);
        self.solve_this(fields, Comp::Ez)?;

        // lap(Bz) = mu0 (dy jx - dx jy)
        let stg = self.poisson.staging_area();
        fields.transverse_derivative(Level::This, Comp::Jx, Dir::Y, mu0, SliceOp::Assign, stg);
        fields.transverse_derivative(Level::This, Comp::Jy, Dir::X, -mu0, SliceOp::Add, stg);
        self.solve_this(fields, Comp::Bz)
    }

    /// Extrapolates `Bx, By` of `This` from the two previous slices.
    fn guess_b(&mut self, fields: &mut Fields) {
        let err = rel_error(
            fields.get(Level::Previous1, Comp::Bx),
            fields.get(Level::Previous1, Comp::By),
            fields.get(Level::Previous2, Comp::Bx),
            fields.get(Level::Previous2, Comp::By),
        );
        let mix = guess_mix(err, self.tolerance);
        for &comp in [Comp::Bx, Comp::By].iter() {
            self.tmp.lin_comb(
                1.0 + mix,
                fields.get(Level::Previous1, comp),
                -mix,
                fields.get(Level::Previous2, comp),
            );
            fields.get_mut(Level::This, comp).copy_from(&self.tmp);
        }
        self.bx_prev_iter.copy_from(fields.get(Level::This, Comp::Bx));
        self.by_prev_iter.copy_from(fields.get(Level::This, Comp::By));
    }

    /// Trial plasma push with the current B-field guess, deposition into
    /// `Next` and the resulting `Bx, By` in the iteration buffers.
    fn trial_solve(&mut self, fields: &mut Fields, plasmas: &mut [PlasmaData]) -> WakeResult<()> {
        let mu0 = self.phys.mu0;
        for plasma in plasmas.iter_mut() {
            let params = PlasmaPushParams {
                fields: SliceFields::this_slice(fields),
                geom: &self.geom,
                phys: &self.phys,
                periodic: self.periodic,
                temp: true,
            };
            push_plasma(plasma, &params, self.order);
        }
        for plasma in plasmas.iter() {
            let cur = plasma_currents(plasma, &self.geom, &self.phys, self.order);
            add_currents(fields, Level::Next, &cur);
        }
        fields.sum_guards(Level::Next, &SOURCES);

        // lap(Bx) = mu0 (-dy jz + dz jy)
        let stg = self.poisson.staging_area();
        fields.transverse_derivative(Level::This, Comp::Jz, Dir::Y, -mu0, SliceOp::Assign, stg);
        fields.longitudinal_derivative(Level::Previous1, Level::Next, Comp::Jy, mu0, SliceOp::Add, stg);
        let mut bx = std::mem::replace(&mut self.bx_iter, Field::new(0, 0));
        let res = self.solve_staged(&mut bx);
        self.bx_iter = bx;
        res?;

        // lap(By) = mu0 (dx jz - dz jx)
        let stg = self.poisson.staging_area();
        fields.transverse_derivative(Level::This, Comp::Jz, Dir::X, mu0, SliceOp::Assign, stg);
        fields.longitudinal_derivative(Level::Previous1, Level::Next, Comp::Jx, -mu0, SliceOp::Add, stg);
        let mut by = std::mem::replace(&mut self.by_iter, Field::new(0, 0));
        let res = self.solve_staged(&mut by);
        self.by_iter = by;
        res
    }

    fn mix_iterate(&mut self, fields: &mut Fields, weights: (Float, Float)) {
        mix_and_shift(
            fields.get_mut(Level::This, Comp::Bx),
            &self.bx_iter,
            &mut self.bx_prev_iter,
            &mut self.tmp,
            weights,
            self.mix_factor,
        );
        mix_and_shift(
            fields.get_mut(Level::This, Comp::By),
            &self.by_iter,
            &mut self.by_prev_iter,
            &mut self.tmp,
            weights,
            self.mix_factor,
        );
        fields.fill_guards(Level::This, Comp::Bx);
        fields.fill_guards(Level::This, Comp::By);
    }

    fn take_iterate(&mut self, fields: &mut Fields) {
        fields.get_mut(Level::This, Comp::Bx).copy_from(&self.bx_iter);
        fields.get_mut(Level::This, Comp::By).copy_from(&self.by_iter);
        fields.fill_guards(Level::This, Comp::Bx);
        fields.fill_guards(Level::This, Comp::By);
    }

    /// One multigrid solve of `(lap - chi) B_perp = S` replacing the
    /// predictor-corrector loop.
    fn explicit_solve(&mut self, fields: &mut Fields, plasmas: &[PlasmaData]) -> WakeResult<usize> {
        let mu0 = self.phys.mu0;
        for &comp in [Comp::Chi, Comp::Sx, Comp::Sy].iter() {
            fields.zero(Level::This, comp);
        }
        for plasma in plasmas {
            let src = {
                let inputs = ExplicitInputs {
                    exmby: fields.get(Level::This, Comp::ExmBy),
                    eypbx: fields.get(Level::This, Comp::EypBx),
                    ez: fields.get(Level::This, Comp::Ez),
                    bz: fields.get(Level::This, Comp::Bz),
                };
                explicit_sources(plasma, &inputs, &self.geom, &self.phys, self.order)
            };
            fields.get_mut(Level::This, Comp::Chi).accumulate(1.0, &src.chi);
            fields.get_mut(Level::This, Comp::Sx).accumulate(1.0, &src.sx);
            fields.get_mut(Level::This, Comp::Sy).accumulate(1.0, &src.sy);
        }
        fields.sum_guards(Level::This, &[Comp::Chi, Comp::Sx, Comp::Sy]);

        let n = self.geom.nx * self.geom.ny;
        let mut rhs = vec![0.0; 2 * n];
        let mut sol = vec![0.0; 2 * n];

        // Bx: Sy + mu0 (-dy jz + dz jy_beam)
        fields.transverse_derivative(Level::This, Comp::Jz, Dir::Y, -mu0, SliceOp::Assign, &mut self.tmp);
        fields.longitudinal_derivative(
            Level::Previous1,
            Level::Next,
            Comp::JyBeam,
            mu0,
            SliceOp::Add,
            &mut self.tmp,
        );
        self.tmp.accumulate(1.0, fields.get(Level::This, Comp::Sy));
        rhs[..n].copy_from_slice(&self.tmp.valid_to_vec());

        // By: Sx + mu0 (dx jz - dz jx_beam)
        fields.transverse_derivative(Level::This, Comp::Jz, Dir::X, mu0, SliceOp::Assign, &mut self.tmp);
        fields.longitudinal_derivative(
            Level::Previous1,
            Level::Next,
            Comp::JxBeam,
            -mu0,
            SliceOp::Add,
            &mut self.tmp,
        );
        self.tmp.accumulate(1.0, fields.get(Level::This, Comp::Sx));
        rhs[n..].copy_from_slice(&self.tmp.valid_to_vec());

        sol[..n].copy_from_slice(&fields.get(Level::This, Comp::Bx).valid_to_vec());
        sol[n..].copy_from_slice(&fields.get(Level::This, Comp::By).valid_to_vec());
        let acf = fields.get(Level::This, Comp::Chi).valid_to_vec();

        let mg = match self.mg.as_mut() {
            Some(mg) => mg,
            None => {
                return Err(WakeError::Config(
                    "explicit B-field solve requested without a multigrid solver".to_string(),
                ))
            }
        };
        let iters = mg.solve1(
            &mut sol,
            &rhs,
            &acf,
            self.mg_tol_rel,
            self.mg_tol_abs,
            self.mg_max_iters,
        )?;
        fields.get_mut(Level::This, Comp::Bx).valid_from_slice(&sol[..n]);
        fields.get_mut(Level::This, Comp::By).valid_from_slice(&sol[n..]);
        fields.fill_guards(Level::This, Comp::Bx);
        fields.fill_guards(Level::This, Comp::By);
        Ok(iters)
    }

    /// Writes diagnostics, pushes and sorts the beam particles of the
    /// slice, advances the plasma to the next slice and shifts the window.
    fn finalize(
        &mut self,
        islice: usize,
        fields: &mut Fields,
        plasmas: &mut [PlasmaData],
        io: &mut SliceIo,
        report: &mut SliceReport,
    ) {
        if let Some(diag) = io.diag.as_mut() {
            fields.copy_to_diag(islice, diag);
        }
        if let Some(adaptive) = io.adaptive.as_mut() {
            adaptive.gather_min_acc_slice(
                io.beams,
                fields.get(Level::This, Comp::Ez),
                &self.geom,
                &self.phys,
                self.order,
            );
            adaptive.accumulate_slice(io.beams, &self.phys);
        }

        let params = BeamPushParams {
            fields: SliceFields::this_slice(fields),
            external: &self.external,
            geom: &self.geom,
            phys: &self.phys,
            dt: io.dt,
            periodic: self.periodic,
        };
        for (beam, slipped) in io.beams.iter_mut().zip(io.slipped.iter_mut()) {
            report.beam_lost += push_beam_slice(beam, &params, self.order);
            report
                .sorted
                .push(slice_sort(beam, islice, &self.geom, slipped));
        }

        for plasma in plasmas.iter_mut() {
            let params = PlasmaPushParams {
                fields: SliceFields::this_slice(fields),
                geom: &self.geom,
                phys: &self.phys,
                periodic: self.periodic,
                temp: false,
            };
            report.plasma = report.plasma + push_plasma(plasma, &params, self.order);
        }
        fields.shift_window();
    }

    /// Runs every stage of one slice.
    pub fn run_slice(
        &mut self,
        islice: usize,
        fields: &mut Fields,
        plasmas: &mut [PlasmaData],
        io: &mut SliceIo,
    ) -> WakeResult<SliceReport> {
        let mut report = SliceReport::default();
        self.solve_longitudinal(fields, plasmas, io.beams)?;

        if self.mode == SolverMode::Explicit {
            report.iterations = self.explicit_solve(fields, plasmas)?;
            self.finalize(islice, fields, plasmas, io, &mut report);
            return Ok(report);
        }

        let mut state = SliceState::GuessB;
        loop {
            state = match state {
                SliceState::GuessB if plasmas.is_empty() => {
                    // Without plasma Bx, By do not depend on the guess.
                    self.trial_solve(fields, plasmas)?;
                    self.take_iterate(fields);
                    fields.zero_level(Level::Next);
                    report.iterations = 1;
                    SliceState::Finalize
                }
                SliceState::GuessB => {
                    self.guess_b(fields);
                    SliceState::Converge {
                        iter: 0,
                        err_prev: 0.0,
                    }
                }
                SliceState::Converge { iter, err_prev } => {
                    self.trial_solve(fields, plasmas)?;
                    let err = rel_error(
                        fields.get(Level::This, Comp::Bx),
                        fields.get(Level::This, Comp::By),
                        &self.bx_iter,
                        &self.by_iter,
                    );
                    // The first solve has no earlier iterate to mix with.
                    let weights = if iter == 0 {
                        (1.0, 0.0)
                    } else {
                        mixing_weights(err, err_prev)
                    };
                    self.mix_iterate(fields, weights);
                    fields.zero_level(Level::Next);
                    report.iterations = iter + 1;
                    report.rel_error = err;
                    if err <= self.tolerance || iter + 1 >= self.max_iterations {
                        self.check_convergence(islice, err, iter + 1)?;
                        SliceState::Finalize
                    } else {
                        SliceState::Converge {
                            iter: iter + 1,
                            err_prev: err,
                        }
                    }
                }
                SliceState::Finalize => {
                    self.finalize(islice, fields, plasmas, io, &mut report);
                    break;
                }
            }
        }
        debug!(
            "slice {}: {} iterations, relative B-field error {:.3e}",
            islice, report.iterations, report.rel_error
        );
        Ok(report)
    }

    fn check_convergence(&self, islice: usize, err: Float, iterations: usize) -> WakeResult<()> {
        let limit = DIVERGENCE_FACTOR * self.tolerance;
        if err > limit {
            return Err(WakeError::PredictorCorrectorDiverged {
                islice,
                error: err,
                limit,
                iterations,
                mixing_factor: self.mix_factor,
                tolerance: self.tolerance,
                max_iterations: self.max_iterations,
            });
        }
        if err > self.tolerance {
            warn!(
                "slice {}: predictor-corrector stopped at relative B-field error {:.3e} \
                 above tolerance {:.3e}",
                islice, err, self.tolerance
            );
        }
        Ok(())
    }
}
