use crate::adaptive_dt::AdaptiveTimeStep;
use crate::flds::diag::DiagBuffer;
use crate::flds::{Comp, Fields, Level};
use crate::pipeline::{build_comms, Handoff, RankComm};
use crate::pred_corr::{SliceIo, SliceSolver};
use crate::prtls::bins::BeamBins;
use crate::prtls::box_sort::{BoxLayout, BoxSorter};
use crate::prtls::deposit::ion_density;
use crate::prtls::{beam_summary, BeamData, PlasmaData};
use crate::{save, Config, Float, Geom, PhysConst, SolverMode, WakeError, WakeResult};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Longitudinal extent of one rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankRange {
    pub islice_lo: usize,
    pub nslices: usize,
}

impl RankRange {
    pub fn new(cfg: &Config, rank: usize) -> RankRange {
        let nslices = cfg.grid.nz / cfg.run.numprocs_z;
        RankRange {
            islice_lo: rank * nslices,
            nslices,
        }
    }

    pub fn islice_hi(&self) -> usize {
        self.islice_lo + self.nslices
    }

    pub fn layout(&self, grid_size_z: usize) -> BoxLayout {
        let box_nz = if grid_size_z == 0 {
            self.nslices
        } else {
            grid_size_z
        };
        BoxLayout {
            islice_lo: self.islice_lo,
            box_nz,
            num_boxes: self.nslices / box_nz,
        }
    }
}

/// Peak density over all plasma species at lab position `z`.
pub fn peak_density(plasmas: &[PlasmaData], z: Float) -> Float {
    plasmas.iter().fold(0.0, |m, p| m.max(p.density_at(z)))
}

/// Splits every beam by owning rank. Particles outside the box are dropped.
pub fn distribute_beams(beams: &mut [BeamData], cfg: &Config, geom: &Geom) -> Vec<Vec<BeamData>> {
    let nranks = cfg.run.numprocs_z;
    let ranks = BoxLayout {
        islice_lo: 0,
        box_nz: cfg.grid.nz / nranks,
        num_boxes: nranks,
    };
    let mut out: Vec<Vec<BeamData>> = (0..nranks).map(|_| Vec::with_capacity(beams.len())).collect();
    for beam in beams.iter_mut() {
        let sorter = BoxSorter::sort(beam, geom, &ranks);
        if sorter.num_invalid() > 0 {
            warn!(
                "beam {}: {} particles outside the longitudinal domain are dropped",
                beam.name,
                sorter.num_invalid()
            );
        }
        for (rank, rank_beams) in out.iter_mut().enumerate() {
            let idx: Vec<usize> = sorter.range(rank).collect();
            let mut part = beam.gather(&idx);
            for cpu in part.cpu.iter_mut() {
                *cpu = rank as i32;
            }
            rank_beams.push(part);
        }
    }
    out
}

/// Splits `beam` in particles at or above slice `islice_lo` and the ones
/// below it.
fn split_below(beam: &BeamData, islice_lo: usize, geom: &Geom) -> (BeamData, BeamData) {
    let (below, keep): (Vec<usize>, Vec<usize>) = (0..beam.len())
        .filter(|&i| beam.id[i] >= 0)
        .partition(|&i| geom.slice_index(beam.z[i]) < islice_lo as i64);
    (beam.gather(&keep), beam.gather(&below))
}

/// State of one rank of the pipeline.
pub struct Rank {
    cfg: Config,
    geom: Geom,
    phys: PhysConst,
    range: RankRange,
    layout: BoxLayout,
    fields: Fields,
    solver: SliceSolver,
    plasmas: Vec<PlasmaData>,
    pub beams: Vec<BeamData>,
    diag: Option<DiagBuffer>,
    adaptive: AdaptiveTimeStep,
    comm: RankComm,
    pub t: Float,
    pub dt: Float,
}

impl Rank {
    pub fn new(cfg: &Config, comm: RankComm, beams: Vec<BeamData>) -> WakeResult<Rank> {
        let geom = Geom::new(&cfg.grid);
        let phys = PhysConst::new(cfg.run.normalized_units);
        let range = RankRange::new(cfg, comm.rank);
        let diag = if cfg.output.write_output {
            let comps = Comp::parse_list(&cfg.output.field_data)?;
            Some(DiagBuffer::new(
                comps,
                geom.nx,
                geom.ny,
                range.islice_lo,
                range.nslices,
                cfg.output.coarsen_z,
            ))
        } else {
            None
        };
        Ok(Rank {
            cfg: cfg.clone(),
            layout: range.layout(cfg.run.grid_size_z),
            fields: Fields::new(&geom, cfg.solver.mode, cfg.solver.boundary),
            solver: SliceSolver::new(cfg, &geom)?,
            plasmas: cfg
                .plasmas
                .iter()
                .map(|p| PlasmaData::new(p, &geom, &phys))
                .collect(),
            beams,
            diag,
            adaptive: AdaptiveTimeStep::new(cfg),
            comm,
            t: 0.0,
            dt: cfg.run.dt,
            geom,
            phys,
            range,
        })
    }

    pub fn rank(&self) -> usize {
        self.comm.rank
    }

    /// Agrees on the step size with every rank.
    fn update_time_step(&mut self, step: usize) -> WakeResult<()> {
        if !self.adaptive.enabled() {
            return Ok(());
        }
        if step == 0 {
            self.adaptive.reset(self.dt);
            self.adaptive.accumulate_slice(&self.beams, &self.phys);
        }
        let local = self.adaptive.accs.clone();
        let adaptive = &mut self.adaptive;
        let plasmas = &self.plasmas;
        let phys = &self.phys;
        let (t, dt) = (self.t, self.dt);
        let (dt, min_uz) = self.comm.all_reduce_time_step(local, |accs| {
            adaptive.accs = accs;
            let density = |z: Float| peak_density(plasmas, z);
            let dt = adaptive.calculate(t, dt, phys, density)?;
            let dt = adaptive.calculate_from_density(t, dt, phys, density);
            Ok((dt, adaptive.min_uz))
        })?;
        self.dt = dt;
        self.adaptive.min_uz = min_uz;
        self.adaptive.reset(dt);
        Ok(())
    }

    /// Plasma at the head of the box: fresh for the head rank, handed down
    /// otherwise.
    fn load_upstream(&mut self, handoff: Option<&mut Handoff>) -> WakeResult<()> {
        self.fields.zero_all();
        match handoff {
            Some(h) => {
                self.fields.load_handoff(&h.fields)?;
                if h.plasmas.len() != self.plasmas.len() {
                    return Err(WakeError::Aborted(format!(
                        "handoff carries {} plasma species, expected {}",
                        h.plasmas.len(),
                        self.plasmas.len()
                    )));
                }
                for (plasma, (prtls, history)) in self.plasmas.iter_mut().zip(h.plasmas.drain(..)) {
                    plasma.prtls = prtls;
                    plasma.history = history;
                }
            }
            None => {
                let z_lab = self.phys.c * self.t;
                for plasma in self.plasmas.iter_mut() {
                    plasma.reset(z_lab);
                }
            }
        }
        let ions = self.fields.get_mut(Level::RhoIons, Comp::Rho);
        for plasma in self.plasmas.iter() {
            ions.accumulate(1.0, &ion_density(plasma, &self.geom, self.cfg.solver.depos_order_xy));
        }
        self.fields.sum_guards(Level::RhoIons, &[Comp::Rho]);
        Ok(())
    }

    /// Solves every slice of the rank, head to tail. Returns the beam
    /// particles that slipped below the rank.
    fn sweep(&mut self) -> WakeResult<Vec<BeamData>> {
        let nbeams = self.beams.len();
        let layout = self.layout;
        let geom = &self.geom;
        let sorters: Vec<BoxSorter> = self
            .beams
            .iter_mut()
            .map(|b| BoxSorter::sort(b, geom, &layout))
            .collect();
        let beams = &self.beams;
        let bins: Vec<Vec<BeamBins>> = (0..layout.num_boxes)
            .map(|ibox| {
                let slices = layout.slices(ibox);
                beams
                    .iter()
                    .zip(sorters.iter())
                    .map(|(b, s)| BeamBins::build(b, s.range(ibox), geom, slices.start, slices.len()))
                    .collect()
            })
            .collect();

        let mut next_beams: Vec<BeamData> = self.beams.iter().map(|b| b.sized_like(0)).collect();
        let mut slipped: Vec<BeamData> = self.beams.iter().map(|b| b.sized_like(0)).collect();
        let explicit = self.solver.mode() == SolverMode::Explicit;
        let slice_bins = |islice: usize| &bins[layout.box_of_slice(islice)];
        let mut iterations = 0;

        if let Some(diag) = self.diag.as_mut() {
            diag.zero();
        }
        for islice in (self.range.islice_lo..self.range.islice_hi()).rev() {
            let mut slice_beams: Vec<BeamData> = (0..nbeams)
                .map(|ib| self.beams[ib].gather(slice_bins(islice)[ib].slice(islice)))
                .collect();

            if explicit {
                if islice + 1 == self.range.islice_hi() {
                    for ib in 0..nbeams {
                        let idx = slice_bins(islice)[ib].slice(islice);
                        self.solver
                            .deposit_beam_jperp(&mut self.fields, Level::This, &self.beams[ib], idx);
                    }
                }
                if islice > self.range.islice_lo {
                    for ib in 0..nbeams {
                        let idx = slice_bins(islice - 1)[ib].slice(islice - 1);
                        self.solver
                            .deposit_beam_jperp(&mut self.fields, Level::Next, &self.beams[ib], idx);
                    }
                }
            }

            let mut io = SliceIo {
                beams: &mut slice_beams,
                slipped: &mut slipped,
                diag: self.diag.as_mut(),
                adaptive: if self.adaptive.enabled() {
                    Some(&mut self.adaptive)
                } else {
                    None
                },
                dt: self.dt,
            };
            let report = self
                .solver
                .run_slice(islice, &mut self.fields, &mut self.plasmas, &mut io)?;
            iterations += report.iterations;
            if report.beam_lost > 0 {
                debug!("slice {}: {} beam particles left the domain", islice, report.beam_lost);
            }
            for (dst, src) in next_beams.iter_mut().zip(slice_beams.iter_mut()) {
                dst.append(src);
            }
        }
        debug!(
            "rank {}: sweep done, {} solver iterations",
            self.comm.rank, iterations
        );

        let mut below = Vec::with_capacity(nbeams);
        for (dst, s) in next_beams.iter_mut().zip(slipped.iter()) {
            let (mut keep, out) = split_below(s, self.range.islice_lo, &self.geom);
            dst.append(&mut keep);
            below.push(out);
        }
        self.beams = next_beams;
        Ok(below)
    }

    /// One full time step of this rank.
    pub fn step(&mut self, step: usize) -> WakeResult<()> {
        self.update_time_step(step)?;
        let mut handoff = self.comm.wait()?;
        self.load_upstream(handoff.as_mut())?;

        let below = self.sweep()?;
        let lost: usize = below.iter().map(|b| b.num_valid()).sum();
        if self.comm.rank == 0 && lost > 0 {
            debug!("{} beam particles left the box through its tail", lost);
        }
        self.comm.notify(Handoff {
            fields: self.fields.handoff_payload(),
            plasmas: self
                .plasmas
                .iter()
                .map(|p| (p.prtls.clone(), p.history.clone()))
                .collect(),
            slipped: below,
        })?;

        if let Some(h) = handoff.as_mut() {
            for (dst, src) in self.beams.iter_mut().zip(h.slipped.iter_mut()) {
                dst.append(src);
            }
        }
        self.t += self.dt;
        Ok(())
    }

    fn write_output(&self, step: usize) -> Result<()> {
        save::save_output(step, self.comm.rank, &self.cfg, self.diag.as_ref(), &self.beams)
    }

    /// Runs every step, then waits for the last handoff to be received.
    pub fn run(&mut self) -> Result<()> {
        for step in 0..self.cfg.run.max_step {
            self.step(step)
                .with_context(|| format!("rank {} failed in step {}", self.comm.rank, step))?;
            self.write_output(step)?;
            if self.comm.is_head() {
                info!("step {} done, t = {:.6e}, dt = {:.6e}", step, self.t, self.dt);
            }
            for beam in self.beams.iter() {
                let (n, w) = beam_summary(beam);
                debug!("rank {}: beam {} holds {} particles, weight {:.6e}", self.comm.rank, beam.name, n, w);
            }
        }
        self.comm.notify_finish()?;
        Ok(())
    }

    pub fn abort(&self, reason: &str) {
        self.comm.abort(reason);
    }
}

/// Initializes the beams, runs one thread per rank and reports the first
/// fatal error.
pub fn run_ranks(cfg: &Config) -> Result<()> {
    let geom = Geom::new(&cfg.grid);
    let phys = PhysConst::new(cfg.run.normalized_units);
    let mut rng = StdRng::seed_from_u64(cfg.run.seed);

    info!("initializing beams");
    let mut beams = cfg
        .beams
        .iter()
        .map(|b| BeamData::init(b, &geom, &phys, &mut rng))
        .collect::<WakeResult<Vec<_>>>()
        .context("Could not initialize beams")?;
    for beam in beams.iter() {
        info!("beam {}: {} particles", beam.name, beam.len());
    }
    let per_rank = distribute_beams(&mut beams, cfg, &geom);

    let comms = build_comms(cfg.run.numprocs_z);
    let mut handles = Vec::with_capacity(comms.len());
    for (comm, rank_beams) in comms.into_iter().zip(per_rank.into_iter()) {
        let rank = comm.rank;
        let cfg = cfg.clone();
        let handle = std::thread::Builder::new()
            .name(format!("rank{}", rank))
            .spawn(move || -> Result<()> {
                let mut state = match Rank::new(&cfg, comm, rank_beams) {
                    Ok(s) => s,
                    Err(e) => return Err(e).context(format!("Could not set up rank {}", rank)),
                };
                let res = state.run();
                if let Err(e) = &res {
                    state.abort(&format!("{:#}", e));
                }
                res
            })
            .context("Could not spawn rank thread")?;
        handles.push(handle);
    }

    let mut first_aborted = None;
    let mut first_fatal = None;
    for (rank, handle) in handles.into_iter().enumerate() {
        let res = handle
            .join()
            .map_err(|_| anyhow!("rank {} panicked", rank))
            .and_then(|r| r);
        if let Err(e) = res {
            let aborted = e
                .chain()
                .any(|c| matches!(c.downcast_ref::<WakeError>(), Some(WakeError::Aborted(_))));
            if aborted {
                first_aborted.get_or_insert(e);
            } else {
                first_fatal.get_or_insert(e);
            }
        }
    }
    match first_fatal.or(first_aborted) {
        Some(e) => Err(e),
        None => {
            info!("run finished");
            Ok(())
        }
    }
}
