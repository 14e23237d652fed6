pub mod diag;
pub mod field;

use crate::flds::diag::DiagBuffer;
use crate::flds::field::Field;
use crate::{FieldBoundary, Float, Geom, SolverMode, WakeError, WakeResult};

/// Longitudinal position of a stored slice relative to the slice being
/// solved. `Next` is upstream (lower z), `Previous1/2` are the slices
/// finished one and two steps ago.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Next = 0,
    This = 1,
    Previous1 = 2,
    Previous2 = 3,
    RhoIons = 4,
    /// Reserved for beam loading correction, never allocated.
    Salame = 5,
}

pub const NLEVELS: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comp {
    ExmBy = 0,
    EypBx,
    Ez,
    Bx,
    By,
    Bz,
    Jx,
    Jy,
    Jz,
    Rho,
    Psi,
    Chi,
    Sx,
    Sy,
    JxBeam,
    JyBeam,
}

pub const NCOMPS: usize = 16;

/// Components that can be written to the diagnostic buffer.
pub const DIAG_COMPS: [Comp; 11] = [
    Comp::ExmBy,
    Comp::EypBx,
    Comp::Ez,
    Comp::Bx,
    Comp::By,
    Comp::Bz,
    Comp::Jx,
    Comp::Jy,
    Comp::Jz,
    Comp::Rho,
    Comp::Psi,
];

impl Comp {
    pub fn name(self) -> &'static str {
        match self {
            Comp::ExmBy => "ExmBy",
            Comp::EypBx => "EypBx",
            Comp::Ez => "Ez",
            Comp::Bx => "Bx",
            Comp::By => "By",
            Comp::Bz => "Bz",
            Comp::Jx => "jx",
            Comp::Jy => "jy",
            Comp::Jz => "jz",
            Comp::Rho => "rho",
            Comp::Psi => "Psi",
            Comp::Chi => "chi",
            Comp::Sx => "Sx",
            Comp::Sy => "Sy",
            Comp::JxBeam => "jx_beam",
            Comp::JyBeam => "jy_beam",
        }
    }

    pub fn from_name(name: &str) -> WakeResult<Comp> {
        DIAG_COMPS
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| WakeError::UnknownComponent {
                name: name.to_string(),
                valid: DIAG_COMPS
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Resolves the names of an output list. "all" selects every diagnostic
    /// component, "none" or an empty list selects nothing.
    pub fn parse_list(names: &[String]) -> WakeResult<Vec<Comp>> {
        if names.iter().any(|n| n == "all") {
            return Ok(DIAG_COMPS.to_vec());
        }
        let mut comps = Vec::with_capacity(names.len());
        for name in names.iter().filter(|n| n.as_str() != "none") {
            let comp = Comp::from_name(name)?;
            if !comps.contains(&comp) {
                comps.push(comp);
            }
        }
        Ok(comps)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    X,
    Y,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceOp {
    Assign,
    Add,
}

/// The sliding window of transverse field slices.
pub struct Fields {
    slots: Vec<Field>,
    table: [[Option<usize>; NCOMPS]; NLEVELS],
    mode: SolverMode,
    periodic: bool,
    pub dx: Float,
    pub dy: Float,
    pub dz: Float,
}

impl Fields {
    /// Components allocated on each level for a solver mode.
    pub fn layout(mode: SolverMode) -> Vec<(Level, Vec<Comp>)> {
        use Comp::*;
        let this_pc = vec![ExmBy, EypBx, Ez, Bx, By, Bz, Jx, Jy, Jz, Rho, Psi];
        match mode {
            SolverMode::PredictorCorrector => vec![
                (Level::This, this_pc),
                (Level::Next, vec![Jx, Jy, Jz, Rho]),
                (Level::Previous1, vec![Bx, By, Jx, Jy]),
                (Level::Previous2, vec![Bx, By]),
                (Level::RhoIons, vec![Rho]),
            ],
            SolverMode::Explicit => {
                let mut this = this_pc;
                this.extend_from_slice(&[Chi, Sx, Sy, JxBeam, JyBeam]);
                vec![
                    (Level::This, this),
                    (Level::Next, vec![JxBeam, JyBeam]),
                    (Level::Previous1, vec![JxBeam, JyBeam]),
                    (Level::RhoIons, vec![Rho]),
                ]
            }
        }
    }

    pub fn new(geom: &Geom, mode: SolverMode, boundary: FieldBoundary) -> Fields {
        let mut table = [[None; NCOMPS]; NLEVELS];
        let mut slots = Vec::new();
        for (level, comps) in Fields::layout(mode) {
            for comp in comps {
                table[level as usize][comp as usize] = Some(slots.len());
                slots.push(Field::new(geom.nx, geom.ny));
            }
        }
        Fields {
            slots,
            table,
            mode,
            periodic: boundary == FieldBoundary::Periodic,
            dx: geom.dx[0],
            dy: geom.dx[1],
            dz: geom.dx[2],
        }
    }

    pub fn mode(&self) -> SolverMode {
        self.mode
    }

    pub fn has(&self, level: Level, comp: Comp) -> bool {
        self.table[level as usize][comp as usize].is_some()
    }

    #[inline(always)]
    fn slot(&self, level: Level, comp: Comp) -> usize {
        match self.table[level as usize][comp as usize] {
            Some(i) => i,
            None => panic!("field {:?} is not allocated on {:?}", comp, level),
        }
    }

    #[inline(always)]
    pub fn get(&self, level: Level, comp: Comp) -> &Field {
        &self.slots[self.slot(level, comp)]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, level: Level, comp: Comp) -> &mut Field {
        let i = self.slot(level, comp);
        &mut self.slots[i]
    }

    pub fn try_get(&self, level: Level, comp: Comp) -> WakeResult<&Field> {
        match self.table[level as usize][comp as usize] {
            Some(i) => Ok(&self.slots[i]),
            None => Err(WakeError::UnknownComponent {
                name: format!("{} on {:?}", comp.name(), level),
                valid: Fields::layout(self.mode)
                    .iter()
                    .filter(|(l, _)| *l == level)
                    .flat_map(|(_, cs)| cs.iter().map(|c| c.name()))
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Two distinct slots, one mutable.
    pub fn get_pair_mut(&mut self, dst: (Level, Comp), src: (Level, Comp)) -> (&mut Field, &Field) {
        let d = self.slot(dst.0, dst.1);
        let s = self.slot(src.0, src.1);
        assert_ne!(d, s);
        if d < s {
            let (lo, hi) = self.slots.split_at_mut(s);
            (&mut lo[d], &hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(d);
            (&mut hi[0], &lo[s])
        }
    }

    fn swap_slots(&mut self, a: (Level, Comp), b: (Level, Comp)) {
        let ia = self.slot(a.0, a.1);
        let ib = self.slot(b.0, b.1);
        self.table[a.0 as usize][a.1 as usize] = Some(ib);
        self.table[b.0 as usize][b.1 as usize] = Some(ia);
    }

    pub fn zero(&mut self, level: Level, comp: Comp) {
        self.get_mut(level, comp).zero();
    }

    pub fn zero_level(&mut self, level: Level) {
        for comp_slot in self.table[level as usize].iter() {
            if let Some(i) = comp_slot {
                self.slots[*i].zero();
            }
        }
    }

    pub fn zero_all(&mut self) {
        for fld in self.slots.iter_mut() {
            fld.zero();
        }
    }

    /// Moves the window one slice upstream once `This` is final.
    pub fn shift_window(&mut self) {
        match self.mode {
            SolverMode::PredictorCorrector => {
                for comp in [Comp::Bx, Comp::By].iter().copied() {
                    self.swap_slots((Level::Previous2, comp), (Level::Previous1, comp));
                }
                for comp in [Comp::Bx, Comp::By, Comp::Jx, Comp::Jy].iter().copied() {
                    let (dst, src) =
                        self.get_pair_mut((Level::Previous1, comp), (Level::This, comp));
                    dst.copy_from(src);
                }
            }
            SolverMode::Explicit => {
                for comp in [Comp::JxBeam, Comp::JyBeam].iter().copied() {
                    self.swap_slots((Level::Previous1, comp), (Level::This, comp));
                    self.swap_slots((Level::This, comp), (Level::Next, comp));
                    self.zero(Level::Next, comp);
                }
            }
        }
    }

    /// dst (op)= factor * d/dx_dir of src, centred, reading guard cells.
    pub fn transverse_derivative(
        &self,
        level: Level,
        comp: Comp,
        dir: Dir,
        factor: Float,
        op: SliceOp,
        dst: &mut Field,
    ) {
        let src = self.get(level, comp);
        let (di, dj, h) = match dir {
            Dir::X => (1, 0, self.dx),
            Dir::Y => (0, 1, self.dy),
        };
        let fac = factor / (2.0 * h);
        for j in 0..src.ny() as isize {
            for i in 0..src.nx() as isize {
                let d = fac * (src.get(i + di, j + dj) - src.get(i - di, j - dj));
                let out = dst.at_mut(i as usize, j as usize);
                match op {
                    SliceOp::Assign => *out = d,
                    SliceOp::Add => *out += d,
                }
            }
        }
    }

    /// dst (op)= factor * (ahead - behind) / (2 dz). `ahead` is the slice
    /// at larger z.
    pub fn longitudinal_derivative(
        &self,
        ahead: Level,
        behind: Level,
        comp: Comp,
        factor: Float,
        op: SliceOp,
        dst: &mut Field,
    ) {
        let a = self.get(ahead, comp);
        let b = self.get(behind, comp);
        let fac = factor / (2.0 * self.dz);
        for j in 0..a.ny() {
            for i in 0..a.nx() {
                let d = fac * (a.at(i, j) - b.at(i, j));
                let out = dst.at_mut(i, j);
                match op {
                    SliceOp::Assign => *out = d,
                    SliceOp::Add => *out += d,
                }
            }
        }
    }

    /// After deposition: fold guard-cell contributions back for periodic
    /// boundaries and refresh the guards.
    pub fn sum_guards(&mut self, level: Level, comps: &[Comp]) {
        if !self.periodic {
            return;
        }
        for &comp in comps {
            let fld = self.get_mut(level, comp);
            fld.deposit_ghosts();
            fld.update_ghosts();
        }
    }

    /// Guard cells of solved fields: periodic copy or zero.
    pub fn fill_guards(&mut self, level: Level, comp: Comp) {
        let periodic = self.periodic;
        let fld = self.get_mut(level, comp);
        if periodic {
            fld.update_ghosts();
        } else {
            fld.zero_guards();
        }
    }

    pub fn copy_to_diag(&self, islice: usize, diag: &mut DiagBuffer) {
        for ic in 0..diag.comps.len() {
            let comp = diag.comps[ic];
            diag.deposit_slice(islice, ic, self.get(Level::This, comp));
        }
    }

    fn handoff_slots(&self) -> Vec<usize> {
        let mut slots = Vec::new();
        for level in [Level::Previous1, Level::Previous2].iter() {
            for slot in self.table[*level as usize].iter().flatten() {
                slots.push(*slot);
            }
        }
        slots
    }

    /// Previous1 and Previous2 planes of every allocated component,
    /// flattened including guard cells.
    pub fn handoff_payload(&self) -> Vec<Float> {
        let slots = self.handoff_slots();
        let mut out = Vec::with_capacity(slots.len() * self.slots[0].data.len());
        for i in slots {
            out.extend_from_slice(&self.slots[i].data);
        }
        out
    }

    pub fn load_handoff(&mut self, payload: &[Float]) -> WakeResult<()> {
        let slots = self.handoff_slots();
        let plane = self.slots[0].data.len();
        if payload.len() != slots.len() * plane {
            return Err(WakeError::Aborted(format!(
                "slice handoff has {} values, expected {}",
                payload.len(),
                slots.len() * plane
            )));
        }
        for (i, chunk) in slots.into_iter().zip(payload.chunks(plane)) {
            self.slots[i].data.copy_from_slice(chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{build_test_config, E_TOL};

    fn filled(fields: &mut Fields, level: Level, comp: Comp, val: Float) {
        let fld = fields.get_mut(level, comp);
        for j in 0..fld.ny() {
            for i in 0..fld.nx() {
                *fld.at_mut(i, j) = val + (i + 3 * j) as Float;
            }
        }
    }

    fn test_fields(mode: SolverMode) -> Fields {
        let cfg = build_test_config();
        Fields::new(&Geom::new(&cfg.grid), mode, FieldBoundary::Dirichlet)
    }

    #[test]
    fn layout_is_mode_specific() {
        let pc = test_fields(SolverMode::PredictorCorrector);
        assert!(pc.has(Level::Previous2, Comp::Bx));
        assert!(!pc.has(Level::This, Comp::Chi));
        assert!(pc.try_get(Level::Previous2, Comp::Jx).is_err());
        let ex = test_fields(SolverMode::Explicit);
        assert!(ex.has(Level::Next, Comp::JxBeam));
        assert!(!ex.has(Level::Previous2, Comp::Bx));
        assert!(!ex.has(Level::Salame, Comp::Ez));
    }

    #[test]
    fn shift_moves_previous1_to_previous2() {
        let mut f = test_fields(SolverMode::PredictorCorrector);
        filled(&mut f, Level::Previous1, Comp::Bx, 1.0);
        filled(&mut f, Level::This, Comp::Bx, 100.0);
        filled(&mut f, Level::This, Comp::Jy, 7.0);
        let p1 = f.get(Level::Previous1, Comp::Bx).clone();
        let this = f.get(Level::This, Comp::Bx).clone();
        f.shift_window();
        assert_eq!(f.get(Level::Previous2, Comp::Bx).data, p1.data);
        assert_eq!(f.get(Level::Previous1, Comp::Bx).data, this.data);
        assert_eq!(
            f.get(Level::Previous1, Comp::Jy).data,
            f.get(Level::This, Comp::Jy).data
        );
        // This keeps its data
        assert_eq!(f.get(Level::This, Comp::Bx).data, this.data);
    }

    #[test]
    fn double_shift_equals_single_shift_except_previous2() {
        let mut once = test_fields(SolverMode::PredictorCorrector);
        let mut twice = test_fields(SolverMode::PredictorCorrector);
        for f in [&mut once, &mut twice].iter_mut() {
            filled(f, Level::Previous2, Comp::By, -5.0);
            filled(f, Level::Previous1, Comp::By, 2.0);
            filled(f, Level::This, Comp::By, 11.0);
            filled(f, Level::This, Comp::Jx, 4.0);
        }
        once.shift_window();
        twice.shift_window();
        let p1_after_first = twice.get(Level::Previous1, Comp::By).clone();
        twice.shift_window();
        for (level, comp) in [
            (Level::This, Comp::By),
            (Level::Previous1, Comp::By),
            (Level::Previous1, Comp::Jx),
            (Level::This, Comp::Jx),
        ]
        .iter()
        {
            assert_eq!(once.get(*level, *comp).data, twice.get(*level, *comp).data);
        }
        assert_eq!(twice.get(Level::Previous2, Comp::By).data, p1_after_first.data);
    }

    #[test]
    fn explicit_shift_rotates_beam_currents() {
        let mut f = test_fields(SolverMode::Explicit);
        filled(&mut f, Level::Next, Comp::JxBeam, 1.0);
        filled(&mut f, Level::This, Comp::JxBeam, 2.0);
        let next = f.get(Level::Next, Comp::JxBeam).clone();
        let this = f.get(Level::This, Comp::JxBeam).clone();
        f.shift_window();
        assert_eq!(f.get(Level::This, Comp::JxBeam).data, next.data);
        assert_eq!(f.get(Level::Previous1, Comp::JxBeam).data, this.data);
        assert_eq!(f.get(Level::Next, Comp::JxBeam).max_abs(), 0.0);
    }

    #[test]
    fn derivatives() {
        let mut f = test_fields(SolverMode::PredictorCorrector);
        let (dx, dz) = (f.dx, f.dz);
        {
            let psi = f.get_mut(Level::This, Comp::Psi);
            for j in 0..psi.ny() {
                for i in 0..psi.nx() {
                    *psi.at_mut(i, j) = 3.0 * (i as Float) * dx;
                }
            }
        }
        let mut dst = Field::new(16, 16);
        f.transverse_derivative(Level::This, Comp::Psi, Dir::X, 2.0, SliceOp::Assign, &mut dst);
        assert!((dst.at(5, 7) - 6.0).abs() < E_TOL);
        f.transverse_derivative(Level::This, Comp::Psi, Dir::Y, 1.0, SliceOp::Add, &mut dst);
        assert!((dst.at(5, 7) - 6.0).abs() < E_TOL);

        filled(&mut f, Level::Previous1, Comp::Jx, 1.0);
        filled(&mut f, Level::Next, Comp::Jx, 0.0);
        f.longitudinal_derivative(
            Level::Previous1,
            Level::Next,
            Comp::Jx,
            1.0,
            SliceOp::Assign,
            &mut dst,
        );
        assert!((dst.at(3, 3) - 1.0 / (2.0 * dz)).abs() < E_TOL);
    }

    #[test]
    fn handoff_round_trip_fills_previous_levels() {
        let mut a = test_fields(SolverMode::PredictorCorrector);
        filled(&mut a, Level::Previous1, Comp::Bx, 3.0);
        filled(&mut a, Level::Previous2, Comp::By, -1.0);
        let payload = a.handoff_payload();
        let mut b = test_fields(SolverMode::PredictorCorrector);
        b.load_handoff(&payload).unwrap();
        assert_eq!(
            a.get(Level::Previous1, Comp::Bx).data,
            b.get(Level::Previous1, Comp::Bx).data
        );
        assert_eq!(
            a.get(Level::Previous2, Comp::By).data,
            b.get(Level::Previous2, Comp::By).data
        );
        assert!(b.load_handoff(&payload[1..]).is_err());
    }

    #[test]
    fn component_names() {
        assert_eq!(Comp::from_name("Ez").unwrap(), Comp::Ez);
        assert!(Comp::parse_list(&["none".to_string()]).unwrap().is_empty());
        assert_eq!(Comp::parse_list(&["all".to_string()]).unwrap().len(), 11);
        let picked = Comp::parse_list(&["Bx".to_string(), "rho".to_string()]).unwrap();
        assert_eq!(picked, vec![Comp::Bx, Comp::Rho]);
        assert!(Comp::from_name("Ex").is_err());
    }
}
