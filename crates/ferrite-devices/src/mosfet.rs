//! MOSFET with Meyer gate capacitances and piecewise depletion charges.
//!
//! The DC surface is the square-law model with channel-length modulation
//! and body effect; the charge model follows the classic formulation: the
//! bulk junctions integrate `(1 − v/φ)^(1−m)` below the depletion
//! crossover and extrapolate linearly above it using the coefficients
//! F2/F3/F4 stored at temperature time, while the gate charges use
//! Meyer's capacitances averaged with the previous accepted timepoint.

use ferrite_core::{
    thermal_voltage, AcLoadContext, AcceptContext, Behavior, BehaviorKind, BindContext,
    ConvergenceContext, ElementHandle, HistoryRing, InitMode, LoadContext, MatrixPattern,
    NoiseSource, Result, RhsHandle, SetupContext, SimState, StateId, VariableId,
};
use num_complex::Complex;

use crate::limit::{fetlim, limvds, pnjlim};
use crate::merged;

const KNOWN_PARAMS: &[&str] = &["w", "l", "off"];
const KNOWN_MODEL_PARAMS: &[&str] = &[
    "pmos", "vto", "kp", "gamma", "phi", "lambda", "is", "cbd", "cbs", "pb", "mj", "fc", "tox",
    "cgso", "cgdo", "cgbo", "kf", "af", "tnom",
];

/// Permittivity of SiO₂ (F/m).
const EPS_OX: f64 = 3.9 * 8.854214871e-12;

/// Pin order in the handle grid.
const D: usize = 0;
const G: usize = 1;
const S: usize = 2;
const B: usize = 3;

pub(crate) struct MosfetBehavior {
    name: String,
    pins: [VariableId; 4],

    sign: f64,
    vto: f64,
    kp: f64,
    gamma: f64,
    phi: f64,
    lambda: f64,
    isat: f64,
    cbd: f64,
    cbs: f64,
    pb: f64,
    mj: f64,
    fc: f64,
    tox: f64,
    cgso: f64,
    cgdo: f64,
    cgbo: f64,
    kf: f64,
    af: f64,
    width: f64,
    length: f64,

    // Temperature products.
    vt: f64,
    vcrit: f64,
    /// Oxide capacitance W·L·εox/tox.
    cox: f64,
    /// Depletion extrapolation coefficients for the two bulk junctions:
    /// cap(v) = cz/f2·(f3 + m·v/pb) above fc·pb, charge continues from f4.
    f2: f64,
    f3: f64,
    f4_bs: f64,
    f4_bd: f64,

    // Iteration state (internal polarity).
    vgs: f64,
    vds: f64,
    vbs: f64,
    von: f64,
    vdsat: f64,
    ids: f64,
    gm: f64,
    gds: f64,
    gmbs: f64,
    ibs: f64,
    gbs: f64,
    ibd: f64,
    gbd: f64,

    // Meyer capacitance history (half-values) and gate voltage history.
    capgs: HistoryRing<f64>,
    capgd: HistoryRing<f64>,
    capgb: HistoryRing<f64>,
    vgs_hist: HistoryRing<f64>,
    vgd_hist: HistoryRing<f64>,
    vgb_hist: HistoryRing<f64>,

    qgs: Option<StateId>,
    qgd: Option<StateId>,
    qgb: Option<StateId>,
    qbd: Option<StateId>,
    qbs: Option<StateId>,

    h: [[ElementHandle; 4]; 4],
    rhs: [RhsHandle; 4],
}

impl MosfetBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_PARAMS)?;
        if let Some(m) = ctx.model {
            m.params.check_known(m.name(), KNOWN_MODEL_PARAMS)?;
        }
        let g = |name: &str, dflt: f64| merged(e, ctx.model, name, dflt);
        let width = e.params.value_or("w", 100e-6);
        let length = e.params.value_or("l", 100e-6);
        if width <= 0.0 || length <= 0.0 {
            return Err(ferrite_core::Error::ModelParameterOutOfRange {
                name: format!("{}.w/l", e.name()),
                value: width.min(length),
            });
        }
        Ok(Box::new(Self {
            name: e.name().to_string(),
            pins: [ctx.pins[0], ctx.pins[1], ctx.pins[2], ctx.pins[3]],
            sign: if g("pmos", 0.0) != 0.0 { -1.0 } else { 1.0 },
            vto: g("vto", 0.0),
            kp: g("kp", 2e-5),
            gamma: g("gamma", 0.0),
            phi: g("phi", 0.6),
            lambda: g("lambda", 0.0),
            isat: g("is", 1e-14),
            cbd: g("cbd", 0.0),
            cbs: g("cbs", 0.0),
            pb: g("pb", 0.8),
            mj: g("mj", 0.5),
            fc: g("fc", 0.5),
            tox: g("tox", 1e-7),
            cgso: g("cgso", 0.0),
            cgdo: g("cgdo", 0.0),
            cgbo: g("cgbo", 0.0),
            kf: g("kf", 0.0),
            af: g("af", 1.0),
            width,
            length,
            vt: 0.0,
            vcrit: 0.0,
            cox: 0.0,
            f2: 0.0,
            f3: 0.0,
            f4_bs: 0.0,
            f4_bd: 0.0,
            vgs: 0.0,
            vds: 0.0,
            vbs: 0.0,
            von: 0.0,
            vdsat: 0.0,
            ids: 0.0,
            gm: 0.0,
            gds: 0.0,
            gmbs: 0.0,
            ibs: 0.0,
            gbs: 0.0,
            ibd: 0.0,
            gbd: 0.0,
            capgs: HistoryRing::new(2, 0.0),
            capgd: HistoryRing::new(2, 0.0),
            capgb: HistoryRing::new(2, 0.0),
            vgs_hist: HistoryRing::new(2, 0.0),
            vgd_hist: HistoryRing::new(2, 0.0),
            vgb_hist: HistoryRing::new(2, 0.0),
            qgs: None,
            qgd: None,
            qgb: None,
            qbd: None,
            qbs: None,
            h: [[ElementHandle::TRASH; 4]; 4],
            rhs: [RhsHandle::TRASH; 4],
        }))
    }

    /// Square-law drain current in normal mode (vds ≥ 0).
    ///
    /// Returns (ids, gm, gds, gmbs, von, vdsat).
    fn channel(&self, vgs: f64, vds: f64, vbs: f64) -> (f64, f64, f64, f64, f64, f64) {
        let beta = self.kp * self.width / self.length;
        let sqphi = self.phi.sqrt();
        let (sarg, dsarg_dvbs) = if vbs <= 0.0 {
            let s = (self.phi - vbs).sqrt();
            (s, -0.5 / s)
        } else {
            // Forward body bias: first-order expansion, clamped.
            let s = (sqphi - vbs / (2.0 * sqphi)).max(0.0);
            (s, if s > 0.0 { -0.5 / sqphi } else { 0.0 })
        };
        let von = self.vto + self.gamma * (sarg - sqphi);
        let vgst = vgs - von;

        if vgst <= 0.0 {
            return (0.0, 0.0, 0.0, 0.0, von, 0.0);
        }
        let vdsat = vgst;
        let cl = 1.0 + self.lambda * vds;
        if vds < vgst {
            // Linear region.
            let ids = beta * (vgst * vds - 0.5 * vds * vds) * cl;
            let gm = beta * vds * cl;
            let gds = beta * (vgst - vds) * cl
                + self.lambda * beta * (vgst * vds - 0.5 * vds * vds);
            let gmbs = gm * (-self.gamma * dsarg_dvbs);
            (ids, gm, gds, gmbs, von, vdsat)
        } else {
            // Saturation.
            let ids = 0.5 * beta * vgst * vgst * cl;
            let gm = beta * vgst * cl;
            let gds = 0.5 * self.lambda * beta * vgst * vgst;
            let gmbs = gm * (-self.gamma * dsarg_dvbs);
            (ids, gm, gds, gmbs, von, vdsat)
        }
    }

    /// Bulk junction diode with the weak-conduction linearisation.
    fn bulk_junction(&self, v: f64, gmin: f64) -> (f64, f64) {
        if v > -5.0 * self.vt {
            let ev = (v / self.vt).exp();
            (
                self.isat * (ev - 1.0) + gmin * v,
                self.isat * ev / self.vt + gmin,
            )
        } else {
            let g = -self.isat / v + gmin;
            (g * v, g)
        }
    }

    /// Meyer gate capacitances, stored as half-values so that
    /// `now + previous` forms the trapezoidal average.
    fn meyer_half(&self, vgs: f64, vgd: f64) -> (f64, f64, f64) {
        let cox = self.cox;
        let phi = self.phi;
        let vgst = vgs - self.von;
        if vgst <= -phi {
            (0.0, 0.0, cox / 2.0)
        } else if vgst <= -phi / 2.0 {
            (0.0, 0.0, -vgst * cox / (2.0 * phi))
        } else if vgst <= 0.0 {
            (
                vgst * cox / (1.5 * phi) + cox / 3.0,
                0.0,
                -vgst * cox / (2.0 * phi),
            )
        } else {
            let vds = vgs - vgd;
            if self.vdsat <= vds {
                (cox / 3.0, 0.0, 0.0)
            } else {
                let vddif = 2.0 * self.vdsat - vds;
                let vddif1 = self.vdsat - vds;
                let vddif2 = vddif * vddif;
                (
                    cox * (1.0 - vddif1 * vddif1 / vddif2) / 3.0,
                    cox * (1.0 - self.vdsat * self.vdsat / vddif2) / 3.0,
                    0.0,
                )
            }
        }
    }

    /// Bulk depletion charge using the stored F2/F3/F4 coefficients.
    fn bulk_charge(&self, v: f64, czero: f64, f4: f64) -> (f64, f64) {
        if czero == 0.0 {
            return (0.0, 0.0);
        }
        let dep_cap = self.fc * self.pb;
        if v < dep_cap {
            let arg = 1.0 - v / self.pb;
            let sarg = arg.powf(-self.mj);
            (
                self.pb * czero * (1.0 - arg * sarg) / (1.0 - self.mj),
                czero * sarg,
            )
        } else {
            let czof2 = czero / self.f2;
            (
                f4 * czero
                    + czof2
                        * (self.f3 * (v - dep_cap)
                            + (self.mj / (2.0 * self.pb)) * (v * v - dep_cap * dep_cap)),
                czof2 * (self.f3 + self.mj * v / self.pb),
            )
        }
    }

    /// Stamp one charge companion between two pins.
    fn stamp_charge(
        &self,
        m: &mut ferrite_core::RealMatrix,
        a: usize,
        b: usize,
        geq: f64,
        ieq: f64,
    ) {
        m.add(self.h[a][a], geq);
        m.add(self.h[b][b], geq);
        m.add(self.h[a][b], -geq);
        m.add(self.h[b][a], -geq);
        m.add_rhs(self.rhs[a], ieq);
        m.add_rhs(self.rhs[b], -ieq);
    }
}

impl Behavior for MosfetBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[
            BehaviorKind::Temperature,
            BehaviorKind::Load,
            BehaviorKind::AcLoad,
            BehaviorKind::Transient,
            BehaviorKind::Noise,
            BehaviorKind::Accept,
        ]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.qgs = Some(ctx.state.integrator.alloc());
        self.qgd = Some(ctx.state.integrator.alloc());
        self.qgb = Some(ctx.state.integrator.alloc());
        self.qbd = Some(ctx.state.integrator.alloc());
        self.qbs = Some(ctx.state.integrator.alloc());
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        for (i, &row) in self.pins.iter().enumerate() {
            for (j, &col) in self.pins.iter().enumerate() {
                self.h[i][j] = pattern.element(row, col);
            }
            self.rhs[i] = pattern.rhs(row);
        }
    }

    fn unsetup(&mut self) {
        self.qgs = None;
        self.qgd = None;
        self.qgb = None;
        self.qbd = None;
        self.qbs = None;
        self.h = [[ElementHandle::TRASH; 4]; 4];
        self.rhs = [RhsHandle::TRASH; 4];
    }

    fn temperature(&mut self, state: &SimState) -> Result<()> {
        self.vt = thermal_voltage(state.temperature);
        self.vcrit = self.vt * (self.vt / (std::f64::consts::SQRT_2 * self.isat)).ln();
        self.cox = EPS_OX / self.tox * self.width * self.length;

        // Depletion crossover coefficients, shared shape for both bulk
        // junctions (charge scale differs via czero).
        self.f2 = (1.0 - self.fc).powf(1.0 + self.mj);
        self.f3 = 1.0 - self.fc * (1.0 + self.mj);
        let f4 = self.pb * (1.0 - (1.0 - self.fc).powf(1.0 - self.mj)) / (1.0 - self.mj);
        self.f4_bs = f4;
        self.f4_bd = f4;
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &mut *ctx.state;
        let sign = self.sign;

        let (mut vgs, mut vds, mut vbs) = match state.init_mode {
            InitMode::Junction => (self.vto + 0.1, 0.0, 0.0),
            _ => {
                let vd = state.voltage(self.pins[D]);
                let vg = state.voltage(self.pins[G]);
                let vs = state.voltage(self.pins[S]);
                let vb = state.voltage(self.pins[B]);
                (sign * (vg - vs), sign * (vd - vs), sign * (vb - vs))
            }
        };
        if state.init_mode == InitMode::Normal {
            vgs = fetlim(vgs, self.vgs, self.von);
            vds = limvds(vds, self.vds);
            let vbs_lim = pnjlim(vbs, self.vbs, self.vt, self.vcrit, &mut state.limited);
            vbs = vbs_lim;
        }

        // Normalise to a non-negative drain-source voltage.
        let normal = vds >= 0.0;
        let (ids, gm, gds, gmbs, von, vdsat) = if normal {
            self.channel(vgs, vds, vbs)
        } else {
            let vgd = vgs - vds;
            let vbd = vbs - vds;
            self.channel(vgd, -vds, vbd)
        };
        self.vgs = vgs;
        self.vds = vds;
        self.vbs = vbs;
        self.von = von;
        self.vdsat = vdsat;
        self.ids = if normal { ids } else { -ids };
        self.gm = gm;
        self.gds = gds;
        self.gmbs = gmbs;

        // Bulk junction diodes.
        let vbd = vbs - vds;
        let (ibs, gbs) = self.bulk_junction(vbs, state.gmin);
        let (ibd, gbd) = self.bulk_junction(vbd, state.gmin);
        self.ibs = ibs;
        self.gbs = gbs;
        self.ibd = ibd;
        self.gbd = gbd;

        let m = &mut *ctx.matrix;

        // Bulk diodes: b-s and b-d.
        m.add(self.h[B][B], gbs + gbd);
        m.add(self.h[S][S], gbs);
        m.add(self.h[D][D], gbd);
        m.add(self.h[B][S], -gbs);
        m.add(self.h[S][B], -gbs);
        m.add(self.h[B][D], -gbd);
        m.add(self.h[D][B], -gbd);
        let ibs_eq = sign * (ibs - gbs * vbs);
        let ibd_eq = sign * (ibd - gbd * vbd);
        m.add_rhs(self.rhs[B], -(ibs_eq + ibd_eq));
        m.add_rhs(self.rhs[S], ibs_eq);
        m.add_rhs(self.rhs[D], ibd_eq);

        // Channel current: linearised around the effective drain/source.
        let (dn, sn) = if normal { (D, S) } else { (S, D) };
        // Controlling voltages in the effective frame.
        let (cvgs, cvds, cvbs) = if normal {
            (vgs, vds, vbs)
        } else {
            (vgs - vds, -vds, vbs - vds)
        };
        m.add(self.h[dn][G], gm);
        m.add(self.h[dn][dn], gds);
        m.add(self.h[dn][B], gmbs);
        m.add(self.h[dn][sn], -(gm + gds + gmbs));
        m.add(self.h[sn][G], -gm);
        m.add(self.h[sn][dn], -gds);
        m.add(self.h[sn][B], -gmbs);
        m.add(self.h[sn][sn], gm + gds + gmbs);
        let ieq = sign * (ids - gm * cvgs - gds * cvds - gmbs * cvbs);
        m.add_rhs(self.rhs[dn], -ieq);
        m.add_rhs(self.rhs[sn], ieq);
        Ok(())
    }

    fn transient_load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &mut *ctx.state;
        let sign = self.sign;

        let vgs_ext = sign * self.vgs;
        let vds_ext = sign * self.vds;
        let vbs_ext = sign * self.vbs;
        let vgd_ext = vgs_ext - vds_ext;
        let vgb_ext = vgs_ext - vbs_ext;
        let vbd_int = self.vbs - self.vds;

        // Meyer caps at the present bias (half-values).
        let (cgs_now, cgd_now, cgb_now) = self.meyer_half(self.vgs, self.vgs - self.vds);
        *self.capgs.current_mut() = cgs_now;
        *self.capgd.current_mut() = cgd_now;
        *self.capgb.current_mut() = cgb_now;

        // Bulk depletion charges in internal polarity.
        let (qbs_int, capbs) = self.bulk_charge(self.vbs, self.cbs, self.f4_bs);
        let (qbd_int, capbd) = self.bulk_charge(vbd_int, self.cbd, self.f4_bd);

        let slots = (
            self.qgs.expect("qgs slot"),
            self.qgd.expect("qgd slot"),
            self.qgb.expect("qgb slot"),
            self.qbd.expect("qbd slot"),
            self.qbs.expect("qbs slot"),
        );

        if state.tran_init {
            *self.vgs_hist.current_mut() = vgs_ext;
            *self.vgd_hist.current_mut() = vgd_ext;
            *self.vgb_hist.current_mut() = vgb_ext;
            state.integrator.initialize(slots.0, 0.0);
            state.integrator.initialize(slots.1, 0.0);
            state.integrator.initialize(slots.2, 0.0);
            state.integrator.initialize(slots.3, sign * qbd_int);
            state.integrator.initialize(slots.4, sign * qbs_int);
            return Ok(());
        }

        // Trapezoidal-averaged Meyer capacitances plus overlaps.
        let ceff_gs = *self.capgs.current() + *self.capgs.previous(1) + self.cgso * self.width;
        let ceff_gd = *self.capgd.current() + *self.capgd.previous(1) + self.cgdo * self.width;
        let ceff_gb = *self.capgb.current() + *self.capgb.previous(1) + self.cgbo * self.length;

        // Incremental gate charges from the previous accepted voltages.
        let qgs_new =
            state.integrator.previous(slots.0, 1) + ceff_gs * (vgs_ext - *self.vgs_hist.previous(1));
        let qgd_new =
            state.integrator.previous(slots.1, 1) + ceff_gd * (vgd_ext - *self.vgd_hist.previous(1));
        let qgb_new =
            state.integrator.previous(slots.2, 1) + ceff_gb * (vgb_ext - *self.vgb_hist.previous(1));
        *self.vgs_hist.current_mut() = vgs_ext;
        *self.vgd_hist.current_mut() = vgd_ext;
        *self.vgb_hist.current_mut() = vgb_ext;

        let integ = &mut state.integrator;
        let m = &mut *ctx.matrix;

        integ.set_value(slots.0, qgs_new);
        integ.integrate(slots.0);
        let g = integ.jacobian(ceff_gs);
        let ieq = integ.rhs_current(slots.0, g, vgs_ext);
        self.stamp_charge(m, G, S, g, ieq);

        integ.set_value(slots.1, qgd_new);
        integ.integrate(slots.1);
        let g = integ.jacobian(ceff_gd);
        let ieq = integ.rhs_current(slots.1, g, vgd_ext);
        self.stamp_charge(m, G, D, g, ieq);

        integ.set_value(slots.2, qgb_new);
        integ.integrate(slots.2);
        let g = integ.jacobian(ceff_gb);
        let ieq = integ.rhs_current(slots.2, g, vgb_ext);
        self.stamp_charge(m, G, B, g, ieq);

        integ.set_value(slots.3, sign * qbd_int);
        integ.integrate(slots.3);
        let g = integ.jacobian(capbd);
        let ieq = integ.rhs_current(slots.3, g, sign * vbd_int);
        self.stamp_charge(m, B, D, g, ieq);

        integ.set_value(slots.4, sign * qbs_int);
        integ.integrate(slots.4);
        let g = integ.jacobian(capbs);
        let ieq = integ.rhs_current(slots.4, g, vbs_ext);
        self.stamp_charge(m, B, S, g, ieq);
        Ok(())
    }

    fn is_convergent(&self, ctx: &ConvergenceContext<'_>) -> bool {
        let sign = self.sign;
        let vd = ctx.state.voltage(self.pins[D]);
        let vg = ctx.state.voltage(self.pins[G]);
        let vs = ctx.state.voltage(self.pins[S]);
        let vb = ctx.state.voltage(self.pins[B]);
        let vgs = sign * (vg - vs);
        let vds = sign * (vd - vs);
        let vbs = sign * (vb - vs);

        let (cvgs, cvds, cvbs, pvgs, pvds, pvbs) = if self.vds >= 0.0 {
            (vgs, vds, vbs, self.vgs, self.vds, self.vbs)
        } else {
            (
                vgs - vds,
                -vds,
                vbs - vds,
                self.vgs - self.vds,
                -self.vds,
                self.vbs - self.vds,
            )
        };
        let idhat = self.ids.abs()
            + self.gm * (cvgs - pvgs)
            + self.gds * (cvds - pvds)
            + self.gmbs * (cvbs - pvbs);
        let id = self.ids.abs();
        let tol = ctx.tol.reltol * idhat.abs().max(id) + ctx.tol.abstol;
        (idhat - id).abs() <= tol
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let m = &mut *ctx.matrix;
        let gm = Complex::new(self.gm, 0.0);
        let gds = Complex::new(self.gds, 0.0);
        let gmbs = Complex::new(self.gmbs, 0.0);
        let gbs = Complex::new(self.gbs, 0.0);
        let gbd = Complex::new(self.gbd, 0.0);

        let (dn, sn) = if self.vds >= 0.0 { (D, S) } else { (S, D) };
        m.add(self.h[dn][G], gm);
        m.add(self.h[dn][dn], gds);
        m.add(self.h[dn][B], gmbs);
        m.add(self.h[dn][sn], -(gm + gds + gmbs));
        m.add(self.h[sn][G], -gm);
        m.add(self.h[sn][dn], -gds);
        m.add(self.h[sn][B], -gmbs);
        m.add(self.h[sn][sn], gm + gds + gmbs);

        m.add(self.h[B][B], gbs + gbd);
        m.add(self.h[S][S], gbs);
        m.add(self.h[D][D], gbd);
        m.add(self.h[B][S], -gbs);
        m.add(self.h[S][B], -gbs);
        m.add(self.h[B][D], -gbd);
        m.add(self.h[D][B], -gbd);

        // Gate capacitances at the operating point.
        let (cgs_h, cgd_h, cgb_h) = self.meyer_half(self.vgs, self.vgs - self.vds);
        let pairs = [
            (G, S, 2.0 * cgs_h + self.cgso * self.width),
            (G, D, 2.0 * cgd_h + self.cgdo * self.width),
            (G, B, 2.0 * cgb_h + self.cgbo * self.length),
        ];
        for (a, b, c) in pairs {
            let y = Complex::new(0.0, ctx.omega * c);
            m.add(self.h[a][a], y);
            m.add(self.h[b][b], y);
            m.add(self.h[a][b], -y);
            m.add(self.h[b][a], -y);
        }
    }

    fn accept(&mut self, _ctx: &mut AcceptContext<'_>) {
        self.capgs.advance();
        self.capgd.advance();
        self.capgb.advance();
        self.vgs_hist.advance();
        self.vgd_hist.advance();
        self.vgb_hist.advance();
    }

    fn truncate(&self, state: &SimState) -> f64 {
        let mut dt = f64::INFINITY;
        for slot in [self.qgs, self.qgd, self.qgb, self.qbd, self.qbs]
            .into_iter()
            .flatten()
        {
            dt = dt.min(state.integrator.truncate(slot));
        }
        dt
    }

    fn noise_sources(&self, _state: &SimState) -> Vec<NoiseSource> {
        let mut out = vec![NoiseSource::thermal(
            format!("{}.channel", self.name),
            self.pins[D],
            self.pins[S],
            2.0 * self.gm / 3.0,
        )];
        if self.kf > 0.0 {
            out.push(NoiseSource::flicker(
                format!("{}.flicker", self.name),
                self.pins[D],
                self.pins[S],
                self.kf,
                self.af,
                self.ids,
            ));
        }
        out
    }

    fn property(&self, name: &str) -> Option<f64> {
        match name {
            "id" => Some(self.sign * self.ids),
            "vgs" => Some(self.sign * self.vgs),
            "vds" => Some(self.sign * self.vds),
            "von" => Some(self.sign * self.von),
            "vdsat" => Some(self.sign * self.vdsat),
            "gm" => Some(self.gm),
            "gds" => Some(self.gds),
            "gmbs" => Some(self.gmbs),
            "ibs" => Some(self.sign * self.ibs),
            "ibd" => Some(self.sign * self.ibd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::rig;
    use ferrite_core::{Entity, EntityKind, IntegrationMethod, ModelCard};

    fn nmos_model() -> ModelCard {
        ModelCard::new("nmod", EntityKind::Mosfet)
            .param("vto", 1.0)
            .param("kp", 2e-5)
            .param("lambda", 0.02)
            .param("cbd", 1e-12)
            .param("cbs", 1e-12)
    }

    fn mosfet() -> Entity {
        Entity::new("M1", EntityKind::Mosfet, &["d", "g", "s", "b"])
            .model("nmod")
            .param("w", 10e-6)
            .param("l", 1e-6)
    }

    fn load_at(r: &mut crate::testutil::Rig, vd: f64, vg: f64) {
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = vd;
        r.state.solution[1] = vg;
        let _ = r.load();
        r.state.solution[0] = vd;
        r.state.solution[1] = vg;
        let _ = r.load();
    }

    #[test]
    fn test_cutoff_region() {
        let mut r = rig(mosfet(), Some(nmos_model()), MosfetBehavior::build);
        load_at(&mut r, 5.0, 0.5);
        assert_eq!(r.behaviors[0].property("id").unwrap(), 0.0);
    }

    #[test]
    fn test_saturation_square_law() {
        let mut r = rig(mosfet(), Some(nmos_model()), MosfetBehavior::build);
        load_at(&mut r, 5.0, 2.0);
        let id = r.behaviors[0].property("id").unwrap();
        // Ids = KP/2·W/L·(Vgs−Vto)²·(1+λVds) = 1e-4·1·1.1 = 1.1e-4.
        let expected = 0.5 * 2e-5 * 10.0 * 1.0 * 1.1;
        assert!(
            ((id - expected) / expected).abs() < 1e-9,
            "Id = {id}, expected {expected}"
        );
        // gm = β·Vgst·(1+λVds).
        let gm = r.behaviors[0].property("gm").unwrap();
        assert!(((gm - 2e-4 * 1.1) / gm).abs() < 1e-9, "gm = {gm}");
    }

    #[test]
    fn test_linear_region() {
        let mut r = rig(mosfet(), Some(nmos_model()), MosfetBehavior::build);
        load_at(&mut r, 0.1, 2.0);
        let id = r.behaviors[0].property("id").unwrap();
        let beta = 2e-5 * 10.0;
        let expected = beta * (1.0 * 0.1 - 0.005) * (1.0 + 0.02 * 0.1);
        assert!(
            ((id - expected) / expected).abs() < 1e-9,
            "Id = {id}, expected {expected}"
        );
    }

    #[test]
    fn test_reverse_mode_swaps_terminals() {
        let mut r = rig(mosfet(), Some(nmos_model()), MosfetBehavior::build);
        // Drain below source: conduction reverses.
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = -5.0; // vd
        r.state.solution[1] = 2.0; // vg (vgs measured from s = 0)
        let _ = r.load();
        let id = r.behaviors[0].property("id").unwrap();
        assert!(id < 0.0, "reverse conduction: Id = {id}");
    }

    #[test]
    fn test_body_effect_raises_threshold() {
        let model = nmos_model().param("gamma", 0.5);
        let mut r = rig(mosfet(), Some(model), MosfetBehavior::build);
        // vbs = -2 V raises von; same vgs now yields less current.
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = 5.0;
        r.state.solution[1] = 2.0;
        r.state.solution[3] = -2.0;
        let _ = r.load();
        let _ = r.load();
        let id_body = r.behaviors[0].property("id").unwrap();

        let mut r0 = rig(
            mosfet(),
            Some(nmos_model().param("gamma", 0.5)),
            MosfetBehavior::build,
        );
        load_at(&mut r0, 5.0, 2.0);
        let id_nobody = r0.behaviors[0].property("id").unwrap();
        assert!(
            id_body < id_nobody,
            "body bias must reduce current: {id_body} vs {id_nobody}"
        );
    }

    #[test]
    fn test_meyer_caps_partition() {
        let mut r = rig(mosfet(), Some(nmos_model()), MosfetBehavior::build);
        // Saturation: Cgs(half) = cox/3, Cgd = 0.
        load_at(&mut r, 5.0, 2.0);
        let b = &r.behaviors[0];
        let von = b.property("von").unwrap();
        let _ = von;
        // Probe through AC stamping: at saturation the g-d admittance has
        // no Meyer part (overlap is zero in this model).
        use ferrite_core::ComplexMatrix;
        let mut m = ComplexMatrix::from_pattern(&r.pattern);
        let omega = 1e6;
        r.behaviors[0].ac_load(&mut AcLoadContext {
            state: &r.state,
            matrix: &mut m,
            omega,
        });
        let a = m.dense();
        // d row, g column: only -gm (real); no imaginary Meyer part.
        assert!(a[(0, 1)].im.abs() < 1e-18, "Cgd = 0 in saturation");
        // g-s pair carries 2/3·cox.
        let cox = EPS_OX / 1e-7 * 10e-6 * 1e-6;
        let expected = omega * (2.0 / 3.0) * cox;
        assert!(
            ((a[(1, 1)].im - expected) / expected).abs() < 1e-9,
            "Cgs admittance = {}",
            a[(1, 1)].im
        );
    }

    #[test]
    fn test_depletion_coefficients_continuity() {
        let mut r = rig(mosfet(), Some(nmos_model()), MosfetBehavior::build);
        load_at(&mut r, 5.0, 2.0);
        // bulk_charge must be continuous through fc·pb; probe directly by
        // stamping two transient loads either side of the crossover.
        r.state
            .integrator
            .begin(IntegrationMethod::Trapezoidal, 1, 1e-9, 7.0, 1e-3, 1e-14);
        r.state.tran_init = true;
        let _ = r.load_transient();
        r.state.tran_init = false;
        // No assertion beyond "it stamps finite numbers".
        let m = r.load_transient();
        for v in m.rhs_dense().iter() {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn test_channel_thermal_noise() {
        let mut r = rig(mosfet(), Some(nmos_model()), MosfetBehavior::build);
        load_at(&mut r, 5.0, 2.0);
        let sources = r.behaviors[0].noise_sources(&r.state);
        assert_eq!(sources.len(), 1);
        let gm = r.behaviors[0].property("gm").unwrap();
        let si = sources[0].density(1e3, 300.0);
        let expected = 4.0 * ferrite_core::BOLTZMANN * 300.0 * 2.0 * gm / 3.0;
        assert!(((si - expected) / expected).abs() < 1e-12);
    }
}
