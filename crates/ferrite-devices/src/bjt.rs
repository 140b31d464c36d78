//! Bipolar junction transistor (Gummel–Poon).
//!
//! The load behavior computes both junction currents with their leakage
//! companions, the base charge factor `qb` (Early and high-injection
//! effects), current-dependent base resistance, and the full small-signal
//! conductance set. An optional excess-phase hook installed at setup may
//! rotate the collector current before it is stamped.

use ferrite_core::{
    thermal_voltage, AcLoadContext, Behavior, BehaviorKind, BindContext, ConvergenceContext,
    ElementHandle, InitMode, LoadContext, MatrixPattern, NoiseSource, Result, RhsHandle,
    SetupContext, SimState, StateId, VariableId,
};
use num_complex::Complex;

use crate::junction::depletion_charge;
use crate::limit::pnjlim;
use crate::merged;

const KNOWN_PARAMS: &[&str] = &["area", "off"];
const KNOWN_MODEL_PARAMS: &[&str] = &[
    "pnp", "is", "bf", "br", "nf", "nr", "vaf", "var", "ikf", "ikr", "ise", "isc", "ne", "nc",
    "rb", "rbm", "irb", "re", "rc", "cje", "vje", "mje", "cjc", "vjc", "mjc", "tf", "tr", "ptf",
    "fc", "eg", "xti", "kf", "af", "tnom",
];

/// Payload of the excess-phase event: the hook may rewrite the collector
/// current pieces before stamping.
pub struct ExcessPhaseEvent {
    pub cc: f64,
    pub cex: f64,
    pub gex: f64,
    pub qb: f64,
}

/// Collector-current post-processor wired onto the load behavior at setup.
pub type ExcessPhaseHook = Box<dyn FnMut(&mut ExcessPhaseEvent)>;

/// A single-pole phase rotation of the collector transport current,
/// installed when the model gives `ptf` and `tf`.
struct ExcessPhase {
    /// Phase coefficient: ptf (degrees) scaled onto tf.
    td: f64,
    /// Previous accepted (cex, gex).
    prev: (f64, f64),
}

#[derive(Clone, Copy)]
struct ModelParams {
    sign: f64,
    is: f64,
    bf: f64,
    br: f64,
    nf: f64,
    nr: f64,
    inv_vaf: f64,
    inv_var: f64,
    inv_ikf: f64,
    inv_ikr: f64,
    ise: f64,
    isc: f64,
    ne: f64,
    nc: f64,
    rb: f64,
    rbm: f64,
    irb: f64,
    re: f64,
    rc: f64,
    cje: f64,
    vje: f64,
    mje: f64,
    cjc: f64,
    vjc: f64,
    mjc: f64,
    tf: f64,
    tr: f64,
    ptf: f64,
    fc: f64,
    eg: f64,
    xti: f64,
    kf: f64,
    af: f64,
    tnom: f64,
}

pub(crate) struct BjtBehavior {
    name: String,
    col: VariableId,
    base: VariableId,
    emit: VariableId,
    col_prime: VariableId,
    base_prime: VariableId,
    emit_prime: VariableId,

    mp: ModelParams,
    area: f64,
    off: bool,
    legacy_delvbc: bool,

    // Temperature products.
    vt: f64,
    t_sat: f64,
    vcrit: f64,
    gcpr: f64,
    gepr: f64,

    // Iteration state (internal polarity).
    vbe: f64,
    vbc: f64,
    cc: f64,
    cb: f64,
    gpi: f64,
    gmu: f64,
    gm: f64,
    go: f64,
    gx: f64,
    capbe: f64,
    capbc: f64,

    excess_phase: Option<ExcessPhase>,
    hook: Option<ExcessPhaseHook>,

    qbe: Option<StateId>,
    qbc: Option<StateId>,

    // Intrinsic handles: rows/cols over (cp, bp, ep).
    h: [[ElementHandle; 3]; 3],
    // Extrinsic resistances.
    h_rb: [ElementHandle; 4],
    h_rc: [ElementHandle; 4],
    h_re: [ElementHandle; 4],
    r_cp: RhsHandle,
    r_bp: RhsHandle,
    r_ep: RhsHandle,
}

impl BjtBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        Ok(Box::new(Self::build_typed(ctx)?))
    }

    pub(crate) fn build_typed(ctx: &BindContext<'_>) -> Result<Self> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_PARAMS)?;
        if let Some(m) = ctx.model {
            m.params.check_known(m.name(), KNOWN_MODEL_PARAMS)?;
        }
        let area = e.params.value_or("area", 1.0);
        if area <= 0.0 {
            return Err(ferrite_core::Error::ModelParameterOutOfRange {
                name: format!("{}.area", e.name()),
                value: area,
            });
        }
        let g = |name: &str, dflt: f64| merged(e, ctx.model, name, dflt);
        let rb = g("rb", 0.0);
        let mp = ModelParams {
            sign: if g("pnp", 0.0) != 0.0 { -1.0 } else { 1.0 },
            is: g("is", 1e-16),
            bf: g("bf", 100.0),
            br: g("br", 1.0),
            nf: g("nf", 1.0),
            nr: g("nr", 1.0),
            inv_vaf: {
                let vaf = g("vaf", 0.0);
                if vaf > 0.0 {
                    1.0 / vaf
                } else {
                    0.0
                }
            },
            inv_var: {
                let var = g("var", 0.0);
                if var > 0.0 {
                    1.0 / var
                } else {
                    0.0
                }
            },
            inv_ikf: {
                let ikf = g("ikf", 0.0);
                if ikf > 0.0 {
                    1.0 / ikf
                } else {
                    0.0
                }
            },
            inv_ikr: {
                let ikr = g("ikr", 0.0);
                if ikr > 0.0 {
                    1.0 / ikr
                } else {
                    0.0
                }
            },
            ise: g("ise", 0.0),
            isc: g("isc", 0.0),
            ne: g("ne", 1.5),
            nc: g("nc", 2.0),
            rb,
            rbm: g("rbm", rb),
            irb: g("irb", 0.0),
            re: g("re", 0.0),
            rc: g("rc", 0.0),
            cje: g("cje", 0.0),
            vje: g("vje", 0.75),
            mje: g("mje", 0.33),
            cjc: g("cjc", 0.0),
            vjc: g("vjc", 0.75),
            mjc: g("mjc", 0.33),
            tf: g("tf", 0.0),
            tr: g("tr", 0.0),
            ptf: g("ptf", 0.0),
            fc: g("fc", 0.5),
            eg: g("eg", 1.11),
            xti: g("xti", 3.0),
            kf: g("kf", 0.0),
            af: g("af", 1.0),
            tnom: g("tnom", 300.15),
        };
        Ok(Self {
            name: e.name().to_string(),
            col: ctx.pins[0],
            base: ctx.pins[1],
            emit: ctx.pins[2],
            col_prime: ctx.pins[0],
            base_prime: ctx.pins[1],
            emit_prime: ctx.pins[2],
            mp,
            area,
            off: e.params.is_given("off"),
            legacy_delvbc: ctx.config.legacy_delvbc,
            vt: 0.0,
            t_sat: 0.0,
            vcrit: 0.0,
            gcpr: 0.0,
            gepr: 0.0,
            vbe: 0.0,
            vbc: 0.0,
            cc: 0.0,
            cb: 0.0,
            gpi: 0.0,
            gmu: 0.0,
            gm: 0.0,
            go: 0.0,
            gx: 0.0,
            capbe: 0.0,
            capbc: 0.0,
            excess_phase: None,
            hook: None,
            qbe: None,
            qbc: None,
            h: [[ElementHandle::TRASH; 3]; 3],
            h_rb: [ElementHandle::TRASH; 4],
            h_rc: [ElementHandle::TRASH; 4],
            h_re: [ElementHandle::TRASH; 4],
            r_cp: RhsHandle::TRASH,
            r_bp: RhsHandle::TRASH,
            r_ep: RhsHandle::TRASH,
        })
    }

    /// Install a collector-current post-processor. Pre-wired at setup;
    /// there is no dynamic subscription.
    pub fn set_excess_phase_hook(&mut self, hook: ExcessPhaseHook) {
        self.hook = Some(hook);
    }

    /// One junction: current and conductance with the leakage companion.
    fn junction(
        &self,
        v: f64,
        vte: f64,
        csat: f64,
        cleak: f64,
        vtl: f64,
        gmin: f64,
    ) -> (f64, f64, f64, f64) {
        let (c, gd) = if v > -5.0 * vte {
            let ev = (v / vte).exp();
            (csat * (ev - 1.0) + gmin * v, csat * ev / vte + gmin)
        } else {
            let gd = -csat / v + gmin;
            (gd * v, gd)
        };
        let (cl, gl) = if cleak == 0.0 {
            (0.0, 0.0)
        } else if v > -5.0 * vtl {
            let ev = (v / vtl).exp();
            (cleak * (ev - 1.0), cleak * ev / vtl)
        } else {
            let gl = -cleak / v;
            (gl * v, gl)
        };
        (c, gd, cl, gl)
    }
}

impl Behavior for BjtBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[
            BehaviorKind::Temperature,
            BehaviorKind::Load,
            BehaviorKind::AcLoad,
            BehaviorKind::Transient,
            BehaviorKind::Noise,
        ]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.col_prime = if self.mp.rc > 0.0 {
            ctx.nodes.create_internal(&self.name, "col")?
        } else {
            self.col
        };
        self.base_prime = if self.mp.rb > 0.0 {
            ctx.nodes.create_internal(&self.name, "base")?
        } else {
            self.base
        };
        self.emit_prime = if self.mp.re > 0.0 {
            ctx.nodes.create_internal(&self.name, "emit")?
        } else {
            self.emit
        };
        self.qbe = Some(ctx.state.integrator.alloc());
        self.qbc = Some(ctx.state.integrator.alloc());
        if self.mp.ptf != 0.0 && self.mp.tf > 0.0 {
            // Excess phase in radians at 1/tf, expressed as a transport
            // delay for the single-pole rotation.
            self.excess_phase = Some(ExcessPhase {
                td: self.mp.ptf.to_radians() * self.mp.tf,
                prev: (0.0, 0.0),
            });
        }
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        let prime = [self.col_prime, self.base_prime, self.emit_prime];
        for (i, &row) in prime.iter().enumerate() {
            for (j, &col) in prime.iter().enumerate() {
                self.h[i][j] = pattern.element(row, col);
            }
        }
        if self.mp.rb > 0.0 {
            self.h_rb = [
                pattern.element(self.base, self.base),
                pattern.element(self.base_prime, self.base_prime),
                pattern.element(self.base, self.base_prime),
                pattern.element(self.base_prime, self.base),
            ];
        }
        if self.mp.rc > 0.0 {
            self.h_rc = [
                pattern.element(self.col, self.col),
                pattern.element(self.col_prime, self.col_prime),
                pattern.element(self.col, self.col_prime),
                pattern.element(self.col_prime, self.col),
            ];
        }
        if self.mp.re > 0.0 {
            self.h_re = [
                pattern.element(self.emit, self.emit),
                pattern.element(self.emit_prime, self.emit_prime),
                pattern.element(self.emit, self.emit_prime),
                pattern.element(self.emit_prime, self.emit),
            ];
        }
        self.r_cp = pattern.rhs(self.col_prime);
        self.r_bp = pattern.rhs(self.base_prime);
        self.r_ep = pattern.rhs(self.emit_prime);
    }

    fn unsetup(&mut self) {
        self.col_prime = self.col;
        self.base_prime = self.base;
        self.emit_prime = self.emit;
        self.qbe = None;
        self.qbc = None;
        self.excess_phase = None;
        self.h = [[ElementHandle::TRASH; 3]; 3];
        self.h_rb = [ElementHandle::TRASH; 4];
        self.h_rc = [ElementHandle::TRASH; 4];
        self.h_re = [ElementHandle::TRASH; 4];
        self.r_cp = RhsHandle::TRASH;
        self.r_bp = RhsHandle::TRASH;
        self.r_ep = RhsHandle::TRASH;
    }

    fn temperature(&mut self, state: &SimState) -> Result<()> {
        let t = state.temperature;
        self.vt = thermal_voltage(t);
        let ratio = t / self.mp.tnom;
        let factor = ((ratio - 1.0) * self.mp.eg / self.vt).exp() * ratio.powf(self.mp.xti);
        self.t_sat = self.mp.is * factor;
        self.vcrit = self.vt
            * (self.vt / (std::f64::consts::SQRT_2 * self.t_sat * self.area)).ln();
        self.gcpr = if self.mp.rc > 0.0 {
            self.area / self.mp.rc
        } else {
            0.0
        };
        self.gepr = if self.mp.re > 0.0 {
            self.area / self.mp.re
        } else {
            0.0
        };
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &mut *ctx.state;
        let mp = self.mp;
        let sign = mp.sign;

        let vtf = mp.nf * self.vt;
        let vtr = mp.nr * self.vt;

        let (mut vbe, mut vbc) = match state.init_mode {
            InitMode::Junction => {
                if self.off {
                    (0.0, 0.0)
                } else {
                    (self.vcrit, 0.0)
                }
            }
            _ => {
                let vbe = sign
                    * (state.voltage(self.base_prime) - state.voltage(self.emit_prime));
                let vbc = sign
                    * (state.voltage(self.base_prime) - state.voltage(self.col_prime));
                (vbe, vbc)
            }
        };
        if state.init_mode == InitMode::Normal {
            vbe = pnjlim(vbe, self.vbe, vtf, self.vcrit, &mut state.limited);
            vbc = pnjlim(vbc, self.vbc, vtr, self.vcrit, &mut state.limited);
        }

        let csat = self.t_sat * self.area;
        let gmin = state.gmin;

        let (cbe, gbe, cben, gben) = self.junction(
            vbe,
            vtf,
            csat,
            mp.ise * self.area,
            mp.ne * self.vt,
            gmin,
        );
        let (cbc, gbc, cbcn, gbcn) = self.junction(
            vbc,
            vtr,
            csat,
            mp.isc * self.area,
            mp.nc * self.vt,
            gmin,
        );

        // Base charge factor: Early (q1) and high injection (q2).
        let q1 = 1.0 / (1.0 - mp.inv_vaf * vbc - mp.inv_var * vbe);
        let q2 = mp.inv_ikf / self.area * cbe + mp.inv_ikr / self.area * cbc;
        let sqarg = (1.0 + 4.0 * q2).sqrt();
        let qb = q1 * (1.0 + sqarg) / 2.0;
        let dqb_dvbe = q1 * (qb * mp.inv_var + mp.inv_ikf / self.area * gbe / sqarg);
        let dqb_dvbc = q1 * (qb * mp.inv_vaf + mp.inv_ikr / self.area * gbc / sqarg);

        // Transport current, with the optional excess-phase rotation.
        let mut cex = cbe;
        let mut gex = gbe;
        if let Some(ep) = &mut self.excess_phase {
            if state.transient && !state.tran_init {
                // Single-pole companion: blend the present transport
                // current with the previous accepted one.
                let dt = state.integrator.delta();
                let a = dt / (dt + ep.td);
                cex = a * cbe + (1.0 - a) * ep.prev.0;
                gex = a * gbe;
            }
        }
        let mut cc = 0.0;
        if let Some(hook) = &mut self.hook {
            let mut event = ExcessPhaseEvent {
                cc,
                cex,
                gex,
                qb,
            };
            hook(&mut event);
            cc = event.cc;
            cex = event.cex;
            gex = event.gex;
        }

        cc += (cex - cbc) / qb - cbc / mp.br - cbcn;
        let cb = cbe / mp.bf + cben + cbc / mp.br + cbcn;

        // Current-dependent base resistance.
        let rbpr = mp.rbm / self.area;
        let rbpi = (mp.rb - mp.rbm).max(0.0) / self.area;
        let rx = if mp.irb > 0.0 && rbpi > 0.0 {
            let arg1 = (cb / mp.irb).max(1e-9);
            let arg2 = (-1.0 + (1.0 + 14.59025 * arg1).sqrt()) / 2.4317 / arg1.sqrt();
            let tan_arg = arg2.tan();
            rbpr + rbpi * 3.0 * (tan_arg - arg2) / (arg2 * tan_arg * tan_arg)
        } else {
            rbpr + rbpi / qb
        };
        self.gx = if rx > 0.0 { 1.0 / rx } else { 0.0 };

        let gpi = gbe / mp.bf + gben;
        let gmu = gbc / mp.br + gbcn;
        let go = (gbc + (cex - cbc) * dqb_dvbc / qb) / qb;
        let gm = (gex - (cex - cbc) * dqb_dvbe / qb) / qb - go;

        self.vbe = vbe;
        self.vbc = vbc;
        self.cc = cc;
        self.cb = cb;
        self.gpi = gpi;
        self.gmu = gmu;
        self.gm = gm;
        self.go = go;

        // Depletion capacitances for AC, at the present bias.
        let (_, capbe) = depletion_charge(vbe, mp.cje * self.area, mp.vje, mp.mje, mp.fc);
        let (_, capbc) = depletion_charge(vbc, mp.cjc * self.area, mp.vjc, mp.mjc, mp.fc);
        self.capbe = mp.tf * gbe + capbe;
        self.capbc = mp.tr * gbc + capbc;

        // Norton equivalents (external polarity).
        let ibeq = sign * (cb - gpi * vbe - gmu * vbc);
        let iceq = sign * (cc - (gm + go) * vbe + (gmu + go) * vbc);

        let m = &mut *ctx.matrix;
        // Rows/cols indexed over (cp, bp, ep).
        m.add(self.h[0][0], gmu + go);
        m.add(self.h[1][1], gpi + gmu);
        m.add(self.h[2][2], gpi + gm + go);
        m.add(self.h[0][1], gm - gmu);
        m.add(self.h[0][2], -(gm + go));
        m.add(self.h[1][0], -gmu);
        m.add(self.h[1][2], -gpi);
        m.add(self.h[2][0], -go);
        m.add(self.h[2][1], -(gpi + gm));

        if self.mp.rb > 0.0 {
            let gx = self.gx;
            m.add(self.h_rb[0], gx);
            m.add(self.h_rb[1], gx);
            m.add(self.h_rb[2], -gx);
            m.add(self.h_rb[3], -gx);
        }
        if self.mp.rc > 0.0 {
            m.add(self.h_rc[0], self.gcpr);
            m.add(self.h_rc[1], self.gcpr);
            m.add(self.h_rc[2], -self.gcpr);
            m.add(self.h_rc[3], -self.gcpr);
        }
        if self.mp.re > 0.0 {
            m.add(self.h_re[0], self.gepr);
            m.add(self.h_re[1], self.gepr);
            m.add(self.h_re[2], -self.gepr);
            m.add(self.h_re[3], -self.gepr);
        }

        m.add_rhs(self.r_bp, -ibeq);
        m.add_rhs(self.r_cp, -iceq);
        m.add_rhs(self.r_ep, ibeq + iceq);
        Ok(())
    }

    fn transient_load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let (sbe, sbc) = (self.qbe.expect("qbe slot"), self.qbc.expect("qbc slot"));
        let state = &mut *ctx.state;
        let mp = self.mp;
        let sign = mp.sign;

        // Charges in external polarity.
        let (qdep_be, _) = depletion_charge(self.vbe, mp.cje * self.area, mp.vje, mp.mje, mp.fc);
        let (qdep_bc, _) = depletion_charge(self.vbc, mp.cjc * self.area, mp.vjc, mp.mjc, mp.fc);
        let csat = self.t_sat * self.area;
        let ibe_fwd = csat * ((self.vbe / (mp.nf * self.vt)).exp() - 1.0);
        let ibc_rev = csat * ((self.vbc / (mp.nr * self.vt)).exp() - 1.0);
        let q_be = sign * (mp.tf * ibe_fwd + qdep_be);
        let q_bc = sign * (mp.tr * ibc_rev + qdep_bc);

        if state.tran_init {
            state.integrator.initialize(sbe, q_be);
            state.integrator.initialize(sbc, q_bc);
            if let Some(ep) = &mut self.excess_phase {
                ep.prev = (ibe_fwd, 0.0);
            }
            return Ok(());
        }

        let vbe_ext = sign * self.vbe;
        let vbc_ext = sign * self.vbc;

        state.integrator.set_value(sbe, q_be);
        state.integrator.integrate(sbe);
        let geq_be = state.integrator.jacobian(self.capbe);
        let ieq_be = state.integrator.rhs_current(sbe, geq_be, vbe_ext);

        state.integrator.set_value(sbc, q_bc);
        state.integrator.integrate(sbc);
        let geq_bc = state.integrator.jacobian(self.capbc);
        let ieq_bc = state.integrator.rhs_current(sbc, geq_bc, vbc_ext);

        let m = &mut *ctx.matrix;
        // Base-emitter charge between bp and ep.
        m.add(self.h[1][1], geq_be);
        m.add(self.h[2][2], geq_be);
        m.add(self.h[1][2], -geq_be);
        m.add(self.h[2][1], -geq_be);
        m.add_rhs(self.r_bp, ieq_be);
        m.add_rhs(self.r_ep, -ieq_be);
        // Base-collector charge between bp and cp.
        m.add(self.h[1][1], geq_bc);
        m.add(self.h[0][0], geq_bc);
        m.add(self.h[1][0], -geq_bc);
        m.add(self.h[0][1], -geq_bc);
        m.add_rhs(self.r_bp, ieq_bc);
        m.add_rhs(self.r_cp, -ieq_bc);
        Ok(())
    }

    fn is_convergent(&self, ctx: &ConvergenceContext<'_>) -> bool {
        let sign = self.mp.sign;
        let vbe = sign
            * (ctx.state.voltage(self.base_prime) - ctx.state.voltage(self.emit_prime));
        let vbc = sign
            * (ctx.state.voltage(self.base_prime) - ctx.state.voltage(self.col_prime));
        let delvbe = vbe - self.vbe;
        // The historical comparison subtracted the base-emitter voltage
        // here; the corrected test uses the base-collector one.
        let delvbc = if self.legacy_delvbc {
            vbc - self.vbe
        } else {
            vbc - self.vbc
        };

        let cchat = self.cc + (self.gm + self.go) * delvbe - (self.go + self.gmu) * delvbc;
        let cbhat = self.cb + self.gpi * delvbe + self.gmu * delvbc;

        let tol_c = ctx.tol.reltol * cchat.abs().max(self.cc.abs()) + ctx.tol.abstol;
        if (cchat - self.cc).abs() > tol_c {
            return false;
        }
        let tol_b = ctx.tol.reltol * cbhat.abs().max(self.cb.abs()) + ctx.tol.abstol;
        (cbhat - self.cb).abs() <= tol_b
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let m = &mut *ctx.matrix;
        let jw = Complex::new(0.0, ctx.omega);
        let ybe = Complex::new(self.gpi, 0.0) + jw * self.capbe;
        let ybc = Complex::new(self.gmu, 0.0) + jw * self.capbc;
        let gm = Complex::new(self.gm, 0.0);
        let go = Complex::new(self.go, 0.0);

        m.add(self.h[0][0], ybc + go);
        m.add(self.h[1][1], ybe + ybc);
        m.add(self.h[2][2], ybe + gm + go);
        m.add(self.h[0][1], gm - ybc);
        m.add(self.h[0][2], -(gm + go));
        m.add(self.h[1][0], -ybc);
        m.add(self.h[1][2], -ybe);
        m.add(self.h[2][0], -go);
        m.add(self.h[2][1], -(ybe + gm));

        if self.mp.rb > 0.0 {
            let gx = Complex::new(self.gx, 0.0);
            m.add(self.h_rb[0], gx);
            m.add(self.h_rb[1], gx);
            m.add(self.h_rb[2], -gx);
            m.add(self.h_rb[3], -gx);
        }
        if self.mp.rc > 0.0 {
            let g = Complex::new(self.gcpr, 0.0);
            m.add(self.h_rc[0], g);
            m.add(self.h_rc[1], g);
            m.add(self.h_rc[2], -g);
            m.add(self.h_rc[3], -g);
        }
        if self.mp.re > 0.0 {
            let g = Complex::new(self.gepr, 0.0);
            m.add(self.h_re[0], g);
            m.add(self.h_re[1], g);
            m.add(self.h_re[2], -g);
            m.add(self.h_re[3], -g);
        }
    }

    fn accept(&mut self, _ctx: &mut ferrite_core::AcceptContext<'_>) {
        if let Some(ep) = &mut self.excess_phase {
            let csat = self.t_sat * self.area;
            let ibe_fwd = csat * ((self.vbe / (self.mp.nf * self.vt)).exp() - 1.0);
            ep.prev = (ibe_fwd, 0.0);
        }
    }

    fn truncate(&self, state: &SimState) -> f64 {
        let mut dt = f64::INFINITY;
        if let Some(s) = self.qbe {
            dt = dt.min(state.integrator.truncate(s));
        }
        if let Some(s) = self.qbc {
            dt = dt.min(state.integrator.truncate(s));
        }
        dt
    }

    fn property(&self, name: &str) -> Option<f64> {
        let sign = self.mp.sign;
        match name {
            "ic" => Some(sign * self.cc),
            "ib" => Some(sign * self.cb),
            "ie" => Some(-sign * (self.cc + self.cb)),
            "vbe" => Some(sign * self.vbe),
            "vbc" => Some(sign * self.vbc),
            "gm" => Some(self.gm),
            "go" => Some(self.go),
            "gpi" => Some(self.gpi),
            "gmu" => Some(self.gmu),
            "gx" => Some(self.gx),
            _ => None,
        }
    }

    fn noise_sources(&self, _state: &SimState) -> Vec<NoiseSource> {
        let mut out = vec![
            NoiseSource::shot(
                format!("{}.ic", self.name),
                self.col_prime,
                self.emit_prime,
                self.cc,
            ),
            NoiseSource::shot(
                format!("{}.ib", self.name),
                self.base_prime,
                self.emit_prime,
                self.cb,
            ),
        ];
        if self.mp.rb > 0.0 {
            out.push(NoiseSource::thermal(
                format!("{}.rb", self.name),
                self.base,
                self.base_prime,
                self.gx,
            ));
        }
        if self.mp.rc > 0.0 {
            out.push(NoiseSource::thermal(
                format!("{}.rc", self.name),
                self.col,
                self.col_prime,
                self.gcpr,
            ));
        }
        if self.mp.re > 0.0 {
            out.push(NoiseSource::thermal(
                format!("{}.re", self.name),
                self.emit,
                self.emit_prime,
                self.gepr,
            ));
        }
        if self.mp.kf > 0.0 {
            out.push(NoiseSource::flicker(
                format!("{}.flicker", self.name),
                self.base_prime,
                self.emit_prime,
                self.mp.kf,
                self.mp.af,
                self.cb,
            ));
        }
        out
    }
}
