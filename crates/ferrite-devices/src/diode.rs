//! Junction diode.
//!
//! The conductance model has three branches: the forward exponential, a
//! regularised reverse tail that keeps gd finite deep in cut-off, and an
//! exponential breakdown region past −BV. A series resistance adds an
//! internal node between the anode and the intrinsic junction.

use ferrite_core::{
    thermal_voltage, AcLoadContext, Behavior, BehaviorKind, BindContext, ConvergenceContext,
    ElementHandle, InitMode, LoadContext, MatrixPattern, NoiseSource, Result, RhsHandle,
    SetupContext, SimState, StateId, VariableId,
};
use num_complex::Complex;

use crate::junction::depletion_charge;
use crate::limit::pnjlim;
use crate::{merged, merged_given};

const KNOWN_PARAMS: &[&str] = &["area", "off", "ic"];
const KNOWN_MODEL_PARAMS: &[&str] = &[
    "is", "rs", "n", "tt", "cjo", "vj", "m", "eg", "xti", "fc", "bv", "ibv", "kf", "af", "tnom",
];

pub(crate) struct DiodeBehavior {
    name: String,
    pos: VariableId,
    neg: VariableId,
    /// Intrinsic anode: equals `pos` unless rs > 0.
    pos_prime: VariableId,

    area: f64,
    off: bool,
    saturation_current: f64,
    rs: f64,
    emission: f64,
    transit_time: f64,
    cjo: f64,
    vj: f64,
    grading: f64,
    eg: f64,
    xti: f64,
    fc: f64,
    breakdown: Option<f64>,
    kf: f64,
    af: f64,
    tnom: f64,

    // Temperature products.
    t_sat: f64,
    vte: f64,
    vcrit: f64,
    gspr: f64,

    // Iteration state.
    vd: f64,
    id: f64,
    gd: f64,
    cap: f64,
    charge: Option<StateId>,

    // Matrix handles.
    h_pp: ElementHandle,
    h_nn: ElementHandle,
    h_pn: ElementHandle,
    h_np: ElementHandle,
    h_outer: [ElementHandle; 4],
    r_pos: RhsHandle,
    r_neg: RhsHandle,
}

impl DiodeBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
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
        let bv = if merged_given(e, ctx.model, "bv") {
            Some(merged(e, ctx.model, "bv", 0.0).abs())
        } else {
            None
        };
        Ok(Box::new(Self {
            name: e.name().to_string(),
            pos: ctx.pins[0],
            neg: ctx.pins[1],
            pos_prime: ctx.pins[0],
            area,
            off: e.params.is_given("off"),
            saturation_current: merged(e, ctx.model, "is", 1e-14),
            rs: merged(e, ctx.model, "rs", 0.0),
            emission: merged(e, ctx.model, "n", 1.0),
            transit_time: merged(e, ctx.model, "tt", 0.0),
            cjo: merged(e, ctx.model, "cjo", 0.0),
            vj: merged(e, ctx.model, "vj", 1.0),
            grading: merged(e, ctx.model, "m", 0.5),
            eg: merged(e, ctx.model, "eg", 1.11),
            xti: merged(e, ctx.model, "xti", 3.0),
            fc: merged(e, ctx.model, "fc", 0.5),
            breakdown: bv,
            kf: merged(e, ctx.model, "kf", 0.0),
            af: merged(e, ctx.model, "af", 1.0),
            tnom: merged(e, ctx.model, "tnom", 300.15),
            t_sat: 0.0,
            vte: 0.0,
            vcrit: 0.0,
            gspr: 0.0,
            vd: 0.0,
            id: 0.0,
            gd: 0.0,
            cap: 0.0,
            charge: None,
            h_pp: ElementHandle::TRASH,
            h_nn: ElementHandle::TRASH,
            h_pn: ElementHandle::TRASH,
            h_np: ElementHandle::TRASH,
            h_outer: [ElementHandle::TRASH; 4],
            r_pos: RhsHandle::TRASH,
            r_neg: RhsHandle::TRASH,
        }))
    }

    /// Junction current and conductance at a (limited) junction voltage.
    fn evaluate(&self, vd: f64, gmin: f64) -> (f64, f64) {
        let isat = self.t_sat * self.area;
        let vte = self.vte;

        if vd >= -3.0 * vte {
            // Forward and weak reverse: the plain exponential.
            let evd = (vd / vte).exp();
            let id = isat * (evd - 1.0) + gmin * vd;
            let gd = isat * evd / vte + gmin;
            (id, gd)
        } else if self.breakdown.is_none() || vd >= -self.breakdown.unwrap() {
            // Reverse, no breakdown: regularised tail keeps gd > 0.
            let arg = 3.0 * vte / (vd * std::f64::consts::E);
            let arg = arg * arg * arg;
            let id = -isat * (1.0 + arg) + gmin * vd;
            let gd = isat * 3.0 * arg / vd + gmin;
            (id, gd)
        } else {
            // Breakdown: exponential in −(BV + vd).
            let bv = self.breakdown.unwrap();
            let evrev = (-(bv + vd) / vte).exp();
            let id = -isat * evrev + gmin * vd;
            let gd = isat * evrev / vte + gmin;
            (id, gd)
        }
    }

    fn junction_voltage(&self, state: &SimState) -> f64 {
        state.voltage(self.pos_prime) - state.voltage(self.neg)
    }
}

impl Behavior for DiodeBehavior {
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
        self.pos_prime = if self.rs > 0.0 {
            ctx.nodes.create_internal(&self.name, "pos")?
        } else {
            self.pos
        };
        self.charge = Some(ctx.state.integrator.alloc());
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.h_pp = pattern.element(self.pos_prime, self.pos_prime);
        self.h_nn = pattern.element(self.neg, self.neg);
        self.h_pn = pattern.element(self.pos_prime, self.neg);
        self.h_np = pattern.element(self.neg, self.pos_prime);
        if self.rs > 0.0 {
            self.h_outer = [
                pattern.element(self.pos, self.pos),
                pattern.element(self.pos_prime, self.pos_prime),
                pattern.element(self.pos, self.pos_prime),
                pattern.element(self.pos_prime, self.pos),
            ];
        }
        self.r_pos = pattern.rhs(self.pos_prime);
        self.r_neg = pattern.rhs(self.neg);
    }

    fn unsetup(&mut self) {
        self.charge = None;
        self.pos_prime = self.pos;
        self.h_pp = ElementHandle::TRASH;
        self.h_nn = ElementHandle::TRASH;
        self.h_pn = ElementHandle::TRASH;
        self.h_np = ElementHandle::TRASH;
        self.h_outer = [ElementHandle::TRASH; 4];
        self.r_pos = RhsHandle::TRASH;
        self.r_neg = RhsHandle::TRASH;
    }

    fn temperature(&mut self, state: &SimState) -> Result<()> {
        let t = state.temperature;
        let vt = thermal_voltage(t);
        self.vte = self.emission * vt;

        // Saturation current follows the energy-gap/XTI law.
        let ratio = t / self.tnom;
        let factor = ((ratio - 1.0) * self.eg / self.vte).exp()
            * ratio.powf(self.xti / self.emission);
        self.t_sat = self.saturation_current * factor;

        self.vcrit = self.vte
            * (self.vte / (std::f64::consts::SQRT_2 * self.t_sat * self.area)).ln();
        self.gspr = if self.rs > 0.0 {
            self.area / self.rs
        } else {
            0.0
        };
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &mut *ctx.state;

        let mut vd = match state.init_mode {
            InitMode::Junction => {
                if self.off {
                    0.0
                } else {
                    self.vcrit
                }
            }
            _ => self.junction_voltage(state),
        };
        if state.init_mode == InitMode::Normal {
            vd = pnjlim(vd, self.vd, self.vte, self.vcrit, &mut state.limited);
        }

        let (id, gd) = self.evaluate(vd, state.gmin);
        self.vd = vd;
        self.id = id;
        self.gd = gd;

        let cdeq = id - gd * vd;
        let m = &mut *ctx.matrix;
        m.add(self.h_pp, gd);
        m.add(self.h_nn, gd);
        m.add(self.h_pn, -gd);
        m.add(self.h_np, -gd);
        if self.rs > 0.0 {
            m.add(self.h_outer[0], self.gspr);
            m.add(self.h_outer[1], self.gspr);
            m.add(self.h_outer[2], -self.gspr);
            m.add(self.h_outer[3], -self.gspr);
        }
        m.add_rhs(self.r_pos, -cdeq);
        m.add_rhs(self.r_neg, cdeq);
        Ok(())
    }

    fn transient_load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let slot = self.charge.expect("diode charge slot");
        let state = &mut *ctx.state;
        let vd = self.vd;

        let (qdep, cdep) =
            depletion_charge(vd, self.cjo * self.area, self.vj, self.grading, self.fc);
        let qd = self.transit_time * self.id + qdep;
        self.cap = self.transit_time * self.gd + cdep;

        if state.tran_init {
            state.integrator.initialize(slot, qd);
            return Ok(());
        }

        state.integrator.set_value(slot, qd);
        state.integrator.integrate(slot);
        let geq = state.integrator.jacobian(self.cap);
        let ieq = state.integrator.rhs_current(slot, geq, vd);

        let m = &mut *ctx.matrix;
        m.add(self.h_pp, geq);
        m.add(self.h_nn, geq);
        m.add(self.h_pn, -geq);
        m.add(self.h_np, -geq);
        m.add_rhs(self.r_pos, ieq);
        m.add_rhs(self.r_neg, -ieq);
        Ok(())
    }

    fn is_convergent(&self, ctx: &ConvergenceContext<'_>) -> bool {
        let vd = ctx.state.voltage(self.pos_prime) - ctx.state.voltage(self.neg);
        let delvd = vd - self.vd;
        let cdhat = self.id + self.gd * delvd;
        let tol = ctx.tol.reltol * cdhat.abs().max(self.id.abs()) + ctx.tol.abstol;
        (cdhat - self.id).abs() <= tol
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let y = Complex::new(self.gd, ctx.omega * self.cap);
        let m = &mut *ctx.matrix;
        m.add(self.h_pp, y);
        m.add(self.h_nn, y);
        m.add(self.h_pn, -y);
        m.add(self.h_np, -y);
        if self.rs > 0.0 {
            let g = Complex::new(self.gspr, 0.0);
            m.add(self.h_outer[0], g);
            m.add(self.h_outer[1], g);
            m.add(self.h_outer[2], -g);
            m.add(self.h_outer[3], -g);
        }
    }

    fn truncate(&self, state: &SimState) -> f64 {
        match self.charge {
            Some(slot) => state.integrator.truncate(slot),
            None => f64::INFINITY,
        }
    }

    fn property(&self, name: &str) -> Option<f64> {
        match name {
            "id" => Some(self.id),
            "gd" => Some(self.gd),
            "vd" => Some(self.vd),
            "cap" => Some(self.cap),
            _ => None,
        }
    }

    fn noise_sources(&self, _state: &SimState) -> Vec<NoiseSource> {
        let mut out = vec![NoiseSource::shot(
            format!("{}.shot", self.name),
            self.pos_prime,
            self.neg,
            self.id,
        )];
        if self.kf > 0.0 {
            out.push(NoiseSource::flicker(
                format!("{}.flicker", self.name),
                self.pos_prime,
                self.neg,
                self.kf,
                self.af,
                self.id,
            ));
        }
        if self.rs > 0.0 {
            out.push(NoiseSource::thermal(
                format!("{}.rs", self.name),
                self.pos,
                self.pos_prime,
                self.gspr,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::rig;
    use ferrite_core::{Entity, EntityKind, ModelCard, Tolerances};

    fn diode() -> Entity {
        Entity::new("D1", EntityKind::Diode, &["a", "0"])
    }

    fn model() -> ModelCard {
        ModelCard::new("dmod", EntityKind::Diode).param("is", 1e-14)
    }

    #[test]
    fn test_forward_current_matches_shockley() {
        let mut r = rig(diode().model("dmod"), Some(model()), DiodeBehavior::build);
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = 0.7;
        // Seed the previous voltage so limiting stays quiet.
        let _ = r.load();
        r.state.solution[0] = 0.7;
        let m = r.load();

        // At 300.15 K, Vt ≈ 25.87 mV: Id = Is·(exp(0.7/Vt) − 1) ≈ 5.17 mA.
        let vt = thermal_voltage(300.15);
        let expected = 1e-14 * ((0.7 / vt).exp() - 1.0);
        let g = m.dense()[(0, 0)];
        let rhs = m.rhs_dense()[0];
        // Reconstruct Id from the companion: Id = G·vd + (−rhs... rhs holds
        // −(Id − G·vd) on the anode row).
        let id = g * 0.7 + rhs;
        assert!(
            ((id - expected) / expected).abs() < 1e-6,
            "Id = {id}, expected {expected}"
        );
    }

    #[test]
    fn test_reciprocity_gd_is_did_dv() {
        let mut rr = rig(diode().model("dmod"), Some(model()), DiodeBehavior::build);
        rr.state.init_mode = InitMode::Normal;
        for &v in &[-0.2, 0.1, 0.3, 0.55, 0.65] {
            rr.state.solution[0] = v;
            let m1 = rr.load();
            let gd = m1.dense()[(0, 0)];
            let id_v = gd * v + m1.rhs_dense()[0];

            let eps = 1e-6;
            rr.state.solution[0] = v - eps;
            let m2 = rr.load();
            let id_m = m2.dense()[(0, 0)] * (v - eps) + m2.rhs_dense()[0];

            // i(v) − i(v−ε) ≈ ε·gd(v) to O(ε²).
            let delta = id_v - id_m;
            assert!(
                (delta - eps * gd).abs() < 1e-3 * eps * gd.abs() + 1e-15,
                "at v = {v}: Δi = {delta}, ε·gd = {}",
                eps * gd
            );
        }
    }

    #[test]
    fn test_reverse_tail_keeps_conductance_positive() {
        let mut r = rig(diode().model("dmod"), Some(model()), DiodeBehavior::build);
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = -5.0;
        let m = r.load();
        let gd = m.dense()[(0, 0)];
        assert!(gd > 0.0, "reverse gd must stay positive: {gd}");
        // Reverse current ≈ −Is.
        let id = gd * -5.0 + m.rhs_dense()[0];
        assert!(id < 0.0 && id.abs() < 1e-12, "Id = {id}");
    }

    #[test]
    fn test_breakdown_branch() {
        let model = ModelCard::new("dz", EntityKind::Diode)
            .param("is", 1e-14)
            .param("bv", 5.0);
        let mut r = rig(diode().model("dz"), Some(model), DiodeBehavior::build);
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = -5.5;
        let m = r.load();
        let gd = m.dense()[(0, 0)];
        let id = gd * -5.5 + m.rhs_dense()[0];
        assert!(id < -1e-9, "past BV the diode conducts hard: Id = {id}");
    }

    #[test]
    fn test_series_resistance_adds_internal_node() {
        let model = ModelCard::new("dr", EntityKind::Diode)
            .param("is", 1e-14)
            .param("rs", 10.0);
        let r = rig(diode().model("dr"), Some(model), DiodeBehavior::build);
        assert!(r.nodes.find("d1#pos").is_some(), "internal node exists");
        assert_eq!(r.nodes.unknowns(), 2);
    }

    #[test]
    fn test_init_junction_forces_vcrit() {
        let mut r = rig(diode().model("dmod"), Some(model()), DiodeBehavior::build);
        r.state.init_mode = InitMode::Junction;
        let m = r.load();
        // The stamped conductance corresponds to vcrit, far above gmin.
        assert!(m.dense()[(0, 0)] > 1e-3);
    }

    #[test]
    fn test_convergence_veto() {
        let mut r = rig(diode().model("dmod"), Some(model()), DiodeBehavior::build);
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = 0.6;
        let _ = r.load();

        let tol = Tolerances {
            reltol: 1e-3,
            abstol: 1e-12,
            vntol: 1e-6,
        };
        // Same voltage: predicted current equals computed, convergent.
        let ctx = ConvergenceContext {
            state: &r.state,
            tol,
        };
        assert!(r.behaviors[0].is_convergent(&ctx));

        // A big junction move must veto convergence.
        r.state.solution[0] = 0.7;
        let ctx = ConvergenceContext {
            state: &r.state,
            tol,
        };
        assert!(!r.behaviors[0].is_convergent(&ctx));
    }

    #[test]
    fn test_shot_noise_follows_bias() {
        let mut r = rig(diode().model("dmod"), Some(model()), DiodeBehavior::build);
        r.state.init_mode = InitMode::Normal;
        r.state.solution[0] = 0.65;
        let _ = r.load();
        let sources = r.behaviors[0].noise_sources(&r.state);
        assert_eq!(sources.len(), 1);
        let si = sources[0].density(1e3, 300.15);
        assert!(si > 0.0);
    }
}
