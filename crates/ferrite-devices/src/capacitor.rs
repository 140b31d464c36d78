//! Capacitor: a derivative slot holding the stored charge.

use ferrite_core::{
    AcLoadContext, Behavior, BehaviorKind, BindContext, ElementHandle, LoadContext, MatrixPattern,
    Result, RhsHandle, SetupContext, SimState, StateId, VariableId,
};
use num_complex::Complex;

use crate::merged;

const KNOWN_PARAMS: &[&str] = &["c", "ic", "w", "l", "tc1", "tc2"];
const KNOWN_MODEL_PARAMS: &[&str] = &["cj", "cjsw", "defw", "narrow", "tc1", "tc2", "tnom"];

pub(crate) struct CapacitorBehavior {
    name: String,
    pos: VariableId,
    neg: VariableId,

    c_given: bool,
    c: f64,
    width: f64,
    length: f64,
    cj: f64,
    cjsw: f64,
    narrow: f64,
    tc1: f64,
    tc2: f64,
    tnom: f64,
    ic: Option<f64>,

    /// Temperature-adjusted capacitance.
    cap: f64,
    charge: Option<StateId>,

    pp: ElementHandle,
    nn: ElementHandle,
    pn: ElementHandle,
    np: ElementHandle,
    rp: RhsHandle,
    rn: RhsHandle,
}

impl CapacitorBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_PARAMS)?;
        if let Some(m) = ctx.model {
            m.params.check_known(m.name(), KNOWN_MODEL_PARAMS)?;
        }
        let defw = merged(e, ctx.model, "defw", 10e-6);
        Ok(Box::new(Self {
            name: e.name().to_string(),
            pos: ctx.pins[0],
            neg: ctx.pins[1],
            c_given: e.params.is_given("c"),
            c: e.params.value_or("c", 0.0),
            width: e.params.value_or("w", defw),
            length: e.params.value_or("l", 0.0),
            cj: merged(e, ctx.model, "cj", 0.0),
            cjsw: merged(e, ctx.model, "cjsw", 0.0),
            narrow: merged(e, ctx.model, "narrow", 0.0),
            tc1: merged(e, ctx.model, "tc1", 0.0),
            tc2: merged(e, ctx.model, "tc2", 0.0),
            tnom: merged(e, ctx.model, "tnom", 300.15),
            ic: e.params.get("ic").filter(|p| p.is_given()).map(|p| p.value()),
            cap: 0.0,
            charge: None,
            pp: ElementHandle::TRASH,
            nn: ElementHandle::TRASH,
            pn: ElementHandle::TRASH,
            np: ElementHandle::TRASH,
            rp: RhsHandle::TRASH,
            rn: RhsHandle::TRASH,
        }))
    }

    fn voltage(&self, state: &SimState) -> f64 {
        state.voltage(self.pos) - state.voltage(self.neg)
    }
}

impl Behavior for CapacitorBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[
            BehaviorKind::Temperature,
            BehaviorKind::AcLoad,
            BehaviorKind::Transient,
        ]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.charge = Some(ctx.state.integrator.alloc());
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.pp = pattern.element(self.pos, self.pos);
        self.nn = pattern.element(self.neg, self.neg);
        self.pn = pattern.element(self.pos, self.neg);
        self.np = pattern.element(self.neg, self.pos);
        self.rp = pattern.rhs(self.pos);
        self.rn = pattern.rhs(self.neg);
    }

    fn unsetup(&mut self) {
        self.charge = None;
        self.pp = ElementHandle::TRASH;
        self.nn = ElementHandle::TRASH;
        self.pn = ElementHandle::TRASH;
        self.np = ElementHandle::TRASH;
        self.rp = RhsHandle::TRASH;
        self.rn = RhsHandle::TRASH;
    }

    fn temperature(&mut self, state: &SimState) -> Result<()> {
        let c0 = if self.c_given {
            self.c
        } else if self.cj > 0.0 && self.length > 0.0 {
            let w = self.width - self.narrow;
            let l = self.length - self.narrow;
            self.cj * w * l + 2.0 * self.cjsw * (w + l)
        } else {
            log::warn!("{}: capacitance is zero or underspecified", self.name);
            0.0
        };
        let dt = state.temperature - self.tnom;
        self.cap = c0 * (1.0 + self.tc1 * dt + self.tc2 * dt * dt);
        Ok(())
    }

    fn transient_load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let slot = self.charge.expect("capacitor charge slot");
        let state = &mut *ctx.state;

        if state.tran_init {
            // Charge at the operating point; with UIC an explicit IC wins.
            let v = match (state.use_ic, self.ic) {
                (true, Some(v0)) => v0,
                _ => self.voltage(state),
            };
            state.integrator.initialize(slot, self.cap * v);
            return Ok(());
        }

        let v = self.voltage(state);
        state.integrator.set_value(slot, self.cap * v);
        state.integrator.integrate(slot);
        let geq = state.integrator.jacobian(self.cap);
        let ieq = state.integrator.rhs_current(slot, geq, v);

        let m = &mut *ctx.matrix;
        m.add(self.pp, geq);
        m.add(self.nn, geq);
        m.add(self.pn, -geq);
        m.add(self.np, -geq);
        m.add_rhs(self.rp, ieq);
        m.add_rhs(self.rn, -ieq);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let yc = Complex::new(0.0, ctx.omega * self.cap);
        let m = &mut *ctx.matrix;
        m.add(self.pp, yc);
        m.add(self.nn, yc);
        m.add(self.pn, -yc);
        m.add(self.np, -yc);
    }

    fn truncate(&self, state: &SimState) -> f64 {
        match self.charge {
            Some(slot) => state.integrator.truncate(slot),
            None => f64::INFINITY,
        }
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        match name {
            "c" => {
                self.c = value;
                self.c_given = true;
                self.cap = value;
                true
            }
            _ => false,
        }
    }
}
