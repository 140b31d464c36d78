//! Voltage- and current-controlled switches with hysteresis.
//!
//! The switch state is decided from the controlling quantity against the
//! threshold ± hysteresis band during load; the Accept behavior commits
//! it (`old_state ← state`) once a timepoint is accepted, so rejected
//! steps never latch a transition.

use ferrite_core::{
    AcLoadContext, AcceptContext, Behavior, BehaviorKind, BindContext, ElementHandle, Error,
    InitMode, LoadContext, MatrixPattern, Result, SetupContext, VariableId,
};
use num_complex::Complex;

const KNOWN_V_PARAMS: &[&str] = &["on"];
const KNOWN_V_MODEL_PARAMS: &[&str] = &["ron", "roff", "vt", "vh"];
const KNOWN_I_MODEL_PARAMS: &[&str] = &["ron", "roff", "it", "ih"];

struct SwitchCore {
    g_on: f64,
    g_off: f64,
    threshold: f64,
    hysteresis: f64,
    state: bool,
    old_state: bool,
}

impl SwitchCore {
    /// Hysteretic state decision from the controlling value.
    fn decide(&mut self, ctrl: f64, init_mode: InitMode) {
        let previous = match init_mode {
            InitMode::Normal => self.old_state,
            _ => self.state,
        };
        self.state = if ctrl > self.threshold + self.hysteresis.abs() {
            true
        } else if ctrl < self.threshold - self.hysteresis.abs() {
            false
        } else {
            previous
        };
    }

    fn conductance(&self) -> f64 {
        if self.state {
            self.g_on
        } else {
            self.g_off
        }
    }
}

/// Voltage-controlled switch: pins (n+, n−, nc+, nc−).
pub(crate) struct VSwitchBehavior {
    pos: VariableId,
    neg: VariableId,
    ctrl_pos: VariableId,
    ctrl_neg: VariableId,
    core: SwitchCore,

    pp: ElementHandle,
    nn: ElementHandle,
    pn: ElementHandle,
    np: ElementHandle,
}

impl VSwitchBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_V_PARAMS)?;
        if let Some(m) = ctx.model {
            m.params.check_known(m.name(), KNOWN_V_MODEL_PARAMS)?;
        }
        let g = |name: &str, dflt: f64| crate::merged(e, ctx.model, name, dflt);
        let initial_on = e.params.is_given("on");
        Ok(Box::new(Self {
            pos: ctx.pins[0],
            neg: ctx.pins[1],
            ctrl_pos: ctx.pins[2],
            ctrl_neg: ctx.pins[3],
            core: SwitchCore {
                g_on: 1.0 / g("ron", 1.0),
                g_off: 1.0 / g("roff", 1e12),
                threshold: g("vt", 0.0),
                hysteresis: g("vh", 0.0),
                state: initial_on,
                old_state: initial_on,
            },
            pp: ElementHandle::TRASH,
            nn: ElementHandle::TRASH,
            pn: ElementHandle::TRASH,
            np: ElementHandle::TRASH,
        }))
    }
}

impl Behavior for VSwitchBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[
            BehaviorKind::Load,
            BehaviorKind::AcLoad,
            BehaviorKind::Accept,
        ]
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.pp = pattern.element(self.pos, self.pos);
        self.nn = pattern.element(self.neg, self.neg);
        self.pn = pattern.element(self.pos, self.neg);
        self.np = pattern.element(self.neg, self.pos);
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &*ctx.state;
        let ctrl = state.voltage(self.ctrl_pos) - state.voltage(self.ctrl_neg);
        self.core.decide(ctrl, state.init_mode);
        let g = self.core.conductance();
        let m = &mut *ctx.matrix;
        m.add(self.pp, g);
        m.add(self.nn, g);
        m.add(self.pn, -g);
        m.add(self.np, -g);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let g = Complex::new(self.core.conductance(), 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.pp, g);
        m.add(self.nn, g);
        m.add(self.pn, -g);
        m.add(self.np, -g);
    }

    fn accept(&mut self, _ctx: &mut AcceptContext<'_>) {
        self.core.old_state = self.core.state;
    }
}

/// Current-controlled switch: pins (n+, n−), controlled by the branch
/// current of a named voltage source.
pub(crate) struct ISwitchBehavior {
    name: String,
    pos: VariableId,
    neg: VariableId,
    control: String,
    ctrl_branch: VariableId,
    core: SwitchCore,

    pp: ElementHandle,
    nn: ElementHandle,
    pn: ElementHandle,
    np: ElementHandle,
}

impl ISwitchBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_V_PARAMS)?;
        if let Some(m) = ctx.model {
            m.params.check_known(m.name(), KNOWN_I_MODEL_PARAMS)?;
        }
        let control = e.control.clone().ok_or_else(|| {
            Error::CircuitTopology(format!("{}: no controlling source named", e.name()))
        })?;
        let g = |name: &str, dflt: f64| crate::merged(e, ctx.model, name, dflt);
        let initial_on = e.params.is_given("on");
        Ok(Box::new(Self {
            name: e.name().to_string(),
            pos: ctx.pins[0],
            neg: ctx.pins[1],
            control,
            ctrl_branch: VariableId::GROUND,
            core: SwitchCore {
                g_on: 1.0 / g("ron", 1.0),
                g_off: 1.0 / g("roff", 1e12),
                threshold: g("it", 0.0),
                hysteresis: g("ih", 0.0),
                state: initial_on,
                old_state: initial_on,
            },
            pp: ElementHandle::TRASH,
            nn: ElementHandle::TRASH,
            pn: ElementHandle::TRASH,
            np: ElementHandle::TRASH,
        }))
    }
}

impl Behavior for ISwitchBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[
            BehaviorKind::Load,
            BehaviorKind::AcLoad,
            BehaviorKind::Accept,
        ]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.ctrl_branch = ctx
            .nodes
            .find(&format!("{}#branch", self.control))
            .ok_or_else(|| {
                Error::CircuitTopology(format!(
                    "{}: controlling source `{}` not found",
                    self.name, self.control
                ))
            })?;
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.pp = pattern.element(self.pos, self.pos);
        self.nn = pattern.element(self.neg, self.neg);
        self.pn = pattern.element(self.pos, self.neg);
        self.np = pattern.element(self.neg, self.pos);
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &*ctx.state;
        let ctrl = state.voltage(self.ctrl_branch);
        self.core.decide(ctrl, state.init_mode);
        let g = self.core.conductance();
        let m = &mut *ctx.matrix;
        m.add(self.pp, g);
        m.add(self.nn, g);
        m.add(self.pn, -g);
        m.add(self.np, -g);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let g = Complex::new(self.core.conductance(), 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.pp, g);
        m.add(self.nn, g);
        m.add(self.pn, -g);
        m.add(self.np, -g);
    }

    fn accept(&mut self, _ctx: &mut AcceptContext<'_>) {
        self.core.old_state = self.core.state;
    }
}
