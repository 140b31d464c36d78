//! Independent and controlled sources.

use ferrite_core::{
    AcLoadContext, Behavior, BehaviorKind, BindContext, ElementHandle, Error, LoadContext,
    MatrixPattern, Result, RhsHandle, SetupContext, VariableId, Waveform,
};
use num_complex::Complex;

const KNOWN_V_PARAMS: &[&str] = &["dc", "acmag", "acphase"];

/// Independent voltage source: adds a branch-current unknown whose row
/// pins the terminal difference to the stimulus value.
pub(crate) struct VoltageSourceBehavior {
    name: String,
    pos: VariableId,
    neg: VariableId,
    branch: VariableId,

    dc: f64,
    waveform: Option<Waveform>,
    ac_mag: f64,
    ac_phase: f64,

    pos_br: ElementHandle,
    neg_br: ElementHandle,
    br_pos: ElementHandle,
    br_neg: ElementHandle,
    rbr: RhsHandle,
}

impl VoltageSourceBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_V_PARAMS)?;
        let dc = if e.params.is_given("dc") {
            e.params.value_or("dc", 0.0)
        } else {
            e.waveform.as_ref().map(|w| w.dc_value()).unwrap_or(0.0)
        };
        Ok(Box::new(Self {
            name: e.name().to_string(),
            pos: ctx.pins[0],
            neg: ctx.pins[1],
            branch: VariableId::GROUND,
            dc,
            waveform: e.waveform.clone(),
            ac_mag: e.params.value_or("acmag", 0.0),
            ac_phase: e.params.value_or("acphase", 0.0),
            pos_br: ElementHandle::TRASH,
            neg_br: ElementHandle::TRASH,
            br_pos: ElementHandle::TRASH,
            br_neg: ElementHandle::TRASH,
            rbr: RhsHandle::TRASH,
        }))
    }

    fn value_at(&self, time: f64, transient: bool) -> f64 {
        match (&self.waveform, transient) {
            (Some(w), true) => w.at(time),
            _ => self.dc,
        }
    }
}

impl Behavior for VoltageSourceBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::Load, BehaviorKind::AcLoad]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.branch = ctx.nodes.create_branch(&self.name)?;
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.pos_br = pattern.element(self.pos, self.branch);
        self.neg_br = pattern.element(self.neg, self.branch);
        self.br_pos = pattern.element(self.branch, self.pos);
        self.br_neg = pattern.element(self.branch, self.neg);
        self.rbr = pattern.rhs(self.branch);
    }

    fn unsetup(&mut self) {
        self.pos_br = ElementHandle::TRASH;
        self.neg_br = ElementHandle::TRASH;
        self.br_pos = ElementHandle::TRASH;
        self.br_neg = ElementHandle::TRASH;
        self.rbr = RhsHandle::TRASH;
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &*ctx.state;
        let value = self.value_at(state.time, state.transient) * state.source_factor;
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, 1.0);
        m.add(self.neg_br, -1.0);
        m.add(self.br_pos, 1.0);
        m.add(self.br_neg, -1.0);
        m.add_rhs(self.rbr, value);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let one = Complex::new(1.0, 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, one);
        m.add(self.neg_br, -one);
        m.add(self.br_pos, one);
        m.add(self.br_neg, -one);
        let phase = self.ac_phase.to_radians();
        m.add_rhs(
            self.rbr,
            Complex::new(self.ac_mag * phase.cos(), self.ac_mag * phase.sin()),
        );
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        match name {
            "dc" => {
                self.dc = value;
                true
            }
            "acmag" => {
                self.ac_mag = value;
                true
            }
            _ => false,
        }
    }

    fn branch(&self) -> Option<VariableId> {
        Some(self.branch)
    }
}

/// Independent current source: a pure RHS contribution.
pub(crate) struct CurrentSourceBehavior {
    pos: VariableId,
    neg: VariableId,
    dc: f64,
    waveform: Option<Waveform>,
    ac_mag: f64,
    ac_phase: f64,
    rp: RhsHandle,
    rn: RhsHandle,
}

impl CurrentSourceBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_V_PARAMS)?;
        let dc = if e.params.is_given("dc") {
            e.params.value_or("dc", 0.0)
        } else {
            e.waveform.as_ref().map(|w| w.dc_value()).unwrap_or(0.0)
        };
        Ok(Box::new(Self {
            pos: ctx.pins[0],
            neg: ctx.pins[1],
            dc,
            waveform: e.waveform.clone(),
            ac_mag: e.params.value_or("acmag", 0.0),
            ac_phase: e.params.value_or("acphase", 0.0),
            rp: RhsHandle::TRASH,
            rn: RhsHandle::TRASH,
        }))
    }
}

impl Behavior for CurrentSourceBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::Load, BehaviorKind::AcLoad]
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.rp = pattern.rhs(self.pos);
        self.rn = pattern.rhs(self.neg);
    }

    fn unsetup(&mut self) {
        self.rp = RhsHandle::TRASH;
        self.rn = RhsHandle::TRASH;
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let state = &*ctx.state;
        let value = match (&self.waveform, state.transient) {
            (Some(w), true) => w.at(state.time),
            _ => self.dc,
        } * state.source_factor;
        // Current flows pos → neg inside the source: it leaves pos and
        // enters neg externally.
        let m = &mut *ctx.matrix;
        m.add_rhs(self.rp, -value);
        m.add_rhs(self.rn, value);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let phase = self.ac_phase.to_radians();
        let i = Complex::new(self.ac_mag * phase.cos(), self.ac_mag * phase.sin());
        let m = &mut *ctx.matrix;
        m.add_rhs(self.rp, -i);
        m.add_rhs(self.rn, i);
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        match name {
            "dc" => {
                self.dc = value;
                true
            }
            _ => false,
        }
    }
}

/// Voltage-controlled voltage source (E): out = gain · v(ctrl).
pub(crate) struct VcvsBehavior {
    name: String,
    out_pos: VariableId,
    out_neg: VariableId,
    ctrl_pos: VariableId,
    ctrl_neg: VariableId,
    branch: VariableId,
    gain: f64,

    pos_br: ElementHandle,
    neg_br: ElementHandle,
    br_pos: ElementHandle,
    br_neg: ElementHandle,
    br_cp: ElementHandle,
    br_cn: ElementHandle,
}

impl VcvsBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), &["gain"])?;
        Ok(Box::new(Self {
            name: e.name().to_string(),
            out_pos: ctx.pins[0],
            out_neg: ctx.pins[1],
            ctrl_pos: ctx.pins[2],
            ctrl_neg: ctx.pins[3],
            branch: VariableId::GROUND,
            gain: e.params.value_or("gain", 1.0),
            pos_br: ElementHandle::TRASH,
            neg_br: ElementHandle::TRASH,
            br_pos: ElementHandle::TRASH,
            br_neg: ElementHandle::TRASH,
            br_cp: ElementHandle::TRASH,
            br_cn: ElementHandle::TRASH,
        }))
    }

}

impl Behavior for VcvsBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::Load, BehaviorKind::AcLoad]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.branch = ctx.nodes.create_branch(&self.name)?;
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.pos_br = pattern.element(self.out_pos, self.branch);
        self.neg_br = pattern.element(self.out_neg, self.branch);
        self.br_pos = pattern.element(self.branch, self.out_pos);
        self.br_neg = pattern.element(self.branch, self.out_neg);
        self.br_cp = pattern.element(self.branch, self.ctrl_pos);
        self.br_cn = pattern.element(self.branch, self.ctrl_neg);
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, 1.0);
        m.add(self.neg_br, -1.0);
        m.add(self.br_pos, 1.0);
        m.add(self.br_neg, -1.0);
        m.add(self.br_cp, -self.gain);
        m.add(self.br_cn, self.gain);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let one = Complex::new(1.0, 0.0);
        let gain = Complex::new(self.gain, 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, one);
        m.add(self.neg_br, -one);
        m.add(self.br_pos, one);
        m.add(self.br_neg, -one);
        m.add(self.br_cp, -gain);
        m.add(self.br_cn, gain);
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        if name == "gain" {
            self.gain = value;
            return true;
        }
        false
    }

    fn branch(&self) -> Option<VariableId> {
        Some(self.branch)
    }
}

/// Voltage-controlled current source (G): i = gm · v(ctrl).
pub(crate) struct VccsBehavior {
    out_pos: VariableId,
    out_neg: VariableId,
    ctrl_pos: VariableId,
    ctrl_neg: VariableId,
    gm: f64,

    op_cp: ElementHandle,
    op_cn: ElementHandle,
    on_cp: ElementHandle,
    on_cn: ElementHandle,
}

impl VccsBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), &["gm"])?;
        Ok(Box::new(Self {
            out_pos: ctx.pins[0],
            out_neg: ctx.pins[1],
            ctrl_pos: ctx.pins[2],
            ctrl_neg: ctx.pins[3],
            gm: e.params.value_or("gm", 0.0),
            op_cp: ElementHandle::TRASH,
            op_cn: ElementHandle::TRASH,
            on_cp: ElementHandle::TRASH,
            on_cn: ElementHandle::TRASH,
        }))
    }
}

impl Behavior for VccsBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::Load, BehaviorKind::AcLoad]
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.op_cp = pattern.element(self.out_pos, self.ctrl_pos);
        self.op_cn = pattern.element(self.out_pos, self.ctrl_neg);
        self.on_cp = pattern.element(self.out_neg, self.ctrl_pos);
        self.on_cn = pattern.element(self.out_neg, self.ctrl_neg);
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let m = &mut *ctx.matrix;
        m.add(self.op_cp, self.gm);
        m.add(self.op_cn, -self.gm);
        m.add(self.on_cp, -self.gm);
        m.add(self.on_cn, self.gm);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let gm = Complex::new(self.gm, 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.op_cp, gm);
        m.add(self.op_cn, -gm);
        m.add(self.on_cp, -gm);
        m.add(self.on_cn, gm);
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        if name == "gm" {
            self.gm = value;
            return true;
        }
        false
    }
}

/// Current-controlled current source (F): i = gain · i(ctrl source).
pub(crate) struct CccsBehavior {
    name: String,
    out_pos: VariableId,
    out_neg: VariableId,
    control: String,
    ctrl_branch: VariableId,
    gain: f64,

    op_br: ElementHandle,
    on_br: ElementHandle,
}

impl CccsBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), &["gain"])?;
        let control = e.control.clone().ok_or_else(|| Error::CircuitTopology(
            format!("{}: no controlling source named", e.name()),
        ))?;
        Ok(Box::new(Self {
            name: e.name().to_string(),
            out_pos: ctx.pins[0],
            out_neg: ctx.pins[1],
            control,
            ctrl_branch: VariableId::GROUND,
            gain: e.params.value_or("gain", 1.0),
            op_br: ElementHandle::TRASH,
            on_br: ElementHandle::TRASH,
        }))
    }
}

impl Behavior for CccsBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::Load, BehaviorKind::AcLoad]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        // The controlling source allocates its branch in its own setup;
        // sources precede their dependents in entity order.
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
        self.op_br = pattern.element(self.out_pos, self.ctrl_branch);
        self.on_br = pattern.element(self.out_neg, self.ctrl_branch);
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let m = &mut *ctx.matrix;
        m.add(self.op_br, self.gain);
        m.add(self.on_br, -self.gain);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let g = Complex::new(self.gain, 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.op_br, g);
        m.add(self.on_br, -g);
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        if name == "gain" {
            self.gain = value;
            return true;
        }
        false
    }
}

/// Current-controlled voltage source (H): v = gain · i(ctrl source).
pub(crate) struct CcvsBehavior {
    name: String,
    out_pos: VariableId,
    out_neg: VariableId,
    control: String,
    ctrl_branch: VariableId,
    branch: VariableId,
    gain: f64,

    pos_br: ElementHandle,
    neg_br: ElementHandle,
    br_pos: ElementHandle,
    br_neg: ElementHandle,
    br_ctrl: ElementHandle,
}

impl CcvsBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), &["gain"])?;
        let control = e.control.clone().ok_or_else(|| Error::CircuitTopology(
            format!("{}: no controlling source named", e.name()),
        ))?;
        Ok(Box::new(Self {
            name: e.name().to_string(),
            out_pos: ctx.pins[0],
            out_neg: ctx.pins[1],
            control,
            ctrl_branch: VariableId::GROUND,
            branch: VariableId::GROUND,
            gain: e.params.value_or("gain", 0.0),
            pos_br: ElementHandle::TRASH,
            neg_br: ElementHandle::TRASH,
            br_pos: ElementHandle::TRASH,
            br_neg: ElementHandle::TRASH,
            br_ctrl: ElementHandle::TRASH,
        }))
    }
}

impl Behavior for CcvsBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::Load, BehaviorKind::AcLoad]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.branch = ctx.nodes.create_branch(&self.name)?;
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
        self.pos_br = pattern.element(self.out_pos, self.branch);
        self.neg_br = pattern.element(self.out_neg, self.branch);
        self.br_pos = pattern.element(self.branch, self.out_pos);
        self.br_neg = pattern.element(self.branch, self.out_neg);
        self.br_ctrl = pattern.element(self.branch, self.ctrl_branch);
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, 1.0);
        m.add(self.neg_br, -1.0);
        m.add(self.br_pos, 1.0);
        m.add(self.br_neg, -1.0);
        m.add(self.br_ctrl, -self.gain);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let one = Complex::new(1.0, 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, one);
        m.add(self.neg_br, -one);
        m.add(self.br_pos, one);
        m.add(self.br_neg, -one);
        m.add(self.br_ctrl, Complex::new(-self.gain, 0.0));
    }

    fn branch(&self) -> Option<VariableId> {
        Some(self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::rig;
    use ferrite_core::{Entity, EntityKind};
    use nalgebra::DVector;

    #[test]
    fn test_vsource_pins_voltage() {
        let mut r = rig(
            Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(5.0),
            None,
            VoltageSourceBehavior::build,
        );
        let mut m = r.load();
        // The source alone: [0 1; 1 0] x = [0, 5] → V(1) = 5, I = 0.
        m.factor().expect("factor");
        let mut x = DVector::zeros(0);
        m.solve_into(&mut x);
        assert!((x[0] - 5.0).abs() < 1e-12, "V(1) = {}", x[0]);
        assert!(x[1].abs() < 1e-12, "I(V1) = {}", x[1]);
    }

    #[test]
    fn test_source_factor_scales_stimulus() {
        let mut r = rig(
            Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(5.0),
            None,
            VoltageSourceBehavior::build,
        );
        r.state.source_factor = 0.4;
        let m = r.load();
        assert!((m.rhs_dense()[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pulse_waveform_in_transient() {
        let mut r = rig(
            Entity::new("V1", EntityKind::VoltageSource, &["1", "0"])
                .waveform(Waveform::pulse(0.0, 1.0, 0.0, 0.0, 0.0, 1e-3, 0.0)),
            None,
            VoltageSourceBehavior::build,
        );
        r.state.transient = true;
        r.state.time = 0.5e-3;
        let m = r.load();
        assert!((m.rhs_dense()[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_isource_direction() {
        let mut r = rig(
            Entity::new("I1", EntityKind::CurrentSource, &["1", "0"]).value(1e-3),
            None,
            CurrentSourceBehavior::build,
        );
        let m = r.load();
        // Current leaves node 1 (enters the ground return).
        assert!((m.rhs_dense()[0] + 1e-3).abs() < 1e-15);
    }

    #[test]
    fn test_vccs_stamp() {
        let mut r = rig(
            Entity::new("G1", EntityKind::Vccs, &["out", "0", "c", "0"]).value(2e-3),
            None,
            VccsBehavior::build,
        );
        let m = r.load();
        let a = m.dense();
        let out = 0; // first mapped node
        let c = 1;
        assert!((a[(out, c)] - 2e-3).abs() < 1e-15);
    }
}
