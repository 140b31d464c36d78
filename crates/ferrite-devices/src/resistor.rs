//! Resistor: geometry/sheet-resistance evaluation, temperature scaling,
//! thermal noise.

use ferrite_core::{
    AcLoadContext, Behavior, BehaviorKind, BindContext, ElementHandle, LoadContext, MatrixPattern,
    NoiseSource, Result, SimState, VariableId,
};
use num_complex::Complex;

use crate::merged;

const KNOWN_PARAMS: &[&str] = &["r", "w", "l", "tc1", "tc2", "temp"];
const KNOWN_MODEL_PARAMS: &[&str] = &["rsh", "narrow", "defw", "tc1", "tc2", "tnom"];

pub(crate) struct ResistorBehavior {
    name: String,
    pos: VariableId,
    neg: VariableId,

    r_given: bool,
    r: f64,
    width: f64,
    length: f64,
    sheet_res: f64,
    narrow: f64,
    tc1: f64,
    tc2: f64,
    tnom: f64,

    /// Temperature product: the stamped conductance.
    g: f64,

    pp: ElementHandle,
    nn: ElementHandle,
    pn: ElementHandle,
    np: ElementHandle,
}

impl ResistorBehavior {
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
            r_given: e.params.is_given("r"),
            r: e.params.value_or("r", 0.0),
            width: e.params.value_or("w", defw),
            length: e.params.value_or("l", 0.0),
            sheet_res: merged(e, ctx.model, "rsh", 0.0),
            narrow: merged(e, ctx.model, "narrow", 0.0),
            tc1: merged(e, ctx.model, "tc1", 0.0),
            tc2: merged(e, ctx.model, "tc2", 0.0),
            tnom: merged(e, ctx.model, "tnom", 300.15),
            g: 0.0,
            pp: ElementHandle::TRASH,
            nn: ElementHandle::TRASH,
            pn: ElementHandle::TRASH,
            np: ElementHandle::TRASH,
        }))
    }

    fn base_resistance(&self) -> f64 {
        if self.r_given {
            return self.r;
        }
        let w = self.width - self.narrow;
        let l = self.length - self.narrow;
        if self.sheet_res > 0.0 && w > 0.0 && l > 0.0 {
            self.sheet_res * l / w
        } else {
            log::warn!(
                "{}: resistance is zero or underspecified, using 1 kΩ",
                self.name
            );
            1000.0
        }
    }
}

impl Behavior for ResistorBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[
            BehaviorKind::Temperature,
            BehaviorKind::Load,
            BehaviorKind::AcLoad,
            BehaviorKind::Noise,
        ]
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.pp = pattern.element(self.pos, self.pos);
        self.nn = pattern.element(self.neg, self.neg);
        self.pn = pattern.element(self.pos, self.neg);
        self.np = pattern.element(self.neg, self.pos);
    }

    fn unsetup(&mut self) {
        self.pp = ElementHandle::TRASH;
        self.nn = ElementHandle::TRASH;
        self.pn = ElementHandle::TRASH;
        self.np = ElementHandle::TRASH;
    }

    fn temperature(&mut self, state: &SimState) -> Result<()> {
        let r0 = self.base_resistance();
        let dt = state.temperature - self.tnom;
        let factor = 1.0 + self.tc1 * dt + self.tc2 * dt * dt;
        let r = if r0 * factor != 0.0 {
            r0 * factor
        } else {
            log::warn!("{}: temperature-adjusted resistance is zero", self.name);
            1000.0
        };
        self.g = 1.0 / r;
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let m = &mut *ctx.matrix;
        m.add(self.pp, self.g);
        m.add(self.nn, self.g);
        m.add(self.pn, -self.g);
        m.add(self.np, -self.g);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let g = Complex::new(self.g, 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.pp, g);
        m.add(self.nn, g);
        m.add(self.pn, -g);
        m.add(self.np, -g);
    }

    fn noise_sources(&self, _state: &SimState) -> Vec<NoiseSource> {
        vec![NoiseSource::thermal(
            format!("{}.thermal", self.name),
            self.pos,
            self.neg,
            self.g,
        )]
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        match name {
            "r" => {
                self.r = value;
                self.r_given = true;
                // Keep the stamped conductance in step: the temperature
                // factor is re-applied on the next temperature pass, so
                // fold only the base value here.
                self.g = 1.0 / value;
                true
            }
            _ => false,
        }
    }
}
