//! Inductor: a branch-current unknown and a flux derivative slot.

use ferrite_core::{
    AcLoadContext, Behavior, BehaviorKind, BindContext, ElementHandle, LoadContext, MatrixPattern,
    Result, RhsHandle, SetupContext, SimState, StateId, VariableId,
};
use num_complex::Complex;

const KNOWN_PARAMS: &[&str] = &["l", "ic"];

pub(crate) struct InductorBehavior {
    name: String,
    pos: VariableId,
    neg: VariableId,
    branch: VariableId,

    inductance: f64,
    ic: Option<f64>,

    flux: Option<StateId>,

    pos_br: ElementHandle,
    neg_br: ElementHandle,
    br_pos: ElementHandle,
    br_neg: ElementHandle,
    br_br: ElementHandle,
    rbr: RhsHandle,
}

impl InductorBehavior {
    pub(crate) fn build(ctx: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        let e = ctx.entity;
        e.params.check_known(e.name(), KNOWN_PARAMS)?;
        if !e.params.is_given("l") {
            return Err(ferrite_core::Error::MissingParameter {
                entity: e.name().to_string(),
                name: "l".to_string(),
            });
        }
        Ok(Box::new(Self {
            name: e.name().to_string(),
            pos: ctx.pins[0],
            neg: ctx.pins[1],
            branch: VariableId::GROUND,
            inductance: e.params.value_or("l", 0.0),
            ic: e.params.get("ic").filter(|p| p.is_given()).map(|p| p.value()),
            flux: None,
            pos_br: ElementHandle::TRASH,
            neg_br: ElementHandle::TRASH,
            br_pos: ElementHandle::TRASH,
            br_neg: ElementHandle::TRASH,
            br_br: ElementHandle::TRASH,
            rbr: RhsHandle::TRASH,
        }))
    }
}

impl Behavior for InductorBehavior {
    fn kinds(&self) -> &'static [BehaviorKind] {
        &[
            BehaviorKind::Load,
            BehaviorKind::AcLoad,
            BehaviorKind::Transient,
        ]
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        self.branch = ctx.nodes.create_branch(&self.name)?;
        self.flux = Some(ctx.state.integrator.alloc());
        Ok(())
    }

    fn allocate(&mut self, pattern: &mut MatrixPattern) {
        self.pos_br = pattern.element(self.pos, self.branch);
        self.neg_br = pattern.element(self.neg, self.branch);
        self.br_pos = pattern.element(self.branch, self.pos);
        self.br_neg = pattern.element(self.branch, self.neg);
        self.br_br = pattern.element(self.branch, self.branch);
        self.rbr = pattern.rhs(self.branch);
    }

    fn unsetup(&mut self) {
        self.flux = None;
        self.pos_br = ElementHandle::TRASH;
        self.neg_br = ElementHandle::TRASH;
        self.br_pos = ElementHandle::TRASH;
        self.br_neg = ElementHandle::TRASH;
        self.br_br = ElementHandle::TRASH;
        self.rbr = RhsHandle::TRASH;
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        // Branch current variable: pin rows carry ±1, the branch row
        // enforces v_pos − v_neg = dΦ/dt (zero at DC: a short).
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, 1.0);
        m.add(self.neg_br, -1.0);
        m.add(self.br_pos, 1.0);
        m.add(self.br_neg, -1.0);
        Ok(())
    }

    fn transient_load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let slot = self.flux.expect("inductor flux slot");
        let state = &mut *ctx.state;

        if state.tran_init {
            let i = match (state.use_ic, self.ic) {
                (true, Some(i0)) => i0,
                _ => state.voltage(self.branch),
            };
            state.integrator.initialize(slot, self.inductance * i);
            if state.use_ic && self.ic.is_some() {
                state.set_voltage(self.branch, self.ic.unwrap());
            }
            return Ok(());
        }

        let i = state.voltage(self.branch);
        state.integrator.set_value(slot, self.inductance * i);
        state.integrator.integrate(slot);
        let geq = state.integrator.jacobian(self.inductance);
        // Branch row: v_pos − v_neg − geq·i = −(geq·i − dΦ/dt).
        let veq = -state.integrator.rhs_current(slot, geq, i);

        let m = &mut *ctx.matrix;
        m.add(self.br_br, -geq);
        m.add_rhs(self.rbr, veq);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {
        let one = Complex::new(1.0, 0.0);
        let m = &mut *ctx.matrix;
        m.add(self.pos_br, one);
        m.add(self.neg_br, -one);
        m.add(self.br_pos, one);
        m.add(self.br_neg, -one);
        m.add(self.br_br, Complex::new(0.0, -ctx.omega * self.inductance));
    }

    fn truncate(&self, state: &SimState) -> f64 {
        match self.flux {
            Some(slot) => state.integrator.truncate(slot),
            None => f64::INFINITY,
        }
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        match name {
            "l" => {
                self.inductance = value;
                true
            }
            _ => false,
        }
    }

    fn branch(&self) -> Option<VariableId> {
        Some(self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::rig;
    use ferrite_core::{Entity, EntityKind, IntegrationMethod, RealMatrix};
    use nalgebra::DVector;

    #[test]
    fn test_dc_short() {
        let mut r = rig(
            Entity::new("L1", EntityKind::Inductor, &["1", "0"]).value(1e-3),
            None,
            InductorBehavior::build,
        );
        let m = r.load();
        let a = m.dense();
        // Unknowns: node 1 and the branch current.
        assert_eq!(m.size(), 2);
        assert_eq!(a[(0, 1)], 1.0, "pin row couples to branch");
        assert_eq!(a[(1, 0)], 1.0, "branch row reads the node voltage");
        assert_eq!(a[(1, 1)], 0.0, "no branch impedance at DC");
    }

    #[test]
    fn test_transient_companion() {
        let mut r = rig(
            Entity::new("L1", EntityKind::Inductor, &["1", "0"]).value(1e-3),
            None,
            InductorBehavior::build,
        );
        let dt = 1e-6;
        r.state
            .integrator
            .begin(IntegrationMethod::Trapezoidal, 1, dt, 7.0, 1e-3, 1e-14);

        // Seed history at I = 2 A.
        r.state.tran_init = true;
        r.state.solution[1] = 2.0;
        let _ = r.load_transient();
        r.state.tran_init = false;

        let m = r.load_transient();
        // Branch row gains −L/dt; the RHS carries the flux history
        // −L·I_prev/dt.
        let a = m.dense();
        assert!((a[(1, 1)] + 1e-3 / dt).abs() < 1e-6, "geq = {}", a[(1, 1)]);
        let rhs = m.rhs_dense();
        assert!(
            (rhs[1] + 1e-3 * 2.0 / dt).abs() < 1e-6,
            "flux history term = {}",
            rhs[1]
        );
    }

    #[test]
    fn test_lc_tank_conserves_energy() {
        // L = 1 mH, C = 1 µF, V_C(0) = 1 V, simulated by hand with the two
        // companion models over one period T = 2π√(LC) ≈ 198.7 µs.
        use crate::capacitor::CapacitorBehavior;
        use ferrite_core::{Circuit, Config, LoadContext, MatrixPattern, Nodes, SetupContext,
            SimState, BindContext};

        let mut circuit = Circuit::new();
        circuit
            .add(Entity::new("C1", EntityKind::Capacitor, &["1", "0"]).value(1e-6))
            .unwrap();
        circuit
            .add(Entity::new("L1", EntityKind::Inductor, &["1", "0"]).value(1e-3))
            .unwrap();

        let config = Config::default();
        let mut nodes = Nodes::new();
        let mut state = SimState::new(0);
        let mut behaviors: Vec<Box<dyn Behavior>> = Vec::new();
        for e in circuit.iter() {
            let pins: Vec<_> = e.pins().iter().map(|p| nodes.map(p)).collect();
            let ctx = BindContext {
                entity: e,
                model: None,
                pins: &pins,
                config: &config,
            };
            let mut b = match e.kind() {
                EntityKind::Capacitor => CapacitorBehavior::build(&ctx).unwrap(),
                EntityKind::Inductor => InductorBehavior::build(&ctx).unwrap(),
                _ => unreachable!(),
            };
            b.setup(&mut SetupContext {
                nodes: &mut nodes,
                state: &mut state,
            })
            .unwrap();
            behaviors.push(b);
        }
        state.resize(nodes.unknowns());
        let mut pattern = MatrixPattern::new(nodes.unknowns());
        for b in &mut behaviors {
            b.allocate(&mut pattern);
            b.temperature(&state).unwrap();
        }

        let dt = 198.7e-6 / 400.0;
        state
            .integrator
            .begin(IntegrationMethod::Trapezoidal, 2, dt, 7.0, 1e-3, 1e-14);
        state.solution[0] = 1.0; // V_C(0) = 1
        state.tran_init = true;
        {
            let mut m = RealMatrix::from_pattern(&pattern);
            for b in &mut behaviors {
                b.load(&mut LoadContext {
                    state: &mut state,
                    matrix: &mut m,
                })
                .unwrap();
                b.transient_load(&mut LoadContext {
                    state: &mut state,
                    matrix: &mut m,
                })
                .unwrap();
            }
        }
        state.tran_init = false;

        let steps = 400;
        let mut x = DVector::zeros(nodes.unknowns());
        for _ in 0..steps {
            let mut m = RealMatrix::from_pattern(&pattern);
            for b in &mut behaviors {
                b.load(&mut LoadContext {
                    state: &mut state,
                    matrix: &mut m,
                })
                .unwrap();
                b.transient_load(&mut LoadContext {
                    state: &mut state,
                    matrix: &mut m,
                })
                .unwrap();
            }
            m.factor().expect("LC factor");
            m.solve_into(&mut x);
            state.solution.copy_from(&x);
            // Re-run the companion update at the final solution so the
            // slot derivative matches before acceptance.
            let mut m2 = RealMatrix::from_pattern(&pattern);
            for b in &mut behaviors {
                b.load(&mut LoadContext {
                    state: &mut state,
                    matrix: &mut m2,
                })
                .unwrap();
                b.transient_load(&mut LoadContext {
                    state: &mut state,
                    matrix: &mut m2,
                })
                .unwrap();
            }
            state.integrator.accept();
            state.integrator.prospect(dt);
        }

        // After one full period the capacitor voltage returns near +1 V.
        let v = state.solution[0];
        assert!(
            (v - 1.0).abs() < 0.05,
            "V_C after one period = {v} (expected ≈ 1)"
        );
    }
}
