//! Operating-point analysis driver.

use ferrite_core::ResultSink;

use crate::error::Result;
use crate::simulation::Simulation;

impl Simulation {
    /// Compute the DC operating point and deliver one result row.
    pub fn run_op(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        self.temperature_pass()?;
        let iterations = self.solve_op()?;
        log::debug!("operating point converged in {iterations} iterations");
        self.export(sink, 0.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ferrite_core::{Circuit, Config, Entity, EntityKind, RecordingSink};

    use super::*;

    fn setup_registry() {
        ferrite_devices::register_defaults();
    }

    #[test]
    fn test_voltage_divider() {
        setup_registry();
        // V1 = 5 V on node 1; R1 = R2 = 1 kΩ. Expect V(2) = 2.5 V.
        let mut c = Circuit::new();
        c.add(Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(5.0))
            .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "2"]).value(1e3))
            .unwrap();
        c.add(Entity::new("R2", EntityKind::Resistor, &["2", "0"]).value(1e3))
            .unwrap();

        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_op(&mut sink).unwrap();

        let n2 = sim.unknown_index("2").unwrap();
        let v2 = sink.value(0, n2);
        assert!((v2 - 2.5).abs() < 1e-9, "V(2) = {v2} (expected 2.5)");

        let n1 = sim.unknown_index("1").unwrap();
        assert!((sink.value(0, n1) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_current_divider() {
        setup_registry();
        let mut c = Circuit::new();
        c.add(Entity::new("I1", EntityKind::CurrentSource, &["0", "1"]).value(10e-3))
            .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "0"]).value(1e3))
            .unwrap();
        c.add(Entity::new("R2", EntityKind::Resistor, &["1", "0"]).value(1e3))
            .unwrap();

        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_op(&mut sink).unwrap();

        let v1 = sink.value(0, sim.unknown_index("1").unwrap());
        assert!((v1 - 5.0).abs() < 1e-9, "V(1) = {v1} (expected 5)");
    }

    #[test]
    fn test_diode_resistor_bias() {
        setup_registry();
        use ferrite_core::ModelCard;
        let mut c = Circuit::new();
        c.add(Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(5.0))
            .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "2"]).value(1e3))
            .unwrap();
        c.add_model(ModelCard::new("dmod", EntityKind::Diode).param("is", 1e-14))
            .unwrap();
        c.add(Entity::new("D1", EntityKind::Diode, &["2", "0"]).model("dmod"))
            .unwrap();

        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_op(&mut sink).unwrap();

        let vd = sink.value(0, sim.unknown_index("2").unwrap());
        assert!(
            vd > 0.5 && vd < 0.8,
            "diode forward voltage = {vd} (expected 0.5-0.8)"
        );
        // KCL: resistor current equals diode current.
        let id = sim.property("D1", "id").unwrap();
        let ir = (5.0 - vd) / 1e3;
        assert!(
            ((id - ir) / ir).abs() < 1e-6,
            "Id = {id}, resistor current = {ir}"
        );
    }

    #[test]
    fn test_setup_unsetup_setup_is_idempotent() {
        setup_registry();
        let mut c = Circuit::new();
        c.add(Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(1.0))
            .unwrap();
        c.add(Entity::new("L1", EntityKind::Inductor, &["1", "2"]).value(1e-3))
            .unwrap();
        c.add(Entity::new("C1", EntityKind::Capacitor, &["2", "0"]).value(1e-6))
            .unwrap();

        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        let unknowns = sim.nodes().unknowns();
        let elements = sim.pattern.element_count();
        let slots = sim.state.integrator.slot_count();

        sim.unsetup();
        sim.setup().unwrap();

        assert_eq!(sim.nodes().unknowns(), unknowns, "variable count stable");
        assert_eq!(
            sim.pattern.element_count(),
            elements,
            "matrix pattern stable"
        );
        assert_eq!(
            sim.state.integrator.slot_count(),
            slots,
            "state slot count stable"
        );

        // And the rebuilt simulation still solves.
        let mut sink = RecordingSink::new();
        sim.run_op(&mut sink).unwrap();
        let v1 = sink.value(0, sim.unknown_index("1").unwrap());
        assert!((v1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancellation_surfaces() {
        setup_registry();
        use ferrite_core::CancelToken;
        let mut c = Circuit::new();
        c.add(Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(1.0))
            .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "0"]).value(1.0))
            .unwrap();
        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        sim.set_cancel(token);
        let mut sink = RecordingSink::new();
        let err = sim.run_op(&mut sink).unwrap_err();
        assert!(matches!(err, crate::error::Error::Cancelled));
    }
}
