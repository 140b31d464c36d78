//! DC sweep analysis driver.

use ferrite_core::{InitMode, ResultSink};

use crate::error::{Error, Result};
use crate::simulation::Simulation;

/// DC sweep description: a named source parameter walked over a range.
#[derive(Debug, Clone)]
pub struct DcSweepParams {
    /// Entity whose parameter is swept.
    pub source: String,
    /// Parameter written at each point (usually `dc`).
    pub parameter: String,
    /// Start value.
    pub start: f64,
    /// Stop value.
    pub stop: f64,
    /// Increment (sign gives the direction).
    pub step: f64,
}

impl DcSweepParams {
    pub fn new(source: &str, start: f64, stop: f64, step: f64) -> Self {
        Self {
            source: source.to_string(),
            parameter: "dc".to_string(),
            start,
            stop,
            step,
        }
    }

    /// The sweep values, inclusive of both ends within rounding.
    pub fn values(&self) -> Vec<f64> {
        let mut out = Vec::new();
        let dir = if self.step >= 0.0 { 1.0 } else { -1.0 };
        let mut v = self.start;
        loop {
            out.push(v);
            v += self.step;
            if dir * v > dir * self.stop * (1.0 + 1e-12) + 1e-300 {
                break;
            }
            if out.len() > 10_000_000 {
                break;
            }
        }
        out
    }
}

impl Simulation {
    /// Sweep a source parameter, solving the operating point at each
    /// value. Each point starts from the previous solution.
    pub fn run_dc_sweep(&mut self, params: &DcSweepParams, sink: &mut dyn ResultSink) -> Result<()> {
        self.temperature_pass()?;

        let mut first = true;
        for value in params.values() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if !self.set_entity_parameter(&params.source, &params.parameter, value) {
                return Err(ferrite_core::Error::UnknownParameter {
                    entity: params.source.clone(),
                    name: params.parameter.clone(),
                }
                .into());
            }

            if first {
                self.solve_op()?;
                first = false;
            } else {
                // Continuation from the previous point; fall back to a
                // full solve when the step is too aggressive.
                self.state.init_mode = InitMode::Normal;
                match self.iterate(self.config.itl1) {
                    Ok(_) => {}
                    Err(e) if e.is_numerical() => {
                        self.solve_op()?;
                    }
                    Err(e) => return Err(e),
                }
            }
            self.export(sink, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ferrite_core::{Circuit, Config, Entity, EntityKind, ModelCard, RecordingSink};

    use super::*;

    #[test]
    fn test_divider_tracks_sweep() {
        ferrite_devices::register_defaults();
        let mut c = Circuit::new();
        c.add(Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(0.0))
            .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "2"]).value(1e3))
            .unwrap();
        c.add(Entity::new("R2", EntityKind::Resistor, &["2", "0"]).value(1e3))
            .unwrap();

        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        let mut sink = RecordingSink::new();
        let params = DcSweepParams::new("V1", 0.0, 10.0, 1.0);
        sim.run_dc_sweep(&params, &mut sink).unwrap();

        assert_eq!(sink.rows.len(), 11);
        let n2 = sim.unknown_index("2").unwrap();
        for row in 0..sink.rows.len() {
            let sv = sink.rows[row].0;
            let v2 = sink.value(row, n2);
            assert!(
                (v2 - sv / 2.0).abs() < 1e-9,
                "at V1 = {sv}: V(2) = {v2} (expected {})",
                sv / 2.0
            );
        }
    }

    #[test]
    fn test_diode_iv_point() {
        ferrite_devices::register_defaults();
        // Ideal diode driven directly by a voltage source; at 0.7 V the
        // current is Is·(exp(V/Vt) − 1).
        let mut c = Circuit::new();
        c.add(Entity::new("V1", EntityKind::VoltageSource, &["1", "0"]).value(0.0))
            .unwrap();
        c.add_model(
            ModelCard::new("ideal", EntityKind::Diode)
                .param("is", 1e-14)
                .param("n", 1.0),
        )
        .unwrap();
        c.add(Entity::new("D1", EntityKind::Diode, &["1", "0"]).model("ideal"))
            .unwrap();

        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        sim.watch("D1", "id");
        let mut sink = RecordingSink::new();
        let params = DcSweepParams::new("V1", 0.0, 0.8, 0.01);
        sim.run_dc_sweep(&params, &mut sink).unwrap();

        // Find the V = 0.70 row.
        let row = sink
            .device_rows
            .iter()
            .find(|(sv, _, _, _)| (sv - 0.70).abs() < 1e-9)
            .expect("0.7 V point present");
        let id = row.3;
        let vt = ferrite_core::thermal_voltage(300.15);
        let expected = 1e-14 * ((0.70 / vt).exp() - 1.0);
        assert!(
            ((id - expected) / expected).abs() < 1e-3,
            "I(0.7 V) = {id}, expected {expected} (±0.1%)"
        );
        // Order of magnitude: a few mA.
        assert!(id > 1e-3 && id < 1e-2, "I = {id}");
    }

    #[test]
    fn test_bjt_beta_in_sweep() {
        ferrite_devices::register_defaults();
        // Common-emitter: Vbe swept directly at the base, collector held
        // at 5 V. At Vbe = 0.65 V, Ic/Ib ≈ BF.
        let mut c = Circuit::new();
        c.add(Entity::new("VBE", EntityKind::VoltageSource, &["b", "0"]).value(0.5))
            .unwrap();
        c.add(Entity::new("VCC", EntityKind::VoltageSource, &["c", "0"]).value(5.0))
            .unwrap();
        c.add_model(
            ModelCard::new("n2222", EntityKind::Bjt)
                .param("is", 1e-14)
                .param("bf", 100.0)
                .param("br", 1.0),
        )
        .unwrap();
        c.add(
            Entity::new("Q1", EntityKind::Bjt, &["c", "b", "0"]).model("n2222"),
        )
        .unwrap();

        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        sim.watch("Q1", "ic");
        sim.watch("Q1", "ib");
        let mut sink = RecordingSink::new();
        let params = DcSweepParams::new("VBE", 0.5, 0.8, 0.05);
        sim.run_dc_sweep(&params, &mut sink).unwrap();

        let at = |v: f64, prop: &str| -> f64 {
            sink.device_rows
                .iter()
                .find(|(sv, _, p, _)| (sv - v).abs() < 1e-9 && p == prop)
                .map(|r| r.3)
                .expect("row")
        };
        let beta = at(0.65, "ic") / at(0.65, "ib");
        assert!(
            (beta - 100.0).abs() / 100.0 < 0.02,
            "Ic/Ib = {beta} (expected 100 ± 2%)"
        );
    }
}
