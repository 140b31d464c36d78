//! Transient analysis: the adaptive timestep controller.
//!
//! Controller loop per accepted point: prospect a step, load and solve
//! (Newton under `itl4`), then let every device's local truncation error
//! vote on the step. Newton failure halves the step from the last
//! accepted time; an LTE veto shrinks it; success proposes the smallest
//! device estimate for the next step, growth-limited to 2×.

use ferrite_core::{InitMode, ResultSink};

use crate::error::{Error, Result};
use crate::simulation::Simulation;

/// Fraction of the present step below which an LTE proposal rejects the
/// point instead of merely shrinking the next one.
const LTE_REJECT_RATIO: f64 = 0.9;

/// Growth cap between consecutive accepted steps.
const MAX_GROWTH: f64 = 2.0;

impl Simulation {
    /// Run a transient analysis from 0 to `tstop` (config), delivering a
    /// row per accepted timepoint (including t = 0).
    pub fn run_transient(&mut self, sink: &mut dyn ResultSink) -> Result<()> {
        let tstop = self.config.tstop;
        if !(tstop > 0.0) {
            return Err(ferrite_core::Error::UnknownSetting(
                "tstop must be positive for transient analysis".to_string(),
            )
            .into());
        }
        let maxstep = if self.config.maxstep > 0.0 {
            self.config.maxstep
        } else {
            tstop / 50.0
        };
        let tstep = if self.config.tstep > 0.0 {
            self.config.tstep
        } else {
            maxstep
        };
        let dtmin = 1e-9 * maxstep.min(tstep);

        self.temperature_pass()?;

        // Bias: operating point, unless the user asked for raw ICs.
        if self.config.uic {
            self.state.use_ic = true;
            self.apply_initial_conditions();
        } else {
            self.solve_op()?;
        }

        self.state.transient = true;
        let mut dt = (tstep.min(maxstep) / 10.0).max(dtmin);
        self.state.integrator.begin(
            self.config.method,
            self.config.order,
            dt,
            self.config.trtol,
            self.config.reltol,
            self.config.chgtol,
        );

        // Charge initialisation at t = 0: fill every slot's history from
        // the bias solution.
        self.state.time = 0.0;
        self.state.tran_init = true;
        self.load_pass()?;
        self.state.tran_init = false;
        self.accept_pass();
        self.export(sink, 0.0);
        self.state.prev_accepted.copy_from(&self.state.solution);

        let mut time = 0.0;
        let mut rejected = 0usize;
        while time < tstop * (1.0 - 1e-12) {
            if self.cancel.is_cancelled() {
                self.state.transient = false;
                return Err(Error::Cancelled);
            }

            dt = dt.min(maxstep);
            if time + dt > tstop {
                dt = tstop - time;
            }
            self.state.integrator.prospect(dt);
            self.state.time = time + dt;
            self.state.init_mode = InitMode::Normal;

            match self.iterate(self.config.itl4) {
                Ok(_) => {}
                Err(e) if e.is_numerical() => {
                    // Retreat to the last accepted point and halve.
                    self.state.solution.copy_from(&self.state.prev_accepted);
                    self.state.init_mode = InitMode::Normal;
                    dt /= 2.0;
                    rejected += 1;
                    if dt < dtmin {
                        self.state.transient = false;
                        return Err(Error::TimestepTooSmall { time, delta: dt });
                    }
                    log::warn!(
                        "transient Newton failure at t = {:.6e} s ({e}); dt halved to {:.3e} s",
                        self.state.time,
                        dt
                    );
                    continue;
                }
                Err(e) => {
                    self.state.transient = false;
                    return Err(e);
                }
            }

            // Refresh the slots at the converged solution, then collect
            // the per-device LTE step proposals.
            self.load_pass()?;
            let mut proposal = f64::INFINITY;
            for entry in &self.behaviors {
                proposal = proposal.min(entry.behavior.truncate(&self.state));
            }

            if proposal < LTE_REJECT_RATIO * dt {
                self.state.solution.copy_from(&self.state.prev_accepted);
                rejected += 1;
                dt = proposal.max(dt / 8.0);
                if dt < dtmin {
                    self.state.transient = false;
                    return Err(Error::TimestepTooSmall { time, delta: dt });
                }
                log::debug!(
                    "LTE rejection at t = {:.6e} s; retrying with dt = {:.3e} s",
                    self.state.time,
                    dt
                );
                continue;
            }

            // Accept: behaviors commit in entity order, then the history
            // rings advance.
            time = self.state.time;
            self.accept_pass();
            self.state.prev_accepted.copy_from(&self.state.solution);
            self.export(sink, time);

            dt = proposal.min(dt * MAX_GROWTH).min(maxstep);
        }

        log::debug!("transient complete: {rejected} rejected steps");
        self.state.transient = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ferrite_core::{
        Circuit, Config, Entity, EntityKind, IntegrationMethod, RecordingSink, Waveform,
    };

    use super::*;

    #[test]
    fn test_rc_step_response() {
        ferrite_devices::register_defaults();
        // R = 1 kΩ, C = 1 µF, 0→1 V step at t = 0.
        // V_C(1 ms) = 1 − e⁻¹ ≈ 0.6321.
        let mut c = Circuit::new();
        c.add(
            Entity::new("V1", EntityKind::VoltageSource, &["1", "0"])
                .waveform(Waveform::pulse(0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0)),
        )
        .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "2"]).value(1e3))
            .unwrap();
        c.add(Entity::new("C1", EntityKind::Capacitor, &["2", "0"]).value(1e-6))
            .unwrap();

        let mut config = Config::default();
        config.tstop = 1e-3;
        config.tstep = 1e-5;
        let mut sim = Simulation::new(&c, config).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_transient(&mut sink).unwrap();

        let n2 = sim.unknown_index("2").unwrap();
        let v = sink.interpolate(n2, 1e-3).unwrap();
        let expected = 1.0 - (-1.0_f64).exp();
        assert!(
            ((v - expected) / expected).abs() < 1e-3,
            "V_C(1 ms) = {v} (expected {expected} ± 0.1%)"
        );
    }

    #[test]
    fn test_rc_gear_matches_trap() {
        ferrite_devices::register_defaults();
        let build = || {
            let mut c = Circuit::new();
            c.add(
                Entity::new("V1", EntityKind::VoltageSource, &["1", "0"])
                    .waveform(Waveform::pulse(0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0)),
            )
            .unwrap();
            c.add(Entity::new("R1", EntityKind::Resistor, &["1", "2"]).value(1e3))
                .unwrap();
            c.add(Entity::new("C1", EntityKind::Capacitor, &["2", "0"]).value(1e-6))
                .unwrap();
            c
        };

        let mut cfg_trap = Config::default();
        cfg_trap.tstop = 1e-3;
        cfg_trap.tstep = 1e-5;
        let mut sim = Simulation::new(&build(), cfg_trap).unwrap();
        let mut sink_trap = RecordingSink::new();
        sim.run_transient(&mut sink_trap).unwrap();
        let n2 = sim.unknown_index("2").unwrap();

        let mut cfg_gear = Config::default();
        cfg_gear.tstop = 1e-3;
        cfg_gear.tstep = 1e-5;
        cfg_gear.method = IntegrationMethod::Gear;
        cfg_gear.order = 2;
        let mut sim_g = Simulation::new(&build(), cfg_gear).unwrap();
        let mut sink_gear = RecordingSink::new();
        sim_g.run_transient(&mut sink_gear).unwrap();

        let vt = sink_trap.interpolate(n2, 1e-3).unwrap();
        let vg = sink_gear.interpolate(n2, 1e-3).unwrap();
        assert!(
            (vt - vg).abs() < 1e-3,
            "trap = {vt}, gear = {vg}: methods must agree"
        );
    }

    #[test]
    fn test_lc_tank_period_and_energy() {
        ferrite_devices::register_defaults();
        // L = 1 mH, C = 1 µF charged to 1 V: T = 2π√(LC) ≈ 198.7 µs...
        // the classic tank. One period must conserve the capacitor
        // voltage to within a few percent, and the controller must run
        // with steps no coarser than T/50.
        let mut c = Circuit::new();
        c.add(
            Entity::new("C1", EntityKind::Capacitor, &["1", "0"])
                .value(1e-6)
                .param("ic", 1.0),
        )
        .unwrap();
        c.add(Entity::new("L1", EntityKind::Inductor, &["1", "0"]).value(1e-3))
            .unwrap();

        let period = 2.0 * std::f64::consts::PI * (1e-3_f64 * 1e-6).sqrt();
        let mut config = Config::default();
        config.tstop = period;
        config.tstep = period / 200.0;
        config.uic = true;
        config.set_ic("1", 1.0);

        let mut sim = Simulation::new(&c, config).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_transient(&mut sink).unwrap();

        // Timestep bound: every accepted step ≤ T/50.
        for w in sink.rows.windows(2) {
            let dt = w[1].0 - w[0].0;
            assert!(
                dt <= period / 50.0 * 1.0001,
                "accepted dt = {dt} exceeds T/50 = {}",
                period / 50.0
            );
        }

        // Energy recovery after one period: V back near +1 V.
        let n1 = sim.unknown_index("1").unwrap();
        let v_end = sink.rows.last().unwrap().1[n1];
        assert!(
            (v_end - 1.0).abs() < 0.01 + 0.04,
            "V_C after one period = {v_end} (expected ≈ 1)"
        );
    }

    #[test]
    fn test_history_monotone_in_time() {
        ferrite_devices::register_defaults();
        let mut c = Circuit::new();
        c.add(
            Entity::new("V1", EntityKind::VoltageSource, &["1", "0"])
                .waveform(Waveform::sin(0.0, 1.0, 1e3)),
        )
        .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "2"]).value(1e3))
            .unwrap();
        c.add(Entity::new("C1", EntityKind::Capacitor, &["2", "0"]).value(1e-7))
            .unwrap();

        let mut config = Config::default();
        config.tstop = 2e-3;
        config.tstep = 2e-5;
        let mut sim = Simulation::new(&c, config).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_transient(&mut sink).unwrap();

        // Accepted timepoints are strictly increasing.
        for w in sink.rows.windows(2) {
            assert!(w[1].0 > w[0].0, "time must advance: {} → {}", w[0].0, w[1].0);
        }
        assert!(sink.rows.last().unwrap().0 >= 2e-3 * (1.0 - 1e-9));
    }

    #[test]
    fn test_uic_skips_operating_point() {
        ferrite_devices::register_defaults();
        // A capacitor with IC = 2 V and a bleed resistor; with UIC the
        // first point starts at 2 V, not the DC solution (0 V).
        let mut c = Circuit::new();
        c.add(
            Entity::new("C1", EntityKind::Capacitor, &["1", "0"])
                .value(1e-6)
                .param("ic", 2.0),
        )
        .unwrap();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "0"]).value(1e3))
            .unwrap();

        let mut config = Config::default();
        config.tstop = 1e-4;
        config.tstep = 1e-6;
        config.uic = true;
        config.set_ic("1", 2.0);

        let mut sim = Simulation::new(&c, config).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_transient(&mut sink).unwrap();

        let n1 = sim.unknown_index("1").unwrap();
        assert!(
            (sink.rows[0].1[n1] - 2.0).abs() < 1e-9,
            "t = 0 starts at the IC"
        );
        // And it decays with τ = 1 ms.
        let v_end = sink.rows.last().unwrap().1[n1];
        let expected = 2.0 * (-0.1_f64).exp();
        assert!(
            ((v_end - expected) / expected).abs() < 0.01,
            "V(0.1 ms) = {v_end}, expected {expected}"
        );
    }
}
