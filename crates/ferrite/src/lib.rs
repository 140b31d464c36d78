//! # Ferrite
//!
//! A modified-nodal-analysis circuit simulation engine in the Berkeley
//! SPICE tradition: per-device *behaviors* stamp their linearised
//! contributions into a shared MNA system, a Newton-Raphson loop with
//! junction limiting and Gmin/source stepping finds operating points,
//! and an adaptive trapezoidal/Gear integrator drives transient runs.
//!
//! ## Quick start
//!
//! ```rust
//! use ferrite::prelude::*;
//!
//! ferrite::register_defaults();
//!
//! // A 5 V divider: V1 — R1 — out — R2 — GND.
//! let mut circuit = Circuit::new();
//! circuit
//!     .add(Entity::new("V1", EntityKind::VoltageSource, &["in", "0"]).value(5.0))
//!     .unwrap();
//! circuit
//!     .add(Entity::new("R1", EntityKind::Resistor, &["in", "out"]).value(1e3))
//!     .unwrap();
//! circuit
//!     .add(Entity::new("R2", EntityKind::Resistor, &["out", "0"]).value(1e3))
//!     .unwrap();
//!
//! let mut sim = Simulation::new(&circuit, Config::default()).unwrap();
//! let mut sink = RecordingSink::new();
//! sim.run_op(&mut sink).unwrap();
//!
//! let out = sim.unknown_index("out").unwrap();
//! assert!((sink.value(0, out) - 2.5).abs() < 1e-9);
//! ```
//!
//! ## Analyses
//!
//! - Operating point ([`Simulation::run_op`])
//! - DC sweep ([`Simulation::run_dc_sweep`])
//! - AC small-signal ([`Simulation::run_ac`])
//! - Transient with LTE-controlled timesteps ([`Simulation::run_transient`])
//! - Noise ([`Simulation::run_noise`])

pub use ferrite_core as core;
pub use ferrite_devices as devices;
pub use ferrite_solver as solver;

pub use ferrite_core::{
    registry, CancelToken, Circuit, Config, Entity, EntityKind, Error as CoreError,
    IntegrationMethod, ModelCard, Nodes, ParamBundle, Parameter, RecordingSink, ResultSink,
    SimState, SteppingStrategy, VariableId, Waveform,
};
pub use ferrite_devices::register_defaults;
pub use ferrite_solver::{
    AcParams, AcSweepType, DcSweepParams, Error as SolverError, NoiseParams, Simulation,
};

/// Re-export of nalgebra's dynamic vector type.
pub use nalgebra::DVector;

/// Re-export of num-complex's scalar.
pub use num_complex::Complex;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AcParams, AcSweepType, CancelToken, Circuit, Config, DcSweepParams, Entity, EntityKind,
        IntegrationMethod, ModelCard, NoiseParams, RecordingSink, ResultSink, Simulation, Waveform,
    };
    pub use crate::{Complex, DVector};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_compiles_and_binds() {
        crate::register_defaults();
        let mut c = Circuit::new();
        c.add(Entity::new("R1", EntityKind::Resistor, &["1", "0"]).value(1e3))
            .unwrap();
        c.add(Entity::new("I1", EntityKind::CurrentSource, &["0", "1"]).value(1e-3))
            .unwrap();
        let mut sim = Simulation::new(&c, Config::default()).unwrap();
        let mut sink = RecordingSink::new();
        sim.run_op(&mut sink).unwrap();
        assert!((sink.value(0, 0) - 1.0).abs() < 1e-9, "V = I·R = 1 V");
    }
}
