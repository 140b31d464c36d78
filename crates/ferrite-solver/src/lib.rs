//! Analysis engines for the ferrite circuit simulator.
//!
//! The entry point is [`Simulation`]: bind a
//! [`Circuit`](ferrite_core::Circuit) against the behavior registry, then
//! run any of the drivers:
//!
//! - [`Simulation::run_op`] — DC operating point
//! - [`Simulation::run_dc_sweep`] — parameter sweep of a source
//! - [`Simulation::run_ac`] — small-signal frequency response
//! - [`Simulation::run_transient`] — adaptive time-domain integration
//! - [`Simulation::run_noise`] — output/input-referred noise PSDs
//!
//! Results stream into a [`ResultSink`](ferrite_core::ResultSink); the
//! devices must have been registered first (see
//! `ferrite_devices::register_defaults`).
//!
//! # Example
//!
//! ```rust
//! use ferrite_core::{Circuit, Config, Entity, EntityKind, RecordingSink};
//! use ferrite_solver::Simulation;
//!
//! ferrite_devices::register_defaults();
//!
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

pub mod ac;
pub mod dc;
pub mod error;
pub mod newton;
pub mod noise;
pub mod op;
pub mod simulation;
pub mod transient;

pub use ac::{generate_frequencies, AcParams, AcSweepType};
pub use dc::DcSweepParams;
pub use error::{Error, Result};
pub use noise::NoiseParams;
pub use simulation::{BehaviorEntry, Simulation};
