//! Core data structures for the ferrite circuit simulation engine.
//!
//! Ferrite formulates circuits with Modified Nodal Analysis (MNA): the
//! unknowns are node voltages plus selected branch currents, and every
//! device *stamps* its linearised contribution into a shared matrix and
//! right-hand side. This crate provides the machinery that the device
//! library and the solvers are built on:
//!
//! - [`Nodes`] — allocation of MNA unknowns (ground is index 0)
//! - [`MatrixPattern`] / [`RealMatrix`] / [`ComplexMatrix`] — handle-based
//!   assembly with a partial-pivot LU solve
//! - [`ParamBundle`] — named parameters that remember whether the user
//!   set them (a default is not "given")
//! - [`Circuit`] — the entity graph with stable iteration order
//! - [`Behavior`] and the process-wide [`registry`] — per-entity
//!   computational objects, one per simulation phase
//! - [`SimState`] and [`Integrator`] — the shared state pool with
//!   per-device history rings and derivative slots
//!
//! # Example: stamping through element handles
//!
//! ```rust
//! use ferrite_core::{MatrixPattern, Nodes, RealMatrix};
//!
//! let mut nodes = Nodes::new();
//! let n1 = nodes.map("1");
//! let gnd = nodes.ground();
//!
//! let mut pattern = MatrixPattern::new(nodes.unknowns());
//! let h = pattern.element(n1, n1);
//! let trash = pattern.element(n1, gnd); // ground column: goes nowhere
//! let rhs = pattern.rhs(n1);
//!
//! let mut m = RealMatrix::from_pattern(&pattern);
//! m.add(h, 1e-3);        // 1 kΩ to ground
//! m.add(trash, -1e-3);
//! m.add_rhs(rhs, 1e-3);  // 1 mA injected
//!
//! m.factor().unwrap();
//! let mut x = nalgebra::DVector::zeros(0);
//! m.solve_into(&mut x);
//! assert!((x[0] - 1.0).abs() < 1e-12); // V = I·R
//! ```

pub mod behavior;
pub mod cancel;
pub mod config;
pub mod entity;
pub mod error;
pub mod integrator;
pub mod matrix;
pub mod nodes;
pub mod noise;
pub mod output;
pub mod params;
pub mod state;
pub mod units;
pub mod waveform;

pub use behavior::{
    build_behaviors, registry, AcLoadContext, AcceptContext, Behavior, BehaviorKind, BindContext,
    ConvergenceContext, Factory, LoadContext, Registry, SetupContext, ALL_KINDS,
};
pub use cancel::CancelToken;
pub use config::{Config, SteppingStrategy, Tolerances};
pub use entity::{Circuit, Entity, EntityKind, ModelCard};
pub use error::{Error, Result};
pub use integrator::{IntegrationMethod, Integrator, StateId, MAX_ORDER};
pub use matrix::{ComplexMatrix, ElementHandle, MatrixPattern, RealMatrix, RhsHandle};
pub use nodes::{Nodes, VariableId, VariableKind};
pub use noise::{thermal_voltage, NoiseKind, NoiseSource, BOLTZMANN, CHARGE};
pub use output::{RecordingSink, ResultSink};
pub use params::{ParamBundle, ParamSetter, Parameter, ParamState};
pub use state::{HistoryRing, InitMode, SimState};
pub use waveform::Waveform;
