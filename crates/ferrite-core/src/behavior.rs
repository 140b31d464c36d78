//! Behaviors: per-entity computational objects, one per simulation phase,
//! and the process-wide registry that constructs them.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::config::{Config, Tolerances};
use crate::entity::{Entity, EntityKind, ModelCard};
use crate::error::{Error, Result};
use crate::matrix::{ComplexMatrix, MatrixPattern, RealMatrix};
use crate::nodes::{Nodes, VariableId};
use crate::noise::NoiseSource;
use crate::state::SimState;

/// The closed set of behavior kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    /// Recompute temperature-dependent constants.
    Temperature,
    /// DC / Newton-iteration stamping.
    Load,
    /// Complex stamping at a frequency.
    AcLoad,
    /// Charge integration and its matrix contribution.
    Transient,
    /// Per-generator noise spectral densities.
    Noise,
    /// Commit per-timepoint state.
    Accept,
}

/// Every kind, in the order behavior sets are resolved.
pub const ALL_KINDS: [BehaviorKind; 6] = [
    BehaviorKind::Temperature,
    BehaviorKind::Load,
    BehaviorKind::AcLoad,
    BehaviorKind::Transient,
    BehaviorKind::Noise,
    BehaviorKind::Accept,
];

/// Context for behavior construction.
pub struct BindContext<'a> {
    pub entity: &'a Entity,
    /// The referenced model card, already resolved.
    pub model: Option<&'a ModelCard>,
    /// External pins mapped to variables, in pin order.
    pub pins: &'a [VariableId],
    pub config: &'a Config,
}

/// Context for the setup phase: create internal nodes, branch currents
/// and integrator state slots here.
pub struct SetupContext<'a> {
    pub nodes: &'a mut Nodes,
    pub state: &'a mut SimState,
}

/// Context for real-valued stamping.
pub struct LoadContext<'a> {
    pub state: &'a mut SimState,
    pub matrix: &'a mut RealMatrix,
}

/// Context for complex stamping at one frequency.
pub struct AcLoadContext<'a> {
    pub state: &'a SimState,
    pub matrix: &'a mut ComplexMatrix,
    /// Angular frequency (rad/s).
    pub omega: f64,
}

/// Context for per-device convergence tests.
pub struct ConvergenceContext<'a> {
    pub state: &'a SimState,
    pub tol: Tolerances,
}

/// Context for committing per-timepoint state.
pub struct AcceptContext<'a> {
    pub state: &'a mut SimState,
}

/// A per-entity computational object specialised to one or more phases.
///
/// Every method has a default no-op body; a behavior implements the
/// methods for the kinds it reports in [`kinds`](Behavior::kinds). All
/// stamping must be additive (accumulate into handles, never assign), and
/// a behavior never touches another device's state.
#[allow(unused_variables)]
pub trait Behavior {
    /// The kinds this behavior implements.
    fn kinds(&self) -> &'static [BehaviorKind];

    /// Create internal nodes, branch variables and state slots.
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Obtain matrix element and RHS handles (setup phase only).
    fn allocate(&mut self, pattern: &mut MatrixPattern) {}

    /// Release matrix handles; setup may run again afterwards.
    fn unsetup(&mut self) {}

    /// Recompute temperature-dependent constants.
    fn temperature(&mut self, state: &SimState) -> Result<()> {
        Ok(())
    }

    /// Stamp the linearised device at the present solution.
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Stamp integrated charge contributions (transient iterations only,
    /// after `load`).
    fn transient_load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Per-device convergence veto using predicted branch currents.
    fn is_convergent(&self, ctx: &ConvergenceContext<'_>) -> bool {
        true
    }

    /// Stamp the small-signal device at a frequency.
    fn ac_load(&mut self, ctx: &mut AcLoadContext<'_>) {}

    /// Commit per-timepoint state after acceptance.
    fn accept(&mut self, ctx: &mut AcceptContext<'_>) {}

    /// Propose a maximum next timestep from this device's truncation
    /// error; infinity when indifferent.
    fn truncate(&self, state: &SimState) -> f64 {
        f64::INFINITY
    }

    /// The device's noise generators at the present operating point.
    fn noise_sources(&self, state: &SimState) -> Vec<NoiseSource> {
        Vec::new()
    }

    /// Write a named parameter between sweep points. Returns false when
    /// the name is not recognised.
    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        false
    }

    /// Read a named operating-point property (`ic`, `gm`, ...), used for
    /// device-property export through the result sink.
    fn property(&self, name: &str) -> Option<f64> {
        None
    }

    /// The device's branch-current variable, if it owns one.
    fn branch(&self) -> Option<VariableId> {
        None
    }
}

/// Builds one behavior for an entity.
pub type BuildFn = fn(&BindContext<'_>) -> Result<Box<dyn Behavior>>;

/// A registered constructor and the kinds its product implements.
#[derive(Debug, Clone, Copy)]
pub struct Factory {
    pub covers: &'static [BehaviorKind],
    pub build: BuildFn,
}

/// Process-wide mapping from entity kind to behavior factories.
///
/// Read-mostly: registration happens at startup, never mid-simulation.
#[derive(Debug, Default)]
pub struct Registry {
    factories: HashMap<EntityKind, Vec<Factory>>,
}

impl Registry {
    /// Register a factory for an entity kind.
    pub fn register(&mut self, kind: EntityKind, factory: Factory) {
        self.factories.entry(kind).or_default().push(factory);
    }

    /// Resolve the factory set for an entity kind.
    ///
    /// The requested list is walked in reverse; a kind already covered by
    /// a previously selected factory is skipped, so one behavior
    /// implementing several kinds is instantiated once.
    pub fn resolve(&self, kind: EntityKind, requested: &[BehaviorKind]) -> Vec<Factory> {
        let Some(entries) = self.factories.get(&kind) else {
            return Vec::new();
        };
        let mut chosen: Vec<Factory> = Vec::new();
        for want in requested.iter().rev() {
            if chosen.iter().any(|f| f.covers.contains(want)) {
                continue;
            }
            if let Some(f) = entries.iter().find(|f| f.covers.contains(want)) {
                chosen.push(*f);
            }
        }
        chosen
    }

    /// True when any factory exists for the kind.
    pub fn knows(&self, kind: EntityKind) -> bool {
        self.factories
            .get(&kind)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Drop every registration (test teardown / re-initialisation).
    pub fn reset(&mut self) {
        self.factories.clear();
    }
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

/// The process-wide registry.
pub fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry::default()))
}

/// Build the full behavior set for one entity.
pub fn build_behaviors(ctx: &BindContext<'_>) -> Result<Vec<Box<dyn Behavior>>> {
    let reg = registry().read().expect("behavior registry poisoned");
    let kind = ctx.entity.kind();
    if !reg.knows(kind) {
        return Err(Error::NoBehavior(kind.to_string()));
    }
    let factories = reg.resolve(kind, &ALL_KINDS);
    let mut out = Vec::with_capacity(factories.len());
    for f in factories {
        out.push((f.build)(ctx)?);
    }
    // Entity insertion order is preserved by the caller; within one
    // entity, keep resolution order deterministic as well.
    out.reverse();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Multi;
    impl Behavior for Multi {
        fn kinds(&self) -> &'static [BehaviorKind] {
            &[BehaviorKind::Load, BehaviorKind::AcLoad]
        }
    }

    struct AcceptOnly;
    impl Behavior for AcceptOnly {
        fn kinds(&self) -> &'static [BehaviorKind] {
            &[BehaviorKind::Accept]
        }
    }

    fn build_multi(_: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        Ok(Box::new(Multi))
    }
    fn build_accept(_: &BindContext<'_>) -> Result<Box<dyn Behavior>> {
        Ok(Box::new(AcceptOnly))
    }

    #[test]
    fn test_multi_kind_factory_instantiated_once() {
        let mut reg = Registry::default();
        reg.register(
            EntityKind::Resistor,
            Factory {
                covers: &[BehaviorKind::Load, BehaviorKind::AcLoad],
                build: build_multi,
            },
        );
        reg.register(
            EntityKind::Resistor,
            Factory {
                covers: &[BehaviorKind::Accept],
                build: build_accept,
            },
        );

        let chosen = reg.resolve(EntityKind::Resistor, &ALL_KINDS);
        // One factory covers Load + AcLoad, a second covers Accept: the
        // AcLoad request must not instantiate the first factory twice.
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn test_unknown_kind_resolves_empty() {
        let reg = Registry::default();
        assert!(reg.resolve(EntityKind::Diode, &ALL_KINDS).is_empty());
        assert!(!reg.knows(EntityKind::Diode));
    }

    #[test]
    fn test_reset_supports_reinitialisation() {
        let mut reg = Registry::default();
        reg.register(
            EntityKind::Resistor,
            Factory {
                covers: &[BehaviorKind::Load],
                build: build_multi,
            },
        );
        assert!(reg.knows(EntityKind::Resistor));
        reg.reset();
        assert!(!reg.knows(EntityKind::Resistor));
    }
}
