//! Device model library for the ferrite engine.
//!
//! Each device kind supplies one or more [`Behavior`]s built through the
//! process-wide registry: temperature products, DC/iteration stamping,
//! complex AC stamping, charge integration, noise generators and
//! per-timepoint accept hooks. Call [`register_defaults`] once before
//! constructing simulations.

use ferrite_core::{Behavior, Entity, ModelCard};

pub mod bjt;
pub mod capacitor;
pub mod diode;
pub mod inductor;
pub mod junction;
pub mod limit;
pub mod mosfet;
pub mod register;
pub mod resistor;
pub mod sources;
pub mod switch;

pub use limit::{fetlim, limvds, pnjlim};
pub use register::register_defaults;

/// Instance-first parameter lookup: the instance bundle wins, then the
/// model card, then the device default.
pub(crate) fn merged(entity: &Entity, model: Option<&ModelCard>, name: &str, fallback: f64) -> f64 {
    if let Some(p) = entity.params.get(name) {
        if p.state() != ferrite_core::ParamState::Unset {
            return p.value();
        }
    }
    if let Some(m) = model {
        if let Some(p) = m.params.get(name) {
            if p.state() != ferrite_core::ParamState::Unset {
                return p.value();
            }
        }
    }
    fallback
}

/// True when either the instance or the model card gives the parameter.
pub(crate) fn merged_given(entity: &Entity, model: Option<&ModelCard>, name: &str) -> bool {
    entity.params.is_given(name) || model.map(|m| m.params.is_given(name)).unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod testutil {
    use ferrite_core::{
        BindContext, Config, LoadContext, MatrixPattern, Nodes, RealMatrix, Result, SetupContext,
        SimState,
    };

    use super::*;

    pub(crate) type BuildFn = fn(&BindContext<'_>) -> Result<Box<dyn Behavior>>;

    /// A single-device test harness: binds, sets up, allocates and runs
    /// the temperature pass.
    pub(crate) struct Rig {
        pub nodes: Nodes,
        pub state: SimState,
        pub pattern: MatrixPattern,
        pub behaviors: Vec<Box<dyn Behavior>>,
    }

    pub(crate) fn rig(entity: Entity, model: Option<ModelCard>, build: BuildFn) -> Rig {
        rig_with_config(entity, model, build, Config::default())
    }

    pub(crate) fn rig_with_config(
        entity: Entity,
        model: Option<ModelCard>,
        build: BuildFn,
        config: Config,
    ) -> Rig {
        let mut nodes = Nodes::new();
        let pins: Vec<_> = entity.pins().iter().map(|p| nodes.map(p)).collect();
        let ctx = BindContext {
            entity: &entity,
            model: model.as_ref(),
            pins: &pins,
            config: &config,
        };
        let mut behavior = build(&ctx).expect("behavior build");
        let mut state = SimState::new(0);
        state.temperature = config.temperature;
        state.nominal_temperature = config.nominal_temperature;
        state.gmin = config.gmin;
        {
            let mut sctx = SetupContext {
                nodes: &mut nodes,
                state: &mut state,
            };
            behavior.setup(&mut sctx).expect("setup");
        }
        state.resize(nodes.unknowns());
        let mut pattern = MatrixPattern::new(nodes.unknowns());
        behavior.allocate(&mut pattern);
        behavior.temperature(&state).expect("temperature");
        Rig {
            nodes,
            state,
            pattern,
            behaviors: vec![behavior],
        }
    }

    impl Rig {
        /// One load pass into a fresh matrix.
        pub(crate) fn load(&mut self) -> RealMatrix {
            let mut m = RealMatrix::from_pattern(&self.pattern);
            let b = &mut self.behaviors[0];
            b.load(&mut LoadContext {
                state: &mut self.state,
                matrix: &mut m,
            })
            .expect("load");
            m
        }

        /// One load + transient load pass into a fresh matrix.
        pub(crate) fn load_transient(&mut self) -> RealMatrix {
            let mut m = RealMatrix::from_pattern(&self.pattern);
            let b = &mut self.behaviors[0];
            b.load(&mut LoadContext {
                state: &mut self.state,
                matrix: &mut m,
            })
            .expect("load");
            b.transient_load(&mut LoadContext {
                state: &mut self.state,
                matrix: &mut m,
            })
            .expect("transient load");
            m
        }
    }
}
