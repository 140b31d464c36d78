//! The binding layer: entities → behaviors → nodes, slots and handles.

use ferrite_core::{
    build_behaviors, AcceptContext, Behavior, BindContext, CancelToken, Circuit, ComplexMatrix,
    Config, ElementHandle, InitMode, LoadContext, MatrixPattern, Nodes, RealMatrix, ResultSink,
    SetupContext, SimState, VariableId,
};

use crate::error::Result;

/// One behavior with its owning entity's name. Entity insertion order is
/// preserved, which fixes stamping and accept ordering.
pub struct BehaviorEntry {
    pub entity: String,
    pub behavior: Box<dyn Behavior>,
}

/// A bound, set-up simulation over one circuit.
///
/// Construction resolves behavior sets through the process-wide registry,
/// allocates MNA variables and state slots, and freezes the matrix
/// pattern. The analysis drivers (`run_op`, `run_dc_sweep`, `run_ac`,
/// `run_transient`, `run_noise`) live in their own modules.
pub struct Simulation {
    pub(crate) nodes: Nodes,
    pub(crate) state: SimState,
    pub(crate) pattern: MatrixPattern,
    pub(crate) real: RealMatrix,
    pub(crate) complex: ComplexMatrix,
    pub(crate) behaviors: Vec<BehaviorEntry>,
    pub(crate) config: Config,
    pub(crate) cancel: CancelToken,
    /// Diagonal shunt conductance used by Gmin stepping (0 when idle).
    pub(crate) gshunt: f64,
    pub(crate) diag: Vec<ElementHandle>,
    watches: Vec<(String, String)>,
}

impl Simulation {
    /// Bind a circuit: build behavior sets, then set up.
    pub fn new(circuit: &Circuit, config: Config) -> Result<Self> {
        let mut nodes = Nodes::new();
        // Map every external pin first, so externals form a stable prefix
        // that survives `Nodes::reset`.
        for entity in circuit.iter() {
            entity.check_pins()?;
            for pin in entity.pins() {
                nodes.map(pin);
            }
        }

        let mut behaviors = Vec::new();
        for entity in circuit.iter() {
            let pins: Vec<VariableId> = entity.pins().iter().map(|p| nodes.map(p)).collect();
            let model = match &entity.model {
                Some(name) => {
                    let card =
                        circuit
                            .model(name)
                            .ok_or_else(|| ferrite_core::Error::NoSuchModel {
                                entity: entity.name().to_string(),
                                model: name.clone(),
                            })?;
                    if card.kind() != entity.kind() {
                        return Err(ferrite_core::Error::CircuitTopology(format!(
                            "{}: model `{}` is a {} model",
                            entity.name(),
                            name,
                            card.kind()
                        ))
                        .into());
                    }
                    Some(card)
                }
                None => None,
            };
            let ctx = BindContext {
                entity,
                model,
                pins: &pins,
                config: &config,
            };
            for behavior in build_behaviors(&ctx)? {
                behaviors.push(BehaviorEntry {
                    entity: entity.name().to_string(),
                    behavior,
                });
            }
        }

        let mut state = SimState::new(0);
        state.temperature = config.temperature;
        state.nominal_temperature = config.nominal_temperature;
        state.gmin = config.gmin;
        state.use_ic = config.uic;
        state.icvoltage = config.icvoltage.clone();

        let pattern = MatrixPattern::new(0);
        let real = RealMatrix::from_pattern(&pattern);
        let complex = ComplexMatrix::from_pattern(&pattern);
        let mut sim = Self {
            nodes,
            state,
            pattern,
            real,
            complex,
            behaviors,
            config,
            cancel: CancelToken::new(),
            gshunt: 0.0,
            diag: Vec::new(),
            watches: Vec::new(),
        };
        sim.setup()?;
        Ok(sim)
    }

    /// Create internal variables, state slots and matrix handles.
    ///
    /// Idempotent with [`unsetup`](Self::unsetup): a setup → unsetup →
    /// setup cycle reproduces identical numbering, pattern and slot
    /// count.
    pub fn setup(&mut self) -> Result<()> {
        self.nodes.reset();
        self.state.integrator.reset();
        for entry in &mut self.behaviors {
            entry.behavior.setup(&mut SetupContext {
                nodes: &mut self.nodes,
                state: &mut self.state,
            })?;
        }
        self.state.resize(self.nodes.unknowns());

        let mut pattern = MatrixPattern::new(self.nodes.unknowns());
        for entry in &mut self.behaviors {
            entry.behavior.allocate(&mut pattern);
        }
        // Diagonal handles for the Gmin-stepping shunt on every node.
        self.diag = (1..=self.nodes.unknowns())
            .map(|i| {
                let var = self.nodes.variable(i);
                pattern.element(var, var)
            })
            .collect();

        self.real = RealMatrix::from_pattern(&pattern);
        self.complex = ComplexMatrix::from_pattern(&pattern);
        self.pattern = pattern;
        self.state.init_mode = InitMode::Junction;
        Ok(())
    }

    /// Release matrix handles and internal variables.
    pub fn unsetup(&mut self) {
        for entry in &mut self.behaviors {
            entry.behavior.unsetup();
        }
        self.nodes.reset();
        self.state.integrator.reset();
        self.diag.clear();
    }

    /// Install a cancellation token polled between iterations and steps.
    pub fn set_cancel(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    /// The engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The node table.
    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    /// Unknown index (0-based) of a named node, for reading sink rows.
    pub fn unknown_index(&self, name: &str) -> Option<usize> {
        self.nodes.find(name).and_then(|v| {
            if v.is_ground() {
                None
            } else {
                Some(v.index() - 1)
            }
        })
    }

    /// Request that a device property be exported at every point.
    pub fn watch(&mut self, entity: &str, property: &str) {
        self.watches
            .push((entity.to_ascii_lowercase(), property.to_string()));
    }

    /// Read a device property at the present operating point.
    pub fn property(&self, entity: &str, property: &str) -> Option<f64> {
        let key = entity.to_ascii_lowercase();
        self.behaviors
            .iter()
            .filter(|e| e.entity.to_ascii_lowercase() == key)
            .find_map(|e| e.behavior.property(property))
    }

    /// Write a named parameter on an entity's behaviors (between sweep
    /// points). Returns true when some behavior accepted it.
    pub fn set_entity_parameter(&mut self, entity: &str, name: &str, value: f64) -> bool {
        let key = entity.to_ascii_lowercase();
        let mut hit = false;
        for e in &mut self.behaviors {
            if e.entity.to_ascii_lowercase() == key {
                hit |= e.behavior.set_parameter(name, value);
            }
        }
        hit
    }

    /// Run every Temperature behavior (once before loads, and whenever
    /// the temperature changes).
    pub fn temperature_pass(&mut self) -> Result<()> {
        for entry in &mut self.behaviors {
            entry.behavior.temperature(&self.state)?;
        }
        Ok(())
    }

    /// Change the operating temperature and recompute products.
    pub fn set_temperature(&mut self, kelvin: f64) -> Result<()> {
        self.state.temperature = kelvin;
        self.temperature_pass()
    }

    /// One full stamping pass: clear, load every behavior, and in
    /// transient mode the charge contributions on top.
    pub(crate) fn load_pass(&mut self) -> Result<()> {
        self.real.clear();
        self.state.limited = false;
        if self.state.init_mode == InitMode::Fix {
            self.apply_initial_conditions();
        }
        for entry in &mut self.behaviors {
            entry.behavior.load(&mut LoadContext {
                state: &mut self.state,
                matrix: &mut self.real,
            })?;
            if self.state.transient {
                entry.behavior.transient_load(&mut LoadContext {
                    state: &mut self.state,
                    matrix: &mut self.real,
                })?;
            }
        }
        if self.gshunt > 0.0 {
            for &h in &self.diag {
                self.real.add(h, self.gshunt);
            }
        }
        Ok(())
    }

    /// Force user-supplied initial node voltages into the solution.
    pub(crate) fn apply_initial_conditions(&mut self) {
        let pairs: Vec<(VariableId, f64)> = self
            .state
            .icvoltage
            .iter()
            .filter_map(|(name, &v)| self.nodes.find(name).map(|id| (id, v)))
            .collect();
        for (id, v) in pairs {
            self.state.set_voltage(id, v);
        }
    }

    /// Run every Accept behavior in entity order, then advance the
    /// integrator's history rings.
    pub(crate) fn accept_pass(&mut self) {
        for entry in &mut self.behaviors {
            entry.behavior.accept(&mut AcceptContext {
                state: &mut self.state,
            });
        }
        self.state.integrator.accept();
    }

    /// Deliver one result row to the sink.
    pub(crate) fn export(&self, sink: &mut dyn ResultSink, abscissa: f64) {
        sink.begin_point(abscissa);
        for i in 0..self.nodes.unknowns() {
            sink.node(i, self.state.solution[i]);
        }
        for (entity, property) in &self.watches {
            if let Some(v) = self.property(entity, property) {
                sink.device(entity, property, v);
            }
        }
    }
}
