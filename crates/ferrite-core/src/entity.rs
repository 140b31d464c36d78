//! The entity graph: devices, model cards, and their wiring.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::params::ParamBundle;
use crate::waveform::Waveform;

/// Device kinds known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EntityKind {
    Resistor,
    Capacitor,
    Inductor,
    Diode,
    Bjt,
    Mosfet,
    /// Voltage-controlled switch.
    VSwitch,
    /// Current-controlled switch.
    ISwitch,
    VoltageSource,
    CurrentSource,
    Vcvs,
    Vccs,
    Cccs,
    Ccvs,
}

impl EntityKind {
    /// Name of the parameter a bare positional value addresses.
    pub fn principal_param(self) -> Option<&'static str> {
        match self {
            EntityKind::Resistor => Some("r"),
            EntityKind::Capacitor => Some("c"),
            EntityKind::Inductor => Some("l"),
            EntityKind::Diode => Some("area"),
            EntityKind::Bjt => Some("area"),
            EntityKind::Mosfet => None,
            EntityKind::VSwitch | EntityKind::ISwitch => None,
            EntityKind::VoltageSource | EntityKind::CurrentSource => Some("dc"),
            EntityKind::Vcvs | EntityKind::Ccvs => Some("gain"),
            EntityKind::Vccs => Some("gm"),
            EntityKind::Cccs => Some("gain"),
        }
    }

    /// Number of external pins this kind wires.
    pub fn pin_count(self) -> usize {
        match self {
            EntityKind::Bjt => 3,
            EntityKind::Mosfet => 4,
            EntityKind::VSwitch | EntityKind::Vcvs | EntityKind::Vccs => 4,
            _ => 2,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Resistor => "resistor",
            EntityKind::Capacitor => "capacitor",
            EntityKind::Inductor => "inductor",
            EntityKind::Diode => "diode",
            EntityKind::Bjt => "bjt",
            EntityKind::Mosfet => "mosfet",
            EntityKind::VSwitch => "vswitch",
            EntityKind::ISwitch => "iswitch",
            EntityKind::VoltageSource => "vsource",
            EntityKind::CurrentSource => "isource",
            EntityKind::Vcvs => "vcvs",
            EntityKind::Vccs => "vccs",
            EntityKind::Cccs => "cccs",
            EntityKind::Ccvs => "ccvs",
        };
        f.write_str(s)
    }
}

/// One circuit component: a name, a kind, pins bound to node names, and a
/// parameter bundle. Immutable once simulation starts, except for
/// parameter edits between sweep points.
#[derive(Debug, Clone)]
pub struct Entity {
    name: String,
    kind: EntityKind,
    pins: Vec<String>,
    pub params: ParamBundle,
    /// Referenced model card name, if any.
    pub model: Option<String>,
    /// Stimulus shape (independent sources only).
    pub waveform: Option<Waveform>,
    /// Controlling source name (CCCS, CCVS, current-controlled switch).
    pub control: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind, pins: &[&str]) -> Self {
        let mut params = ParamBundle::new();
        if let Some(p) = kind.principal_param() {
            params = params.with_principal(p);
        }
        Self {
            name: name.into(),
            kind,
            pins: pins.iter().map(|s| s.to_string()).collect(),
            params,
            model: None,
            waveform: None,
            control: None,
        }
    }

    /// Set the principal parameter (builder form).
    pub fn value(mut self, v: f64) -> Self {
        self.params.set_principal(v);
        self
    }

    /// Set a named parameter (builder form).
    pub fn param(mut self, name: &str, v: f64) -> Self {
        self.params.set(name, v);
        self
    }

    /// Reference a model card (builder form).
    pub fn model(mut self, name: &str) -> Self {
        self.model = Some(name.to_ascii_lowercase());
        self
    }

    /// Attach a stimulus waveform (builder form).
    pub fn waveform(mut self, w: Waveform) -> Self {
        self.waveform = Some(w);
        self
    }

    /// Name a controlling voltage source (builder form).
    pub fn controlled_by(mut self, source: &str) -> Self {
        self.control = Some(source.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn pins(&self) -> &[String] {
        &self.pins
    }

    /// Validate the pin count against the kind's expectation.
    pub fn check_pins(&self) -> Result<()> {
        let expected = self.kind.pin_count();
        if self.pins.len() != expected {
            return Err(Error::PinCountMismatch {
                entity: self.name.clone(),
                expected,
                got: self.pins.len(),
            });
        }
        Ok(())
    }
}

/// A shared parameter set referenced by many instances.
#[derive(Debug, Clone)]
pub struct ModelCard {
    name: String,
    kind: EntityKind,
    pub params: ParamBundle,
}

impl ModelCard {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: Into::<String>::into(name).to_ascii_lowercase(),
            kind,
            params: ParamBundle::new(),
        }
    }

    pub fn param(mut self, name: &str, v: f64) -> Self {
        self.params.set(name, v);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }
}

/// The parsed entity graph the engine consumes.
///
/// Iteration order is insertion order; the engine relies on it for
/// reproducible stamping and accept ordering.
#[derive(Debug, Clone, Default)]
pub struct Circuit {
    entities: IndexMap<String, Entity>,
    models: IndexMap<String, ModelCard>,
}

impl Circuit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: Entity) -> Result<()> {
        let key = entity.name().to_ascii_lowercase();
        if self.entities.contains_key(&key) {
            return Err(Error::DuplicateEntity(entity.name().to_string()));
        }
        self.entities.insert(key, entity);
        Ok(())
    }

    pub fn add_model(&mut self, model: ModelCard) -> Result<()> {
        let key = model.name().to_string();
        if self.models.contains_key(&key) {
            return Err(Error::DuplicateEntity(key));
        }
        self.models.insert(key, model);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Entity> {
        self.entities.shift_remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(&name.to_ascii_lowercase())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.entities.get_mut(&name.to_ascii_lowercase())
    }

    pub fn model(&self, name: &str) -> Option<&ModelCard> {
        self.models.get(&name.to_ascii_lowercase())
    }

    /// Entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
