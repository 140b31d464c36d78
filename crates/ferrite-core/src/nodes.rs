//! Variable allocation for the MNA system: node voltages and branch currents.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// Identifies one MNA unknown. Index 0 is ground; indices >= 1 are rows
/// and columns of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) usize);

impl VariableId {
    /// The ground node.
    pub const GROUND: VariableId = VariableId(0);

    /// Raw index of this variable (0 = ground).
    pub fn index(self) -> usize {
        self.0
    }

    /// Check whether this is the ground node.
    pub fn is_ground(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// What an MNA unknown represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// A node voltage.
    Voltage,
    /// A branch current (voltage sources, inductors).
    Current,
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    kind: VariableKind,
    /// External variables come from the entity graph and survive `reset`;
    /// internal nodes and branch currents are released.
    external: bool,
}

/// Allocates contiguous MNA indices for node voltages and branch currents.
///
/// Ground is always index 0 and is never part of the solve. External nodes
/// are mapped by name on first use; internal device nodes are derived from
/// the owning entity's name (`Q1#col`) and must be unique.
#[derive(Debug)]
pub struct Nodes {
    vars: Vec<Variable>,
    by_name: HashMap<String, usize>,
}

impl Nodes {
    pub fn new() -> Self {
        let ground = Variable {
            name: "0".to_string(),
            kind: VariableKind::Voltage,
            external: true,
        };
        let mut by_name = HashMap::new();
        by_name.insert("0".to_string(), 0);
        by_name.insert("gnd".to_string(), 0);
        Self {
            vars: vec![ground],
            by_name,
        }
    }

    /// The ground node.
    pub fn ground(&self) -> VariableId {
        VariableId::GROUND
    }

    /// Map an external node name to a variable, creating it on first use.
    ///
    /// Names are case-insensitive; `0` and `gnd` are ground.
    pub fn map(&mut self, name: &str) -> VariableId {
        let key = name.to_ascii_lowercase();
        if let Some(&idx) = self.by_name.get(&key) {
            return VariableId(idx);
        }
        let idx = self.vars.len();
        self.vars.push(Variable {
            name: key.clone(),
            kind: VariableKind::Voltage,
            external: true,
        });
        self.by_name.insert(key, idx);
        VariableId(idx)
    }

    /// Create an internal node owned by a device.
    ///
    /// The name is derived by suffixing the owner (`Q1#col`). Creating the
    /// same internal node twice is a wiring error.
    pub fn create_internal(&mut self, owner: &str, suffix: &str) -> Result<VariableId> {
        let key = format!("{}#{}", owner.to_ascii_lowercase(), suffix);
        if self.by_name.contains_key(&key) {
            return Err(Error::DuplicateNode(key));
        }
        let idx = self.vars.len();
        self.vars.push(Variable {
            name: key.clone(),
            kind: VariableKind::Voltage,
            external: false,
        });
        self.by_name.insert(key, idx);
        Ok(VariableId(idx))
    }

    /// Create a branch-current unknown for a device (voltage source, inductor).
    pub fn create_branch(&mut self, owner: &str) -> Result<VariableId> {
        let key = format!("{}#branch", owner.to_ascii_lowercase());
        if self.by_name.contains_key(&key) {
            return Err(Error::DuplicateNode(key));
        }
        let idx = self.vars.len();
        self.vars.push(Variable {
            name: key.clone(),
            kind: VariableKind::Current,
            external: false,
        });
        self.by_name.insert(key, idx);
        Ok(VariableId(idx))
    }

    /// Total number of variables including ground.
    pub fn count(&self) -> usize {
        self.vars.len()
    }

    /// Number of unknowns in the solve (everything except ground).
    pub fn unknowns(&self) -> usize {
        self.vars.len() - 1
    }

    /// The variable at a raw index (0 = ground).
    pub fn variable(&self, index: usize) -> VariableId {
        assert!(index < self.vars.len(), "variable index out of range");
        VariableId(index)
    }

    /// Look up a variable by name without creating it.
    pub fn find(&self, name: &str) -> Option<VariableId> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|&i| VariableId(i))
    }

    /// Name of a variable.
    pub fn name(&self, id: VariableId) -> &str {
        &self.vars[id.0].name
    }

    /// Kind of a variable.
    pub fn kind(&self, id: VariableId) -> VariableKind {
        self.vars[id.0].kind
    }

    /// Release all internal and branch variables, keeping externals.
    ///
    /// External indices are preserved so a circuit can be set up again
    /// after `unsetup` and obtain identical numbering.
    pub fn reset(&mut self) {
        self.vars.retain(|v| v.external);
        self.by_name.clear();
        for (idx, v) in self.vars.iter().enumerate() {
            self.by_name.insert(v.name.clone(), idx);
        }
        self.by_name.insert("gnd".to_string(), 0);
    }
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_is_zero() {
        let mut nodes = Nodes::new();
        assert!(nodes.ground().is_ground());
        assert_eq!(nodes.map("0"), VariableId::GROUND);
        assert_eq!(nodes.map("GND"), VariableId::GROUND);
    }

    #[test]
    fn test_map_is_idempotent() {
        let mut nodes = Nodes::new();
        let a = nodes.map("in");
        let b = nodes.map("IN");
        assert_eq!(a, b);
        assert_eq!(nodes.count(), 2);
    }

    #[test]
    fn test_internal_node_naming() {
        let mut nodes = Nodes::new();
        let c = nodes.create_internal("Q1", "col").unwrap();
        assert_eq!(nodes.name(c), "q1#col");
        assert!(nodes.create_internal("Q1", "col").is_err());
    }

    #[test]
    fn test_reset_preserves_externals() {
        let mut nodes = Nodes::new();
        let a = nodes.map("1");
        let b = nodes.map("2");
        nodes.create_internal("D1", "pos").unwrap();
        nodes.create_branch("V1").unwrap();
        assert_eq!(nodes.count(), 5);

        nodes.reset();
        assert_eq!(nodes.count(), 3);
        assert_eq!(nodes.map("1"), a);
        assert_eq!(nodes.map("2"), b);
        assert!(nodes.find("d1#pos").is_none());

        // Re-creating internals after reset yields the same indices.
        let p = nodes.create_internal("D1", "pos").unwrap();
        assert_eq!(p.index(), 3);
    }

    #[test]
    fn test_branch_kind() {
        let mut nodes = Nodes::new();
        let br = nodes.create_branch("L1").unwrap();
        assert_eq!(nodes.kind(br), VariableKind::Current);
        assert_eq!(nodes.kind(VariableId::GROUND), VariableKind::Voltage);
    }
}
