//! Shared simulation state: solution vectors, history rings, modes.

use indexmap::IndexMap;
use nalgebra::DVector;

use crate::integrator::Integrator;
use crate::nodes::VariableId;

/// A fixed-depth circular buffer of the last k accepted values of a
/// continuously-valued quantity.
///
/// Writes go to the current slot; `advance` commits it and seeds the next
/// slot with a copy, so reads at offset `k` always return the k-th most
/// recent accepted value.
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    buf: Vec<T>,
    head: usize,
}

impl<T: Clone> HistoryRing<T> {
    pub fn new(depth: usize, init: T) -> Self {
        assert!(depth > 0);
        Self {
            buf: vec![init; depth],
            head: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.buf.len()
    }

    /// The working (not yet accepted) value.
    pub fn current(&self) -> &T {
        &self.buf[self.head]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.buf[self.head]
    }

    /// The value `k` accepted points back (`k = 0` is the working value).
    pub fn previous(&self, k: usize) -> &T {
        debug_assert!(k < self.buf.len());
        let idx = (self.head + self.buf.len() - k) % self.buf.len();
        &self.buf[idx]
    }

    /// Commit the working value and seed the next working slot with a
    /// copy of it.
    pub fn advance(&mut self) {
        let head = self.head;
        self.head = (self.head + 1) % self.buf.len();
        let carried = self.buf[head].clone();
        self.buf[self.head] = carried;
    }

    /// Overwrite every slot.
    pub fn fill(&mut self, value: T) {
        for slot in &mut self.buf {
            *slot = value.clone();
        }
    }
}

/// Newton initialisation mode (three-valued state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Force junction voltages to their critical values (or zero for
    /// devices marked off) to give the first iteration a fighting chance.
    Junction,
    /// Honor user-supplied initial-condition flags.
    Fix,
    /// Read voltages from the present solution.
    Normal,
}

/// State shared by every behavior during one simulation run.
///
/// Behaviors read the solution and the mode flags; inter-device coupling
/// happens only through the matrix and this state, never directly.
#[derive(Debug)]
pub struct SimState {
    /// Present solution; index 0 of the unknowns is variable 1.
    pub solution: DVector<f64>,
    /// Previous Newton iterate.
    pub prev_iter: DVector<f64>,
    /// Solution at the last accepted timepoint (transient restore point).
    pub prev_accepted: DVector<f64>,
    /// Operating temperature (K).
    pub temperature: f64,
    /// Nominal model temperature (K).
    pub nominal_temperature: f64,
    /// Junction shunt conductance currently in force (raised during Gmin
    /// stepping).
    pub gmin: f64,
    /// Independent sources scale by this during source stepping.
    pub source_factor: f64,
    /// Newton initialisation mode.
    pub init_mode: InitMode,
    /// Set by junction limiting: the solver must keep iterating even if
    /// tolerances are met.
    pub limited: bool,
    /// Present simulation time (transient).
    pub time: f64,
    /// True while the transient driver is active.
    pub transient: bool,
    /// True during the charge-initialisation load at t = 0.
    pub tran_init: bool,
    /// Use initial conditions instead of an operating point.
    pub use_ic: bool,
    /// Node-name → initial voltage map.
    pub icvoltage: IndexMap<String, f64>,
    /// The shared integrator with all derivative slots.
    pub integrator: Integrator,
}

impl SimState {
    pub fn new(unknowns: usize) -> Self {
        Self {
            solution: DVector::zeros(unknowns),
            prev_iter: DVector::zeros(unknowns),
            prev_accepted: DVector::zeros(unknowns),
            temperature: 300.15,
            nominal_temperature: 300.15,
            gmin: 1e-12,
            source_factor: 1.0,
            init_mode: InitMode::Junction,
            limited: false,
            time: 0.0,
            transient: false,
            tran_init: false,
            use_ic: false,
            icvoltage: IndexMap::new(),
            integrator: Integrator::new(),
        }
    }

    /// Resize the vectors for a new unknown count, zeroing everything.
    pub fn resize(&mut self, unknowns: usize) {
        self.solution = DVector::zeros(unknowns);
        self.prev_iter = DVector::zeros(unknowns);
        self.prev_accepted = DVector::zeros(unknowns);
    }

    /// Voltage (or branch current) of a variable; ground reads 0.
    #[inline]
    pub fn voltage(&self, id: VariableId) -> f64 {
        if id.is_ground() {
            0.0
        } else {
            self.solution[id.index() - 1]
        }
    }

    /// Previous-iterate value of a variable.
    #[inline]
    pub fn prev_voltage(&self, id: VariableId) -> f64 {
        if id.is_ground() {
            0.0
        } else {
            self.prev_iter[id.index() - 1]
        }
    }

    /// Overwrite one entry of the solution (initial conditions).
    pub fn set_voltage(&mut self, id: VariableId, v: f64) {
        if !id.is_ground() {
            self.solution[id.index() - 1] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_advance_semantics() {
        let mut ring = HistoryRing::new(3, 0.0);
        *ring.current_mut() = 1.0;
        ring.advance();
        // The new working slot carries the committed value forward.
        assert_eq!(*ring.current(), 1.0);
        assert_eq!(*ring.previous(1), 1.0);

        *ring.current_mut() = 2.0;
        ring.advance();
        *ring.current_mut() = 3.0;
        assert_eq!(*ring.previous(1), 2.0);
        assert_eq!(*ring.previous(2), 1.0);
    }

    #[test]
    fn test_ring_wraparound() {
        let mut ring = HistoryRing::new(2, 0.0);
        for i in 1..=5 {
            *ring.current_mut() = i as f64;
            ring.advance();
        }
        assert_eq!(*ring.previous(1), 5.0);
    }

    #[test]
    fn test_state_voltage_accessors() {
        let mut state = SimState::new(2);
        state.solution[0] = 1.5;
        let n1 = crate::nodes::VariableId(1);
        assert_eq!(state.voltage(n1), 1.5);
        assert_eq!(state.voltage(VariableId::GROUND), 0.0);
        state.set_voltage(VariableId::GROUND, 9.0); // silently ignored
        assert_eq!(state.voltage(VariableId::GROUND), 0.0);
    }
}
