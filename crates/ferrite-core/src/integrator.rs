//! Implicit integration formulas over per-device derivative slots.
//!
//! Each reactive quantity (a junction charge, an inductor flux) lives in a
//! slot holding short histories of its value and time derivative. During a
//! transient iteration a device writes the new value, calls
//! [`integrate`](Integrator::integrate), and stamps the Norton companion
//! obtained from [`jacobian`](Integrator::jacobian) and
//! [`rhs_current`](Integrator::rhs_current). After acceptance the
//! histories advance; the local truncation error of every slot bounds the
//! next timestep.

use nalgebra::{DMatrix, DVector};

use crate::state::HistoryRing;

/// Highest supported Gear order.
pub const MAX_ORDER: usize = 6;

/// Ring depth: enough history for order-6 LTE estimation.
const DEPTH: usize = MAX_ORDER + 2;

/// Implicit integration family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationMethod {
    /// Trapezoidal rule (order 2, A-stable); order 1 is backward Euler.
    Trapezoidal,
    /// Gear / BDF formulas, orders 1 through 6.
    Gear,
}

/// Handle to one derivative slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateId(usize);

#[derive(Debug, Clone)]
struct Slot {
    values: HistoryRing<f64>,
    derivs: HistoryRing<f64>,
}

/// The shared integrator: owns the slots, the timestep history and the
/// active formula coefficients.
#[derive(Debug, Clone)]
pub struct Integrator {
    method: IntegrationMethod,
    target_order: usize,
    order: usize,
    delta: f64,
    /// Accepted step history; the current (prospective) step is `deltas[0]`.
    deltas: HistoryRing<f64>,
    /// Formula coefficients; `ag[0]` multiplies the present value.
    ag: [f64; MAX_ORDER + 1],
    slots: Vec<Slot>,
    /// Accepted steps so far; limits the usable order at startup.
    accepted: usize,
    trtol: f64,
    reltol: f64,
    chgtol: f64,
}

impl Integrator {
    pub fn new() -> Self {
        Self {
            method: IntegrationMethod::Trapezoidal,
            target_order: 2,
            order: 1,
            delta: 0.0,
            deltas: HistoryRing::new(DEPTH, 0.0),
            ag: [0.0; MAX_ORDER + 1],
            slots: Vec::new(),
            accepted: 0,
            trtol: 7.0,
            reltol: 1e-3,
            chgtol: 1e-14,
        }
    }

    /// Allocate a derivative slot (setup phase).
    pub fn alloc(&mut self) -> StateId {
        let id = StateId(self.slots.len());
        self.slots.push(Slot {
            values: HistoryRing::new(DEPTH, 0.0),
            derivs: HistoryRing::new(DEPTH, 0.0),
        });
        id
    }

    /// Number of allocated slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Drop all slots (unsetup).
    pub fn reset(&mut self) {
        self.slots.clear();
        self.accepted = 0;
    }

    /// Configure the method for a transient run and set the first step.
    pub fn begin(
        &mut self,
        method: IntegrationMethod,
        order: usize,
        first_delta: f64,
        trtol: f64,
        reltol: f64,
        chgtol: f64,
    ) {
        self.method = method;
        self.target_order = match method {
            IntegrationMethod::Trapezoidal => order.clamp(1, 2),
            IntegrationMethod::Gear => order.clamp(1, MAX_ORDER),
        };
        self.trtol = trtol;
        self.reltol = reltol;
        self.chgtol = chgtol;
        self.accepted = 0;
        self.deltas.fill(first_delta);
        self.prospect(first_delta);
    }

    /// Current (prospective) timestep.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Order of the active formula.
    pub fn order(&self) -> usize {
        self.order
    }

    /// An accepted step `k` steps back (k = 1 is the step just taken).
    pub fn previous_delta(&self, k: usize) -> f64 {
        *self.deltas.previous(k)
    }

    /// Propose a step size for the upcoming timepoint and refresh the
    /// formula coefficients.
    pub fn prospect(&mut self, delta: f64) {
        self.delta = delta;
        *self.deltas.current_mut() = delta;
        // Early steps lack history: start at order 1 and ramp up as
        // accepted timepoints accumulate.
        self.order = self.target_order.min(self.accepted.max(1));
        self.compute_coefficients();
    }

    /// Shrink the step after a rejection; history is untouched.
    pub fn retry(&mut self, delta: f64) {
        self.prospect(delta);
    }

    /// Commit the timepoint: advance every ring. Called after all Accept
    /// behaviors have run.
    pub fn accept(&mut self) {
        for slot in &mut self.slots {
            slot.values.advance();
            slot.derivs.advance();
        }
        self.deltas.advance();
        self.accepted += 1;
    }

    /// Fill a slot's history with an initial value and zero derivative
    /// (the state at the DC operating point).
    pub fn initialize(&mut self, id: StateId, value: f64) {
        self.slots[id.0].values.fill(value);
        self.slots[id.0].derivs.fill(0.0);
    }

    pub fn value(&self, id: StateId) -> f64 {
        *self.slots[id.0].values.current()
    }

    pub fn set_value(&mut self, id: StateId, value: f64) {
        *self.slots[id.0].values.current_mut() = value;
    }

    /// Value `k` accepted timepoints back.
    pub fn previous(&self, id: StateId, k: usize) -> f64 {
        *self.slots[id.0].values.previous(k)
    }

    pub fn derivative(&self, id: StateId) -> f64 {
        *self.slots[id.0].derivs.current()
    }

    /// Apply the active formula to the slot's current value.
    pub fn integrate(&mut self, id: StateId) {
        let slot = &self.slots[id.0];
        let deriv = match self.method {
            IntegrationMethod::Trapezoidal if self.order >= 2 => {
                self.ag[0] * (*slot.values.current() - *slot.values.previous(1))
                    - *slot.derivs.previous(1)
            }
            _ => {
                // Backward Euler and the Gear family share the linear form.
                let mut d = 0.0;
                for (i, &a) in self.ag.iter().enumerate().take(self.order + 1) {
                    d += a * *slot.values.previous(i);
                }
                d
            }
        };
        *self.slots[id.0].derivs.current_mut() = deriv;
    }

    /// The conductance a capacitance contributes: `g = cap · ag[0]`.
    pub fn jacobian(&self, cap: f64) -> f64 {
        cap * self.ag[0]
    }

    /// Norton-companion RHS contribution: `g·v − dq/dt`.
    pub fn rhs_current(&self, id: StateId, g: f64, v: f64) -> f64 {
        g * v - self.derivative(id)
    }

    /// Propose the largest next step that keeps this slot's local
    /// truncation error inside `trtol` times the charge tolerance.
    ///
    /// Returns infinity when there is not yet enough history to estimate.
    pub fn truncate(&self, id: StateId) -> f64 {
        let k = self.order;
        let points = k + 2;
        if self.accepted + 1 < points {
            return f64::INFINITY;
        }

        // Times of the history entries, measured back from the prospective
        // timepoint: 0, -delta, -(delta + d1), ...
        let mut times = [0.0; DEPTH];
        let mut acc = 0.0;
        for (i, t) in times.iter_mut().enumerate().take(points) {
            *t = -acc;
            acc += if i == 0 {
                self.delta
            } else {
                *self.deltas.previous(i)
            };
        }

        // Newton divided difference of order k+1 approximates
        // x^(k+1) / (k+1)!.
        let slot = &self.slots[id.0];
        let mut table = [0.0; DEPTH];
        let mut xmax: f64 = 0.0;
        for i in 0..points {
            table[i] = *slot.values.previous(i);
            xmax = xmax.max(table[i].abs());
        }
        for level in 1..points {
            for i in 0..(points - level) {
                table[i] = (table[i] - table[i + 1]) / (times[i] - times[i + level]);
            }
        }
        let dd = table[0];

        let error_coeff = match self.method {
            IntegrationMethod::Trapezoidal if k >= 2 => 1.0 / 12.0,
            _ => 1.0 / (k as f64 + 1.0),
        };
        let mut factorial = 1.0;
        for i in 2..=(k + 1) {
            factorial *= i as f64;
        }
        let lte = error_coeff * factorial * dd.abs() * self.delta.powi(k as i32 + 1);
        let tol = self.reltol * xmax + self.chgtol;

        if lte <= f64::MIN_POSITIVE {
            return f64::INFINITY;
        }
        self.delta * (self.trtol * tol / lte).powf(1.0 / (k as f64 + 1.0))
    }

    fn compute_coefficients(&mut self) {
        self.ag = [0.0; MAX_ORDER + 1];
        match self.method {
            IntegrationMethod::Trapezoidal => {
                if self.order >= 2 {
                    self.ag[0] = 2.0 / self.delta;
                    self.ag[1] = -2.0 / self.delta;
                } else {
                    self.ag[0] = 1.0 / self.delta;
                    self.ag[1] = -1.0 / self.delta;
                }
            }
            IntegrationMethod::Gear => {
                let k = self.order;
                // Normalised history times tau_i = (t_i - t_now) / delta.
                let mut tau = [0.0; MAX_ORDER + 1];
                let mut acc = 0.0;
                for (i, t) in tau.iter_mut().enumerate().take(k + 1) {
                    *t = -acc / self.delta;
                    acc += if i == 0 {
                        self.delta
                    } else {
                        *self.deltas.previous(i)
                    };
                }
                // Exactness on polynomials up to degree k:
                //   sum_i a_i tau_i^j = delta_{j,1}  for j = 0..k.
                let m = DMatrix::from_fn(k + 1, k + 1, |j, i| {
                    if j == 0 {
                        1.0
                    } else {
                        tau[i].powi(j as i32)
                    }
                });
                let mut rhs = DVector::zeros(k + 1);
                if k >= 1 {
                    rhs[1] = 1.0;
                }
                match m.lu().solve(&rhs) {
                    Some(a) => {
                        for i in 0..=k {
                            self.ag[i] = a[i] / self.delta;
                        }
                    }
                    None => {
                        // Degenerate history (coincident timepoints): fall
                        // back to backward Euler.
                        self.order = 1;
                        self.ag[0] = 1.0 / self.delta;
                        self.ag[1] = -1.0 / self.delta;
                    }
                }
            }
        }
    }
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Solve x' = -x, x(0) = 1 implicitly with the slot API.
    fn decay(method: IntegrationMethod, order: usize, dt: f64, tstop: f64) -> f64 {
        let mut integ = Integrator::new();
        let slot = integ.alloc();
        integ.begin(method, order, dt, 7.0, 1e-3, 1e-14);
        integ.initialize(slot, 1.0);
        let mut x = 1.0;
        let mut t = 0.0;
        while t + dt <= tstop + 1e-12 {
            // Implicit solve of  x_new' = -x_new  with the active formula:
            //   deriv(x_new) = ag0*x_new + rest  =>  x_new = -rest/(1+ag0)
            integ.set_value(slot, 0.0);
            integ.integrate(slot);
            let rest = integ.derivative(slot); // formula terms without x_new
            let ag0 = integ.jacobian(1.0);
            x = -rest / (1.0 + ag0);
            integ.set_value(slot, x);
            integ.integrate(slot);
            integ.accept();
            t += dt;
            integ.prospect(dt);
        }
        x
    }

    #[test]
    fn test_trapezoidal_order_two_accuracy() {
        let x = decay(IntegrationMethod::Trapezoidal, 2, 0.01, 1.0);
        let exact = (-1.0_f64).exp();
        // Second-order accurate: error well below dt = 1e-2.
        assert!(
            (x - exact).abs() < 1e-4,
            "x(1) = {x}, exact = {exact}, err = {}",
            (x - exact).abs()
        );
    }

    #[test]
    fn test_backward_euler_is_first_order() {
        let coarse = decay(IntegrationMethod::Gear, 1, 0.02, 1.0);
        let fine = decay(IntegrationMethod::Gear, 1, 0.01, 1.0);
        let exact = (-1.0_f64).exp();
        let ratio = (coarse - exact).abs() / (fine - exact).abs();
        assert!(
            (ratio - 2.0).abs() < 0.3,
            "halving dt should halve the error, ratio = {ratio}"
        );
    }

    #[test]
    fn test_gear2_beats_gear1() {
        let g1 = decay(IntegrationMethod::Gear, 1, 0.01, 1.0);
        let g2 = decay(IntegrationMethod::Gear, 2, 0.01, 1.0);
        let exact = (-1.0_f64).exp();
        assert!(
            (g2 - exact).abs() < (g1 - exact).abs() / 5.0,
            "gear-2 err {} vs gear-1 err {}",
            (g2 - exact).abs(),
            (g1 - exact).abs()
        );
    }

    #[test]
    fn test_gear_coefficients_fixed_step() {
        // BDF2 with uniform steps: x' ≈ (3/2 x0 - 2 x1 + 1/2 x2)/dt.
        let mut integ = Integrator::new();
        let _slot = integ.alloc();
        integ.begin(IntegrationMethod::Gear, 2, 1.0, 7.0, 1e-3, 1e-14);
        integ.accept();
        integ.prospect(1.0);
        integ.accept();
        integ.prospect(1.0);
        assert_eq!(integ.order(), 2);
        assert!((integ.ag[0] - 1.5).abs() < 1e-12, "ag0 = {}", integ.ag[0]);
        assert!((integ.ag[1] + 2.0).abs() < 1e-12, "ag1 = {}", integ.ag[1]);
        assert!((integ.ag[2] - 0.5).abs() < 1e-12, "ag2 = {}", integ.ag[2]);
    }

    #[test]
    fn test_jacobian_and_rhs_current() {
        let mut integ = Integrator::new();
        let slot = integ.alloc();
        integ.begin(IntegrationMethod::Trapezoidal, 1, 1e-3, 7.0, 1e-3, 1e-14);
        integ.initialize(slot, 0.0);
        integ.set_value(slot, 1e-6);
        integ.integrate(slot);
        // BE: dq/dt = (1e-6 - 0)/1e-3 = 1e-3.
        assert!((integ.derivative(slot) - 1e-3).abs() < 1e-15);
        let g = integ.jacobian(1e-6); // C/dt = 1e-3
        assert!((g - 1e-3).abs() < 1e-15);
        let ieq = integ.rhs_current(slot, g, 1.0);
        assert!((ieq - (g * 1.0 - 1e-3)).abs() < 1e-18);
    }

    #[test]
    fn test_truncate_flags_cubic_charge() {
        // Charge q(t) = t³ has nonzero third derivative: trapezoidal LTE
        // must be finite and shrink with larger steps.
        let mut integ = Integrator::new();
        let slot = integ.alloc();
        let dt = 0.1;
        integ.begin(IntegrationMethod::Trapezoidal, 2, dt, 7.0, 1e-3, 1e-14);
        let mut t = 0.0;
        integ.initialize(slot, 0.0);
        for _ in 0..5 {
            t += dt;
            integ.set_value(slot, t * t * t);
            integ.integrate(slot);
            integ.accept();
            integ.prospect(dt);
        }
        integ.set_value(slot, (t + dt).powi(3));
        let proposal = integ.truncate(slot);
        assert!(proposal.is_finite(), "LTE should be estimable");
        assert!(proposal > 0.0);
    }

    #[test]
    fn test_truncate_without_history_is_unbounded() {
        let mut integ = Integrator::new();
        let slot = integ.alloc();
        integ.begin(IntegrationMethod::Trapezoidal, 2, 1e-3, 7.0, 1e-3, 1e-14);
        assert!(integ.truncate(slot).is_infinite());
    }
}
