//! MNA matrix and RHS facade with element-handle assembly.
//!
//! Devices obtain element handles once during setup; during every Newton
//! iteration they accumulate into the handles. The structural pattern is
//! frozen after setup, so the same handles address both the real matrix
//! (DC, transient) and the complex matrix (AC, noise) built from one
//! [`MatrixPattern`].

use std::collections::HashMap;

use nalgebra::{ComplexField, DMatrix, DVector};
use num_complex::Complex;

/// Opaque, stable reference to one matrix cell. Handle 0 is the trash
/// element: stamps addressed at the ground row or column accumulate there
/// and never reach the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHandle(usize);

/// Opaque, stable reference to one RHS row (0 = trash).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhsHandle(usize);

impl ElementHandle {
    /// The trash element.
    pub const TRASH: ElementHandle = ElementHandle(0);
}

impl RhsHandle {
    /// The trash row.
    pub const TRASH: RhsHandle = RhsHandle(0);
}

use crate::nodes::VariableId;

/// Structural pattern of the MNA system, built during setup.
#[derive(Debug, Clone)]
pub struct MatrixPattern {
    size: usize,
    /// 0-based (row, col) of each element slot; slot 0 is the trash.
    positions: Vec<(usize, usize)>,
    by_pos: HashMap<(usize, usize), usize>,
    /// 0-based row of each RHS slot; slot 0 is the trash.
    rhs_rows: Vec<usize>,
    rhs_by_row: HashMap<usize, usize>,
}

impl MatrixPattern {
    /// Create a pattern for `size` unknowns (ground excluded).
    pub fn new(size: usize) -> Self {
        Self {
            size,
            positions: vec![(usize::MAX, usize::MAX)],
            by_pos: HashMap::new(),
            rhs_rows: vec![usize::MAX],
            rhs_by_row: HashMap::new(),
        }
    }

    /// Number of unknowns.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get (or allocate) the element at the crossing of two variables.
    ///
    /// Requests touching ground return the trash element.
    pub fn element(&mut self, row: VariableId, col: VariableId) -> ElementHandle {
        if row.is_ground() || col.is_ground() {
            return ElementHandle::TRASH;
        }
        let pos = (row.index() - 1, col.index() - 1);
        debug_assert!(pos.0 < self.size && pos.1 < self.size);
        if let Some(&slot) = self.by_pos.get(&pos) {
            return ElementHandle(slot);
        }
        let slot = self.positions.len();
        self.positions.push(pos);
        self.by_pos.insert(pos, slot);
        ElementHandle(slot)
    }

    /// Get (or allocate) the RHS accumulator for a variable's row.
    pub fn rhs(&mut self, row: VariableId) -> RhsHandle {
        if row.is_ground() {
            return RhsHandle::TRASH;
        }
        let r = row.index() - 1;
        if let Some(&slot) = self.rhs_by_row.get(&r) {
            return RhsHandle(slot);
        }
        let slot = self.rhs_rows.len();
        self.rhs_rows.push(r);
        self.rhs_by_row.insert(r, slot);
        RhsHandle(slot)
    }

    /// Number of allocated element slots (excluding the trash).
    pub fn element_count(&self) -> usize {
        self.positions.len() - 1
    }
}

/// Assembled MNA system over one scalar type, with delegated LU solve.
///
/// The factorisation is partial-pivot Doolittle LU; on a zero pivot the
/// failing row (1-based unknown index) is reported so the caller can name
/// the offending node.
#[derive(Debug, Clone)]
pub struct Matrix<T> {
    size: usize,
    positions: Vec<(usize, usize)>,
    values: Vec<T>,
    rhs_rows: Vec<usize>,
    rhs_values: Vec<T>,
    lu: DMatrix<T>,
    perm: Vec<usize>,
    factored: bool,
}

/// Real-valued MNA system (operating point, DC sweep, transient).
pub type RealMatrix = Matrix<f64>;

/// Complex-valued MNA system (AC, noise).
pub type ComplexMatrix = Matrix<Complex<f64>>;

impl<T: ComplexField<RealField = f64> + Copy> Matrix<T> {
    /// Build a zeroed system over a frozen pattern.
    pub fn from_pattern(pattern: &MatrixPattern) -> Self {
        let n = pattern.size;
        Self {
            size: n,
            positions: pattern.positions.clone(),
            values: vec![T::zero(); pattern.positions.len()],
            rhs_rows: pattern.rhs_rows.clone(),
            rhs_values: vec![T::zero(); pattern.rhs_rows.len()],
            lu: DMatrix::zeros(n, n),
            perm: (0..n).collect(),
            factored: false,
        }
    }

    /// Number of unknowns.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Zero every element and RHS accumulator.
    pub fn clear(&mut self) {
        self.values.fill(T::zero());
        self.rhs_values.fill(T::zero());
        self.factored = false;
    }

    /// Accumulate into a matrix element.
    #[inline]
    pub fn add(&mut self, handle: ElementHandle, value: T) {
        self.values[handle.0] += value;
    }

    /// Overwrite a matrix element.
    #[inline]
    pub fn set(&mut self, handle: ElementHandle, value: T) {
        self.values[handle.0] = value;
    }

    /// Accumulate into an RHS row.
    #[inline]
    pub fn add_rhs(&mut self, handle: RhsHandle, value: T) {
        self.rhs_values[handle.0] += value;
    }

    /// Scatter the element slots into a dense matrix (tests, diagnostics).
    pub fn dense(&self) -> DMatrix<T> {
        let mut a = DMatrix::zeros(self.size, self.size);
        for (slot, &(r, c)) in self.positions.iter().enumerate().skip(1) {
            a[(r, c)] += self.values[slot];
        }
        a
    }

    /// Scatter the RHS slots into a dense vector.
    pub fn rhs_dense(&self) -> DVector<T> {
        let mut b = DVector::zeros(self.size);
        for (slot, &r) in self.rhs_rows.iter().enumerate().skip(1) {
            b[r] += self.rhs_values[slot];
        }
        b
    }

    /// Factor the assembled matrix.
    ///
    /// Returns `Err(row)` (1-based unknown index) when the pivot in that
    /// row becomes zero.
    pub fn factor(&mut self) -> Result<(), usize> {
        let n = self.size;
        self.lu = self.dense();
        self.perm.clear();
        self.perm.extend(0..n);

        for k in 0..n {
            let mut p = k;
            let mut max = self.lu[(k, k)].modulus();
            for r in (k + 1)..n {
                let m = self.lu[(r, k)].modulus();
                if m > max {
                    max = m;
                    p = r;
                }
            }
            if !(max > 0.0) {
                self.factored = false;
                return Err(k + 1);
            }
            if p != k {
                self.lu.swap_rows(k, p);
                self.perm.swap(k, p);
            }
            let piv = self.lu[(k, k)];
            for r in (k + 1)..n {
                let f = self.lu[(r, k)] / piv;
                self.lu[(r, k)] = f;
                for c in (k + 1)..n {
                    let v = self.lu[(r, c)] - f * self.lu[(k, c)];
                    self.lu[(r, c)] = v;
                }
            }
        }
        self.factored = true;
        Ok(())
    }

    /// Solve the factored system against the accumulated RHS.
    ///
    /// `x` is resized to the unknown count. Must follow a successful
    /// [`factor`](Self::factor).
    pub fn solve_into(&self, x: &mut DVector<T>) {
        let b = self.rhs_dense();
        self.solve_vector(&b, x);
    }

    /// Solve the factored system against a caller-supplied RHS, reusing
    /// the factorisation (transfer-function solves in noise analysis).
    pub fn solve_vector(&self, b: &DVector<T>, x: &mut DVector<T>) {
        debug_assert!(self.factored, "solve before factor");
        let n = self.size;
        if x.len() != n {
            *x = DVector::zeros(n);
        }
        // Forward substitution with the permuted RHS (unit lower factor).
        for i in 0..n {
            let mut sum = b[self.perm[i]];
            for j in 0..i {
                sum -= self.lu[(i, j)] * x[j];
            }
            x[i] = sum;
        }
        // Back substitution.
        for i in (0..n).rev() {
            let mut sum = x[i];
            for j in (i + 1)..n {
                sum -= self.lu[(i, j)] * x[j];
            }
            x[i] = sum / self.lu[(i, i)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Nodes;

    fn two_node_pattern() -> (MatrixPattern, [VariableId; 2]) {
        let mut nodes = Nodes::new();
        let a = nodes.map("1");
        let b = nodes.map("2");
        (MatrixPattern::new(nodes.unknowns()), [a, b])
    }

    #[test]
    fn test_ground_maps_to_trash() {
        let (mut pat, [a, _]) = two_node_pattern();
        let h = pat.element(VariableId::GROUND, a);
        assert_eq!(h, ElementHandle::TRASH);
        assert_eq!(pat.rhs(VariableId::GROUND), RhsHandle::TRASH);
        assert_eq!(pat.element_count(), 0);
    }

    #[test]
    fn test_handles_are_deduplicated() {
        let (mut pat, [a, b]) = two_node_pattern();
        let h1 = pat.element(a, b);
        let h2 = pat.element(a, b);
        assert_eq!(h1, h2);
        assert_eq!(pat.element_count(), 1);
    }

    #[test]
    fn test_conductance_stamp_and_solve() {
        // Voltage divider driven by a 5 mA current source into node 1,
        // R1 = 1k from 1 to 2, R2 = 1k from 2 to ground.
        let (mut pat, [a, b]) = two_node_pattern();
        let aa = pat.element(a, a);
        let ab = pat.element(a, b);
        let ba = pat.element(b, a);
        let bb = pat.element(b, b);
        let ra = pat.rhs(a);

        let mut m = RealMatrix::from_pattern(&pat);
        let g = 1e-3;
        m.add(aa, g);
        m.add(bb, g);
        m.add(ab, -g);
        m.add(ba, -g);
        m.add(bb, g); // R2 to ground
        m.add_rhs(ra, 5e-3);

        m.factor().expect("factor should succeed");
        let mut x = DVector::zeros(0);
        m.solve_into(&mut x);

        assert!((x[0] - 10.0).abs() < 1e-9, "V(1) = {} (expected 10)", x[0]);
        assert!((x[1] - 5.0).abs() < 1e-9, "V(2) = {} (expected 5)", x[1]);
    }

    #[test]
    fn test_singular_reports_row() {
        let (mut pat, [a, b]) = two_node_pattern();
        let aa = pat.element(a, a);
        let _bb = pat.element(b, b);
        let mut m = RealMatrix::from_pattern(&pat);
        m.add(aa, 1.0);
        // Row 2 left empty: the pivot there is zero.
        let err = m.factor().unwrap_err();
        assert_eq!(err, 2);
    }

    #[test]
    fn test_complex_solve() {
        let (mut pat, [a, b]) = two_node_pattern();
        let aa = pat.element(a, a);
        let ra = pat.rhs(a);
        // Second unknown needs a diagonal to stay regular.
        let bb = pat.element(b, b);

        let mut m = ComplexMatrix::from_pattern(&pat);
        m.add(aa, Complex::new(1.0, 1.0));
        m.add(bb, Complex::new(1.0, 0.0));
        m.add_rhs(ra, Complex::new(2.0, 0.0));
        m.factor().expect("complex factor");
        let mut x = DVector::zeros(0);
        m.solve_into(&mut x);
        // (1+j) x = 2  =>  x = 1 - j
        assert!((x[0].re - 1.0).abs() < 1e-12);
        assert!((x[0].im + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_clear_resets_accumulators() {
        let (mut pat, [a, _]) = two_node_pattern();
        let aa = pat.element(a, a);
        let mut m = RealMatrix::from_pattern(&pat);
        m.add(aa, 3.0);
        m.clear();
        assert_eq!(m.dense()[(0, 0)], 0.0);
    }
}
