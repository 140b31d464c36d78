//! Depletion-region charge and capacitance for PN junctions.

/// Charge and small-signal capacitance of a junction depletion region.
///
/// Below `fc·vj` the closed-form integral of `czero·(1 − v/vj)^(−m)` is
/// used; above it the capacitance is extrapolated linearly so the charge
/// stays C¹-continuous through the crossover.
pub fn depletion_charge(v: f64, czero: f64, vj: f64, m: f64, fc: f64) -> (f64, f64) {
    if czero == 0.0 {
        return (0.0, 0.0);
    }
    let dep_cap = fc * vj;
    if v < dep_cap {
        let arg = 1.0 - v / vj;
        let sarg = arg.powf(-m);
        let charge = vj * czero * (1.0 - arg * sarg) / (1.0 - m);
        let cap = czero * sarg;
        (charge, cap)
    } else {
        // Linear extrapolation coefficients, continuous at fc·vj.
        let f1 = vj * (1.0 - (1.0 - fc).powf(1.0 - m)) / (1.0 - m);
        let f2 = (1.0 - fc).powf(1.0 + m);
        let f3 = 1.0 - fc * (1.0 + m);
        let czof2 = czero / f2;
        let charge = czero * f1
            + czof2 * (f3 * (v - dep_cap) + (m / (2.0 * vj)) * (v * v - dep_cap * dep_cap));
        let cap = czof2 * (f3 + m * v / vj);
        (charge, cap)
    }
}
