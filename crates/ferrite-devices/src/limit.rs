//! Junction and FET voltage limiting.
//!
//! Exponential device equations overflow long before Newton converges;
//! these helpers clamp the per-iteration voltage step. When a clamp
//! fires, the limited flag tells the solver to keep iterating even if
//! the tolerances are already met.

/// Limit a PN junction voltage step.
///
/// Above the critical voltage, steps larger than `2·vt` are compressed
/// logarithmically around the previous iterate.
pub fn pnjlim(vnew: f64, vold: f64, vt: f64, vcrit: f64, limited: &mut bool) -> f64 {
    if vnew > vcrit && (vnew - vold).abs() > 2.0 * vt {
        *limited = true;
        if vold > 0.0 {
            let arg = 1.0 + (vnew - vold) / vt;
            if arg > 0.0 {
                vold + vt * arg.ln()
            } else {
                vcrit
            }
        } else {
            vt * (vnew / vt).ln()
        }
    } else {
        vnew
    }
}

/// Limit a MOSFET gate voltage step relative to the threshold.
pub fn fetlim(vnew: f64, vold: f64, vto: f64) -> f64 {
    let vtsthi = 2.0 * (vold - vto).abs() + 2.0;
    let vtstlo = vtsthi / 2.0 + 2.0;
    let vtox = vto + 3.5;
    let delv = vnew - vold;

    if vold >= vto {
        if vold >= vtox {
            if delv <= 0.0 {
                // Going off.
                if vnew >= vtox {
                    vnew.max(vold - vtstlo)
                } else {
                    vnew.max(vto + 2.0)
                }
            } else {
                vnew.min(vold + vtsthi)
            }
        } else if delv <= 0.0 {
            vnew.max(vto - 0.5)
        } else {
            vnew.min(vto + 4.0)
        }
    } else if delv <= 0.0 {
        vnew.max(vold - vtsthi)
    } else {
        // Going on.
        if vnew <= vto + 0.5 {
            vnew.min(vold + vtstlo)
        } else {
            vnew.min(vto + 0.5)
        }
    }
}

/// Limit a drain-source voltage step.
pub fn limvds(vnew: f64, vold: f64) -> f64 {
    if vold >= 3.5 {
        if vnew > vold {
            vnew.min(3.0 * vold + 2.0)
        } else if vnew < 3.5 {
            vnew.max(2.0)
        } else {
            vnew
        }
    } else if vnew > vold {
        vnew.min(4.0)
    } else {
        vnew.max(-0.5)
    }
}
