//! Time-varying stimulus shapes for independent sources.

use std::f64::consts::PI;

/// A source waveform, evaluated at simulation time.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Waveform {
    /// Constant value.
    Dc(f64),

    /// PULSE(V1 V2 TD TR TF PW PER).
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },

    /// SIN(VO VA FREQ TD THETA), damped sinusoid after the delay.
    Sin {
        vo: f64,
        va: f64,
        freq: f64,
        td: f64,
        theta: f64,
    },

    /// Piecewise linear (time, value) points sorted by time.
    Pwl(Vec<(f64, f64)>),
}

impl Waveform {
    pub fn dc(value: f64) -> Self {
        Waveform::Dc(value)
    }

    pub fn pulse(v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64) -> Self {
        Waveform::Pulse {
            v1,
            v2,
            td,
            tr,
            tf,
            pw,
            per,
        }
    }

    pub fn sin(vo: f64, va: f64, freq: f64) -> Self {
        Waveform::Sin {
            vo,
            va,
            freq,
            td: 0.0,
            theta: 0.0,
        }
    }

    pub fn pwl(points: Vec<(f64, f64)>) -> Self {
        Waveform::Pwl(points)
    }

    /// The value used for DC analyses (t = 0 shape value, except Sin/Pulse
    /// which bias at their initial level).
    pub fn dc_value(&self) -> f64 {
        match self {
            Waveform::Dc(v) => *v,
            Waveform::Pulse { v1, .. } => *v1,
            Waveform::Sin { vo, .. } => *vo,
            Waveform::Pwl(points) => points.first().map(|p| p.1).unwrap_or(0.0),
        }
    }

    /// Evaluate at a time point.
    pub fn at(&self, time: f64) -> f64 {
        match self {
            Waveform::Dc(v) => *v,

            Waveform::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => {
                if time < *td {
                    return *v1;
                }
                let mut t = time - td;
                if *per > 0.0 {
                    t %= per;
                }
                if t < *tr {
                    if *tr <= 0.0 {
                        *v2
                    } else {
                        v1 + (v2 - v1) * t / tr
                    }
                } else if t < tr + pw {
                    *v2
                } else if t < tr + pw + tf {
                    if *tf <= 0.0 {
                        *v1
                    } else {
                        v2 + (v1 - v2) * (t - tr - pw) / tf
                    }
                } else {
                    *v1
                }
            }

            Waveform::Sin {
                vo,
                va,
                freq,
                td,
                theta,
            } => {
                if time < *td {
                    *vo
                } else {
                    let t = time - td;
                    let damp = if *theta != 0.0 { (-t * theta).exp() } else { 1.0 };
                    vo + va * damp * (2.0 * PI * freq * t).sin()
                }
            }

            Waveform::Pwl(points) => {
                if points.is_empty() {
                    return 0.0;
                }
                if time <= points[0].0 {
                    return points[0].1;
                }
                for w in points.windows(2) {
                    let (t0, v0) = w[0];
                    let (t1, v1) = w[1];
                    if time <= t1 {
                        if t1 <= t0 {
                            return v1;
                        }
                        return v0 + (v1 - v0) * (time - t0) / (t1 - t0);
                    }
                }
                points.last().map(|p| p.1).unwrap_or(0.0)
            }
        }
    }
}
