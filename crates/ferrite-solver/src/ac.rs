//! AC small-signal analysis driver.

use std::f64::consts::PI;

use nalgebra::DVector;
use num_complex::Complex;

use ferrite_core::{AcLoadContext, ResultSink};

use crate::error::{Error, Result};
use crate::simulation::Simulation;

/// Frequency spacing of an AC sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcSweepType {
    /// Evenly spaced points over the whole range.
    Linear,
    /// Points per decade, logarithmic.
    Decade,
    /// Points per octave, logarithmic.
    Octave,
}

/// AC analysis parameters.
#[derive(Debug, Clone)]
pub struct AcParams {
    /// Start frequency (Hz).
    pub fstart: f64,
    /// Stop frequency (Hz).
    pub fstop: f64,
    /// Point count (total for linear, per decade/octave otherwise).
    pub points: usize,
    pub sweep: AcSweepType,
}

/// Generate the frequency points of a sweep.
pub fn generate_frequencies(params: &AcParams) -> Vec<f64> {
    let n = params.points.max(1);
    let mut out = Vec::new();
    match params.sweep {
        AcSweepType::Linear => {
            if n == 1 {
                return vec![params.fstart];
            }
            let step = (params.fstop - params.fstart) / (n - 1) as f64;
            for i in 0..n {
                out.push(params.fstart + i as f64 * step);
            }
        }
        AcSweepType::Decade | AcSweepType::Octave => {
            let base: f64 = if params.sweep == AcSweepType::Decade {
                10.0
            } else {
                2.0
            };
            let spans = (params.fstop / params.fstart).log(base);
            let total = (spans * n as f64).ceil() as usize + 1;
            let step = spans / (total - 1) as f64;
            for i in 0..total {
                out.push(params.fstart * base.powf(i as f64 * step));
            }
        }
    }
    out
}

impl Simulation {
    /// Small-signal analysis around the operating point: solve the bias,
    /// then the complex system at each frequency.
    pub fn run_ac(&mut self, params: &AcParams, sink: &mut dyn ResultSink) -> Result<()> {
        self.temperature_pass()?;
        self.solve_op()?;

        let mut x: DVector<Complex<f64>> = DVector::zeros(0);
        for freq in generate_frequencies(params) {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let omega = 2.0 * PI * freq;
            self.complex.clear();
            for entry in &mut self.behaviors {
                entry.behavior.ac_load(&mut AcLoadContext {
                    state: &self.state,
                    matrix: &mut self.complex,
                    omega,
                });
            }
            self.complex
                .factor()
                .map_err(|row| Error::SingularMatrix { row })?;
            self.complex.solve_into(&mut x);

            sink.begin_point(freq);
            for (i, v) in x.iter().enumerate() {
                sink.node_complex(i, *v);
            }
        }
        Ok(())
    }
}
