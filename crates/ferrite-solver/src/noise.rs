//! Noise analysis driver.
//!
//! Per frequency point: assemble and factor the small-signal system
//! once, then solve a unit-current excitation for each generator's node
//! pair. The squared magnitude of that transfer function weights the
//! generator's spectral density; contributions add in power.

use std::f64::consts::PI;

use nalgebra::DVector;
use num_complex::Complex;

use ferrite_core::{AcLoadContext, NoiseSource, ResultSink};

use crate::ac::{generate_frequencies, AcParams, AcSweepType};
use crate::error::{Error, Result};
use crate::simulation::Simulation;

/// Noise analysis parameters.
#[derive(Debug, Clone)]
pub struct NoiseParams {
    /// Output node name.
    pub output: String,
    /// Optional reference node for a differential output.
    pub reference: Option<String>,
    /// Input source name, for input-referred noise.
    pub input: Option<String>,
    /// Start frequency (Hz).
    pub fstart: f64,
    /// Stop frequency (Hz).
    pub fstop: f64,
    /// Point count (per decade/octave for log sweeps).
    pub points: usize,
    pub sweep: AcSweepType,
}

impl Simulation {
    /// Run a noise analysis. Per frequency the sink receives one row
    /// with each generator's output-referred PSD (V²/Hz) plus the totals
    /// under the names `onoise` and, when an input is named, `inoise`.
    pub fn run_noise(&mut self, params: &NoiseParams, sink: &mut dyn ResultSink) -> Result<()> {
        self.temperature_pass()?;
        self.solve_op()?;

        let out = self
            .nodes
            .find(&params.output)
            .ok_or_else(|| ferrite_core::Error::NodeNotFound(params.output.clone()))?;
        let reference = match &params.reference {
            Some(name) => Some(
                self.nodes
                    .find(name)
                    .ok_or_else(|| ferrite_core::Error::NodeNotFound(name.clone()))?,
            ),
            None => None,
        };
        let input_branch = match &params.input {
            Some(name) => {
                let key = name.to_ascii_lowercase();
                let branch = self
                    .behaviors
                    .iter()
                    .filter(|e| e.entity.to_ascii_lowercase() == key)
                    .find_map(|e| e.behavior.branch())
                    .ok_or_else(|| {
                        ferrite_core::Error::CircuitTopology(format!(
                            "noise input source `{name}` has no branch current"
                        ))
                    })?;
                Some(branch)
            }
            None => None,
        };

        // Generators reflect the bias point just solved.
        let generators: Vec<NoiseSource> = self
            .behaviors
            .iter()
            .flat_map(|e| e.behavior.noise_sources(&self.state))
            .collect();

        let n = self.nodes.unknowns();
        let ac = AcParams {
            fstart: params.fstart,
            fstop: params.fstop,
            points: params.points,
            sweep: params.sweep,
        };
        let temp = self.state.temperature;

        let mut b: DVector<Complex<f64>> = DVector::zeros(n);
        let mut x: DVector<Complex<f64>> = DVector::zeros(n);
        for freq in generate_frequencies(&ac) {
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

            sink.begin_point(freq);
            let mut total = 0.0;
            for gen in &generators {
                // Unit current injected into the generator's node pair.
                b.fill(Complex::new(0.0, 0.0));
                if !gen.pos.is_ground() {
                    b[gen.pos.index() - 1] += Complex::new(1.0, 0.0);
                }
                if !gen.neg.is_ground() {
                    b[gen.neg.index() - 1] -= Complex::new(1.0, 0.0);
                }
                self.complex.solve_vector(&b, &mut x);
                let mut h = x[out.index() - 1];
                if let Some(r) = reference {
                    h -= x[r.index() - 1];
                }
                let psd = gen.density(freq, temp) * h.norm_sqr();
                total += psd;
                sink.noise(&gen.name, psd);
            }
            sink.noise("onoise", total);

            if let Some(branch) = input_branch {
                // Transfer from the input source (unit excitation on its
                // branch row) to the output.
                b.fill(Complex::new(0.0, 0.0));
                b[branch.index() - 1] = Complex::new(1.0, 0.0);
                self.complex.solve_vector(&b, &mut x);
                let mut gain = x[out.index() - 1];
                if let Some(r) = reference {
                    gain -= x[r.index() - 1];
                }
                let g2 = gain.norm_sqr();
                if g2 > 0.0 {
                    sink.noise("inoise", total / g2);
                }
            }
        }
        Ok(())
    }
}
