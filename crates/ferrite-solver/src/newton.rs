//! Newton-Raphson iteration with Gmin and source stepping.

use ferrite_core::{ConvergenceContext, InitMode, SteppingStrategy, VariableKind};

use crate::error::{Error, Result};
use crate::simulation::Simulation;

impl Simulation {
    /// Drive one nonlinear solve at the present mode and stimulus level:
    /// load → factor → solve → convergence test, up to `limit` passes.
    ///
    /// Returns the iteration count on convergence.
    pub(crate) fn iterate(&mut self, limit: usize) -> Result<usize> {
        let mut iterations = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            self.load_pass()?;
            iterations += 1;

            if let Err(row) = self.real.factor() {
                // Let the caller pick a recovery strategy; re-arm the
                // junction initialisation for the retry.
                self.state.init_mode = InitMode::Junction;
                return Err(Error::SingularMatrix { row });
            }

            std::mem::swap(&mut self.state.prev_iter, &mut self.state.solution);
            self.real.solve_into(&mut self.state.solution);

            match self.state.init_mode {
                InitMode::Junction => {
                    // The first pass only plants junction voltages; honor
                    // explicit initial conditions next if any were given.
                    self.state.init_mode = if self.state.icvoltage.is_empty() {
                        InitMode::Normal
                    } else {
                        InitMode::Fix
                    };
                }
                InitMode::Fix => {
                    self.state.init_mode = InitMode::Normal;
                }
                InitMode::Normal => {
                    if !self.state.limited && self.delta_converged() && self.devices_convergent() {
                        return Ok(iterations);
                    }
                }
            }

            if iterations >= limit {
                return Err(Error::NoConvergence { iterations: limit });
            }
        }
    }

    /// Per-unknown delta test: voltages against `vntol`, branch currents
    /// against `abstol`.
    fn delta_converged(&self) -> bool {
        let tol = self.config.tolerances();
        for i in 0..self.nodes.unknowns() {
            let new = self.state.solution[i];
            let old = self.state.prev_iter[i];
            let floor = match self.nodes.kind(self.nodes.variable(i + 1)) {
                VariableKind::Voltage => tol.vntol,
                VariableKind::Current => tol.abstol,
            };
            if (new - old).abs() > tol.reltol * new.abs().max(old.abs()) + floor {
                return false;
            }
        }
        true
    }

    /// Every device's predicted-current veto.
    fn devices_convergent(&self) -> bool {
        let ctx = ConvergenceContext {
            state: &self.state,
            tol: self.config.tolerances(),
        };
        self.behaviors
            .iter()
            .all(|e| e.behavior.is_convergent(&ctx))
    }

    /// Solve the operating point, falling back to the configured
    /// stepping strategies when plain iteration fails.
    pub(crate) fn solve_op(&mut self) -> Result<usize> {
        self.state.init_mode = InitMode::Junction;
        self.gshunt = 0.0;
        self.state.source_factor = 1.0;

        let first = match self.iterate(self.config.itl1) {
            Ok(n) => return Ok(n),
            Err(e) if e.is_numerical() => e,
            Err(e) => return Err(e),
        };

        let strategies = match self.config.stepping {
            SteppingStrategy::GminStepping => [
                SteppingStrategy::GminStepping,
                SteppingStrategy::SourceStepping,
            ],
            SteppingStrategy::SourceStepping => [
                SteppingStrategy::SourceStepping,
                SteppingStrategy::GminStepping,
            ],
        };

        let mut last = first;
        for strategy in strategies {
            let attempt = match strategy {
                SteppingStrategy::GminStepping => {
                    log::warn!("operating point failed ({last}); trying gmin stepping");
                    self.gmin_stepping()
                }
                SteppingStrategy::SourceStepping => {
                    log::warn!("operating point failed ({last}); trying source stepping");
                    self.source_stepping()
                }
            };
            match attempt {
                Ok(n) => return Ok(n),
                Err(e) if e.is_numerical() => last = e,
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Ramp a shunt conductance on every node down towards zero, reusing
    /// each level's solution as the next starting point.
    fn gmin_stepping(&mut self) -> Result<usize> {
        let steps = self.config.gmin_steps.max(1);
        let mut total = 0;
        self.state.init_mode = InitMode::Junction;
        for i in (0..=steps).rev() {
            self.gshunt = if i == 0 {
                0.0
            } else {
                self.config.gmin * 10f64.powi(i as i32)
            };
            let n = match self.iterate(self.config.itl1) {
                Ok(n) => n,
                Err(e) => {
                    self.gshunt = 0.0;
                    return Err(e);
                }
            };
            total += n;
            self.state.init_mode = InitMode::Normal;
        }
        self.gshunt = 0.0;
        Ok(total)
    }

    /// Scale every independent source from zero to full value.
    fn source_stepping(&mut self) -> Result<usize> {
        let steps = self.config.source_steps.max(1);
        let mut total = 0;
        self.state.init_mode = InitMode::Junction;
        for i in 0..=steps {
            self.state.source_factor = i as f64 / steps as f64;
            let n = match self.iterate(self.config.itl1) {
                Ok(n) => n,
                Err(e) => {
                    self.state.source_factor = 1.0;
                    return Err(e);
                }
            };
            total += n;
            self.state.init_mode = InitMode::Normal;
        }
        self.state.source_factor = 1.0;
        Ok(total)
    }
}
