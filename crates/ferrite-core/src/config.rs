//! Simulation configuration.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::integrator::IntegrationMethod;

/// Recovery strategy tried first when the operating point fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteppingStrategy {
    /// Ramp an artificial conductance down towards `gmin`.
    GminStepping,
    /// Scale independent sources from 0 to 1.
    SourceStepping,
}

/// Convergence tolerances shared by the Newton loop and device tests.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    /// Relative tolerance.
    pub reltol: f64,
    /// Absolute current tolerance (A).
    pub abstol: f64,
    /// Absolute voltage tolerance (V).
    pub vntol: f64,
}

/// All engine settings, with SPICE-compatible names and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relative Newton termination tolerance. Default: 1e-3.
    pub reltol: f64,
    /// Additive current tolerance floor (A). Default: 1e-12.
    pub abstol: f64,
    /// Absolute voltage tolerance (V). Default: 1e-6.
    pub vntol: f64,
    /// LTE acceptance factor. Default: 7.0.
    pub trtol: f64,
    /// Charge tolerance for LTE estimation (C). Default: 1e-14.
    pub chgtol: f64,
    /// DC iteration cap. Default: 100.
    pub itl1: usize,
    /// Transient iterations per timestep. Default: 10.
    pub itl4: usize,
    /// Minimum junction conductance (S). Default: 1e-12.
    pub gmin: f64,
    /// Operating temperature (K). Default: 300.15.
    pub temperature: f64,
    /// Nominal (model extraction) temperature (K). Default: 300.15.
    pub nominal_temperature: f64,
    /// Integration method. Default: trapezoidal.
    pub method: IntegrationMethod,
    /// Maximum integration order (2 for trap, up to 6 for Gear). Default: 2.
    pub order: usize,
    /// Maximum timestep (s); 0 means derived from tstop. Default: 0.
    pub maxstep: f64,
    /// Suggested output timestep (s).
    pub tstep: f64,
    /// Transient stop time (s).
    pub tstop: f64,
    /// Skip the operating point and use initial conditions. Default: false.
    pub uic: bool,
    /// Node-name → initial voltage map applied at transient start.
    pub icvoltage: IndexMap<String, f64>,
    /// Recovery strategy tried first. Default: Gmin stepping.
    pub stepping: SteppingStrategy,
    /// Number of decades walked by Gmin stepping. Default: 10.
    pub gmin_steps: usize,
    /// Number of source-stepping ramp points. Default: 10.
    pub source_steps: usize,
    /// Reproduce the historical base-collector convergence comparison.
    /// Default: false (the corrected test is used).
    pub legacy_delvbc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            abstol: 1e-12,
            vntol: 1e-6,
            trtol: 7.0,
            chgtol: 1e-14,
            itl1: 100,
            itl4: 10,
            gmin: 1e-12,
            temperature: 300.15,
            nominal_temperature: 300.15,
            method: IntegrationMethod::Trapezoidal,
            order: 2,
            maxstep: 0.0,
            tstep: 0.0,
            tstop: 0.0,
            uic: false,
            icvoltage: IndexMap::new(),
            stepping: SteppingStrategy::GminStepping,
            gmin_steps: 10,
            source_steps: 10,
            legacy_delvbc: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a numeric option by its SPICE-style name.
    ///
    /// Unrecognised names are reported, never silently accepted.
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        match name.to_ascii_lowercase().as_str() {
            "reltol" => self.reltol = value,
            "abstol" => self.abstol = value,
            "vntol" => self.vntol = value,
            "trtol" => self.trtol = value,
            "chgtol" => self.chgtol = value,
            "itl1" => self.itl1 = value as usize,
            "itl4" => self.itl4 = value as usize,
            "gmin" => self.gmin = value,
            "temp" | "temperature" => self.temperature = value,
            "tnom" => self.nominal_temperature = value,
            "order" | "maxord" => self.order = value as usize,
            "maxstep" => self.maxstep = value,
            "tstep" => self.tstep = value,
            "tstop" => self.tstop = value,
            other => return Err(Error::UnknownSetting(other.to_string())),
        }
        Ok(())
    }

    /// Set a named option to a keyword value (`method=gear`).
    pub fn set_keyword(&mut self, name: &str, value: &str) -> Result<()> {
        match name.to_ascii_lowercase().as_str() {
            "method" => {
                self.method = match value.to_ascii_lowercase().as_str() {
                    "trap" | "trapezoidal" => IntegrationMethod::Trapezoidal,
                    "gear" => IntegrationMethod::Gear,
                    other => return Err(Error::UnknownSetting(format!("method={other}"))),
                }
            }
            other => return Err(Error::UnknownSetting(other.to_string())),
        }
        Ok(())
    }

    /// Record an initial node voltage (`.ic v(node)=value`).
    pub fn set_ic(&mut self, node: &str, voltage: f64) {
        self.icvoltage
            .insert(node.to_ascii_lowercase(), voltage);
    }

    /// The tolerance triple used by convergence tests.
    pub fn tolerances(&self) -> Tolerances {
        Tolerances {
            reltol: self.reltol,
            abstol: self.abstol,
            vntol: self.vntol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documentation() {
        let c = Config::default();
        assert_eq!(c.reltol, 1e-3);
        assert_eq!(c.abstol, 1e-12);
        assert_eq!(c.vntol, 1e-6);
        assert_eq!(c.trtol, 7.0);
        assert_eq!(c.itl1, 100);
        assert_eq!(c.itl4, 10);
        assert_eq!(c.gmin, 1e-12);
        assert!((c.temperature - 300.15).abs() < 1e-12);
    }

    #[test]
    fn test_set_by_name() {
        let mut c = Config::default();
        c.set("RELTOL", 1e-4).unwrap();
        assert_eq!(c.reltol, 1e-4);
        c.set_keyword("method", "gear").unwrap();
        assert_eq!(c.method, IntegrationMethod::Gear);
    }

    #[test]
    fn test_unknown_setting_reported() {
        let mut c = Config::default();
        let err = c.set("rltol", 1.0).unwrap_err();
        assert!(err.to_string().contains("rltol"));
    }
}
