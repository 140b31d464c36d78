//! Result delivery: a callback sink fed at each accepted point.

use num_complex::Complex;

/// Receives computed quantities at every accepted operating point,
/// sweep point, timepoint or frequency point.
///
/// `begin_point` opens a row keyed by the running variable (sweep value,
/// time, or frequency); the following calls belong to that row. AC rows
/// carry complex values, noise rows carry PSD contributions in V²/Hz.
pub trait ResultSink {
    /// Open a row at the given abscissa.
    fn begin_point(&mut self, abscissa: f64) {
        let _ = abscissa;
    }

    /// A node voltage (or branch current, by unknown index).
    fn node(&mut self, index: usize, value: f64) {
        let _ = (index, value);
    }

    /// A named device property.
    fn device(&mut self, name: &str, property: &str, value: f64) {
        let _ = (name, property, value);
    }

    /// A complex node value (AC analyses).
    fn node_complex(&mut self, index: usize, value: Complex<f64>) {
        let _ = (index, value);
    }

    /// A noise PSD contribution in V²/Hz.
    fn noise(&mut self, name: &str, psd: f64) {
        let _ = (name, psd);
    }
}

/// A sink that records everything, for tests and library consumers.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// One row per accepted point: (abscissa, node values by index).
    pub rows: Vec<(f64, Vec<f64>)>,
    /// Complex rows for AC analyses.
    pub complex_rows: Vec<(f64, Vec<Complex<f64>>)>,
    /// Noise contributions: (abscissa, name, PSD).
    pub noise_rows: Vec<(f64, String, f64)>,
    /// Device properties: (abscissa, device, property, value).
    pub device_rows: Vec<(f64, String, String, f64)>,
    abscissa: f64,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of unknown `index` (0-based) at row `row`.
    pub fn value(&self, row: usize, index: usize) -> f64 {
        self.rows[row].1[index]
    }

    /// Last recorded row.
    pub fn last(&self) -> Option<&(f64, Vec<f64>)> {
        self.rows.last()
    }

    /// Linear interpolation of unknown `index` at abscissa `x`.
    pub fn interpolate(&self, index: usize, x: f64) -> Option<f64> {
        if self.rows.is_empty() {
            return None;
        }
        if x <= self.rows[0].0 {
            return Some(self.rows[0].1[index]);
        }
        for w in self.rows.windows(2) {
            let (x0, ref v0) = w[0];
            let (x1, ref v1) = w[1];
            if x <= x1 {
                let a = (x - x0) / (x1 - x0);
                return Some(v0[index] * (1.0 - a) + v1[index] * a);
            }
        }
        self.rows.last().map(|r| r.1[index])
    }
}

impl ResultSink for RecordingSink {
    fn begin_point(&mut self, abscissa: f64) {
        self.abscissa = abscissa;
        self.rows.push((abscissa, Vec::new()));
    }

    fn node(&mut self, index: usize, value: f64) {
        let row = self.rows.last_mut().expect("begin_point before node");
        if row.1.len() <= index {
            row.1.resize(index + 1, 0.0);
        }
        row.1[index] = value;
    }

    fn device(&mut self, name: &str, property: &str, value: f64) {
        self.device_rows
            .push((self.abscissa, name.to_string(), property.to_string(), value));
    }

    fn node_complex(&mut self, index: usize, value: Complex<f64>) {
        if self
            .complex_rows
            .last()
            .map(|r| r.0 != self.abscissa)
            .unwrap_or(true)
        {
            self.complex_rows.push((self.abscissa, Vec::new()));
        }
        let row = self.complex_rows.last_mut().unwrap();
        if row.1.len() <= index {
            row.1.resize(index + 1, Complex::new(0.0, 0.0));
        }
        row.1[index] = value;
    }

    fn noise(&mut self, name: &str, psd: f64) {
        self.noise_rows.push((self.abscissa, name.to_string(), psd));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_rows() {
        let mut sink = RecordingSink::new();
        sink.begin_point(0.0);
        sink.node(0, 1.0);
        sink.node(1, 2.0);
        sink.begin_point(1.0);
        sink.node(0, 3.0);

        assert_eq!(sink.rows.len(), 2);
        assert_eq!(sink.value(0, 1), 2.0);
        assert_eq!(sink.value(1, 0), 3.0);
    }

    #[test]
    fn test_interpolation() {
        let mut sink = RecordingSink::new();
        sink.begin_point(0.0);
        sink.node(0, 0.0);
        sink.begin_point(2.0);
        sink.node(0, 4.0);
        assert!((sink.interpolate(0, 1.0).unwrap() - 2.0).abs() < 1e-12);
    }
}
