//! SPICE-style engineering value helpers.

/// Parse a value with an optional SI suffix (`1k`, `4.7MEG`, `100n`).
///
/// `M` is milli, `MEG` is mega, per SPICE convention.
pub fn parse_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }

    let upper = s.to_ascii_uppercase();
    let split = upper
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'E')))
        .unwrap_or(upper.len());
    if split == 0 {
        return None;
    }
    let value: f64 = upper[..split].parse().ok()?;
    let scale = match &upper[split..] {
        "" => 1.0,
        "T" => 1e12,
        "G" => 1e9,
        "MEG" => 1e6,
        "K" => 1e3,
        "M" => 1e-3,
        "U" => 1e-6,
        "N" => 1e-9,
        "P" => 1e-12,
        "F" => 1e-15,
        _ => return None,
    };
    Some(value * scale)
}

/// Format a value with an SI prefix for diagnostics.
pub fn format_value(value: f64) -> String {
    const STEPS: [(f64, &str); 9] = [
        (1e12, "T"),
        (1e9, "G"),
        (1e6, "M"),
        (1e3, "k"),
        (1.0, ""),
        (1e-3, "m"),
        (1e-6, "u"),
        (1e-9, "n"),
        (1e-12, "p"),
    ];
    let mag = value.abs();
    if mag == 0.0 {
        return "0".to_string();
    }
    for (scale, suffix) in STEPS {
        if mag >= scale {
            return format!("{:.4}{}", value / scale, suffix);
        }
    }
    format!("{value:.4e}")
}
