use std::sync::OnceLock;

use regex::Regex;

use crate::table::Cell;

fn number_regex() -> &'static Regex {
    static NUMBER_REGEX: OnceLock<Regex> = OnceLock::new();
    NUMBER_REGEX.get_or_init(|| {
        // Sign may be separated from the digits, as in "-- 3.5 kPa --"
        Regex::new(r"(-?)\s*(\d+\.?\d*)").expect("number pattern is valid")
    })
}

/// Convert a raw cell into a reading.
///
/// Numbers pass through. Text has decimal commas normalised to points and the
/// first signed decimal number extracted, so `"-7,25 kPa"` reads as `-7.25`.
/// Anything else, NaN included, is `None`.
pub fn parse_value(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(v) if v.is_nan() => None,
        Cell::Number(v) => Some(*v),
        Cell::Text(s) => parse_text_value(s),
        Cell::Empty | Cell::Bool(_) | Cell::DateTime(_) => None,
    }
}

fn parse_text_value(raw: &str) -> Option<f64> {
    let normalized = raw.replace(',', ".");
    let caps = number_regex().captures(&normalized)?;
    let digits = caps.get(2)?.as_str().trim_end_matches('.');
    let magnitude: f64 = digits.parse().ok()?;
    if caps.get(1).is_some_and(|sign| !sign.as_str().is_empty()) {
        Some(-magnitude)
    } else {
        Some(magnitude)
    }
}
