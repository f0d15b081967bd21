// Utility helpers for parsing, calendar arithmetic and basic statistics.
//
// This module centralizes the "dirty" CSV/number/date handling so the
// rest of the code can assume clean, typed values.
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use num_format::{Locale, ToFormattedString};

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in CSV exports (commas, spaces).
///
/// - Accepts `Option<&str>` so callers can pass through optional fields.
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters (so `NaN` is refused).
/// - Strips thousands separators like `","` before parsing.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a UTC timestamp with a numeric offset (`2024-01-01 00:00:00+00:00`),
/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DD` taken as UTC.
pub fn parse_timestamp_utc(s: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Trimmed string or the given fallback for missing/blank cells.
pub fn text_or(s: Option<String>, fallback: &str) -> String {
    match s {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// Round to 2 decimal places, ties to even (`np.round` semantics).
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

/// First day of the month `offset` months after `year`-`month`.
pub fn add_months(year: i32, month: u32, offset: i64) -> Option<NaiveDate> {
    let index = i64::from(year) * 12 + i64::from(month) - 1 + offset;
    let y = i32::try_from(index.div_euclid(12)).ok()?;
    let m = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    NaiveDate::from_ymd_opt(y, m, 1)
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    add_months(year, month, 1).map(|d| d - Duration::days(1))
}

/// Week of the month, counting 7-day blocks from the 1st.
pub fn week_of_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7 + 1
}

/// Keep only letters, digits and underscores.
pub fn clean_string(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

// Statistics below skip undefined values.

pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let defined: Vec<f64> = values.iter().flatten().copied().collect();
    if defined.is_empty() {
        return None;
    }
    Some(defined.iter().sum::<f64>() / defined.len() as f64)
}

pub fn minimum(values: &[Option<f64>]) -> Option<f64> {
    values.iter().flatten().copied().reduce(f64::min)
}

pub fn maximum(values: &[Option<f64>]) -> Option<f64> {
    values.iter().flatten().copied().reduce(f64::max)
}

/// Sample standard deviation (ddof = 1); undefined below two values.
pub fn sample_std(values: &[Option<f64>]) -> Option<f64> {
    let defined: Vec<f64> = values.iter().flatten().copied().collect();
    if defined.len() < 2 {
        return None;
    }
    let n = defined.len() as f64;
    let m = defined.iter().sum::<f64>() / n;
    let var = defined.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Format a floating-point value with:
    // - a fixed number of decimal places, and
    // - locale-aware thousands separators (e.g., `1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let abs_n = n.abs();
    let s = format!("{:.*}", decimals, abs_n);
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

/// `format_number` for values that may be undefined.
pub fn format_optional(n: Option<f64>, decimals: usize) -> String {
    n.map(|v| format_number(v, decimals))
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console messages (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}
