//! Display formatting helpers
//!
//! Pure functions turning raw amounts and timestamps into display strings.
//! No state, no I/O.

use chrono::{DateTime, Utc};

use crate::types::LAMPORTS_PER_SOL;

/// Format a number with comma separators (e.g. 1234567.891 -> "1,234,567.89")
pub fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let formatted = format!("{:.prec$}", value.abs(), prec = decimals);
    let (integer_part, decimal_part) = match formatted.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (formatted.as_str(), ""),
    };

    let mut grouped = String::with_capacity(integer_part.len() + integer_part.len() / 3);
    for (i, ch) in integer_part.chars().enumerate() {
        if i > 0 && (integer_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };

    if decimal_part.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, decimal_part)
    }
}

/// Compact notation: 1_250_000 -> "1.25M"
pub fn format_compact(value: f64) -> String {
    const UNITS: [(f64, &str); 4] = [(1e3, "K"), (1e6, "M"), (1e9, "B"), (1e12, "T")];

    if !value.is_finite() {
        return "0".to_string();
    }
    let round2 = |x: f64| (x * 100.0).round() / 100.0;
    let abs = value.abs();

    let mut unit = UNITS.iter().rposition(|(scale, _)| abs >= *scale);
    let shown = unit.map_or(round2(abs), |i| round2(abs / UNITS[i].0));
    // 999_999 rounds to 1000K; carry it into the next unit.
    if shown >= 1000.0 {
        unit = Some(unit.map_or(0, |i| (i + 1).min(UNITS.len() - 1)));
    }

    match unit {
        Some(i) => {
            let (scale, suffix) = UNITS[i];
            let sign = if value < 0.0 { "-" } else { "" };
            let text = format!("{:.2}", round2(abs / scale));
            let trimmed = text.trim_end_matches('0').trim_end_matches('.');
            format!("{}{}{}", sign, trimmed, suffix)
        }
        None => format_number(value, 2),
    }
}

/// Convert a raw base-unit amount to whole tokens
pub fn to_ui_amount(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Raw base-unit amount rendered as whole tokens with grouping
pub fn format_token_amount(raw: u64, decimals: u8, shown_decimals: usize) -> String {
    format_number(to_ui_amount(raw, decimals), shown_decimals)
}

/// Lamports rendered as SOL with 4 decimals
pub fn format_lamports_to_sol(lamports: u64) -> String {
    format_number(lamports as f64 / LAMPORTS_PER_SOL as f64, 4)
}

/// USD value; sub-cent values keep significant digits instead of rounding to $0.00
pub fn format_usd(value: f64) -> String {
    if value != 0.0 && value.abs() < 0.01 {
        return format!("${:.6}", value);
    }
    let body = format_number(value.abs(), 2);
    if value < 0.0 {
        format!("-${}", body)
    } else {
        format!("${}", body)
    }
}

/// Percentage with adaptive precision: tiny shares keep 4 decimals
pub fn format_percentage(value: f64) -> String {
    if value != 0.0 && value.abs() < 0.01 {
        format!("{:.4}%", value)
    } else {
        format!("{:.2}%", value)
    }
}

/// Shorten an address to "abcd...wxyz"
pub fn shorten_address(address: &str, chars: usize) -> String {
    let len = address.chars().count();
    if len <= chars * 2 + 3 {
        return address.to_string();
    }
    let head: String = address.chars().take(chars).collect();
    let tail: String = address.chars().skip(len - chars).collect();
    format!("{}...{}", head, tail)
}

/// Absolute timestamp "YYYY-MM-DD HH:MM:SS UTC"
pub fn format_timestamp(unix_secs: i64) -> String {
    match DateTime::<Utc>::from_timestamp(unix_secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".to_string(),
    }
}

/// Relative time against `now` (both unix seconds): "just now", "5m ago", "3h ago", "2d ago"
pub fn format_time_ago(unix_secs: i64, now: i64) -> String {
    let delta = now.saturating_sub(unix_secs);
    match delta {
        d if d < 10 => "just now".to_string(),
        d if d < 60 => format!("{}s ago", d),
        d if d < 3_600 => format!("{}m ago", d / 60),
        d if d < 86_400 => format!("{}h ago", d / 3_600),
        d => format!("{}d ago", d / 86_400),
    }
}
