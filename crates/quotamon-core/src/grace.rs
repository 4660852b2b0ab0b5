//! Grace-period resolution from raw backend indicators.

use crate::entity::GraceStatus;

const SECS_PER_DAY: u64 = 86_400;
const SECS_PER_HOUR: u64 = 3_600;
const SECS_PER_MINUTE: u64 = 60;

/// Resolves a raw grace indicator plus usage/limit numbers into a
/// [`GraceStatus`].
///
/// Backends differ in whether grace is reported only when usage crosses the
/// soft limit; when usage is within it, no grace state is fabricated and the
/// raw indicator content is ignored.
pub fn resolve_grace(raw: &str, used: u64, soft: u64) -> GraceStatus {
    if used <= soft {
        return GraceStatus::none();
    }

    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "none" => GraceStatus::none(),
        "expired" => GraceStatus::expired(),
        _ => match parse_remaining_secs(trimmed) {
            Some(secs) => GraceStatus::active(secs),
            None => {
                tracing::warn!("Unparseable grace indicator {:?}, treating as none", raw);
                GraceStatus::none()
            }
        },
    }
}

/// Parses the backend's textual countdown encodings into seconds.
///
/// Accepted forms: `"7 days"`, `"23 hours"`, `"5 minutes"`, `"30 secs"`,
/// a bare integer second count, and the compact `"6d23h59m59s"`.
fn parse_remaining_secs(raw: &str) -> Option<u64> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }

    let mut parts = raw.split_whitespace();
    if let (Some(count), Some(unit)) = (parts.next(), parts.next()) {
        if parts.next().is_some() {
            return None;
        }
        let count: u64 = count.parse().ok()?;
        return unit_secs(unit).map(|unit| count * unit);
    }

    parse_compact(raw)
}

fn unit_secs(unit: &str) -> Option<u64> {
    match unit.to_ascii_lowercase().as_str() {
        "day" | "days" => Some(SECS_PER_DAY),
        "hour" | "hours" => Some(SECS_PER_HOUR),
        "min" | "mins" | "minute" | "minutes" => Some(SECS_PER_MINUTE),
        "sec" | "secs" | "second" | "seconds" => Some(1),
        _ => None,
    }
}

/// Compact Lustre-style form: digit runs each followed by a unit letter.
fn parse_compact(raw: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut seen_unit = false;

    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return None;
        }
        let count: u64 = digits.parse().ok()?;
        let unit = match c.to_ascii_lowercase() {
            'd' => SECS_PER_DAY,
            'h' => SECS_PER_HOUR,
            'm' => SECS_PER_MINUTE,
            's' => 1,
            _ => return None,
        };
        total += count * unit;
        digits.clear();
        seen_unit = true;
    }

    if !digits.is_empty() || !seen_unit {
        return None;
    }
    Some(total)
}
