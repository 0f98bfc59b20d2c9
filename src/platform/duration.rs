//! Time quantities: wall-clock task timeouts (`--timeout 1m30s`) and
//! simulated-time limits written in the engine's units (`sim-time-limit = 1.5ms`).
//!
//! Both accept one or more `<number><unit>` terms, optionally separated by
//! whitespace, and sum them. Simulated time is exact to the attosecond.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{SimtestError, SimtestResult};

const AS_PER_S: u128 = 1_000_000_000_000_000_000;

/// Simulated-time units, largest first.
const SIM_UNITS: &[(&str, u128)] = &[
    ("d", 86_400 * AS_PER_S),
    ("h", 3_600 * AS_PER_S),
    ("min", 60 * AS_PER_S),
    ("s", AS_PER_S),
    ("ms", AS_PER_S / 1_000),
    ("us", AS_PER_S / 1_000_000),
    ("ns", AS_PER_S / 1_000_000_000),
    ("ps", AS_PER_S / 1_000_000_000_000),
    ("fs", 1_000),
    ("as", 1),
];

/// Wall-clock units, in milliseconds.
const WALL_UNITS: &[(&str, u128)] = &[("h", 3_600_000), ("m", 60_000), ("s", 1_000), ("ms", 1)];

/// Per-task wall-clock limit given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTimeout(pub Duration);

impl FromStr for TaskTimeout {
    type Err = SimtestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = sum_terms(s, "timeout", WALL_UNITS, false)?;
        let ms = u64::try_from(ms)
            .map_err(|_| SimtestError::InvalidArgument(format!("timeout {s:?} is too large")))?;
        Ok(Self(Duration::from_millis(ms)))
    }
}

/// A simulated-time quantity in attoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u128);

impl SimTime {
    pub fn from_attos(attos: u128) -> Self {
        Self(attos)
    }

    pub fn attos(self) -> u128 {
        self.0
    }

    /// Whether two optional `sim-time-limit` values name the same instant.
    /// Values that do not parse compare as text.
    pub fn same_limit(a: Option<&str>, b: Option<&str>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => match (a.parse::<Self>(), b.parse::<Self>()) {
                (Ok(x), Ok(y)) => x == y,
                _ => a.trim() == b.trim(),
            },
            (a, b) => a == b,
        }
    }
}

impl FromStr for SimTime {
    type Err = SimtestError;

    /// A bare number is taken as seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        sum_terms(s, "simulated time", SIM_UNITS, true).map(Self)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0s");
        }
        let (unit, factor) = SIM_UNITS[3..]
            .iter()
            .find(|(_, factor)| self.0 % factor == 0)
            .copied()
            .unwrap_or(("as", 1));
        write!(f, "{}{unit}", self.0 / factor)
    }
}

/// Splits `1m 30s` into `[("1", "m"), ("30", "s")]`.
fn split_terms(input: &str) -> SimtestResult<Vec<(&str, &str)>> {
    let mut terms = Vec::new();
    let mut rest = input.trim_start();
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (num, tail) = rest.split_at(num_end);
        let unit_end = tail.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        if num.is_empty() {
            return Err(SimtestError::InvalidArgument(format!("{input:?}: missing number before {rest:?}")));
        }
        terms.push((num, unit));
        rest = tail.trim_start();
        if unit.is_empty() && !rest.is_empty() {
            return Err(SimtestError::InvalidArgument(format!("{input:?}: missing unit after {num:?}")));
        }
    }
    Ok(terms)
}

fn sum_terms(input: &str, what: &str, units: &[(&str, u128)], bare_is_seconds: bool) -> SimtestResult<u128> {
    let terms = split_terms(input)?;
    if terms.is_empty() {
        return Err(SimtestError::InvalidArgument(format!("empty {what}")));
    }
    let names = units.iter().map(|(u, _)| *u).collect::<Vec<_>>().join("|");
    let mut total: u128 = 0;
    for (num, unit) in terms {
        let unit = match unit {
            "" if bare_is_seconds => "s",
            "" => {
                return Err(SimtestError::InvalidArgument(format!(
                    "invalid {what} {input:?} (missing unit; expected {names})"
                )));
            }
            other => other,
        };
        let Some(&(_, factor)) = units.iter().find(|(u, _)| *u == unit) else {
            return Err(SimtestError::InvalidArgument(format!(
                "invalid {what} unit {unit:?} in {input:?} (expected {names})"
            )));
        };
        let value = scale(num, factor).ok_or_else(|| {
            SimtestError::InvalidArgument(format!("invalid {what} {input:?}: cannot represent {num}{unit}"))
        })?;
        total = total
            .checked_add(value)
            .ok_or_else(|| SimtestError::InvalidArgument(format!("{what} {input:?} is too large")))?;
    }
    Ok(total)
}

/// `num * factor` for a decimal `num`; `None` when the product is not a whole
/// number of base units or overflows.
fn scale(num: &str, factor: u128) -> Option<u128> {
    let (whole, frac) = num.split_once('.').unwrap_or((num, ""));
    if (whole.is_empty() && frac.is_empty()) || frac.contains('.') {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(factor)?;
    let frac = frac.trim_end_matches('0');
    if !frac.is_empty() {
        let denom = 10u128.checked_pow(u32::try_from(frac.len()).ok()?)?;
        let numer = frac.parse::<u128>().ok()?.checked_mul(factor)?;
        if numer % denom != 0 {
            return None;
        }
        value = value.checked_add(numer / denom)?;
    }
    Some(value)
}
