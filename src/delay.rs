//! Response delays.
//!
//! Delays are written as duration strings (`"150ms"`, `"1.5s"`, `"1m30s"`)
//! or as plain numbers of milliseconds. A delay that cannot be understood is
//! a definition error recovered as zero, never a request-time failure.

use crate::error::DelayError;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// A simulated latency applied before a mock answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Delay(Duration);

impl Delay {
    pub const ZERO: Delay = Delay(Duration::ZERO);

    pub fn from_millis(ms: u64) -> Self {
        Delay(Duration::from_millis(ms))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse a duration string, falling back to zero on malformed input.
    pub fn parse_lenient(input: &str) -> Self {
        match parse_duration(input) {
            Ok(d) => Delay(d),
            Err(e) => {
                warn!(delay = %input, error = %e, "Ignoring malformed delay, using zero");
                Delay::ZERO
            }
        }
    }
}

impl From<Duration> for Delay {
    fn from(d: Duration) -> Self {
        Delay(d)
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            f.write_str("0s")
        } else if nanos % 1_000_000 == 0 {
            write!(f, "{}ms", nanos / 1_000_000)
        } else {
            write!(f, "{}ns", nanos)
        }
    }
}

/// Parse a duration string made of `<number><unit>` groups.
///
/// Units: `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, DelayError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DelayError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(DelayError::Invalid(input.to_string()));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| DelayError::Invalid(input.to_string()))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(DelayError::Invalid(input.to_string())),
            other => {
                return Err(DelayError::UnknownUnit {
                    unit: other.to_string(),
                    input: input.to_string(),
                })
            }
        };
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DelayError::Invalid(input.to_string()));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

impl Serialize for Delay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Delay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DelayVisitor)
    }
}

struct DelayVisitor;

impl<'de> Visitor<'de> for DelayVisitor {
    type Value = Delay;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string or a number of milliseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Delay, E> {
        Ok(Delay::parse_lenient(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Delay, E> {
        Ok(Delay::from_millis(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Delay, E> {
        if v < 0 {
            warn!(delay = v, "Ignoring negative delay, using zero");
            return Ok(Delay::ZERO);
        }
        Ok(Delay::from_millis(v as u64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Delay, E> {
        match Duration::try_from_secs_f64(v / 1000.0) {
            Ok(d) => Ok(Delay(d)),
            Err(e) => {
                warn!(delay = v, error = %e, "Ignoring invalid delay, using zero");
                Ok(Delay::ZERO)
            }
        }
    }

    fn visit_unit<E: de::Error>(self) -> Result<Delay, E> {
        Ok(Delay::ZERO)
    }

    fn visit_none<E: de::Error>(self) -> Result<Delay, E> {
        Ok(Delay::ZERO)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Delay, D::Error> {
        deserializer.deserialize_any(DelayVisitor)
    }
}
