// GPU telemetry as seen at the nvidia-smi boundary: unit-tagged quantities and
// validated per-device readings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Percent,
    Watt,
    KiB,
    MiB,
    GiB,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unit::Percent => "%",
            Unit::Watt => "W",
            Unit::KiB => "KiB",
            Unit::MiB => "MiB",
            Unit::GiB => "GiB",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("field not available: {0:?}")]
    NotAvailable(String),
    #[error("missing unit in {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {unit:?} in {raw:?}")]
    UnknownUnit { raw: String, unit: String },
    #[error("invalid number in {0:?}")]
    InvalidNumber(String),
    #[error("expected {expected}, got {actual}")]
    UnexpectedUnit { expected: &'static str, actual: Unit },
}

/// A numeric reading with the unit it was reported in, e.g. `1750 MiB`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        if s.starts_with('[') || s.eq_ignore_ascii_case("n/a") {
            return Err(QuantityError::NotAvailable(s.to_string()));
        }
        let (num, unit) = s
            .split_once(char::is_whitespace)
            .ok_or_else(|| QuantityError::MissingUnit(s.to_string()))?;
        let unit = match unit.trim() {
            "%" => Unit::Percent,
            "W" => Unit::Watt,
            "KiB" => Unit::KiB,
            "MiB" => Unit::MiB,
            "GiB" => Unit::GiB,
            other => {
                return Err(QuantityError::UnknownUnit {
                    raw: s.to_string(),
                    unit: other.to_string(),
                });
            }
        };
        let value: f64 = num
            .parse()
            .map_err(|_| QuantityError::InvalidNumber(s.to_string()))?;
        if !value.is_finite() {
            return Err(QuantityError::InvalidNumber(s.to_string()));
        }
        Ok(Self { value, unit })
    }
}

impl Quantity {
    pub fn percent(&self) -> Result<f64, QuantityError> {
        match self.unit {
            Unit::Percent => Ok(self.value),
            actual => Err(QuantityError::UnexpectedUnit {
                expected: "%",
                actual,
            }),
        }
    }

    pub fn watts(&self) -> Result<f64, QuantityError> {
        match self.unit {
            Unit::Watt => Ok(self.value),
            actual => Err(QuantityError::UnexpectedUnit {
                expected: "W",
                actual,
            }),
        }
    }

    /// Memory normalized to MiB.
    pub fn mebibytes(&self) -> Result<f64, QuantityError> {
        match self.unit {
            Unit::KiB => Ok(self.value / 1024.0),
            Unit::MiB => Ok(self.value),
            Unit::GiB => Ok(self.value * 1024.0),
            actual => Err(QuantityError::UnexpectedUnit {
                expected: "KiB/MiB/GiB",
                actual,
            }),
        }
    }
}

/// A process holding memory on a GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuProcess {
    pub pid: u32,
    pub used_memory_mib: f64,
}

/// One GPU with validated readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub index: u32,
    pub uuid: String,
    pub utilization_pct: f64,
    pub power_watts: f64,
    pub processes: Vec<GpuProcess>,
}
