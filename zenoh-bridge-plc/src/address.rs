//! PLC item addresses.
//!
//! ```text
//! <area>:<index>[<count>][:<format>]
//!
//! coil:12
//! holding-register:100:f32
//! input-register:4[3]:i16
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fieldgate_driver_framework::Variant;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid address '{0}': expected <area>:<index>[<count>][:<format>]")]
    Syntax(String),

    #[error("unknown area '{0}'")]
    Area(String),

    #[error("invalid index in '{0}'")]
    Index(String),

    #[error("unknown format '{0}'")]
    Format(String),
}

/// Modbus data areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Area {
    /// Discrete output coils (read/write, 1-bit)
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    DiscreteInput,
    /// Input registers (read-only, 16-bit)
    InputRegister,
    /// Holding registers (read/write, 16-bit)
    HoldingRegister,
}

impl Area {
    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Coil => "coil",
            Area::DiscreteInput => "discrete-input",
            Area::InputRegister => "input-register",
            Area::HoldingRegister => "holding-register",
        }
    }

    /// Whether the area holds single bits rather than 16-bit words.
    pub fn is_bits(&self) -> bool {
        matches!(self, Area::Coil | Area::DiscreteInput)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Area::Coil | Area::HoldingRegister)
    }
}

impl FromStr for Area {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coil" => Ok(Area::Coil),
            "discrete-input" => Ok(Area::DiscreteInput),
            "input-register" => Ok(Area::InputRegister),
            "holding-register" => Ok(Area::HoldingRegister),
            other => Err(AddressError::Area(other.to_string())),
        }
    }
}

/// Interpretation of 16-bit registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterFormat {
    /// Unsigned 16-bit integer (default)
    #[default]
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer (2 registers, big-endian)
    U32,
    /// Signed 32-bit integer (2 registers, big-endian)
    I32,
    /// 32-bit float (2 registers, big-endian)
    F32,
    /// Unsigned 32-bit integer (2 registers, little-endian word order)
    U32Le,
    /// Signed 32-bit integer (2 registers, little-endian word order)
    I32Le,
    /// 32-bit float (2 registers, little-endian word order)
    F32Le,
}

impl RegisterFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterFormat::U16 => "u16",
            RegisterFormat::I16 => "i16",
            RegisterFormat::U32 => "u32",
            RegisterFormat::I32 => "i32",
            RegisterFormat::F32 => "f32",
            RegisterFormat::U32Le => "u32le",
            RegisterFormat::I32Le => "i32le",
            RegisterFormat::F32Le => "f32le",
        }
    }

    /// Registers per value.
    pub fn words(&self) -> usize {
        match self {
            RegisterFormat::U16 | RegisterFormat::I16 => 1,
            _ => 2,
        }
    }

    fn is_little_endian(&self) -> bool {
        matches!(
            self,
            RegisterFormat::U32Le | RegisterFormat::I32Le | RegisterFormat::F32Le
        )
    }

    /// Decode raw registers, one value per complete chunk.
    pub fn decode(&self, data: &[u16]) -> Vec<Variant> {
        data.chunks_exact(self.words())
            .map(|chunk| {
                let bits = match chunk {
                    [hi, lo] if !self.is_little_endian() => ((*hi as u32) << 16) | *lo as u32,
                    [lo, hi] => ((*hi as u32) << 16) | *lo as u32,
                    [word] => *word as u32,
                    _ => 0,
                };
                match self {
                    RegisterFormat::U16 | RegisterFormat::U32 | RegisterFormat::U32Le => {
                        Variant::UInt(bits.into())
                    }
                    RegisterFormat::I16 => Variant::Int((bits as u16 as i16).into()),
                    RegisterFormat::I32 | RegisterFormat::I32Le => Variant::Int((bits as i32).into()),
                    RegisterFormat::F32 | RegisterFormat::F32Le => {
                        Variant::Float(f32::from_bits(bits).into())
                    }
                }
            })
            .collect()
    }

    /// Encode a value (or an array of values) into registers.
    pub fn encode(&self, value: &Variant) -> Result<Vec<u16>, String> {
        if let Variant::Array(items) = value {
            let mut words = Vec::with_capacity(items.len() * self.words());
            for item in items {
                words.extend(self.encode(item)?);
            }
            return Ok(words);
        }

        let out_of_range = || format!("'{value}' does not fit {}", self.as_str());
        let bits: u32 = match self {
            RegisterFormat::U16 => u16::try_from(integer(value)?).map_err(|_| out_of_range())?.into(),
            RegisterFormat::I16 => {
                i16::try_from(integer(value)?).map_err(|_| out_of_range())? as u16 as u32
            }
            RegisterFormat::U32 | RegisterFormat::U32Le => {
                u32::try_from(integer(value)?).map_err(|_| out_of_range())?
            }
            RegisterFormat::I32 | RegisterFormat::I32Le => {
                i32::try_from(integer(value)?).map_err(|_| out_of_range())? as u32
            }
            RegisterFormat::F32 | RegisterFormat::F32Le => (float(value)? as f32).to_bits(),
        };

        let (hi, lo) = ((bits >> 16) as u16, bits as u16);
        Ok(match self.words() {
            1 => vec![lo],
            _ if self.is_little_endian() => vec![lo, hi],
            _ => vec![hi, lo],
        })
    }
}

impl FromStr for RegisterFormat {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_lowercase().as_str() {
            "u16" => RegisterFormat::U16,
            "i16" => RegisterFormat::I16,
            "u32" => RegisterFormat::U32,
            "i32" => RegisterFormat::I32,
            "f32" => RegisterFormat::F32,
            "u32le" => RegisterFormat::U32Le,
            "i32le" => RegisterFormat::I32Le,
            "f32le" => RegisterFormat::F32Le,
            _ => return Err(AddressError::Format(s.to_string())),
        };
        Ok(format)
    }
}

fn integer(value: &Variant) -> Result<i64, String> {
    match value {
        Variant::Int(v) => Ok(*v),
        Variant::UInt(v) => i64::try_from(*v).map_err(|_| format!("'{v}' is too large")),
        Variant::Boolean(b) => Ok(i64::from(*b)),
        Variant::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
        Variant::String(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("'{s}' is not an integer")),
        other => Err(format!("'{other}' is not an integer")),
    }
}

fn float(value: &Variant) -> Result<f64, String> {
    match value {
        Variant::Float(v) => Ok(*v),
        Variant::Int(v) => Ok(*v as f64),
        Variant::UInt(v) => Ok(*v as f64),
        Variant::String(s) => s.trim().parse().map_err(|_| format!("'{s}' is not a number")),
        other => Err(format!("'{other}' is not a number")),
    }
}

/// Interpret a value as coil states.
pub fn to_bits(value: &Variant) -> Result<Vec<bool>, String> {
    match value {
        Variant::Boolean(b) => Ok(vec![*b]),
        Variant::Int(v) => Ok(vec![*v != 0]),
        Variant::UInt(v) => Ok(vec![*v != 0]),
        Variant::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Ok(vec![true]),
            "false" | "0" | "off" => Ok(vec![false]),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        Variant::Array(items) => {
            let mut bits = Vec::with_capacity(items.len());
            for item in items {
                bits.extend(to_bits(item)?);
            }
            Ok(bits)
        }
        other => Err(format!("'{other}' is not a boolean")),
    }
}

/// A parsed item address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlcAddress {
    pub area: Area,
    pub index: u16,
    /// Number of consecutive values.
    pub count: u16,
    pub format: RegisterFormat,
}

impl PlcAddress {
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let text = text.trim();
        let mut parts = text.split(':');
        let (Some(area), Some(index)) = (parts.next(), parts.next()) else {
            return Err(AddressError::Syntax(text.to_string()));
        };
        let format = parts.next();
        if parts.next().is_some() {
            return Err(AddressError::Syntax(text.to_string()));
        }

        let area: Area = area.parse()?;
        let invalid = || AddressError::Index(text.to_string());
        let (index, count) = match index.split_once('[') {
            Some((index, count)) => {
                let count = count
                    .strip_suffix(']')
                    .and_then(|c| c.parse::<u16>().ok())
                    .filter(|c| *c > 0)
                    .ok_or_else(invalid)?;
                (index, count)
            }
            None => (index, 1),
        };
        let index: u16 = index.parse().map_err(|_| invalid())?;
        if u32::from(index) + u32::from(count) > u32::from(u16::MAX) + 1 {
            return Err(invalid());
        }

        let format = match format {
            Some(_) if area.is_bits() => return Err(AddressError::Syntax(text.to_string())),
            Some(f) => f.parse()?,
            None => RegisterFormat::default(),
        };

        Ok(Self {
            area,
            index,
            count,
            format,
        })
    }

    /// Number of bits or registers covered.
    pub fn quantity(&self) -> u16 {
        if self.area.is_bits() {
            self.count
        } else {
            self.count.saturating_mul(self.format.words() as u16)
        }
    }
}

impl fmt::Display for PlcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.area.as_str(), self.index)?;
        if self.count > 1 {
            write!(f, "[{}]", self.count)?;
        }
        if !self.area.is_bits() && self.format != RegisterFormat::default() {
            write!(f, ":{}", self.format.as_str())?;
        }
        Ok(())
    }
}

impl FromStr for PlcAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
