//! Conversion of loosely typed request values to a variable's data type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use fieldgate_driver_framework::{ClientError, ClientResult, Variant};

/// Built-in OPC-UA data types a variable can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Boolean => "Boolean",
            DataType::SByte => "SByte",
            DataType::Byte => "Byte",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::UInt64 => "UInt64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::String => "String",
        }
    }

    fn signed_range(&self) -> Option<(i64, i64)> {
        match self {
            DataType::SByte => Some((i8::MIN.into(), i8::MAX.into())),
            DataType::Int16 => Some((i16::MIN.into(), i16::MAX.into())),
            DataType::Int32 => Some((i32::MIN.into(), i32::MAX.into())),
            DataType::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    fn unsigned_max(&self) -> Option<u64> {
        match self {
            DataType::Byte => Some(u8::MAX.into()),
            DataType::UInt16 => Some(u16::MAX.into()),
            DataType::UInt32 => Some(u32::MAX.into()),
            DataType::UInt64 => Some(u64::MAX),
            _ => None,
        }
    }

    /// Whether `value` already has the shape this type is stored as.
    pub fn accepts(&self, value: &Variant) -> bool {
        match (self, value) {
            (DataType::Boolean, Variant::Boolean(_)) => true,
            (DataType::String, Variant::String(_)) => true,
            (DataType::Float | DataType::Double, Variant::Float(_)) => true,
            (t, Variant::Int(v)) => t.signed_range().is_some_and(|(lo, hi)| (lo..=hi).contains(v)),
            (t, Variant::UInt(v)) => t.unsigned_max().is_some_and(|max| *v <= max),
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data_type = match s {
            "Boolean" => DataType::Boolean,
            "SByte" => DataType::SByte,
            "Byte" => DataType::Byte,
            "Int16" => DataType::Int16,
            "UInt16" => DataType::UInt16,
            "Int32" | "Integer" => DataType::Int32,
            "UInt32" | "UInteger" => DataType::UInt32,
            "Int64" => DataType::Int64,
            "UInt64" => DataType::UInt64,
            "Float" => DataType::Float,
            "Double" => DataType::Double,
            "String" => DataType::String,
            other => return Err(format!("unknown data type '{other}'")),
        };
        Ok(data_type)
    }
}

/// Convert a request value to `data_type`.
///
/// Text is parsed; numbers are range checked; booleans accept `"0"` and
/// `"false"` (any case) as false and anything else as true.
pub fn coerce(value: &Variant, data_type: DataType) -> ClientResult<Variant> {
    let mismatch = || {
        ClientError::TypeMismatch(format!("cannot convert '{value}' to {data_type}"))
    };

    match data_type {
        DataType::String => match value {
            Variant::Null => Err(mismatch()),
            other => Ok(Variant::String(other.to_string())),
        },
        DataType::Boolean => match value {
            Variant::Boolean(b) => Ok(Variant::Boolean(*b)),
            Variant::Int(v) => Ok(Variant::Boolean(*v != 0)),
            Variant::UInt(v) => Ok(Variant::Boolean(*v != 0)),
            Variant::Float(v) => Ok(Variant::Boolean(*v != 0.0)),
            Variant::String(s) => {
                let s = s.trim();
                Ok(Variant::Boolean(!(s == "0" || s.eq_ignore_ascii_case("false"))))
            }
            _ => Err(mismatch()),
        },
        DataType::Float | DataType::Double => {
            let v = match value {
                Variant::Float(v) => *v,
                Variant::Int(v) => *v as f64,
                Variant::UInt(v) => *v as f64,
                Variant::String(s) => s.trim().parse::<f64>().map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            if data_type == DataType::Float && v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(out_of_range(value, data_type));
            }
            Ok(Variant::Float(v))
        }
        signed if signed.signed_range().is_some() => {
            let v = integer(value).ok_or_else(mismatch)?;
            let (lo, hi) = signed.signed_range().unwrap_or((i64::MIN, i64::MAX));
            i64::try_from(v)
                .ok()
                .filter(|v| (lo..=hi).contains(v))
                .map(Variant::Int)
                .ok_or_else(|| out_of_range(value, data_type))
        }
        unsigned => {
            let v = integer(value).ok_or_else(mismatch)?;
            let max = unsigned.unsigned_max().unwrap_or(u64::MAX);
            u64::try_from(v)
                .ok()
                .filter(|v| *v <= max)
                .map(Variant::UInt)
                .ok_or_else(|| out_of_range(value, data_type))
        }
    }
}

fn out_of_range(value: &Variant, data_type: DataType) -> ClientError {
    ClientError::TypeMismatch(format!("'{value}' is out of range for {data_type}"))
}

/// Integral value of a number or numeric text, widened so both signs fit.
fn integer(value: &Variant) -> Option<i128> {
    match value {
        Variant::Int(v) => Some((*v).into()),
        Variant::UInt(v) => Some((*v).into()),
        Variant::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i128),
        Variant::Boolean(b) => Some((*b).into()),
        Variant::String(s) => {
            let s = s.trim();
            s.parse::<i128>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|v| v.fract() == 0.0 && v.is_finite())
                    .map(|v| v as i128)
            })
        }
        _ => None,
    }
}
