//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Typed co-simulation values and their conversion table."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FederateError, Result};
use crate::SimTime;

/// Wire type of a publication or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    String,
    Double,
    Int,
    Complex,
    Vector,
    ComplexVector,
    NamedPoint,
    Boolean,
    Time,
    Raw,
}

impl DataType {
    pub const ALL: [DataType; 10] = [
        DataType::String,
        DataType::Double,
        DataType::Int,
        DataType::Complex,
        DataType::Vector,
        DataType::ComplexVector,
        DataType::NamedPoint,
        DataType::Boolean,
        DataType::Time,
        DataType::Raw,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Double => "double",
            DataType::Int => "int",
            DataType::Complex => "complex",
            DataType::Vector => "vector",
            DataType::ComplexVector => "complex-vector",
            DataType::NamedPoint => "named-point",
            DataType::Boolean => "boolean",
            DataType::Time => "time",
            DataType::Raw => "raw",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = FederateError;

    /// Accepts the kebab-case names plus `_` separated and `bool`/`integer` spellings.
    fn from_str(s: &str) -> Result<Self> {
        let normalised = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalised.as_str() {
            "string" => Ok(DataType::String),
            "double" => Ok(DataType::Double),
            "int" | "integer" => Ok(DataType::Int),
            "complex" => Ok(DataType::Complex),
            "vector" => Ok(DataType::Vector),
            "complex-vector" => Ok(DataType::ComplexVector),
            "named-point" => Ok(DataType::NamedPoint),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "time" => Ok(DataType::Time),
            "raw" => Ok(DataType::Raw),
            _ => Err(FederateError::InvalidConfig(format!(
                "unknown data type `{s}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn norm(&self) -> f64 {
        self.re.hypot(self.im)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPoint {
    pub name: String,
    pub value: f64,
}

/// A value exchanged with the time coordinator. The variant always matches
/// [`Value::data_type`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Double(f64),
    Int(i64),
    Complex(Complex),
    Vector(Vec<f64>),
    ComplexVector(Vec<Complex>),
    NamedPoint(NamedPoint),
    Boolean(bool),
    Time(SimTime),
    Raw(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::String(_) => DataType::String,
            Value::Double(_) => DataType::Double,
            Value::Int(_) => DataType::Int,
            Value::Complex(_) => DataType::Complex,
            Value::Vector(_) => DataType::Vector,
            Value::ComplexVector(_) => DataType::ComplexVector,
            Value::NamedPoint(_) => DataType::NamedPoint,
            Value::Boolean(_) => DataType::Boolean,
            Value::Time(_) => DataType::Time,
            Value::Raw(_) => DataType::Raw,
        }
    }

    /// Numeric reading of the value. Complex and vector values collapse to
    /// their single element or, failing that, their magnitude.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Complex(c) if c.im == 0.0 => Some(c.re),
            Value::Complex(c) => Some(c.norm()),
            Value::Vector(v) if v.len() == 1 => Some(v[0]),
            Value::Vector(v) => Some(v.iter().map(|x| x * x).sum::<f64>().sqrt()),
            Value::ComplexVector(v) if v.len() == 1 => Value::Complex(v[0]).as_f64(),
            Value::ComplexVector(v) => Some(v.iter().map(|c| c.re * c.re + c.im * c.im).sum::<f64>().sqrt()),
            other => other.real(),
        }
    }

    fn real(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Time(v) => Some(*v as f64),
            Value::NamedPoint(p) => Some(p.value),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn render(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Double(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Boolean(v) => Some(v.to_string()),
            Value::Time(v) => Some(v.to_string()),
            Value::Complex(c) => Some(format_complex(c)),
            Value::Vector(v) => serde_json::to_string(v).ok(),
            Value::ComplexVector(v) => {
                let pairs: Vec<[f64; 2]> = v.iter().map(|c| [c.re, c.im]).collect();
                serde_json::to_string(&pairs).ok()
            }
            Value::NamedPoint(p) => serde_json::to_string(p).ok(),
            Value::Raw(bytes) => String::from_utf8(bytes.clone()).ok(),
        }
    }

    /// Convert into `target`, failing with [`FederateError::TypeMismatch`]
    /// when the value has no sensible reading in that type.
    pub fn coerce(&self, target: DataType) -> Result<Value> {
        let from = self.data_type();
        if from == target {
            return Ok(self.clone());
        }
        let converted = match target {
            DataType::Double => self.as_f64().map(Value::Double),
            DataType::Int => self.integral().map(Value::Int),
            DataType::Time => self.integral().map(Value::Time),
            DataType::Boolean => match self {
                Value::String(s) => parse_bool(s).map(Value::Boolean),
                Value::Raw(_) => None,
                other => other.as_f64().map(|v| Value::Boolean(v != 0.0)),
            },
            DataType::String => self.render().map(Value::String),
            DataType::Raw => self.render().map(|s| Value::Raw(s.into_bytes())),
            DataType::Complex => match self {
                Value::Vector(v) if v.len() == 1 => Some(Value::Complex(Complex::new(v[0], 0.0))),
                Value::Vector(v) if v.len() == 2 => Some(Value::Complex(Complex::new(v[0], v[1]))),
                Value::ComplexVector(v) if v.len() == 1 => Some(Value::Complex(v[0])),
                Value::Vector(_) | Value::ComplexVector(_) | Value::Raw(_) => None,
                other => other.real().map(|re| Value::Complex(Complex::new(re, 0.0))),
            },
            DataType::Vector => match self {
                Value::Complex(c) => Some(Value::Vector(vec![c.re, c.im])),
                Value::ComplexVector(v) => Some(Value::Vector(
                    v.iter().flat_map(|c| [c.re, c.im]).collect(),
                )),
                Value::String(s) => serde_json::from_str::<Vec<f64>>(s)
                    .ok()
                    .or_else(|| self.real().map(|x| vec![x]))
                    .map(Value::Vector),
                Value::Raw(_) => None,
                other => other.real().map(|x| Value::Vector(vec![x])),
            },
            DataType::ComplexVector => match self {
                Value::Complex(c) => Some(Value::ComplexVector(vec![*c])),
                Value::Vector(v) => Some(Value::ComplexVector(
                    v.iter().map(|re| Complex::new(*re, 0.0)).collect(),
                )),
                Value::Raw(_) => None,
                other => other
                    .real()
                    .map(|re| Value::ComplexVector(vec![Complex::new(re, 0.0)])),
            },
            DataType::NamedPoint => match self {
                Value::Raw(_) => None,
                other => other.as_f64().map(|value| {
                    Value::NamedPoint(NamedPoint {
                        name: "value".to_owned(),
                        value,
                    })
                }),
            },
        };
        converted.ok_or(FederateError::TypeMismatch { from, to: target })
    }

    fn integral(&self) -> Option<i64> {
        match self {
            Value::Int(v) | Value::Time(v) => Some(*v),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| finite_trunc(self.real()?)),
            Value::Raw(_) => None,
            other => finite_trunc(other.as_f64()?),
        }
    }
}

fn finite_trunc(v: f64) -> Option<i64> {
    if v.is_finite() && v.abs() < i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => Some(true),
        "false" | "off" | "no" => Some(false),
        other => other.parse::<f64>().ok().map(|v| v != 0.0),
    }
}

fn format_complex(c: &Complex) -> String {
    if c.im < 0.0 {
        format!("{}-{}j", c.re, -c.im)
    } else {
        format!("{}+{}j", c.re, c.im)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<Complex> for Value {
    fn from(value: Complex) -> Self {
        Value::Complex(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(data_type: DataType) -> Value {
        match data_type {
            DataType::String => Value::String("2.5".into()),
            DataType::Double => Value::Double(2.5),
            DataType::Int => Value::Int(2),
            DataType::Complex => Value::Complex(Complex::new(3.0, 4.0)),
            DataType::Vector => Value::Vector(vec![1.0, 2.0]),
            DataType::ComplexVector => Value::ComplexVector(vec![Complex::new(1.0, -1.0)]),
            DataType::NamedPoint => Value::NamedPoint(NamedPoint {
                name: "p".into(),
                value: 7.0,
            }),
            DataType::Boolean => Value::Boolean(true),
            DataType::Time => Value::Time(10),
            DataType::Raw => Value::Raw(vec![0xff, 0xfe]),
        }
    }

    #[test]
    fn names_parse_back_to_the_same_type() {
        for data_type in DataType::ALL {
            assert_eq!(data_type.as_str().parse::<DataType>().unwrap(), data_type);
            let json = serde_json::to_string(&data_type).unwrap();
            assert_eq!(json, format!("\"{}\"", data_type.as_str()));
        }
        assert_eq!("complex_vector".parse::<DataType>().unwrap(), DataType::ComplexVector);
        assert!("quaternion".parse::<DataType>().is_err());
    }

    #[test]
    fn coercion_keeps_or_reports_every_pair() {
        for from in DataType::ALL {
            let value = sample(from);
            for to in DataType::ALL {
                match value.coerce(to) {
                    Ok(converted) => assert_eq!(converted.data_type(), to, "{from} -> {to}"),
                    Err(FederateError::TypeMismatch { from: f, to: t }) => {
                        assert_eq!((f, t), (from, to));
                    }
                    Err(other) => panic!("unexpected error {other}"),
                }
            }
        }
    }

    #[test]
    fn numeric_conversions() {
        assert_eq!(Value::Int(3).coerce(DataType::Double).unwrap(), Value::Double(3.0));
        assert_eq!(Value::Double(-2.7).coerce(DataType::Int).unwrap(), Value::Int(-2));
        assert_eq!(Value::Double(0.0).coerce(DataType::Boolean).unwrap(), Value::Boolean(false));
        assert_eq!(Value::Boolean(true).coerce(DataType::Double).unwrap(), Value::Double(1.0));
        assert_eq!(
            Value::Complex(Complex::new(3.0, 4.0)).coerce(DataType::Double).unwrap(),
            Value::Double(5.0)
        );
        assert_eq!(
            Value::Double(1.5).coerce(DataType::Complex).unwrap(),
            Value::Complex(Complex::new(1.5, 0.0))
        );
        assert_eq!(
            Value::Vector(vec![1.0, 2.0]).coerce(DataType::Complex).unwrap(),
            Value::Complex(Complex::new(1.0, 2.0))
        );
    }

    #[test]
    fn string_conversions() {
        assert_eq!(Value::from("12").coerce(DataType::Int).unwrap(), Value::Int(12));
        assert_eq!(Value::from("on").coerce(DataType::Boolean).unwrap(), Value::Boolean(true));
        assert_eq!(
            Value::from("[1.0, 2.0]").coerce(DataType::Vector).unwrap(),
            Value::Vector(vec![1.0, 2.0])
        );
        assert_eq!(
            Value::Complex(Complex::new(1.0, -2.0)).coerce(DataType::String).unwrap(),
            Value::from("1-2j")
        );
        assert!(matches!(
            Value::from("breaker").coerce(DataType::Double),
            Err(FederateError::TypeMismatch { .. })
        ));
        assert!(matches!(
            Value::Raw(vec![0xff]).coerce(DataType::Double),
            Err(FederateError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_values_do_not_become_integers() {
        assert!(Value::Double(f64::NAN).coerce(DataType::Int).is_err());
        assert!(Value::Double(f64::INFINITY).coerce(DataType::Time).is_err());
    }
}
