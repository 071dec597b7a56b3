//! Operations and their arguments.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One operation argument.
///
/// Positional arguments are numbers, booleans or strings. An explicit engine
/// selection may instead carry a flat key/value map of engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, Arg>),
}

impl Arg {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Non-negative integer that fits a pixel dimension.
    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|n| u32::try_from(n).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Arg>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Map(m) => {
                let mut first = true;
                for (key, value) in m {
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;
                    write!(f, "{key}={value}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for Arg {
    fn from(n: i32) -> Self {
        Self::Integer(n.into())
    }
}

impl From<u32> for Arg {
    fn from(n: u32) -> Self {
        Self::Integer(n.into())
    }
}

impl From<f64> for Arg {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<BTreeMap<String, Arg>> for Arg {
    fn from(m: BTreeMap<String, Arg>) -> Self {
        Self::Map(m)
    }
}

/// A named transformation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Arg>,
}

impl Operation {
    pub fn new(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// An operation without arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Select the output type, e.g. `Operation::type_selector("gif")`.
    pub fn type_selector(type_name: impl Into<String>) -> Self {
        Self::named(type_name)
    }

    /// Explicitly select an engine, optionally passing it configuration.
    pub fn engine(engine: impl Into<String>, options: Option<Arg>) -> Self {
        Self::new(engine, options.into_iter().collect())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(ToString::to_string).collect();
            write!(f, "={}", args.join(","))?;
        }
        Ok(())
    }
}
