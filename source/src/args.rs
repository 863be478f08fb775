use std::fmt;

use itertools::Itertools;

use crate::internal::*;

/// A layer configuration value, as exposed by `LayerOp::option`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ArgValue {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(TVec<i64>),
    Str(String),
}

impl ArgValue {
    /// Equality with numeric coercion between ints and floats.
    pub fn matches(&self, other: &ArgValue) -> bool {
        match (self, other) {
            (ArgValue::Int(a), ArgValue::Float(b)) | (ArgValue::Float(b), ArgValue::Int(a)) => {
                *a as f64 == *b
            }
            (a, b) => a == b,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == ArgValue::None
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            ArgValue::Ints(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArgValue::None => write!(f, "None"),
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Float(x) => write!(f, "{x}"),
            ArgValue::Ints(v) => {
                let trailing = if v.len() == 1 { "," } else { "" };
                write!(f, "({}{})", v.iter().join(", "), trailing)
            }
            ArgValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> ArgValue {
        ArgValue::Bool(b)
    }
}

impl From<usize> for ArgValue {
    fn from(i: usize) -> ArgValue {
        ArgValue::Int(i as i64)
    }
}

impl From<isize> for ArgValue {
    fn from(i: isize) -> ArgValue {
        ArgValue::Int(i as i64)
    }
}

impl From<f32> for ArgValue {
    fn from(x: f32) -> ArgValue {
        ArgValue::Float(x as f64)
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> ArgValue {
        ArgValue::Str(s.to_string())
    }
}

impl From<&[usize]> for ArgValue {
    fn from(v: &[usize]) -> ArgValue {
        ArgValue::Ints(v.iter().map(|i| *i as i64).collect())
    }
}

impl From<&[isize]> for ArgValue {
    fn from(v: &[isize]) -> ArgValue {
        ArgValue::Ints(v.iter().map(|i| *i as i64).collect())
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> ArgValue {
        v.map(Into::into).unwrap_or_default()
    }
}
