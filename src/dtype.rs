use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::error::Error;


/// Closed set of element types a tensor may carry.
///
/// The dtype of a [Tensor](crate::Tensor) is determined by its element
/// type parameter; this tag exists for introspection and for normalizing
/// user-facing dtype specifiers. `Float16` and `Complex64` are recognized
/// names without a native storage type in this crate.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
  Bool,
  Uint8,
  Uint16,
  Uint32,
  Uint64,
  Int8,
  Int16,
  Int32,
  Int64,
  Float16,
  Float32,
  Float64,
  Complex64,
}

impl Dtype {
  pub fn as_str(&self) -> &'static str {
    match self {
      Dtype::Bool => "bool",
      Dtype::Uint8 => "uint8",
      Dtype::Uint16 => "uint16",
      Dtype::Uint32 => "uint32",
      Dtype::Uint64 => "uint64",
      Dtype::Int8 => "int8",
      Dtype::Int16 => "int16",
      Dtype::Int32 => "int32",
      Dtype::Int64 => "int64",
      Dtype::Float16 => "float16",
      Dtype::Float32 => "float32",
      Dtype::Float64 => "float64",
      Dtype::Complex64 => "complex64",
    }
  }

  pub fn is_float(&self) -> bool {
    matches!(self, Dtype::Float16 | Dtype::Float32 | Dtype::Float64)
  }

  pub fn is_int(&self) -> bool {
    matches!(self,
      Dtype::Uint8 | Dtype::Uint16 | Dtype::Uint32 | Dtype::Uint64 |
      Dtype::Int8 | Dtype::Int16 | Dtype::Int32 | Dtype::Int64)
  }
}

impl FromStr for Dtype {
  type Err = Error;

  fn from_str(name: &str) -> Result<Self, Error> {
    Ok(match name {
      "bool" => Dtype::Bool,
      "uint8" | "u8" => Dtype::Uint8,
      "uint16" | "u16" => Dtype::Uint16,
      "uint32" | "u32" => Dtype::Uint32,
      "uint64" | "u64" => Dtype::Uint64,
      "int8" | "i8" => Dtype::Int8,
      "int16" | "i16" => Dtype::Int16,
      "int32" | "i32" => Dtype::Int32,
      "int64" | "i64" => Dtype::Int64,
      "float16" | "f16" => Dtype::Float16,
      "float32" | "f32" => Dtype::Float32,
      "float64" | "f64" => Dtype::Float64,
      "complex64" | "c64" => Dtype::Complex64,
      _ => return Err(Error::UnknownDtype(name.to_string())),
    })
  }
}

impl fmt::Display for Dtype {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize() {
    assert_eq!("float32".parse::<Dtype>().unwrap(), Dtype::Float32);
    assert_eq!("f32".parse::<Dtype>().unwrap(), Dtype::Float32);
    assert_eq!("i64".parse::<Dtype>().unwrap(), Dtype::Int64);
    assert_eq!("bool".parse::<Dtype>().unwrap(), Dtype::Bool);
    assert!("float128".parse::<Dtype>().is_err());
  }

  #[test]
  fn class_checks() {
    assert!(Dtype::Float64.is_float());
    assert!(Dtype::Int8.is_int());
    assert!(!Dtype::Bool.is_int());
  }
}
