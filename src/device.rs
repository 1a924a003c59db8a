use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::error::Error;


/// Closed set of devices tensor data may live on.
///
/// Only the CPU backend is compiled into this crate; CUDA devices parse
/// and compare but transfers to them fail with
/// [DeviceUnavailable](Error::DeviceUnavailable).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
  Cpu,
  Cuda(usize),
}

impl Device {
  /// Whether tensors can actually be placed on this device.
  pub fn is_available(&self) -> bool {
    matches!(self, Device::Cpu)
  }
}

impl Default for Device {
  fn default() -> Self {
    Device::Cpu
  }
}

impl FromStr for Device {
  type Err = Error;

  fn from_str(name: &str) -> Result<Self, Error> {
    match name {
      "cpu" => Ok(Device::Cpu),
      "cuda" => Ok(Device::Cuda(0)),
      _ => match name.strip_prefix("cuda:").and_then(|i| i.parse().ok() ) {
        Some(index) => Ok(Device::Cuda(index)),
        None => Err(Error::UnknownDevice(name.to_string())),
      },
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(index) => write!(f, "cuda:{}", index),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(0));
    assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
    assert!("tpu".parse::<Device>().is_err());
    assert!("cuda:x".parse::<Device>().is_err());
  }

  #[test]
  fn availability() {
    assert!(Device::Cpu.is_available());
    assert!(!Device::Cuda(0).is_available());
  }
}
