use crate::device::Device;


/// All errors surfaced by this crate.
///
/// Every failure is reported immediately to the caller with the violated
/// constraint spelled out; there is no silent recovery and no partial
/// success.

#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Device specifier did not name a recognized device.
  #[error("unknown device {0:?}, expected \"cpu\" or \"cuda[:index]\"")]
  UnknownDevice(String),

  /// The named device is recognized but not usable in this build.
  #[error("device {0} is not available")]
  DeviceUnavailable(Device),

  /// Dtype specifier did not name a recognized element type.
  #[error("unknown dtype {0:?}")]
  UnknownDtype(String),

  /// Two tensors (or a tensor and a parameter) had incompatible shapes.
  #[error("shape mismatch: expected {expected:?}, got {got:?}")]
  ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

  /// Operand shapes cannot be broadcast together.
  #[error("cannot broadcast {lhs:?} with {rhs:?}")]
  Broadcast { lhs: Vec<usize>, rhs: Vec<usize> },

  /// A tensor had the wrong rank for the operation.
  #[error("expected tensor of rank {expected}, got rank {got}")]
  RankMismatch { expected: &'static str, got: usize },

  /// A dimension index was outside the tensor's rank.
  #[error("dimension {dim} out of range for tensor of rank {rank}")]
  DimOutOfRange { dim: isize, rank: usize },

  /// An index was outside the length of its axis.
  #[error("index {index} out of bounds for axis {axis} of length {len}")]
  IndexOutOfBounds { index: usize, axis: usize, len: usize },

  /// Construction data does not fill the requested shape.
  #[error("shape {shape:?} requires {expected} elements, got {got}")]
  ElementCountMismatch { shape: Vec<usize>, expected: usize, got: usize },

  /// Matrix product inner dimensions disagree.
  #[error("matmul inner dimensions differ: {lhs} vs {rhs}")]
  MatmulMismatch { lhs: usize, rhs: usize },

  /// `item()` was called on a tensor with more than one element.
  #[error("not a scalar: tensor has shape {0:?}")]
  NotAScalar(Vec<usize>),

  /// `backward` consumed a cache that its `forward` never populated,
  /// either because `forward` was not called, was called with a no-op
  /// cache, or because the cache was already consumed.
  #[error("{function} backward has no recorded forward state")]
  MissingIntermediate { function: &'static str },

  /// A dropout probability outside the half-open unit interval.
  #[error("dropout probability {0} outside [0, 1)")]
  InvalidProbability(f64),

  /// `tensorsum`/`tensorprod` received an empty sequence.
  #[error("cannot fold an empty sequence of tensors")]
  EmptyFold,
}

pub type Result<T> = std::result::Result<T, Error>;
