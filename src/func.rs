//! Forward-backward building blocks.
//!
//! Every operation with a derivative lives here as a pair of associated
//! functions: `forward` computes the result and may record intermediates
//! into a [Cache], `backward` consumes those intermediates to turn an
//! output gradient into input gradients. The cache is typed per
//! operation, so a backward pass can only ever see the state its own
//! forward produced.

pub mod norm;
pub mod dropout;
pub mod loss;

use crate::error::{Error, Result};
use crate::scalar::{Scalar, Numeric};
use crate::tensor::Tensor;


/// Storage for the intermediates of one forward pass.
///
/// A recording cache holds at most one state; `forward` fills it and
/// `backward` takes it out again, so each backward needs its own
/// preceding forward. A no-op cache discards whatever is stored into it
/// and is the mode to use for inference, where no backward will follow.

#[derive(Debug)]
pub enum Cache<C> {
  Recording(Option<C>),
  Noop,
}

impl<C> Cache<C> {
  pub fn recording() -> Self {
    Cache::Recording(None)
  }

  pub fn noop() -> Self {
    Cache::Noop
  }

  pub fn is_recording(&self) -> bool {
    matches!(self, Cache::Recording(_))
  }

  /// Records `state`, replacing anything recorded before.
  /// On a no-op cache the state is dropped.
  pub fn store(&mut self, state: C) {
    if let Cache::Recording(slot) = self {
      *slot = Some(state);
    }
  }

  /// Removes and returns the recorded state. Fails when nothing was
  /// recorded, the state was already consumed, or the cache is no-op.
  pub fn take(&mut self, function: &'static str) -> Result<C> {
    match self {
      Cache::Recording(slot) => slot.take().ok_or(Error::MissingIntermediate { function }),
      Cache::Noop => Err(Error::MissingIntermediate { function }),
    }
  }
}

impl<C> Default for Cache<C> {
  fn default() -> Self {
    Cache::recording()
  }
}

/// Folds a gradient contribution into an accumulator, where `None`
/// stands for the zero gradient of a tensor that has not received any
/// contributions yet.
pub fn accumulate<T: Scalar + Numeric>(grad: Option<Tensor<T>>, delta: &Tensor<T>) -> Result<Tensor<T>> {
  match grad {
    Some(grad) => grad.add(delta),
    None => Ok(delta.clone()),
  }
}
