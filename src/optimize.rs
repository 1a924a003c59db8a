//! Gradient-based parameter updates.
//!
//! An [Optimizer] walks a set of parameters and applies the delta its
//! [Strategy] derives from each parameter's accumulated gradient.
//! Strategies keep their per-parameter state (velocities, moment
//! estimates) keyed by tensor identity, so one strategy instance can
//! serve any number of parameters.

use std::collections::HashMap;

use crate::error::Result;
use crate::scalar::{Scalar, Real};
use crate::tensor::Tensor;


/// Derives an additive update from a parameter and its gradient.
/// `step` starts at one and counts optimization steps, not parameters.
pub trait Strategy<T: Scalar + Real> {
  fn update(&mut self, param: &Tensor<T>, grad: &Tensor<T>, rate: T, step: usize) -> Result<Tensor<T>>;
}


pub struct Optimizer<T: Scalar, S> {
  pub learning_rate: T,
  strategy: S,
  step: usize,
}

impl<T: Scalar + Real, S: Strategy<T>> Optimizer<T, S> {
  pub fn new(learning_rate: T, strategy: S) -> Self {
    Self { learning_rate, strategy, step: 1 }
  }

  /// Updates every parameter in place. Parameters without a gradient
  /// are skipped, not treated as an error.
  pub fn step(&mut self, params: &mut [&mut Tensor<T>]) -> Result<()> {
    for param in params.iter_mut() {
      let delta = match param.grad() {
        Some(grad) => self.strategy.update(param, grad, self.learning_rate, self.step)?,
        None => continue,
      };
      param.iadd(&delta)?;
    }
    self.step += 1;
    Ok(())
  }

  pub fn reset_grads(&mut self, params: &mut [&mut Tensor<T>]) {
    for param in params.iter_mut() {
      param.reset_grad();
    }
  }

  pub fn steps(&self) -> usize {
    self.step
  }
}


/// Stochastic gradient descent with optional momentum, Nesterov
/// momentum and coupled weight decay.

#[derive(Debug, Clone)]
pub struct Sgd<T: Scalar> {
  pub momentum: T,
  pub nesterov: bool,
  pub weight_decay: T,
  velocity: HashMap<usize, Tensor<T>>,
}

impl<T: Scalar + Real> Sgd<T> {
  pub fn new(momentum: T, nesterov: bool, weight_decay: T) -> Self {
    Self { momentum, nesterov, weight_decay, velocity: HashMap::new() }
  }
}

impl<T: Scalar + Real> Default for Sgd<T> {
  fn default() -> Self {
    Self::new(T::zero(), false, T::zero())
  }
}

impl<T: Scalar + Real> Strategy<T> for Sgd<T> {
  fn update(&mut self, param: &Tensor<T>, grad: &Tensor<T>, rate: T, step: usize) -> Result<Tensor<T>> {
    let zero = T::zero();
    let mut grad = grad.clone();
    if self.weight_decay > zero {
      grad.iadd(&(param * self.weight_decay))?;
    }

    let grad = if self.momentum > zero {
      let velocity = if step > 1 {
        match self.velocity.get(&param.id()) {
          Some(prev) => prev * self.momentum + &grad,
          None => grad.clone(),
        }
      } else {
        grad.clone()
      };
      self.velocity.insert(param.id(), velocity.clone());
      if self.nesterov {
        grad.add(&(&velocity * self.momentum))?
      } else {
        velocity
      }
    } else {
      grad
    };

    Ok(grad * -rate)
  }
}


// Shared by Adam and AdamW: updates both moment estimates for one
// parameter and returns the bias-corrected delta.
#[allow(clippy::too_many_arguments)]
fn adam_delta<T: Scalar + Real>(
  moments: &mut HashMap<usize, (Tensor<T>, Tensor<T>)>,
  id: usize,
  grad: &Tensor<T>,
  rate: T,
  step: usize,
  beta1: T,
  beta2: T,
  eps: T,
) -> Result<Tensor<T>> {
  let one = T::one();
  let (m, v) = match moments.get(&id) {
    Some((m_prev, v_prev)) => (
      m_prev * beta1 + grad * (one - beta1),
      v_prev * beta2 + grad.mul(grad)? * (one - beta2),
    ),
    None => (
      grad * (one - beta1),
      grad.mul(grad)? * (one - beta2),
    ),
  };
  moments.insert(id, (m.clone(), v.clone()));

  let m_hat = m / (one - beta1.powi(step as i32));
  let v_hat = v / (one - beta2.powi(step as i32));
  (m_hat * -rate).div(&(v_hat.sqrt() + eps))
}


/// Adam as described by Kingma et al., 2014, with coupled weight decay.

#[derive(Debug, Clone)]
pub struct Adam<T: Scalar> {
  pub beta1: T,
  pub beta2: T,
  pub eps: T,
  pub weight_decay: T,
  moments: HashMap<usize, (Tensor<T>, Tensor<T>)>,
}

impl<T: Scalar + Real> Adam<T> {
  pub fn new(beta1: T, beta2: T, eps: T, weight_decay: T) -> Self {
    Self { beta1, beta2, eps, weight_decay, moments: HashMap::new() }
  }
}

impl<T: Scalar + Real> Default for Adam<T> {
  fn default() -> Self {
    Self::new(
      T::from(0.9).unwrap(),
      T::from(0.999).unwrap(),
      T::from(1e-8).unwrap(),
      T::zero(),
    )
  }
}

impl<T: Scalar + Real> Strategy<T> for Adam<T> {
  fn update(&mut self, param: &Tensor<T>, grad: &Tensor<T>, rate: T, step: usize) -> Result<Tensor<T>> {
    let mut grad = grad.clone();
    if self.weight_decay > T::zero() {
      grad.iadd(&(param * self.weight_decay))?;
    }
    adam_delta(&mut self.moments, param.id(), &grad, rate, step, self.beta1, self.beta2, self.eps)
  }
}


/// Adam with decoupled weight decay. The decay acts on the parameter
/// directly and never enters the moment estimates.

#[derive(Debug, Clone)]
pub struct AdamW<T: Scalar> {
  pub beta1: T,
  pub beta2: T,
  pub eps: T,
  pub weight_decay: T,
  moments: HashMap<usize, (Tensor<T>, Tensor<T>)>,
}

impl<T: Scalar + Real> AdamW<T> {
  pub fn new(beta1: T, beta2: T, eps: T, weight_decay: T) -> Self {
    Self { beta1, beta2, eps, weight_decay, moments: HashMap::new() }
  }
}

impl<T: Scalar + Real> Default for AdamW<T> {
  fn default() -> Self {
    Self::new(
      T::from(0.9).unwrap(),
      T::from(0.999).unwrap(),
      T::from(1e-8).unwrap(),
      T::from(0.01).unwrap(),
    )
  }
}

impl<T: Scalar + Real> Strategy<T> for AdamW<T> {
  fn update(&mut self, param: &Tensor<T>, grad: &Tensor<T>, rate: T, step: usize) -> Result<Tensor<T>> {
    let delta = adam_delta(&mut self.moments, param.id(), grad, rate, step, self.beta1, self.beta2, self.eps)?;
    if self.weight_decay > T::zero() {
      delta.add(&(param * (-rate * self.weight_decay)))
    } else {
      Ok(delta)
    }
  }
}
