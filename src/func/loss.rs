use num_traits::NumCast;

use crate::error::{Error, Result};
use crate::scalar::{Scalar, Numeric, Integer, Real};
use crate::tensor::{Tensor, Dims};
use super::Cache;


/// Scalar training objectives.
///
/// `loss` reduces predictions and targets to a scalar tensor and records
/// what its gradient needs; `backward` turns that record into the
/// gradient of the loss with respect to the predictions. Like every
/// cache in this crate the record is single-shot, so each `backward`
/// needs its own preceding `loss` call.

pub trait Loss<T: Scalar + Real> {
  fn loss(&mut self, y: &Tensor<T>, t: &Tensor<T>) -> Result<Tensor<T>>;
  fn backward(&mut self) -> Result<Tensor<T>>;
}

fn check_same_shape<T: Scalar>(y: &Tensor<T>, t: &Tensor<T>) -> Result<()> {
  if y.shape() != t.shape() {
    return Err(Error::ShapeMismatch {
      expected: y.shape().to_vec(),
      got: t.shape().to_vec(),
    })
  }
  Ok(())
}


/// Mean squared error.

#[derive(Debug, Default)]
pub struct Mse<T: Scalar> {
  cache: Cache<Tensor<T>>,
}

impl<T: Scalar> Mse<T> {
  pub fn new() -> Self {
    Self { cache: Cache::recording() }
  }
}

impl<T: Scalar + Real> Loss<T> for Mse<T> {
  fn loss(&mut self, y: &Tensor<T>, t: &Tensor<T>) -> Result<Tensor<T>> {
    check_same_shape(y, t)?;
    let dif = y.sub(t)?;
    let loss = dif.mul(&dif)?.mean(Dims::All, false)?;
    self.cache.store(dif);
    Ok(loss)
  }

  fn backward(&mut self) -> Result<Tensor<T>> {
    let dif = self.cache.take("mse")?;
    let n = T::from(dif.size()).unwrap();
    Ok(dif * (T::from(2).unwrap() / n))
  }
}


/// Categorical cross-entropy on logits.
///
/// Targets are probability distributions over the trailing class axis,
/// typically one-hot rows from [one_hot]. The logits are pushed through
/// a shifted softmax and `eps` keeps the logarithm finite for dead
/// classes.

#[derive(Debug)]
pub struct CrossEntropy<T: Scalar> {
  eps: T,
  cache: Cache<Tensor<T>>,
}

impl<T: Scalar + Real> CrossEntropy<T> {
  pub fn new(eps: T) -> Self {
    Self { eps, cache: Cache::recording() }
  }
}

impl<T: Scalar + Real> Default for CrossEntropy<T> {
  fn default() -> Self {
    Self::new(T::from(1e-8).unwrap())
  }
}

impl<T: Scalar + Real> Loss<T> for CrossEntropy<T> {
  fn loss(&mut self, y: &Tensor<T>, t: &Tensor<T>) -> Result<Tensor<T>> {
    check_same_shape(y, t)?;
    let probs = y.softmax(-1)?;
    let classes = y.shape()[y.rank() - 1];
    let samples = T::from(y.size() / classes).unwrap();
    let grad = probs.sub(t)? / samples;

    let loss = -(probs + self.eps).mul(t)?
      .sum(-1, false)?
      .ln()
      .mean(Dims::All, false)?;
    self.cache.store(grad);
    Ok(loss)
  }

  fn backward(&mut self) -> Result<Tensor<T>> {
    self.cache.take("cross_entropy")
  }
}


/// Binary cross-entropy on probabilities.
///
/// Predictions and targets share one shape; every element is its own
/// Bernoulli trial. Logarithms are clamped to `[-100, 100]` so saturated
/// predictions produce a large but finite loss.

#[derive(Debug, Default)]
pub struct BinaryCrossEntropy<T: Scalar> {
  cache: Cache<(Tensor<T>, Tensor<T>)>,
}

impl<T: Scalar> BinaryCrossEntropy<T> {
  pub fn new() -> Self {
    Self { cache: Cache::recording() }
  }
}

impl<T: Scalar + Real> Loss<T> for BinaryCrossEntropy<T> {
  fn loss(&mut self, y: &Tensor<T>, t: &Tensor<T>) -> Result<Tensor<T>> {
    check_same_shape(y, t)?;
    let one = T::one();
    let bound = T::from(100).unwrap();

    let log_y = y.ln().clamp(-bound, bound);
    let log_not_y = y.map(|a| one - a ).ln().clamp(-bound, bound);
    let loss = -t.mul(&log_y)?
      .add(&t.map(|a| one - a ).mul(&log_not_y)?)?
      .mean(Dims::All, false)?;

    self.cache.store((y.clone(), t.clone()));
    Ok(loss)
  }

  fn backward(&mut self) -> Result<Tensor<T>> {
    let (y, t) = self.cache.take("binary_cross_entropy")?;
    let one = T::one();
    let n = T::from(y.size()).unwrap();
    let dy = (-t.div(&y)?)
      .add(&t.map(|a| one - a ).div(&y.map(|a| one - a ))?)?;
    Ok(dy / n)
  }
}


/// One-hot encoding of integer class labels, appending a class axis.
pub fn one_hot<T, I>(labels: &Tensor<I>, classes: usize) -> Result<Tensor<T>>
where
  T: Scalar + Numeric,
  I: Scalar + Integer,
{
  let mut dims = labels.shape().to_vec();
  dims.push(classes);
  let mut data = vec![T::zero(); labels.size() * classes];
  for (i, &label) in labels.array().iter().enumerate() {
    let index = <usize as NumCast>::from(label).unwrap_or(usize::MAX);
    if index >= classes {
      return Err(Error::IndexOutOfBounds { index, axis: dims.len() - 1, len: classes })
    }
    data[i * classes + index] = T::one();
  }
  Tensor::new(&dims, data)
}
