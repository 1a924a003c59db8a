//! Normalization functions with closed-form backward passes.
//!
//! Batch normalization standardizes over the batch (and spatial) axes
//! per channel and maintains running statistics for inference. Layer
//! and RMS normalization standardize each sample over the trailing axes
//! matching the weight's shape and carry no running state.

use crate::error::{Error, Result};
use crate::scalar::{Scalar, Real};
use crate::tensor::Tensor;
use super::Cache;


fn check_param<T: Scalar>(param: &Tensor<T>, channels: usize) -> Result<()> {
  if param.shape() != [channels] {
    return Err(Error::ShapeMismatch {
      expected: vec![channels],
      got: param.shape().to_vec(),
    })
  }
  Ok(())
}

// Batch statistics run over every axis except the channel axis 1.
fn channel_axes(rank: usize) -> Vec<isize> {
  std::iter::once(0).chain((2..rank).map(|a| a as isize )).collect()
}

fn trailing_axes(rank: usize) -> Vec<isize> {
  (1..=rank).map(|i| -(i as isize) ).collect()
}

fn leading_axes(rank: usize, trailing: usize) -> Vec<isize> {
  (0..(rank - trailing) as isize).collect()
}


/// Intermediates of a batch normalization forward pass. The weight is
/// kept in its broadcast shape.

#[derive(Debug)]
pub struct BatchNormState<T: Scalar> {
  w: Tensor<T>,
  inv_std: Tensor<T>,
  x_norm: Tensor<T>,
}

fn batchnorm_forward<T: Scalar + Real>(
  cache: &mut Cache<BatchNormState<T>>,
  x: &Tensor<T>,
  rmean: &Tensor<T>,
  rvar: &Tensor<T>,
  w: &Tensor<T>,
  b: &Tensor<T>,
  momentum: T,
  eps: T,
  training: bool,
) -> Result<(Tensor<T>, Tensor<T>, Tensor<T>)> {
  let channels = x.shape()[1];
  for param in [rmean, rvar, w, b] {
    check_param(param, channels)?;
  }
  let axes = channel_axes(x.rank());
  let mut param_dims = vec![channels];
  param_dims.resize(x.rank() - 1, 1);
  let w = w.reshape(&param_dims)?;
  let b = b.reshape(&param_dims)?;
  let one = T::one();

  let (inv_std, x_norm, rmean, rvar) = if training {
    let mean = x.mean(axes.clone(), true)?;
    let var = x.var(axes.clone(), 0, true)?;
    let inv_std = (var + eps).map(|a| one / a.sqrt() );
    let x_norm = x.sub(&mean)?.mul(&inv_std)?;
    let rmean = rmean * (one - momentum) + mean.squeeze() * momentum;
    let rvar = rvar * (one - momentum) + x.var(axes, 1, false)? * momentum;
    (inv_std, x_norm, rmean, rvar)
  } else {
    let stat_mean = rmean.reshape(&param_dims)?;
    let stat_var = rvar.reshape(&param_dims)?;
    let inv_std = (stat_var + eps).map(|a| one / a.sqrt() );
    let x_norm = x.sub(&stat_mean)?.mul(&inv_std)?;
    (inv_std, x_norm, rmean.clone(), rvar.clone())
  };

  let y = w.mul(&x_norm)?.add(&b)?;
  // No backward pass is defined for inference mode, since running
  // statistics are not differentiated through.
  if training {
    cache.store(BatchNormState { w, inv_std, x_norm });
  }
  Ok((y, rmean, rvar))
}

fn batchnorm_backward<T: Scalar + Real>(
  state: BatchNormState<T>,
  dy: &Tensor<T>,
) -> Result<(Tensor<T>, Tensor<T>, Tensor<T>)> {
  let BatchNormState { w, inv_std, x_norm } = state;
  let axes = channel_axes(dy.rank());
  let n = T::from(dy.size() / dy.shape()[1]).unwrap();

  let dy_x_norm = dy.mul(&x_norm)?;
  let dy_sum = dy.sum(axes.clone(), true)?;
  let dy_x_norm_sum = dy_x_norm.sum(axes.clone(), true)?;
  let inner = dy.mul(&Tensor::scalar(n))?
    .sub(&dy_sum)?
    .sub(&x_norm.mul(&dy_x_norm_sum)?)?;
  let dx = w.mul(&inv_std)?.mul(&inner)? / n;

  let dw = dy_x_norm.sum(axes.clone(), false)?;
  let db = dy.sum(axes, false)?;
  Ok((dx, dw, db))
}


/// Batch normalization over a `[batch, channels]` or
/// `[batch, channels, length]` input.
///
/// `forward` returns the normalized output together with the updated
/// running mean and variance; in inference mode the running statistics
/// are used for standardization and returned unchanged. The running
/// variance is updated with the sample variance (`ddof = 1`).

pub struct BatchNorm1d;

impl BatchNorm1d {
  #[allow(clippy::too_many_arguments)]
  pub fn forward<T: Scalar + Real>(
    cache: &mut Cache<BatchNormState<T>>,
    x: &Tensor<T>,
    rmean: &Tensor<T>,
    rvar: &Tensor<T>,
    w: &Tensor<T>,
    b: &Tensor<T>,
    momentum: T,
    eps: T,
    training: bool,
  ) -> Result<(Tensor<T>, Tensor<T>, Tensor<T>)> {
    if x.rank() != 2 && x.rank() != 3 {
      return Err(Error::RankMismatch { expected: "2 or 3", got: x.rank() })
    }
    batchnorm_forward(cache, x, rmean, rvar, w, b, momentum, eps, training)
  }

  /// Gradients with respect to the input, weight and bias.
  pub fn backward<T: Scalar + Real>(
    cache: &mut Cache<BatchNormState<T>>,
    dy: &Tensor<T>,
  ) -> Result<(Tensor<T>, Tensor<T>, Tensor<T>)> {
    batchnorm_backward(cache.take("batchnorm1d")?, dy)
  }
}


/// Batch normalization over a `[batch, channels, height, width]` input.

pub struct BatchNorm2d;

impl BatchNorm2d {
  #[allow(clippy::too_many_arguments)]
  pub fn forward<T: Scalar + Real>(
    cache: &mut Cache<BatchNormState<T>>,
    x: &Tensor<T>,
    rmean: &Tensor<T>,
    rvar: &Tensor<T>,
    w: &Tensor<T>,
    b: &Tensor<T>,
    momentum: T,
    eps: T,
    training: bool,
  ) -> Result<(Tensor<T>, Tensor<T>, Tensor<T>)> {
    if x.rank() != 4 {
      return Err(Error::RankMismatch { expected: "4", got: x.rank() })
    }
    batchnorm_forward(cache, x, rmean, rvar, w, b, momentum, eps, training)
  }

  pub fn backward<T: Scalar + Real>(
    cache: &mut Cache<BatchNormState<T>>,
    dy: &Tensor<T>,
  ) -> Result<(Tensor<T>, Tensor<T>, Tensor<T>)> {
    batchnorm_backward(cache.take("batchnorm2d")?, dy)
  }
}


#[derive(Debug)]
pub struct LayerNormState<T: Scalar> {
  w: Tensor<T>,
  inv_std: Tensor<T>,
  x_norm: Tensor<T>,
}

/// Layer normalization over the trailing axes matching the weight's
/// shape. Every sample is standardized independently.

pub struct LayerNorm;

impl LayerNorm {
  pub fn forward<T: Scalar + Real>(
    cache: &mut Cache<LayerNormState<T>>,
    x: &Tensor<T>,
    w: &Tensor<T>,
    b: &Tensor<T>,
    eps: T,
  ) -> Result<Tensor<T>> {
    check_norm_shapes(x, w)?;
    if b.shape() != w.shape() {
      return Err(Error::ShapeMismatch {
        expected: w.shape().to_vec(),
        got: b.shape().to_vec(),
      })
    }
    let axes = trailing_axes(w.rank());
    let one = T::one();

    let inv_std = (x.var(axes.clone(), 0, true)? + eps).map(|a| one / a.sqrt() );
    let x_norm = x.sub(&x.mean(axes, true)?)?.mul(&inv_std)?;
    let y = w.mul(&x_norm)?.add(b)?;

    cache.store(LayerNormState { w: w.clone(), inv_std, x_norm });
    Ok(y)
  }

  /// Gradients with respect to the input, weight and bias.
  pub fn backward<T: Scalar + Real>(
    cache: &mut Cache<LayerNormState<T>>,
    dy: &Tensor<T>,
  ) -> Result<(Tensor<T>, Tensor<T>, Tensor<T>)> {
    let LayerNormState { w, inv_std, x_norm } = cache.take("layernorm")?;
    let axes = trailing_axes(w.rank());
    let lead = leading_axes(dy.rank(), w.rank());
    let n = T::from(w.size()).unwrap();

    // The weight varies along the reduced axes, so it multiplies dy
    // before the sums.
    let dy_w = dy.mul(&w)?;
    let dy_w_sum = dy_w.sum(axes.clone(), true)?;
    let dy_w_x_norm_sum = dy_w.mul(&x_norm)?.sum(axes, true)?;
    let inner = dy_w.mul(&Tensor::scalar(n))?
      .sub(&dy_w_sum)?
      .sub(&x_norm.mul(&dy_w_x_norm_sum)?)?;
    let dx = inv_std.mul(&inner)? / n;

    let dw = dy.mul(&x_norm)?.sum(lead.clone(), false)?;
    let db = dy.sum(lead, false)?;
    Ok((dx, dw, db))
  }
}


#[derive(Debug)]
pub struct RmsNormState<T: Scalar> {
  x: Tensor<T>,
  w: Tensor<T>,
  rms: Tensor<T>,
  x_norm: Tensor<T>,
}

/// Root-mean-square normalization over the trailing axes matching the
/// weight's shape. Unlike layer normalization the input is only
/// rescaled, never centered, and there is no bias.

pub struct RmsNorm;

impl RmsNorm {
  pub fn forward<T: Scalar + Real>(
    cache: &mut Cache<RmsNormState<T>>,
    x: &Tensor<T>,
    w: &Tensor<T>,
    eps: T,
  ) -> Result<Tensor<T>> {
    check_norm_shapes(x, w)?;
    let axes = trailing_axes(w.rank());

    let rms = (x.mul(x)?.mean(axes, true)? + eps).sqrt();
    let x_norm = x.div(&rms)?;
    let y = w.mul(&x_norm)?;

    cache.store(RmsNormState { x: x.clone(), w: w.clone(), rms, x_norm });
    Ok(y)
  }

  /// Gradients with respect to the input and weight.
  ///
  /// The input gradient keeps the weight outside the reduction, which
  /// is exact only for a weight that is uniform along the normalized
  /// axes.
  pub fn backward<T: Scalar + Real>(
    cache: &mut Cache<RmsNormState<T>>,
    dy: &Tensor<T>,
  ) -> Result<(Tensor<T>, Tensor<T>)> {
    let RmsNormState { x, w, rms, x_norm } = cache.take("rmsnorm")?;
    let axes = trailing_axes(w.rank());
    let lead = leading_axes(dy.rank(), w.rank());
    let n = T::from(w.size()).unwrap();

    let dy_x_sum = dy.mul(&x)?.sum(axes, true)?;
    let rms_cubed = rms.mul(&rms)?.mul(&rms)? * n;
    let dx = w.mul(&dy.div(&rms)?.sub(&x.mul(&dy_x_sum)?.div(&rms_cubed)?)?)?;

    let dw = dy.mul(&x_norm)?.sum(lead, false)?;
    Ok((dx, dw))
  }
}

fn check_norm_shapes<T: Scalar>(x: &Tensor<T>, w: &Tensor<T>) -> Result<()> {
  if x.rank() < w.rank() || x.shape()[x.rank() - w.rank()..] != *w.shape() {
    return Err(Error::ShapeMismatch {
      expected: w.shape().to_vec(),
      got: x.shape().to_vec(),
    })
  }
  Ok(())
}


#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use crate::tensor::Dims;
  use super::*;

  fn assert_close(a: &Tensor<f64>, b: &Tensor<f64>) {
    assert_eq!(a.shape(), b.shape());
    for (x, y) in a.to_vec().into_iter().zip(b.to_vec()) {
      assert_relative_eq!(x, y, epsilon = 1e-6, max_relative = 1e-4);
    }
  }

  /// Central-difference gradient of `sum(f(x) * dy)` with respect to `x`.
  fn numeric_grad<F>(x: &Tensor<f64>, dy: &Tensor<f64>, mut f: F) -> Tensor<f64>
  where
    F: FnMut(&Tensor<f64>) -> Tensor<f64>,
  {
    let h = 1e-5;
    let mut grad = vec![0.0; x.size()];
    for (i, slot) in grad.iter_mut().enumerate() {
      let mut plus = x.to_vec();
      let mut minus = x.to_vec();
      plus[i] += h;
      minus[i] -= h;
      let plus = f(&Tensor::new(x.shape(), plus).unwrap());
      let minus = f(&Tensor::new(x.shape(), minus).unwrap());
      let dif = plus.sub(&minus).unwrap().mul(dy).unwrap()
        .sum(Dims::All, false).unwrap()
        .item().unwrap();
      *slot = dif / (2.0 * h);
    }
    Tensor::new(x.shape(), grad).unwrap()
  }

  #[test]
  fn layernorm_standardizes_rows() {
    let x = Tensor::new(&[2, 4], vec![1.0, 2.0, 3.0, 4.0, -2.0, 0.0, 2.0, 8.0]).unwrap();
    let w = Tensor::ones(&[4]);
    let b = Tensor::zeros(&[4]);
    let y = LayerNorm::forward(&mut Cache::noop(), &x, &w, &b, 0.0).unwrap();

    for mean in y.mean(-1, false).unwrap().to_vec() {
      assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
    }
    for var in y.var(-1, 0, false).unwrap().to_vec() {
      assert_relative_eq!(var, 1.0, max_relative = 1e-9);
    }
  }

  #[test]
  fn layernorm_gradients_match_finite_differences() {
    let x = Tensor::<f64>::randn(&[4, 3]);
    let w = Tensor::<f64>::randn(&[3]);
    let b = Tensor::<f64>::randn(&[3]);
    let dy = Tensor::<f64>::randn(&[4, 3]);
    let eps = 1e-5;

    let mut cache = Cache::recording();
    LayerNorm::forward(&mut cache, &x, &w, &b, eps).unwrap();
    let (dx, dw, db) = LayerNorm::backward(&mut cache, &dy).unwrap();

    let fd_dx = numeric_grad(&x, &dy, |x| {
      LayerNorm::forward(&mut Cache::noop(), x, &w, &b, eps).unwrap()
    });
    let fd_dw = numeric_grad(&w, &dy, |w| {
      LayerNorm::forward(&mut Cache::noop(), &x, w, &b, eps).unwrap()
    });
    let fd_db = numeric_grad(&b, &dy, |b| {
      LayerNorm::forward(&mut Cache::noop(), &x, &w, b, eps).unwrap()
    });
    assert_close(&dx, &fd_dx);
    assert_close(&dw, &fd_dw);
    assert_close(&db, &fd_db);
  }

  #[test]
  fn layernorm_shape_validation() {
    let x = Tensor::<f32>::ones(&[2, 4]);
    let w = Tensor::<f32>::ones(&[3]);
    let b = Tensor::<f32>::ones(&[3]);
    let err = LayerNorm::forward(&mut Cache::noop(), &x, &w, &b, 1e-5).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
  }

  #[test]
  fn batchnorm_training_is_identity_on_standardized_input() {
    // per-channel mean 0 and population variance 1
    let x = Tensor::new(&[2, 2], vec![1.0, -1.0, -1.0, 1.0]).unwrap();
    let rmean = Tensor::zeros(&[2]);
    let rvar = Tensor::ones(&[2]);
    let w = Tensor::ones(&[2]);
    let b = Tensor::zeros(&[2]);

    let (y, new_rmean, new_rvar) = BatchNorm1d::forward(
      &mut Cache::noop(), &x, &rmean, &rvar, &w, &b, 0.1, 0.0, true,
    ).unwrap();

    assert_close(&y, &x);
    assert_close(&new_rmean, &Tensor::zeros(&[2]));
    // sample variance of {1, -1} is 2, so 0.9 * 1 + 0.1 * 2
    assert_close(&new_rvar, &Tensor::fill(&[2], 1.1));
  }

  #[test]
  fn batchnorm_inference_uses_running_stats() {
    let x = Tensor::new(&[2, 1], vec![3.0, 5.0]).unwrap();
    let rmean = Tensor::vec(&[4.0]);
    let rvar = Tensor::vec(&[4.0]);
    let w = Tensor::ones(&[1]);
    let b = Tensor::zeros(&[1]);

    let (y, new_rmean, new_rvar) = BatchNorm1d::forward(
      &mut Cache::noop(), &x, &rmean, &rvar, &w, &b, 0.1, 0.0, false,
    ).unwrap();

    // (x - 4) / 2
    assert_close(&y, &Tensor::new(&[2, 1], vec![-0.5, 0.5]).unwrap());
    assert_eq!(new_rmean, rmean);
    assert_eq!(new_rvar, rvar);
  }

  #[test]
  fn batchnorm_gradients_match_finite_differences() {
    let x = Tensor::<f64>::randn(&[4, 3]);
    let rmean = Tensor::zeros(&[3]);
    let rvar = Tensor::ones(&[3]);
    let w = Tensor::<f64>::randn(&[3]);
    let b = Tensor::<f64>::randn(&[3]);
    let dy = Tensor::<f64>::randn(&[4, 3]);
    let eps = 1e-5;

    let mut cache = Cache::recording();
    BatchNorm1d::forward(&mut cache, &x, &rmean, &rvar, &w, &b, 0.1, eps, true).unwrap();
    let (dx, dw, db) = BatchNorm1d::backward(&mut cache, &dy).unwrap();

    let forward = |x: &Tensor<f64>, w: &Tensor<f64>, b: &Tensor<f64>| {
      BatchNorm1d::forward(&mut Cache::noop(), x, &rmean, &rvar, w, b, 0.1, eps, true).unwrap().0
    };
    assert_close(&dx, &numeric_grad(&x, &dy, |x| forward(x, &w, &b) ));
    assert_close(&dw, &numeric_grad(&w, &dy, |w| forward(&x, w, &b) ));
    assert_close(&db, &numeric_grad(&b, &dy, |b| forward(&x, &w, b) ));
  }

  #[test]
  fn batchnorm_single_channel_gradients_keep_param_shape() {
    let x = Tensor::<f64>::randn(&[4, 1]);
    let stat = Tensor::zeros(&[1]);
    let mut w = Tensor::ones(&[1]);
    let b = Tensor::zeros(&[1]);

    let mut cache = Cache::recording();
    BatchNorm1d::forward(
      &mut cache, &x, &stat, &Tensor::ones(&[1]), &w, &b, 0.1, 1e-5, true,
    ).unwrap();
    let (dx, dw, db) = BatchNorm1d::backward(&mut cache, &Tensor::ones(&[4, 1])).unwrap();

    assert_eq!(dx.shape(), &[4, 1]);
    assert_eq!(dw.shape(), &[1]);
    assert_eq!(db.shape(), &[1]);
    w.accumulate_grad(&dw).unwrap();
    assert_eq!(w.grad().unwrap().shape(), &[1]);
  }

  #[test]
  fn batchnorm2d_reduces_over_spatial_axes() {
    let x = Tensor::<f64>::arrange(&[2, 2, 2, 2], 0.0, 1.0);
    let rmean = Tensor::zeros(&[2]);
    let rvar = Tensor::ones(&[2]);
    let w = Tensor::ones(&[2]);
    let b = Tensor::zeros(&[2]);

    let (y, _, _) = BatchNorm2d::forward(
      &mut Cache::noop(), &x, &rmean, &rvar, &w, &b, 0.1, 0.0, true,
    ).unwrap();

    let mean = y.mean([0, 2, 3], false).unwrap();
    let var = y.var([0, 2, 3], 0, false).unwrap();
    assert_close(&mean, &Tensor::zeros(&[2]));
    assert_close(&var, &Tensor::ones(&[2]));

    let err = BatchNorm2d::forward(
      &mut Cache::noop(), &Tensor::<f64>::ones(&[2, 2]), &rmean, &rvar, &w, &b, 0.1, 0.0, true,
    ).unwrap_err();
    assert!(matches!(err, Error::RankMismatch { got: 2, .. }));
  }

  #[test]
  fn rmsnorm_rescales_without_centering() {
    let x = Tensor::new(&[1, 2], vec![3.0, 4.0]).unwrap();
    let w = Tensor::ones(&[2]);
    let y = RmsNorm::forward(&mut Cache::noop(), &x, &w, 0.0).unwrap();
    // rms of [3, 4] is sqrt(12.5)
    let rms = 12.5_f64.sqrt();
    assert_close(&y, &Tensor::new(&[1, 2], vec![3.0 / rms, 4.0 / rms]).unwrap());
  }

  #[test]
  fn rmsnorm_gradients_match_finite_differences() {
    let x = Tensor::<f64>::randn(&[4, 3]);
    // dx is only exact for a uniform weight
    let w = Tensor::fill(&[3], 0.8);
    let dy = Tensor::<f64>::randn(&[4, 3]);
    let eps = 1e-5;

    let mut cache = Cache::recording();
    RmsNorm::forward(&mut cache, &x, &w, eps).unwrap();
    let (dx, dw) = RmsNorm::backward(&mut cache, &dy).unwrap();

    let fd_dx = numeric_grad(&x, &dy, |x| {
      RmsNorm::forward(&mut Cache::noop(), x, &w, eps).unwrap()
    });
    let fd_dw = numeric_grad(&w, &dy, |w| {
      RmsNorm::forward(&mut Cache::noop(), &x, w, eps).unwrap()
    });
    assert_close(&dx, &fd_dx);
    assert_close(&dw, &fd_dw);
  }

  #[test]
  fn backward_needs_a_recorded_forward() {
    let mut cache = Cache::<LayerNormState<f32>>::recording();
    let err = LayerNorm::backward(&mut cache, &Tensor::ones(&[2, 2])).unwrap_err();
    assert!(matches!(err, Error::MissingIntermediate { function: "layernorm" }));
  }

  #[test]
  fn inference_forward_records_no_state() {
    let x = Tensor::<f64>::randn(&[2, 3]);
    let stat = Tensor::zeros(&[3]);
    let w = Tensor::ones(&[3]);

    let mut cache = Cache::recording();
    BatchNorm1d::forward(
      &mut cache, &x, &stat, &Tensor::ones(&[3]), &w, &stat, 0.1, 1e-5, false,
    ).unwrap();
    let err = BatchNorm1d::backward(&mut cache, &Tensor::ones(&[2, 3])).unwrap_err();
    assert!(matches!(err, Error::MissingIntermediate { function: "batchnorm1d" }));
  }
}
