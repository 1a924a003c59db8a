use crate::error::{Error, Result};
use crate::scalar::{Scalar, Real};
use crate::tensor::Tensor;
use super::Cache;


#[derive(Debug)]
pub struct DropoutState<T: Scalar> {
  mask: Tensor<T>,
}

/// Inverted dropout.
///
/// During training every element is zeroed with probability `p` and the
/// survivors are scaled by `1 / (1 - p)`, so the expected activation
/// stays unchanged and inference needs no rescaling. Outside of
/// training, and for `p = 0`, the input passes through untouched.

pub struct Dropout;

impl Dropout {
  pub fn forward<T: Scalar + Real>(
    cache: &mut Cache<DropoutState<T>>,
    x: &Tensor<T>,
    p: T,
    training: bool,
  ) -> Result<Tensor<T>> {
    if p < T::zero() || p >= T::one() {
      return Err(Error::InvalidProbability(p.to_f64().unwrap_or(f64::NAN)))
    }
    if !training || p == T::zero() {
      return Ok(x.clone())
    }
    let keep = T::one() - p;
    let mask = Tensor::fill(x.shape(), keep).bernoulli::<T>() / keep;
    let y = x.mul(&mask)?;
    cache.store(DropoutState { mask });
    Ok(y)
  }

  /// Applies the mask recorded by the preceding forward pass.
  pub fn backward<T: Scalar + Real>(
    cache: &mut Cache<DropoutState<T>>,
    dy: &Tensor<T>,
  ) -> Result<Tensor<T>> {
    let DropoutState { mask } = cache.take("dropout")?;
    dy.mul(&mask)
  }
}


#[cfg(test)]
mod tests {
  use crate::tensor::Dims;
  use super::*;

  #[test]
  fn inference_is_identity() {
    let x = Tensor::<f64>::randn(&[8, 8]);
    let y = Dropout::forward(&mut Cache::noop(), &x, 0.5, false).unwrap();
    assert_eq!(y, x);
  }

  #[test]
  fn zero_probability_is_identity() {
    let x = Tensor::<f64>::randn(&[8, 8]);
    let y = Dropout::forward(&mut Cache::recording(), &x, 0.0, true).unwrap();
    assert_eq!(y, x);
  }

  #[test]
  fn training_drops_and_rescales() {
    let p = 0.5;
    let x = Tensor::<f64>::ones(&[100, 100]);
    let y = Dropout::forward(&mut Cache::noop(), &x, p, true).unwrap();

    let scaled = 1.0 / (1.0 - p);
    for value in y.to_vec() {
      assert!(value == 0.0 || value == scaled);
    }
    // survivor count concentrates around (1 - p) * n
    let survivors = y.not_equal(&Tensor::zeros(&[100, 100])).unwrap()
      .map(|kept| kept as usize as f64 )
      .sum(Dims::All, false).unwrap()
      .item().unwrap();
    assert!(survivors > 3500.0 && survivors < 6500.0);
  }

  #[test]
  fn backward_reuses_the_forward_mask() {
    let x = Tensor::<f64>::ones(&[32, 32]);
    let mut cache = Cache::recording();
    let y = Dropout::forward(&mut cache, &x, 0.3, true).unwrap();
    let dx = Dropout::backward(&mut cache, &Tensor::ones(&[32, 32])).unwrap();

    // gradients vanish exactly where activations were dropped
    for (dy, y) in dx.to_vec().into_iter().zip(y.to_vec()) {
      assert_eq!(dy == 0.0, y == 0.0);
    }
    assert!(cache.take("dropout").is_err());
  }

  #[test]
  fn probability_bounds() {
    let x = Tensor::<f32>::ones(&[2]);
    assert!(matches!(
      Dropout::forward(&mut Cache::noop(), &x, 1.0, true),
      Err(Error::InvalidProbability(_))
    ));
    assert!(Dropout::forward(&mut Cache::noop(), &x, -0.1, true).is_err());
  }
}
