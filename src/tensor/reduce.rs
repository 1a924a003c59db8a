use itertools::Itertools;
use ndarray::{ArrayD, Axis};

use crate::error::{Error, Result};
use crate::scalar::{Scalar, Numeric, Real};
use super::{Tensor, axis_index};


/// Axis selection for reductions.
///
/// Negative entries count from the back; duplicates collapse to a single
/// reduction of that axis. Reducing over no axes at all yields a copy.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dims {
  All,
  Single(isize),
  Multi(Vec<isize>),
}

impl Dims {
  pub(crate) fn resolve(&self, rank: usize) -> Result<Vec<usize>> {
    let dims = match self {
      Dims::All => return Ok((0..rank).collect()),
      Dims::Single(dim) => std::slice::from_ref(dim),
      Dims::Multi(dims) => dims.as_slice(),
    };
    let axes: Vec<usize> = dims.iter()
      .map(|&dim| axis_index(dim, rank) )
      .collect::<Result<_>>()?;
    Ok(axes.into_iter().sorted().dedup().collect())
  }
}

impl From<isize> for Dims {
  fn from(dim: isize) -> Self {
    Dims::Single(dim)
  }
}

impl From<i32> for Dims {
  fn from(dim: i32) -> Self {
    Dims::Single(dim as isize)
  }
}

impl From<Vec<isize>> for Dims {
  fn from(dims: Vec<isize>) -> Self {
    Dims::Multi(dims)
  }
}

impl From<&[isize]> for Dims {
  fn from(dims: &[isize]) -> Self {
    Dims::Multi(dims.to_vec())
  }
}

impl<const N: usize> From<[isize; N]> for Dims {
  fn from(dims: [isize; N]) -> Self {
    Dims::Multi(dims.to_vec())
  }
}

impl<T: Scalar> Tensor<T> {
  /// Applies a single-axis reduction over every selected axis, highest
  /// axis first so the remaining indices stay valid. With `keepdims` the
  /// reduced axes are reinserted with size one.
  fn reduce<F>(&self, dims: Dims, keepdims: bool, cb: F) -> Result<Self>
  where
    F: Fn(&ArrayD<T>, Axis) -> ArrayD<T>,
  {
    let axes = dims.resolve(self.rank())?;
    let mut data = self.array().clone();
    for &axis in axes.iter().rev() {
      data = cb(&data, Axis(axis));
    }
    if keepdims {
      for &axis in &axes {
        data = data.insert_axis(Axis(axis));
      }
    }
    Ok(self.derived(data))
  }

  fn reduced_count(&self, dims: &Dims) -> Result<usize> {
    let axes = dims.resolve(self.rank())?;
    Ok(axes.iter().map(|&axis| self.shape()[axis] ).product())
  }
}

impl<T: Scalar + Numeric> Tensor<T> {
  pub fn sum(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    self.reduce(dims.into(), keepdims, |data, axis| data.sum_axis(axis) )
  }

  pub fn prod(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    self.reduce(dims.into(), keepdims, |data, axis| {
      data.fold_axis(axis, T::one(), |&acc, &x| acc * x )
    })
  }
}

impl<T: Scalar + Real> Tensor<T> {
  pub fn mean(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    let dims = dims.into();
    let n = T::from(self.reduced_count(&dims)?).unwrap();
    Ok(self.sum(dims, keepdims)? / n)
  }

  /// Variance with `ddof` subtracted from the divisor. `ddof = 0` is the
  /// population variance, `ddof = 1` the sample variance.
  pub fn var(&self, dims: impl Into<Dims>, ddof: usize, keepdims: bool) -> Result<Self> {
    let dims = dims.into();
    let n = self.reduced_count(&dims)?;
    let mean = self.mean(dims.clone(), true)?;
    let dif = self.sub(&mean)?;
    let divisor = T::from(n).unwrap() - T::from(ddof).unwrap();
    Ok(dif.mul(&dif)?.sum(dims, keepdims)? / divisor)
  }

  pub fn std(&self, dims: impl Into<Dims>, ddof: usize, keepdims: bool) -> Result<Self> {
    Ok(self.var(dims, ddof, keepdims)?.map(|a| a.sqrt() ))
  }

  /// Euclidean norm over the selected axes.
  pub fn norm(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    Ok(self.mul(self)?.sum(dims, keepdims)?.map(|a| a.sqrt() ))
  }

  pub fn max(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    self.reduce(dims.into(), keepdims, |data, axis| {
      data.fold_axis(axis, T::min_value(), |&acc, &x| acc.max(x) )
    })
  }

  pub fn min(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    self.reduce(dims.into(), keepdims, |data, axis| {
      data.fold_axis(axis, T::max_value(), |&acc, &x| acc.min(x) )
    })
  }

  /// Normalized exponentials along `dim`, shifted by the lane maximum
  /// before exponentiation.
  pub fn softmax(&self, dim: isize) -> Result<Self> {
    let max = self.max(dim, true)?;
    let exp = self.sub(&max)?.map(|a| a.exp() );
    let sum = exp.sum(dim, true)?;
    exp.div(&sum)
  }
}

impl Tensor<bool> {
  pub fn all(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    self.reduce(dims.into(), keepdims, |data, axis| {
      data.fold_axis(axis, true, |&acc, &x| acc && x )
    })
  }

  pub fn any(&self, dims: impl Into<Dims>, keepdims: bool) -> Result<Self> {
    self.reduce(dims.into(), keepdims, |data, axis| {
      data.fold_axis(axis, false, |&acc, &x| acc || x )
    })
  }
}

/// Element-wise sum of a sequence of tensors, broadcasting as it folds.
pub fn tensorsum<T, I>(tensors: I) -> Result<Tensor<T>>
where
  T: Scalar + Numeric,
  I: IntoIterator<Item = Tensor<T>>,
{
  let mut tensors = tensors.into_iter();
  let first = tensors.next().ok_or(Error::EmptyFold)?;
  tensors.try_fold(first, |acc, tensor| acc.add(&tensor) )
}

/// Element-wise product of a sequence of tensors.
pub fn tensorprod<T, I>(tensors: I) -> Result<Tensor<T>>
where
  T: Scalar + Numeric,
  I: IntoIterator<Item = Tensor<T>>,
{
  let mut tensors = tensors.into_iter();
  let first = tensors.next().ok_or(Error::EmptyFold)?;
  tensors.try_fold(first, |acc, tensor| acc.mul(&tensor) )
}
