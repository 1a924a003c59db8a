use std::ops::{Add, Sub, Mul, Div, Rem, Neg};
use std::ops::{AddAssign, SubAssign, MulAssign, DivAssign, RemAssign};

use ndarray::{Array3, Axis, IxDyn, Zip};

use crate::error::{Error, Result};
use crate::scalar::{Scalar, Numeric, Signed, Real};
use super::Tensor;


/// Resulting dimensions of broadcasting `lhs` against `rhs`, aligning
/// shapes at their trailing axes.
pub(crate) fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
  let rank = lhs.len().max(rhs.len());
  let mut dims = vec![0; rank];
  for i in 0..rank {
    let l = if i < rank - lhs.len() { 1 } else { lhs[i - (rank - lhs.len())] };
    let r = if i < rank - rhs.len() { 1 } else { rhs[i - (rank - rhs.len())] };
    dims[i] = match (l, r) {
      (l, r) if l == r => l,
      (1, r) => r,
      (l, 1) => l,
      _ => return Err(Error::Broadcast { lhs: lhs.to_vec(), rhs: rhs.to_vec() }),
    };
  }
  Ok(dims)
}

impl<T: Scalar> Tensor<T> {
  /// Element-wise combination of two tensors, broadcasting both sides.
  pub fn zip<O, F>(&self, rhs: &Self, mut cb: F) -> Result<Tensor<O>>
  where
    O: Scalar,
    F: FnMut(T, T) -> O,
  {
    let dims = broadcast_dims(self.shape(), rhs.shape())?;
    let err = || Error::Broadcast {
      lhs: self.shape().to_vec(),
      rhs: rhs.shape().to_vec(),
    };
    let lhs = self.array().broadcast(IxDyn(&dims)).ok_or_else(err)?;
    let rhs = rhs.array().broadcast(IxDyn(&dims)).ok_or_else(err)?;
    let data = Zip::from(&lhs).and(&rhs).map_collect(|&a, &b| cb(a, b) );
    Ok(self.derived(data))
  }

  fn zip_assign<F>(&mut self, rhs: &Self, mut cb: F) -> Result<()>
  where
    F: FnMut(&mut T, T),
  {
    let view = rhs.array().broadcast(self.array().raw_dim()).ok_or(Error::Broadcast {
      lhs: self.shape().to_vec(),
      rhs: rhs.shape().to_vec(),
    })?;
    self.data.zip_mut_with(&view, |a, &b| cb(a, b) );
    Ok(())
  }

  pub fn equal(&self, rhs: &Self) -> Result<Tensor<bool>> {
    self.zip(rhs, |a, b| a == b )
  }

  pub fn not_equal(&self, rhs: &Self) -> Result<Tensor<bool>> {
    self.zip(rhs, |a, b| a != b )
  }
}

impl<T: Scalar + Numeric> Tensor<T> {
  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a * b )
  }

  pub fn div(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a / b )
  }

  pub fn rem(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a % b )
  }

  pub fn less(&self, rhs: &Self) -> Result<Tensor<bool>> {
    self.zip(rhs, |a, b| a < b )
  }

  pub fn less_equal(&self, rhs: &Self) -> Result<Tensor<bool>> {
    self.zip(rhs, |a, b| a <= b )
  }

  pub fn greater(&self, rhs: &Self) -> Result<Tensor<bool>> {
    self.zip(rhs, |a, b| a > b )
  }

  pub fn greater_equal(&self, rhs: &Self) -> Result<Tensor<bool>> {
    self.zip(rhs, |a, b| a >= b )
  }

  pub fn clamp(&self, min: T, max: T) -> Self {
    self.map(|a| if a < min { min } else if a > max { max } else { a } )
  }

  /// In-place addition, broadcasting `rhs` to this tensor's shape.
  /// Keeps identity and any attached gradient untouched.
  pub fn iadd(&mut self, rhs: &Self) -> Result<()> {
    self.zip_assign(rhs, |a, b| *a += b )
  }

  pub fn isub(&mut self, rhs: &Self) -> Result<()> {
    self.zip_assign(rhs, |a, b| *a -= b )
  }

  pub fn imul(&mut self, rhs: &Self) -> Result<()> {
    self.zip_assign(rhs, |a, b| *a *= b )
  }

  pub fn idiv(&mut self, rhs: &Self) -> Result<()> {
    self.zip_assign(rhs, |a, b| *a /= b )
  }

  pub fn irem(&mut self, rhs: &Self) -> Result<()> {
    self.zip_assign(rhs, |a, b| *a %= b )
  }

  /// Batched matrix product with broadcasting over leading dimensions.
  /// Rank-one operands are promoted to matrices and the padded axes are
  /// dropped from the result.
  pub fn matmul(&self, rhs: &Self) -> Result<Self> {
    if self.rank() == 0 || rhs.rank() == 0 {
      return Err(Error::DimOutOfRange { dim: -2, rank: self.rank().min(rhs.rank()) })
    }
    let lhs_vec = self.rank() == 1;
    let rhs_vec = rhs.rank() == 1;
    let lhs = if lhs_vec { self.unsqueeze(0)? } else { self.clone() };
    let rhs = if rhs_vec { rhs.unsqueeze(-1)? } else { rhs.clone() };

    let (m, k) = (lhs.shape()[lhs.rank() - 2], lhs.shape()[lhs.rank() - 1]);
    let (k2, n) = (rhs.shape()[rhs.rank() - 2], rhs.shape()[rhs.rank() - 1]);
    if k != k2 {
      return Err(Error::MatmulMismatch { lhs: k, rhs: k2 })
    }

    let batch = broadcast_dims(
      &lhs.shape()[..lhs.rank() - 2],
      &rhs.shape()[..rhs.rank() - 2],
    )?;
    let count: usize = batch.iter().product();

    let mut lhs_dims = batch.clone();
    lhs_dims.extend([m, k]);
    let mut rhs_dims = batch.clone();
    rhs_dims.extend([k, n]);

    let err = || Error::Broadcast {
      lhs: self.shape().to_vec(),
      rhs: rhs.shape().to_vec(),
    };
    let slabs_l = lhs.array().broadcast(IxDyn(&lhs_dims)).ok_or_else(err)?
      .as_standard_layout().to_owned()
      .into_shape((count, m, k))
      .expect("batch dimensions verified");
    let slabs_r = rhs.array().broadcast(IxDyn(&rhs_dims)).ok_or_else(err)?
      .as_standard_layout().to_owned()
      .into_shape((count, k, n))
      .expect("batch dimensions verified");

    let mut out = Array3::<T>::zeros((count, m, n));
    for i in 0..count {
      let product = slabs_l.index_axis(Axis(0), i).dot(&slabs_r.index_axis(Axis(0), i));
      out.index_axis_mut(Axis(0), i).assign(&product);
    }

    let mut dims = batch;
    dims.extend([m, n]);
    // a promoted left vector contributed the m axis, a promoted right
    // vector the n axis
    if lhs_vec { dims.remove(dims.len() - 2); }
    if rhs_vec { dims.pop(); }
    let data = out.into_shape(IxDyn(&dims)).expect("product element count matches");
    Ok(self.derived(data))
  }
}

impl<T: Scalar + Real> Tensor<T> {
  pub fn floordiv(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| (a / b).floor() )
  }

  pub fn pow(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a.powf(b) )
  }

  pub fn ifloordiv(&mut self, rhs: &Self) -> Result<()> {
    self.zip_assign(rhs, |a, b| *a = (*a / b).floor() )
  }

  pub fn ipow(&mut self, rhs: &Self) -> Result<()> {
    self.zip_assign(rhs, |a, b| *a = a.powf(b) )
  }
}

impl<T: Scalar + Signed> Neg for &Tensor<T> {
  type Output = Tensor<T>;

  fn neg(self) -> Tensor<T> {
    self.map(|a| -a )
  }
}

impl<T: Scalar + Signed> Neg for Tensor<T> {
  type Output = Tensor<T>;

  fn neg(self) -> Tensor<T> {
    -&self
  }
}

macro_rules! add_operator {
  ($trait:ident, $method:ident, $bound:ident) => {
    impl<T: Scalar + $bound> $trait for &Tensor<T> {
      type Output = Tensor<T>;

      fn $method(self, rhs: Self) -> Tensor<T> {
        Tensor::$method(self, rhs).unwrap_or_else(|err| panic!("{}", err) )
      }
    }

    impl<T: Scalar + $bound> $trait<Tensor<T>> for &Tensor<T> {
      type Output = Tensor<T>;

      fn $method(self, rhs: Tensor<T>) -> Tensor<T> {
        $trait::$method(self, &rhs)
      }
    }

    impl<T: Scalar + $bound> $trait<&Tensor<T>> for Tensor<T> {
      type Output = Tensor<T>;

      fn $method(self, rhs: &Tensor<T>) -> Tensor<T> {
        $trait::$method(&self, rhs)
      }
    }

    impl<T: Scalar + $bound> $trait for Tensor<T> {
      type Output = Tensor<T>;

      fn $method(self, rhs: Tensor<T>) -> Tensor<T> {
        $trait::$method(&self, &rhs)
      }
    }

    impl<T: Scalar + $bound> $trait<T> for &Tensor<T> {
      type Output = Tensor<T>;

      fn $method(self, rhs: T) -> Tensor<T> {
        $trait::$method(self, &Tensor::scalar(rhs))
      }
    }

    impl<T: Scalar + $bound> $trait<T> for Tensor<T> {
      type Output = Tensor<T>;

      fn $method(self, rhs: T) -> Tensor<T> {
        $trait::$method(&self, &Tensor::scalar(rhs))
      }
    }

    impl $trait<&Tensor<f32>> for f32 {
      type Output = Tensor<f32>;

      fn $method(self, rhs: &Tensor<f32>) -> Tensor<f32> {
        $trait::$method(&Tensor::scalar(self), rhs)
      }
    }

    impl $trait<Tensor<f32>> for f32 {
      type Output = Tensor<f32>;

      fn $method(self, rhs: Tensor<f32>) -> Tensor<f32> {
        $trait::$method(&Tensor::scalar(self), &rhs)
      }
    }

    impl $trait<&Tensor<f64>> for f64 {
      type Output = Tensor<f64>;

      fn $method(self, rhs: &Tensor<f64>) -> Tensor<f64> {
        $trait::$method(&Tensor::scalar(self), rhs)
      }
    }

    impl $trait<Tensor<f64>> for f64 {
      type Output = Tensor<f64>;

      fn $method(self, rhs: Tensor<f64>) -> Tensor<f64> {
        $trait::$method(&Tensor::scalar(self), &rhs)
      }
    }
  };
}

add_operator!(Add, add, Numeric);
add_operator!(Sub, sub, Numeric);
add_operator!(Mul, mul, Numeric);
add_operator!(Div, div, Numeric);
add_operator!(Rem, rem, Numeric);

macro_rules! add_assign_operator {
  ($trait:ident, $method:ident, $inplace:ident) => {
    impl<T: Scalar + Numeric> $trait<&Tensor<T>> for Tensor<T> {
      fn $method(&mut self, rhs: &Tensor<T>) {
        self.$inplace(rhs).unwrap_or_else(|err| panic!("{}", err) )
      }
    }

    impl<T: Scalar + Numeric> $trait for Tensor<T> {
      fn $method(&mut self, rhs: Tensor<T>) {
        $trait::$method(self, &rhs)
      }
    }

    impl<T: Scalar + Numeric> $trait<T> for Tensor<T> {
      fn $method(&mut self, rhs: T) {
        $trait::$method(self, &Tensor::scalar(rhs))
      }
    }
  };
}

add_assign_operator!(AddAssign, add_assign, iadd);
add_assign_operator!(SubAssign, sub_assign, isub);
add_assign_operator!(MulAssign, mul_assign, imul);
add_assign_operator!(DivAssign, div_assign, idiv);
add_assign_operator!(RemAssign, rem_assign, irem);
