use rand::distributions::uniform::SampleUniform;
use num_traits::{PrimInt, NumAssignOps, Num, NumCast};

use crate::dtype::Dtype;


/// All types that may appear as tensor elements.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Inner: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug + 'static {}
impl<T: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug + 'static> Inner for T {}


/// Element types with a [Dtype] tag, storable in a [Tensor](crate::Tensor).
///
/// Unlike the other traits in this module, `Scalar` is implemented
/// explicitly per type so the dtype enumeration stays closed.

pub trait Scalar: Inner {
  const DTYPE: Dtype;
}

macro_rules! impl_scalar {
  ($type:ty, $dtype:expr) => {
    impl Scalar for $type {
      const DTYPE: Dtype = $dtype;
    }
  };
}

impl_scalar!(bool, Dtype::Bool);
impl_scalar!(u8, Dtype::Uint8);
impl_scalar!(u16, Dtype::Uint16);
impl_scalar!(u32, Dtype::Uint32);
impl_scalar!(u64, Dtype::Uint64);
impl_scalar!(i8, Dtype::Int8);
impl_scalar!(i16, Dtype::Int16);
impl_scalar!(i32, Dtype::Int32);
impl_scalar!(i64, Dtype::Int64);
impl_scalar!(f32, Dtype::Float32);
impl_scalar!(f64, Dtype::Float64);


/// All numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Numeric: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum {}
impl<T: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum> Numeric for T {}


/// All signed numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Signed: Numeric + num_traits::Signed {}
impl<T: Numeric + num_traits::Signed> Signed for T {}


/// All unsigned numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Unsigned: Numeric + num_traits::Unsigned {}
impl<T: Numeric + num_traits::Unsigned> Unsigned for T {}


/// All integer types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Integer: Numeric + PrimInt {}
impl<T: Numeric + PrimInt> Integer for T {}


/// All continuous numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Real: Signed + num_traits::real::Real + SampleUniform {}
impl<T: Signed + num_traits::real::Real + SampleUniform> Real for T {}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dtype_tags() {
    assert_eq!(<f32 as Scalar>::DTYPE, Dtype::Float32);
    assert_eq!(<bool as Scalar>::DTYPE, Dtype::Bool);
    assert_eq!(<i64 as Scalar>::DTYPE, Dtype::Int64);
  }
}
