use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{ArrayD, Axis, IxDyn, Slice};
use num_traits::NumCast;
use rand::Rng;
use serde::{Serialize, Deserialize};

mod ops;
mod reduce;

pub use reduce::{Dims, tensorsum, tensorprod};

use crate::{
  device::Device,
  dtype::Dtype,
  error::{Error, Result},
  scalar::{Scalar, Numeric, Integer, Real},
};


pub(crate) fn make_id() -> usize {
  static LAST_ID: AtomicUsize = AtomicUsize::new(0);
  LAST_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn axis_index(dim: isize, rank: usize) -> Result<usize> {
  let index = if dim < 0 { rank as isize + dim } else { dim };
  if index < 0 || index >= rank as isize {
    return Err(Error::DimOutOfRange { dim, rank })
  }
  Ok(index as usize)
}

fn insert_index(dim: isize, rank: usize) -> Result<usize> {
  let index = if dim < 0 { rank as isize + 1 + dim } else { dim };
  if index < 0 || index > rank as isize {
    return Err(Error::DimOutOfRange { dim, rank })
  }
  Ok(index as usize)
}

// Polar Box-Muller transformation

fn randn_pair<T: Real>() -> (T, T) {
  let mut rng = rand::thread_rng();
  let u = rng.gen_range(-T::one()..T::one());
  let v = rng.gen_range(-T::one()..T::one());
  let r = u * u + v * v;
  // Try again if outside the unit disc
  if r == T::zero() || r >= T::one() { return randn_pair() }
  let c = (T::from(-2.0).unwrap() * r.ln() / r).sqrt();
  (u * c, v * c)
}


/// Multidimensional value with a device tag and an optional gradient.
///
/// Dense storage and kernels come from [ndarray]; this type layers the
/// autograd contract on top: every operation yields a new, independently
/// owned tensor, and gradients are tensors of identical shape attached by
/// the backward passes in [func](crate::func).
///
/// Element-wise comparison goes through [equal](Tensor::equal) and
/// friends; [id](Tensor::id) is the stable per-instance handle to use as
/// a container key.

#[derive(Debug, Serialize, Deserialize)]
pub struct Tensor<T: Scalar> {
  data: ArrayD<T>,
  device: Device,
  grad: Option<Box<Tensor<T>>>,
  #[serde(skip, default = "make_id")]
  id: usize,
}

impl<T: Scalar> Clone for Tensor<T> {
  /// Deep copy of the data and, recursively, the gradient.
  /// The copy gets a fresh identity and never aliases the original.
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      device: self.device,
      grad: self.grad.clone(),
      id: make_id(),
    }
  }
}

impl<T: Scalar> PartialEq for Tensor<T> {
  /// Structural comparison of shape and elements; gradients and identity
  /// are ignored. For an element-wise mask use [equal](Tensor::equal).
  fn eq(&self, rhs: &Self) -> bool {
    self.data == rhs.data
  }
}

impl<T: Scalar> Tensor<T> {
  pub fn from_array(data: ArrayD<T>) -> Self {
    Self { data, device: Device::Cpu, grad: None, id: make_id() }
  }

  pub fn new(shape: &[usize], data: Vec<T>) -> Result<Self> {
    let expected = shape.iter().product();
    if data.len() != expected {
      return Err(Error::ElementCountMismatch {
        shape: shape.to_vec(),
        expected,
        got: data.len(),
      })
    }
    Ok(Self::from_parts(shape, data))
  }

  fn from_parts(shape: &[usize], data: Vec<T>) -> Self {
    let data = ArrayD::from_shape_vec(IxDyn(shape), data)
      .expect("element count verified");
    Self::from_array(data)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::from_parts(&[vec.len()], vec.to_vec())
  }

  pub fn scalar(item: T) -> Self {
    Self::from_array(ArrayD::from_elem(IxDyn(&[]), item))
  }

  pub fn fill(shape: &[usize], filler: T) -> Self {
    Self::from_array(ArrayD::from_elem(IxDyn(shape), filler))
  }

  /// New tensor around `data`, inheriting this tensor's device tag.
  pub(crate) fn derived<O: Scalar>(&self, data: ArrayD<O>) -> Tensor<O> {
    Tensor { data, device: self.device, grad: None, id: make_id() }
  }

  pub fn array(&self) -> &ArrayD<T> {
    &self.data
  }

  pub fn into_array(self) -> ArrayD<T> {
    self.data
  }

  pub fn to_vec(&self) -> Vec<T> {
    self.data.iter().copied().collect()
  }

  pub fn shape(&self) -> &[usize] {
    self.data.shape()
  }

  pub fn rank(&self) -> usize {
    self.data.ndim()
  }

  pub fn size(&self) -> usize {
    self.data.len()
  }

  pub fn dtype(&self) -> Dtype {
    T::DTYPE
  }

  pub fn device(&self) -> Device {
    self.device
  }

  /// Stable per-instance handle, independent of element values.
  pub fn id(&self) -> usize {
    self.id
  }

  pub fn item(&self) -> Result<T> {
    if self.size() != 1 {
      return Err(Error::NotAScalar(self.shape().to_vec()))
    }
    self.data.iter().next().copied().ok_or_else(|| Error::NotAScalar(vec![]) )
  }

  pub fn grad(&self) -> Option<&Tensor<T>> {
    self.grad.as_deref()
  }

  pub fn set_grad(&mut self, grad: Tensor<T>) -> Result<()> {
    if grad.shape() != self.shape() {
      return Err(Error::ShapeMismatch {
        expected: self.shape().to_vec(),
        got: grad.shape().to_vec(),
      })
    }
    self.grad = Some(Box::new(grad));
    Ok(())
  }

  pub fn take_grad(&mut self) -> Option<Tensor<T>> {
    self.grad.take().map(|grad| *grad )
  }

  pub fn reset_grad(&mut self) {
    self.grad = None;
  }

  /// Copy of this tensor on the given device, gradient included.
  /// A same-device transfer is a plain copy.
  pub fn to_device(&self, device: Device) -> Result<Self> {
    if !device.is_available() {
      return Err(Error::DeviceUnavailable(device))
    }
    let mut moved = self.clone();
    moved.set_device_tag(device);
    Ok(moved)
  }

  /// In-place variant of [to_device](Tensor::to_device); keeps identity.
  pub fn ito_device(&mut self, device: Device) -> Result<()> {
    if !device.is_available() {
      return Err(Error::DeviceUnavailable(device))
    }
    self.set_device_tag(device);
    Ok(())
  }

  fn set_device_tag(&mut self, device: Device) {
    self.device = device;
    if let Some(grad) = self.grad.as_mut() {
      grad.set_device_tag(device);
    }
  }

  pub fn map<O, F>(&self, cb: F) -> Tensor<O>
  where
    O: Scalar,
    F: FnMut(T) -> O,
  {
    self.derived(self.data.mapv(cb))
  }

  pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
    let expected: usize = dims.iter().product();
    if expected != self.size() {
      return Err(Error::ElementCountMismatch {
        shape: dims.to_vec(),
        expected,
        got: self.size(),
      })
    }
    let data = self.data.as_standard_layout().to_owned()
      .into_shape(IxDyn(dims))
      .expect("element count verified");
    Ok(self.derived(data))
  }

  /// Removes all axes of size one.
  pub fn squeeze(&self) -> Self {
    let dims: Vec<usize> = self.shape().iter().copied().filter(|&d| d != 1 ).collect();
    let data = self.data.as_standard_layout().to_owned()
      .into_shape(IxDyn(&dims))
      .expect("squeeze preserves element count");
    self.derived(data)
  }

  pub fn unsqueeze(&self, dim: isize) -> Result<Self> {
    let index = insert_index(dim, self.rank())?;
    Ok(self.derived(self.data.clone().insert_axis(Axis(index))))
  }

  pub fn transpose(&self, dim1: isize, dim2: isize) -> Result<Self> {
    let dim1 = axis_index(dim1, self.rank())?;
    let dim2 = axis_index(dim2, self.rank())?;
    let mut data = self.data.clone();
    data.swap_axes(dim1, dim2);
    Ok(self.derived(data))
  }

  /// Sub-tensor at the given leading indices, as an independent copy.
  pub fn at(&self, index: &[usize]) -> Result<Self> {
    if index.len() > self.rank() {
      return Err(Error::DimOutOfRange { dim: index.len() as isize, rank: self.rank() })
    }
    let mut view = self.data.view();
    for (axis, &i) in index.iter().enumerate() {
      let len = view.shape()[0];
      if i >= len {
        return Err(Error::IndexOutOfBounds { index: i, axis, len })
      }
      view = view.index_axis_move(Axis(0), i);
    }
    Ok(self.derived(view.to_owned()))
  }

  /// Writes `value` into the region addressed by the leading indices,
  /// broadcasting it if necessary. Mutates the buffer in place.
  pub fn set_at(&mut self, index: &[usize], value: &Self) -> Result<()> {
    if index.len() > self.rank() {
      return Err(Error::DimOutOfRange { dim: index.len() as isize, rank: self.rank() })
    }
    let mut view = self.data.view_mut();
    for (axis, &i) in index.iter().enumerate() {
      let len = view.shape()[0];
      if i >= len {
        return Err(Error::IndexOutOfBounds { index: i, axis, len })
      }
      view = view.index_axis_move(Axis(0), i);
    }
    let value = value.data.broadcast(view.raw_dim()).ok_or(Error::Broadcast {
      lhs: view.shape().to_vec(),
      rhs: value.shape().to_vec(),
    })?;
    view.assign(&value);
    Ok(())
  }

  /// Range selection along the leading axes. Negative bounds count from
  /// the end of the respective axis.
  pub fn slice(&self, ranges: &[Range<isize>]) -> Result<Self> {
    if ranges.len() > self.rank() {
      return Err(Error::DimOutOfRange { dim: ranges.len() as isize, rank: self.rank() })
    }
    let mut view = self.data.view();
    for (axis, range) in ranges.iter().enumerate() {
      let len = self.data.shape()[axis];
      let resolve = |i: isize| if i < 0 { len as isize + i } else { i };
      let start = resolve(range.start);
      let end = resolve(range.end);
      if start < 0 || start > end || end > len as isize {
        return Err(Error::IndexOutOfBounds { index: end.max(start).max(0) as usize, axis, len })
      }
      view.slice_axis_inplace(Axis(axis), Slice::new(start, Some(end), 1));
    }
    Ok(self.derived(view.to_owned()))
  }

  /// Fancy indexing: gathers the given positions along `dim`.
  pub fn index_select<I: Scalar + Integer>(&self, dim: isize, index: &Tensor<I>) -> Result<Self> {
    let axis = axis_index(dim, self.rank())?;
    let len = self.data.shape()[axis];
    let mut indices = Vec::with_capacity(index.size());
    for &i in index.data.iter() {
      let i = <usize as NumCast>::from(i).unwrap_or(usize::MAX);
      if i >= len {
        return Err(Error::IndexOutOfBounds { index: i, axis, len })
      }
      indices.push(i);
    }
    Ok(self.derived(self.data.select(Axis(axis), &indices)))
  }

  /// Lazy iteration over first-axis sub-tensors. Every call starts a
  /// fresh pass; exhaustion is the iterator returning `None`.
  pub fn iter_rows(&self) -> RowIter<'_, T> {
    RowIter { tensor: self, index: 0 }
  }
}

impl<T: Scalar + Numeric> Tensor<T> {
  pub fn zeros(shape: &[usize]) -> Self {
    Self::fill(shape, T::zero())
  }

  pub fn ones(shape: &[usize]) -> Self {
    Self::fill(shape, T::one())
  }

  pub fn arrange(shape: &[usize], start: T, step: T) -> Self {
    let data = (0..shape.iter().product())
      .map(|i| T::from(i).unwrap() * step + start )
      .collect();
    Self::from_parts(shape, data)
  }

  /// Casts elements to another storable type. A same-type cast is a copy.
  pub fn cast<O: Scalar + Numeric>(&self) -> Tensor<O> {
    self.map(|a| O::from(a).unwrap() )
  }

  /// Adds `delta` into this tensor's gradient, creating the gradient
  /// from `delta` when none is attached yet.
  pub fn accumulate_grad(&mut self, delta: &Self) -> Result<()> {
    if delta.shape() != self.shape() {
      return Err(Error::ShapeMismatch {
        expected: self.shape().to_vec(),
        got: delta.shape().to_vec(),
      })
    }
    let grad = self.grad.take().map(|grad| *grad );
    self.grad = Some(Box::new(crate::func::accumulate(grad, delta)?));
    Ok(())
  }
}

impl<T: Scalar + Real> Tensor<T> {
  pub fn exp(&self) -> Self {
    self.map(|a| a.exp() )
  }

  pub fn ln(&self) -> Self {
    self.map(|a| a.ln() )
  }

  pub fn sqrt(&self) -> Self {
    self.map(|a| a.sqrt() )
  }

  pub fn abs(&self) -> Self {
    self.map(|a| a.abs() )
  }

  pub fn rand(shape: &[usize]) -> Self {
    let mut rng = rand::thread_rng();
    Self::from_array(ArrayD::from_shape_simple_fn(IxDyn(shape), || {
      rng.gen_range(T::zero()..T::one())
    }))
  }

  pub fn randn(shape: &[usize]) -> Self {
    let len: usize = shape.iter().product();
    if len == 0 { return Self::zeros(shape) }
    let mut data = vec![T::zero(); len];
    for i in 0..(len + 1) / 2 {
      let j = i * 2;
      let (r1, r2) = randn_pair();
      data[j] = r1;
      data[(j + 1) % len] = r2;
    }
    Self::from_parts(shape, data)
  }

  /// Samples ones with per-element probability taken from this tensor.
  pub fn bernoulli<O: Scalar + Numeric>(&self) -> Tensor<O> {
    let mut rng = rand::thread_rng();
    self.map(|p| if rng.gen_range(T::zero()..T::one()) < p {
      O::one()
    } else {
      O::zero()
    })
  }
}

impl<T: Scalar> fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "Tensor{:?} on {} {:?}", self.shape(), self.device, self.data)
  }
}


pub struct RowIter<'a, T: Scalar> {
  tensor: &'a Tensor<T>,
  index: usize,
}

impl<T: Scalar> Iterator for RowIter<'_, T> {
  type Item = Tensor<T>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.tensor.rank() == 0 || self.index == self.tensor.shape()[0] {
      return None
    }
    let out = self.tensor.at(&[self.index]).ok();
    self.index += 1;
    out
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn construction() {
    let x = Tensor::new(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(x.shape(), &[2, 3]);
    assert_eq!(x.size(), 6);
    assert_eq!(x.dtype(), Dtype::Int32);
    assert_eq!(x.device(), Device::Cpu);

    let err = Tensor::new(&[2, 3], vec![1, 2, 3]).unwrap_err();
    assert!(matches!(err, Error::ElementCountMismatch { expected: 6, got: 3, .. }));
  }

  #[test]
  fn item() {
    assert_eq!(Tensor::scalar(5).item().unwrap(), 5);
    assert_eq!(Tensor::new(&[1, 1], vec![7]).unwrap().item().unwrap(), 7);
    assert!(Tensor::vec(&[1, 2]).item().is_err());
  }

  #[test]
  fn deep_copy_is_independent() {
    let mut x = Tensor::<f32>::ones(&[2, 2]);
    x.accumulate_grad(&Tensor::fill(&[2, 2], 3.0)).unwrap();

    let mut copy = x.clone();
    assert_eq!(copy, x);
    assert_eq!(copy.grad().unwrap(), x.grad().unwrap());
    assert_ne!(copy.id(), x.id());

    copy.set_at(&[0, 0], &Tensor::scalar(9.0)).unwrap();
    assert_ne!(copy, x);
    assert_eq!(x.at(&[0, 0]).unwrap().item().unwrap(), 1.0);
  }

  #[test]
  fn device_round_trip() {
    let x = Tensor::vec(&[1.0, 2.0]);
    let moved = x.to_device(Device::Cpu).unwrap();
    assert_eq!(moved, x);
    assert!(matches!(x.to_device(Device::Cuda(0)), Err(Error::DeviceUnavailable(_))));

    let mut y = x.clone();
    assert!(y.ito_device(Device::Cuda(1)).is_err());
    assert_eq!(y.device(), Device::Cpu);
  }

  #[test]
  fn grad_accumulation_starts_from_empty() {
    let mut w = Tensor::<f64>::zeros(&[3]);
    assert!(w.grad().is_none());
    w.accumulate_grad(&Tensor::vec(&[1.0, 2.0, 3.0])).unwrap();
    w.accumulate_grad(&Tensor::vec(&[1.0, 1.0, 1.0])).unwrap();
    assert_eq!(w.grad().unwrap(), &Tensor::vec(&[2.0, 3.0, 4.0]));

    w.reset_grad();
    assert!(w.grad().is_none());

    let err = w.accumulate_grad(&Tensor::<f64>::zeros(&[4])).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
  }

  #[test]
  fn index() {
    let x = Tensor::new(&[2, 2, 2], vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    assert_eq!(x.at(&[0, 0]).unwrap(), Tensor::vec(&[1, 2]));
    assert_eq!(x.at(&[1, 1]).unwrap(), Tensor::vec(&[7, 8]));
    assert_eq!(x.at(&[0, 1, 1]).unwrap(), Tensor::scalar(4));
    assert!(matches!(x.at(&[2]), Err(Error::IndexOutOfBounds { .. })));
  }

  #[test]
  fn slice_with_negative_bounds() {
    let x = Tensor::vec(&[3, 5, 6]);
    assert_eq!(x.slice(&[1..-1]).unwrap(), Tensor::vec(&[5]));
    assert_eq!(x.slice(&[0..2]).unwrap(), Tensor::vec(&[3, 5]));
    assert!(x.slice(&[0..4]).is_err());
  }

  #[test]
  fn fancy_indexing() {
    let x = Tensor::new(&[3, 2], vec![1, 2, 3, 4, 5, 6]).unwrap();
    let picked = x.index_select(0, &Tensor::vec(&[2_i64, 0, 0])).unwrap();
    assert_eq!(picked, Tensor::new(&[3, 2], vec![5, 6, 1, 2, 1, 2]).unwrap());
    assert!(x.index_select(0, &Tensor::vec(&[3_i64])).is_err());
  }

  #[test]
  fn rows_restart() {
    let x = Tensor::new(&[2, 2], vec![1, 2, 3, 4]).unwrap();
    let first: Vec<_> = x.iter_rows().collect();
    let second: Vec<_> = x.iter_rows().collect();
    assert_eq!(first, second);
    assert_eq!(first, vec![Tensor::vec(&[1, 2]), Tensor::vec(&[3, 4])]);
    assert_eq!(x.iter_rows().count(), 2);
  }

  #[test]
  fn reshaping() {
    let x = Tensor::arrange(&[2, 3], 0, 1);
    assert_eq!(x.reshape(&[3, 2]).unwrap().shape(), &[3, 2]);
    assert!(x.reshape(&[4]).is_err());
    assert_eq!(x.unsqueeze(-1).unwrap().shape(), &[2, 3, 1]);
    assert_eq!(x.unsqueeze(0).unwrap().shape(), &[1, 2, 3]);
    assert_eq!(x.unsqueeze(-1).unwrap().squeeze().shape(), &[2, 3]);
    assert_eq!(x.transpose(0, 1).unwrap().shape(), &[3, 2]);
  }

  #[test]
  fn cast_between_dtypes() {
    let x = Tensor::vec(&[1.7_f64, 2.2]);
    let y: Tensor<i32> = x.cast();
    assert_eq!(y, Tensor::vec(&[1, 2]));
    assert_eq!(y.dtype(), Dtype::Int32);
  }
}
