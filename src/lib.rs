//! Device-tagged tensors with explicit forward-backward passes.
//!
//! [Tensor] is a dense n-dimensional array parameterized over its
//! element type, carrying a device tag and an optional gradient of the
//! same shape. Differentiable operations live in [func] as
//! forward-backward pairs that exchange intermediates through a typed
//! [Cache], and [optimize] applies the accumulated gradients to
//! parameters.
//!
//! ```
//! use tensorgrad::{Tensor, Cache};
//! use tensorgrad::func::norm::LayerNorm;
//! use tensorgrad::optimize::{Optimizer, Sgd};
//!
//! # fn main() -> tensorgrad::Result<()> {
//! let x = Tensor::<f32>::randn(&[8, 4]);
//! let mut w = Tensor::<f32>::ones(&[4]);
//! let mut b = Tensor::<f32>::zeros(&[4]);
//!
//! let mut cache = Cache::recording();
//! let _y = LayerNorm::forward(&mut cache, &x, &w, &b, 1e-5)?;
//! let (_dx, dw, db) = LayerNorm::backward(&mut cache, &Tensor::ones(&[8, 4]))?;
//! w.accumulate_grad(&dw)?;
//! b.accumulate_grad(&db)?;
//!
//! let mut sgd = Optimizer::new(0.01, Sgd::default());
//! sgd.step(&mut [&mut w, &mut b])?;
//! sgd.reset_grads(&mut [&mut w, &mut b]);
//! # Ok(())
//! # }
//! ```

mod device;
mod dtype;
mod error;
mod tensor;

pub mod scalar;
pub mod func;
pub mod optimize;

pub use device::Device;
pub use dtype::Dtype;
pub use error::{Error, Result};
pub use func::{Cache, accumulate};
pub use tensor::{Tensor, Dims, RowIter, tensorsum, tensorprod};
