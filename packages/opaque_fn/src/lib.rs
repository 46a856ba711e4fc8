#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A value-semantic container for any callable of one signature.
//!
//! [`Function<S>`][Function] can hold any closure, function or user-defined [`Callable`] whose
//! call signature matches `S`, without exposing the concrete type. Signatures are spelled as
//! function pointer types, such as `fn(i32, i32) -> i32`.
//!
//! Containers can be invoked, copied, moved and reassigned without knowing what they hold:
//!
//! ```
//! use opaque_fn::Function;
//!
//! let mut operations = vec![
//!     Function::<fn(i32, i32) -> i32>::new(|a, b| a + b),
//!     Function::<fn(i32, i32) -> i32>::new(|a, b| a * b),
//! ];
//!
//! let offset = 1000;
//! operations.push(Function::<fn(i32, i32) -> i32>::new(move |a, b| {
//!     a - b + offset
//! }));
//!
//! let results: Vec<i32> = operations
//!     .iter()
//!     .map(|operation| operation.call(6, 7).unwrap())
//!     .collect();
//!
//! assert_eq!(results, vec![13, 42, 999]);
//! ```
//!
//! # Storage
//!
//! Every container is two pointers wide: one pointer-sized slot for the callable and one
//! reference to a shared descriptor that knows how to handle the stored type.
//!
//! * Callables that fit into one pointer with pointer alignment are stored inline, without any
//!   heap allocation. This covers stateless closures, functions and closures that capture a
//!   single reference-sized value.
//! * Larger callables are moved into a heap block owned exclusively by the container.
//!
//! See [`fits_inline()`] and [`StorageKind`] for details.
//!
//! # Copying
//!
//! Copying a container copies the held callable via its [`Clone`] implementation. If cloning
//! panics, [`Function::try_clone()`] and [`Function::try_clone_from()`] report
//! [`Error::DuplicationFailed`] and leave every container involved unchanged:
//!
//! ```
//! use opaque_fn::{Callable, Error, Function};
//!
//! struct OneOfAKind;
//!
//! impl Clone for OneOfAKind {
//!     fn clone(&self) -> Self {
//!         panic!("there can be only one");
//!     }
//! }
//!
//! impl Callable<fn() -> &'static str> for OneOfAKind {
//!     fn invoke(&mut self, (): ()) -> &'static str {
//!         "unique"
//!     }
//! }
//!
//! let source = Function::<fn() -> &'static str>::from_callable(OneOfAKind);
//! let mut target = Function::<fn() -> &'static str>::new(|| "previous");
//!
//! let result = target.try_clone_from(&source);
//!
//! assert!(matches!(result, Err(Error::DuplicationFailed { .. })));
//! assert_eq!(target.call().unwrap(), "previous");
//! ```
//!
//! # Typed access
//!
//! The concrete callable can be recovered by type via [`Function::target()`] and
//! [`Function::target_mut()`], which return `None` if the container holds something else.

mod classification;
mod constants;
mod descriptor;
mod error;
mod function;
mod registry;
mod signature;
mod slot;

pub use classification::*;
pub(crate) use constants::*;
pub(crate) use descriptor::*;
pub use error::*;
pub use function::*;
pub(crate) use registry::*;
pub use signature::*;
pub(crate) use slot::*;
