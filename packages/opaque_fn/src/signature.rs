use crate::{Function, Result};

mod sealed {
    pub trait Sealed {}
}

/// A call signature that a [`Function`] can be specialized for.
///
/// Signatures are written as function pointer types, such as `fn(i32, i32) -> i32` or `fn()`.
/// The argument types form the [`Args`](Self::Args) tuple passed to
/// [`Function::invoke()`][crate::Function::invoke] and the return type becomes
/// [`Output`](Self::Output).
///
/// Signatures with up to 8 arguments are supported. All argument and return types must be
/// `'static`, which rules out higher-ranked signatures such as `fn(&str) -> usize`.
///
/// This trait is sealed and implemented only for function pointer types.
pub trait Signature: sealed::Sealed + Send + Sync + 'static {
    /// The arguments of the signature, as a tuple.
    type Args;

    /// The return type of the signature.
    type Output;
}

/// A value that can be invoked with the arguments of signature `S`.
///
/// Closures and functions implement this trait automatically for every signature that matches
/// their `FnMut` implementation. Implement it manually for your own types to store them in a
/// [`Function`].
///
/// # Examples
///
/// ```
/// use opaque_fn::{Callable, Function};
///
/// #[derive(Clone)]
/// struct Accumulator {
///     total: u64,
/// }
///
/// impl Callable<fn(u64) -> u64> for Accumulator {
///     fn invoke(&mut self, (amount,): (u64,)) -> u64 {
///         self.total += amount;
///         self.total
///     }
/// }
///
/// let function = Function::<fn(u64) -> u64>::from_callable(Accumulator { total: 0 });
///
/// assert_eq!(function.call(5).unwrap(), 5);
/// assert_eq!(function.call(10).unwrap(), 15);
/// ```
pub trait Callable<S: Signature> {
    /// Invokes the value with the given arguments.
    fn invoke(&mut self, args: S::Args) -> S::Output;
}

macro_rules! impl_signature {
    ($($arg:ident: $ty:ident),*) => {
        impl<R, $($ty,)*> sealed::Sealed for fn($($ty),*) -> R {}

        impl<R, $($ty,)*> Signature for fn($($ty),*) -> R
        where
            R: 'static,
            $($ty: 'static,)*
        {
            type Args = ($($ty,)*);
            type Output = R;
        }

        impl<F, R, $($ty,)*> Callable<fn($($ty),*) -> R> for F
        where
            F: FnMut($($ty),*) -> R,
            R: 'static,
            $($ty: 'static,)*
        {
            #[inline]
            fn invoke(&mut self, ($($arg,)*): ($($ty,)*)) -> R {
                self($($arg),*)
            }
        }

        impl<R, $($ty,)*> Function<fn($($ty),*) -> R>
        where
            R: 'static,
            $($ty: 'static,)*
        {
            /// Creates a container that holds the given closure or function.
            ///
            /// Small callables (up to one pointer in size) are stored inline without
            /// any heap allocation, larger ones are moved into a private heap block.
            ///
            /// For values that implement [`Callable`] directly rather than through a
            /// closure trait, use [`from_callable()`](Self::from_callable).
            #[must_use]
            pub fn new<F>(callable: F) -> Self
            where
                F: FnMut($($ty),*) -> R + Clone + Send + 'static,
            {
                Self::from_callable(callable)
            }

            /// Invokes the held callable with the given arguments.
            ///
            /// # Errors
            ///
            /// Returns [`Error::CallableMissing`][crate::Error::CallableMissing] if the container
            /// is empty and [`Error::ReentrantCall`][crate::Error::ReentrantCall] if the
            /// callable is already being invoked through this container.
            #[inline]
            pub fn call(&self, $($arg: $ty),*) -> Result<R> {
                self.invoke(($($arg,)*))
            }
        }
    };
}

impl_signature!();
impl_signature!(a0: A0);
impl_signature!(a0: A0, a1: A1);
impl_signature!(a0: A0, a1: A1, a2: A2);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6, a7: A7);
