use std::cell::{Ref, RefCell};
use std::fmt;
use std::mem;
use std::ptr;

use tracing::trace;

use crate::{Callable, Descriptor, Error, Result, Signature, Slot, StorageKind};

/// A value-semantic container for any callable matching the signature `S`.
///
/// `Function<fn(i32, i32) -> i32>` can hold any closure, function or [`Callable`] object that
/// takes two `i32` arguments and returns an `i32`, regardless of its concrete type. Containers
/// can be invoked, cloned, moved and reassigned without knowing what they hold.
///
/// # Storage
///
/// The container reserves exactly one pointer-sized slot. Callables that fit into it (see
/// [`fits_inline()`][crate::fits_inline]) are stored inline, without any heap allocation.
/// Larger callables are moved into a heap block that the container owns exclusively.
///
/// # Examples
///
/// ```
/// use opaque_fn::Function;
///
/// let add = Function::<fn(i32, i32) -> i32>::new(|a, b| a + b);
/// assert_eq!(add.call(2, 3).unwrap(), 5);
///
/// // Copies are independent of the original.
/// let copy = add.clone();
/// assert_eq!(copy.call(4, 5).unwrap(), 9);
/// assert_eq!(add.call(2, 3).unwrap(), 5);
///
/// // An empty container reports a missing callable instead of doing anything.
/// let empty = Function::<fn(i32, i32) -> i32>::empty();
/// assert!(empty.call(1, 1).is_err());
/// ```
///
/// # Invocation through shared references
///
/// Invocation takes `&self` even though the callable may mutate its captured state. The container
/// guards its contents with a [`RefCell`], so invoking the container from inside its own
/// callable fails with [`Error::ReentrantCall`] instead of aliasing the callable.
///
/// # Thread safety
///
/// The type is thread-mobile ([`Send`]) because every stored callable must be [`Send`]. It is not
/// thread-safe ([`Sync`]): invoking or mutating one container from multiple threads at the same
/// time is not supported. Distinct containers holding the same type can be used on different
/// threads concurrently.
pub struct Function<S: Signature> {
    slot: RefCell<Slot>,
    descriptor: &'static Descriptor<S>,
}

impl<S: Signature> Function<S> {
    /// Creates a container that holds nothing.
    ///
    /// Invoking an empty container fails with [`Error::CallableMissing`].
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_fn::{Error, Function};
    ///
    /// let function = Function::<fn()>::empty();
    ///
    /// assert!(!function.is_engaged());
    /// assert!(matches!(function.call(), Err(Error::CallableMissing)));
    /// ```
    #[must_use]
    pub fn empty() -> Self {
        Self {
            slot: RefCell::new(Slot::vacant()),
            descriptor: Descriptor::empty(),
        }
    }

    /// Creates a container that holds the given [`Callable`] value.
    ///
    /// Small values (up to one pointer in size) are stored inline without any heap allocation,
    /// larger ones are moved into a private heap block.
    ///
    /// Closures and functions can also be passed to the per-arity `new()` constructor, which
    /// helps the compiler infer closure argument types.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_fn::{Callable, Function};
    ///
    /// #[derive(Clone)]
    /// struct Greeter;
    ///
    /// impl Callable<fn(&'static str) -> String> for Greeter {
    ///     fn invoke(&mut self, (name,): (&'static str,)) -> String {
    ///         format!("Hello, {name}!")
    ///     }
    /// }
    ///
    /// let greet = Function::<fn(&'static str) -> String>::from_callable(Greeter);
    ///
    /// assert_eq!(greet.call("World").unwrap(), "Hello, World!");
    /// ```
    #[must_use]
    pub fn from_callable<T>(callable: T) -> Self
    where
        T: Callable<S> + Clone + Send + 'static,
    {
        let descriptor = Descriptor::<S>::of::<T>();

        Self {
            slot: RefCell::new(descriptor.store(callable)),
            descriptor,
        }
    }

    /// Returns `true` if the container holds a callable.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.descriptor.kind() != StorageKind::Empty
    }

    /// Returns how the held callable is stored, or [`StorageKind::Empty`] if there is none.
    #[must_use]
    pub fn storage_kind(&self) -> StorageKind {
        self.descriptor.kind()
    }

    /// Returns the name of the concrete type of the held callable, if any.
    ///
    /// The name is intended for diagnostics only and its exact format is not guaranteed.
    #[must_use]
    pub fn type_name(&self) -> Option<&'static str> {
        self.descriptor.type_name()
    }

    /// Returns `true` if both containers hold a callable of the same concrete type, or if both
    /// are empty.
    #[must_use]
    pub fn same_type_as(&self, other: &Self) -> bool {
        ptr::eq(self.descriptor, other.descriptor)
    }

    /// Returns `true` if the container holds a callable of type `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.descriptor.holds::<T>()
    }

    /// Invokes the held callable with a tuple of arguments.
    ///
    /// Every signature also has a `call()` method that takes the arguments individually.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallableMissing`] if the container is empty and
    /// [`Error::ReentrantCall`] if the callable is already being invoked through this container.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_fn::Function;
    ///
    /// let multiply = Function::<fn(u32, u32) -> u32>::new(|a, b| a * b);
    ///
    /// assert_eq!(multiply.invoke((6, 7)).unwrap(), 42);
    /// ```
    pub fn invoke(&self, args: S::Args) -> Result<S::Output> {
        let Ok(mut slot) = self.slot.try_borrow_mut() else {
            return Err(self.reentrant_call());
        };

        // SAFETY: The slot was populated consistently with the active descriptor. The borrow
        // guard gives us exclusive access for the duration of the call.
        unsafe { self.descriptor.invoke(&mut slot, args) }
    }

    /// Creates an independent copy of the container and the callable it holds.
    ///
    /// Copying an empty container yields an empty container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicationFailed`] if cloning the held callable panics, in which case
    /// the container is left unchanged. Returns [`Error::ReentrantCall`] if called from inside
    /// the held callable.
    pub fn try_clone(&self) -> Result<Self> {
        let Ok(slot) = self.slot.try_borrow() else {
            return Err(self.reentrant_call());
        };

        // SAFETY: The slot was populated consistently with the active descriptor.
        let duplicate = unsafe { self.descriptor.duplicate(&slot) }?;

        Ok(Self {
            slot: RefCell::new(duplicate),
            descriptor: self.descriptor,
        })
    }

    /// Replaces the contents of the container with a copy of the callable held by `source`.
    ///
    /// This gives the strong guarantee: the copy is made into separate storage first and the
    /// previous callable is only destroyed once the copy exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicationFailed`] if cloning the callable held by `source` panics.
    /// In that case, `self` still holds exactly what it held before the call.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_fn::Function;
    ///
    /// let mut target = Function::<fn() -> u8>::empty();
    /// let source = Function::<fn() -> u8>::new(|| 7);
    ///
    /// target.try_clone_from(&source).unwrap();
    ///
    /// assert_eq!(target.call().unwrap(), 7);
    /// ```
    pub fn try_clone_from(&mut self, source: &Self) -> Result<()> {
        let replacement = source.try_clone()?;

        // The previous callable is destroyed only after the replacement is installed.
        let previous = mem::replace(self, replacement);
        drop(previous);

        Ok(())
    }

    /// Moves the held callable out into a new container, leaving this container empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_fn::Function;
    ///
    /// let mut original = Function::<fn() -> u8>::new(|| 1);
    /// let moved = original.take();
    ///
    /// assert!(!original.is_engaged());
    /// assert_eq!(moved.call().unwrap(), 1);
    /// ```
    #[must_use]
    pub fn take(&mut self) -> Self {
        trace!(type_name = self.type_name(), "relocating stored callable");

        // SAFETY: The slot was populated consistently with the active descriptor. We rebind
        // this container to the empty descriptor right away, abandoning the relocated slot.
        let slot = unsafe { self.descriptor.relocate(self.slot.get_mut()) };
        let descriptor = mem::replace(&mut self.descriptor, Descriptor::empty());

        Self {
            slot: RefCell::new(slot),
            descriptor,
        }
    }

    /// Returns a shared reference to the held callable if it is of type `T`.
    ///
    /// Returns `None` if the container is empty, holds a different type or is currently
    /// invoking its callable.
    #[must_use]
    pub fn target<T: 'static>(&self) -> Option<Ref<'_, T>> {
        if !self.is::<T>() {
            return None;
        }

        let slot = self.slot.try_borrow().ok()?;
        let kind = self.descriptor.kind();

        Some(Ref::map(slot, |slot| {
            if kind == StorageKind::Inline {
                // SAFETY: The descriptor for `T` says the slot holds an inline `T`.
                unsafe { &*slot.inline_ptr::<T>() }
            } else {
                // SAFETY: The descriptor for `T` says the slot holds a boxed `T`.
                unsafe { slot.boxed_ptr::<T>().as_ref() }
            }
        }))
    }

    /// Returns an exclusive reference to the held callable if it is of type `T`.
    ///
    /// Changes made through the reference are visible to the next invocation.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaque_fn::{Callable, Function};
    ///
    /// #[derive(Clone)]
    /// struct Offset(i64);
    ///
    /// impl Callable<fn(i64) -> i64> for Offset {
    ///     fn invoke(&mut self, (value,): (i64,)) -> i64 {
    ///         value + self.0
    ///     }
    /// }
    ///
    /// let mut function = Function::<fn(i64) -> i64>::from_callable(Offset(1));
    /// function.target_mut::<Offset>().unwrap().0 = 100;
    ///
    /// assert_eq!(function.call(1).unwrap(), 101);
    /// assert!(function.target_mut::<String>().is_none());
    /// ```
    #[must_use]
    pub fn target_mut<T: 'static>(&mut self) -> Option<&mut T> {
        if !self.is::<T>() {
            return None;
        }

        let kind = self.descriptor.kind();
        let slot = self.slot.get_mut();

        if kind == StorageKind::Inline {
            // SAFETY: The descriptor for `T` says the slot holds an inline `T`. We have
            // exclusive access to the container, so also to the value.
            Some(unsafe { &mut *slot.inline_mut_ptr::<T>() })
        } else {
            // SAFETY: The descriptor for `T` says the slot holds a boxed `T`. We have
            // exclusive access to the container, which owns the block.
            Some(unsafe { &mut *slot.boxed_ptr::<T>().as_ptr() })
        }
    }

    fn reentrant_call(&self) -> Error {
        Error::ReentrantCall {
            type_name: self.descriptor.type_name().unwrap_or("<empty>"),
        }
    }
}

impl<S: Signature> Default for Function<S> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S: Signature> Clone for Function<S> {
    /// # Panics
    ///
    /// Panics if cloning the held callable panics or if called from inside the held callable.
    /// Use [`try_clone()`](Self::try_clone) to handle these cases as errors.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(function) => function,
            Err(error) => panic!("{error}"),
        }
    }

    /// # Panics
    ///
    /// Panics if cloning the callable held by `source` panics. `self` is left unchanged in that
    /// case. Use [`try_clone_from()`](Self::try_clone_from) to handle this as an error.
    fn clone_from(&mut self, source: &Self) {
        if let Err(error) = self.try_clone_from(source) {
            panic!("{error}");
        }
    }
}

impl<S: Signature> Drop for Function<S> {
    fn drop(&mut self) {
        // SAFETY: The slot was populated consistently with the active descriptor and
        // the container is never used again.
        unsafe {
            self.descriptor.destroy(self.slot.get_mut());
        }
    }
}

impl<S: Signature> fmt::Debug for Function<S> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("type_name", &self.type_name())
            .field("storage_kind", &self.storage_kind())
            .finish()
    }
}

// SAFETY: Every callable stored in a container is required to be `Send` at construction and the
// container owns it (and its heap block, if any) exclusively. Descriptors are immutable.
unsafe impl<S: Signature> Send for Function<S> {}
