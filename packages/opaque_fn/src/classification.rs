use std::mem::{align_of, size_of};

use crate::Slot;

/// Number of bytes available for storing a callable inline, without a heap allocation.
///
/// This is the width of one native pointer.
pub const INLINE_CAPACITY: usize = size_of::<Slot>();

/// Alignment of the inline storage slot. This is the alignment of one native pointer.
pub const INLINE_ALIGNMENT: usize = align_of::<Slot>();

/// Describes how a [`Function`][crate::Function] stores the callable it holds.
///
/// # Examples
///
/// ```
/// use opaque_fn::{Function, StorageKind};
///
/// let empty = Function::<fn() -> u32>::empty();
/// assert_eq!(empty.storage_kind(), StorageKind::Empty);
///
/// let small = Function::<fn() -> u32>::new(|| 42);
/// assert_eq!(small.storage_kind(), StorageKind::Inline);
///
/// let big_capture = [7_u64; 4];
/// let large = Function::<fn() -> u64>::new(move || big_capture.iter().sum());
/// assert_eq!(large.storage_kind(), StorageKind::Boxed);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum StorageKind {
    /// The container holds nothing.
    Empty,

    /// The callable lives directly inside the pointer-sized slot of the container.
    Inline,

    /// The callable lives in a private heap block and the slot holds a pointer to it.
    Boxed,
}

/// Returns `true` if values of type `T` are eligible for inline storage.
///
/// A type is eligible if it fits into [`INLINE_CAPACITY`] bytes and its alignment divides
/// [`INLINE_ALIGNMENT`]. Relocating a value must also be infallible, which every Rust move is.
///
/// # Examples
///
/// ```
/// use opaque_fn::fits_inline;
///
/// assert!(fits_inline::<u32>());
/// assert!(fits_inline::<usize>());
/// assert!(!fits_inline::<[usize; 2]>());
/// ```
#[must_use]
pub const fn fits_inline<T>() -> bool {
    // Alignments are always powers of two, so the slot alignment is a multiple of the alignment
    // of `T` exactly when it is not smaller.
    size_of::<T>() <= INLINE_CAPACITY && align_of::<T>() <= INLINE_ALIGNMENT
}

/// Returns the storage kind that a [`Function`][crate::Function] uses for values of type `T`.
///
/// The decision is made at compile time and never changes for a given type.
#[must_use]
pub const fn storage_kind_of<T>() -> StorageKind {
    if fits_inline::<T>() {
        StorageKind::Inline
    } else {
        StorageKind::Boxed
    }
}
