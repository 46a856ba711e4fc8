use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::fits_inline;

/// Pointer-sized, pointer-aligned storage for one type-erased callable.
///
/// Which member is meaningful is decided by the descriptor that owns the slot:
///
/// * `StorageKind::Inline` - `inline` holds the bytes of a live value that fits the slot.
/// * `StorageKind::Boxed` - `boxed` points to a live value in a heap block owned by the slot.
/// * `StorageKind::Empty` - no member is meaningful, the bytes are unspecified.
///
/// The slot never drops anything by itself. Destroying its contents is the job of the descriptor.
#[repr(C)]
pub(crate) union Slot {
    inline: MaybeUninit<*mut ()>,
    boxed: NonNull<()>,
}

impl Slot {
    /// Creates a slot with unspecified contents, as used by empty containers.
    #[must_use]
    pub(crate) const fn vacant() -> Self {
        Self {
            inline: MaybeUninit::uninit(),
        }
    }

    /// Moves `value` into the slot itself.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not eligible for inline storage. The check is resolved at compile time.
    #[must_use]
    pub(crate) fn new_inline<T>(value: T) -> Self {
        assert!(
            fits_inline::<T>(),
            "type does not fit into the inline slot and must be boxed"
        );

        let mut slot = Self::vacant();

        // SAFETY: We just created the slot with the `inline` member active. The assertion
        // above guarantees that a `T` fits into it with correct alignment.
        let target = unsafe { slot.inline.as_mut_ptr() }.cast::<T>();

        // SAFETY: `target` is valid for writes of `T` (see above) and holds no live value.
        unsafe {
            target.write(value);
        }

        slot
    }

    /// Takes ownership of a heap block, storing only its address in the slot.
    #[must_use]
    pub(crate) fn from_box<T>(block: Box<T>) -> Self {
        Self {
            boxed: NonNull::from(Box::leak(block)).cast(),
        }
    }

    /// Returns a pointer to the inline value.
    ///
    /// # Safety
    ///
    /// The slot must hold an inline `T`. The pointer is only valid for as long as the slot
    /// is neither moved nor destroyed.
    #[must_use]
    pub(crate) unsafe fn inline_ptr<T>(&self) -> *const T {
        // SAFETY: Forwarding the caller's guarantee that `inline` is the active member.
        unsafe { self.inline.as_ptr() }.cast::<T>()
    }

    /// Returns a mutable pointer to the inline value.
    ///
    /// # Safety
    ///
    /// The slot must hold an inline `T`. The pointer is only valid for as long as the slot
    /// is neither moved nor destroyed.
    #[must_use]
    pub(crate) unsafe fn inline_mut_ptr<T>(&mut self) -> *mut T {
        // SAFETY: Forwarding the caller's guarantee that `inline` is the active member.
        unsafe { self.inline.as_mut_ptr() }.cast::<T>()
    }

    /// Returns the address of the heap block.
    ///
    /// # Safety
    ///
    /// The slot must hold a pointer to a live heap-allocated `T`.
    #[must_use]
    pub(crate) unsafe fn boxed_ptr<T>(&self) -> NonNull<T> {
        // SAFETY: Forwarding the caller's guarantee that `boxed` is the active member.
        unsafe { self.boxed }.cast::<T>()
    }

    /// Reclaims the heap block as a `Box<T>`, leaving the slot contents unspecified.
    ///
    /// # Safety
    ///
    /// The slot must hold a pointer to a live heap-allocated `T` that was stored via
    /// [`from_box()`](Self::from_box). The slot must not be used to access that block again.
    #[must_use]
    pub(crate) unsafe fn take_box<T>(&mut self) -> Box<T> {
        // SAFETY: Forwarding the caller's guarantee that `boxed` is the active member.
        let block = unsafe { self.boxed_ptr::<T>() };

        // SAFETY: The caller guarantees the block came from `Box::leak()` for a `T` and that
        // nobody else owns it.
        unsafe { Box::from_raw(block.as_ptr()) }
    }

    /// Creates a bitwise copy of the slot, transferring whatever the slot owns to the copy.
    ///
    /// # Safety
    ///
    /// After this call, the original slot must be treated as vacant. It must not be destroyed
    /// or accessed as holding a value.
    #[must_use]
    pub(crate) unsafe fn relocate(&self) -> Self {
        // SAFETY: `inline` covers every byte of the slot and `MaybeUninit` copies preserve
        // both uninitialized bytes and pointer provenance. The caller abandons the original.
        Self {
            inline: unsafe { self.inline },
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::mem::{align_of, size_of};
    use std::ptr;
    use std::sync::Arc;
    use std::sync::atomic::{self, AtomicUsize};

    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(Slot: Send, Sync);

    #[test]
    fn slot_is_one_pointer() {
        assert_eq!(size_of::<Slot>(), size_of::<*const ()>());
        assert_eq!(align_of::<Slot>(), align_of::<*const ()>());
    }

    #[test]
    fn inline_value_round_trips() {
        let mut slot = Slot::new_inline(0xDEAD_u32);

        // SAFETY: The slot holds an inline u32.
        let value = unsafe { slot.inline_ptr::<u32>().read() };
        assert_eq!(value, 0xDEAD);

        // SAFETY: The slot holds an inline u32.
        unsafe {
            slot.inline_mut_ptr::<u32>().write(7);
        }

        // SAFETY: The slot holds an inline u32.
        let value = unsafe { slot.inline_ptr::<u32>().read() };
        assert_eq!(value, 7);
    }

    #[test]
    fn relocated_inline_value_keeps_provenance() {
        let shared = Arc::new(AtomicUsize::new(5));

        let original = Slot::new_inline(Arc::clone(&shared));

        // SAFETY: We stop using `original` after this.
        let mut relocated = unsafe { original.relocate() };

        // SAFETY: The relocated slot holds the inline Arc.
        let value = unsafe { &*relocated.inline_ptr::<Arc<AtomicUsize>>() };
        assert_eq!(value.load(atomic::Ordering::Relaxed), 5);

        // SAFETY: The relocated slot holds the inline Arc and we never touch it afterwards.
        unsafe {
            ptr::drop_in_place(relocated.inline_mut_ptr::<Arc<AtomicUsize>>());
        }

        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn boxed_value_round_trips() {
        let mut slot = Slot::from_box(Box::new(String::from("heap resident")));

        // SAFETY: The slot holds a boxed String.
        let value = unsafe { slot.boxed_ptr::<String>().as_ref() };
        assert_eq!(value, "heap resident");

        // SAFETY: The slot holds a boxed String and we do not use it afterwards.
        let reclaimed = unsafe { slot.take_box::<String>() };
        assert_eq!(*reclaimed, "heap resident");
    }

    #[test]
    fn relocated_box_points_to_same_block() {
        let original = Slot::from_box(Box::new(vec![1_u8, 2, 3]));

        // SAFETY: The slot holds a boxed Vec.
        let address_before = unsafe { original.boxed_ptr::<Vec<u8>>() };

        // SAFETY: We stop using `original` after this.
        let mut relocated = unsafe { original.relocate() };

        // SAFETY: The relocated slot holds the boxed Vec.
        let address_after = unsafe { relocated.boxed_ptr::<Vec<u8>>() };
        assert_eq!(address_before, address_after);

        // SAFETY: The relocated slot holds the boxed Vec and we do not use it afterwards.
        drop(unsafe { relocated.take_box::<Vec<u8>>() });
    }
}
