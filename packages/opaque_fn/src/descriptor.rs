use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use tracing::{trace, warn};

use crate::{Callable, Error, Result, Signature, Slot, StorageKind, canonical, storage_kind_of};

/// Key type for the descriptor of empty containers. Never visible to user code, so no user type
/// can ever compare equal to it.
struct Vacant;

/// Immutable operation table that knows how to handle the contents of a [`Slot`] for one
/// concrete type and one signature.
///
/// Exactly one descriptor exists for each (type, signature) pair, obtained via
/// [`Descriptor::of()`] or [`Descriptor::empty()`]. Descriptors are leaked on creation and shared
/// by reference between all containers and threads, so their address doubles as a type tag.
pub(crate) struct Descriptor<S: Signature> {
    kind: StorageKind,

    type_id: TypeId,

    /// `None` for the empty descriptor.
    type_name: Option<&'static str>,

    destroy: unsafe fn(&mut Slot),
    relocate: unsafe fn(&Slot) -> Slot,
    duplicate: unsafe fn(&Slot) -> Result<Slot>,
    invoke: unsafe fn(&mut Slot, S::Args) -> Result<S::Output>,
}

impl<S: Signature> Descriptor<S> {
    /// Returns the canonical descriptor of containers with signature `S` that hold nothing.
    #[must_use]
    pub(crate) fn empty() -> &'static Self {
        canonical(TypeId::of::<(Vacant, S)>(), || Self {
            kind: StorageKind::Empty,
            type_id: TypeId::of::<Vacant>(),
            type_name: None,
            destroy: destroy_vacant,
            relocate: relocate_vacant,
            duplicate: duplicate_vacant,
            invoke: invoke_vacant::<S>,
        })
    }

    /// Returns the canonical descriptor for storing a `T` in a container with signature `S`.
    #[must_use]
    pub(crate) fn of<T>() -> &'static Self
    where
        T: Callable<S> + Clone + Send + 'static,
    {
        canonical(TypeId::of::<(T, S)>(), || {
            if storage_kind_of::<T>() == StorageKind::Inline {
                Self {
                    kind: StorageKind::Inline,
                    type_id: TypeId::of::<T>(),
                    type_name: Some(type_name::<T>()),
                    destroy: destroy_inline::<T>,
                    relocate: relocate_inline::<T>,
                    duplicate: duplicate_inline::<T>,
                    invoke: invoke_inline::<S, T>,
                }
            } else {
                Self {
                    kind: StorageKind::Boxed,
                    type_id: TypeId::of::<T>(),
                    type_name: Some(type_name::<T>()),
                    destroy: destroy_boxed::<T>,
                    relocate: relocate_boxed,
                    duplicate: duplicate_boxed::<T>,
                    invoke: invoke_boxed::<S, T>,
                }
            }
        })
    }

    /// Places `value` into a new slot the way this descriptor expects to find it.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor was not obtained via [`of::<T>()`](Self::of) for the same `T`.
    #[must_use]
    pub(crate) fn store<T: 'static>(&self, value: T) -> Slot {
        assert!(
            self.holds::<T>(),
            "value of type {} does not match descriptor",
            type_name::<T>()
        );

        if self.kind == StorageKind::Inline {
            Slot::new_inline(value)
        } else {
            Slot::from_box(Box::new(value))
        }
    }

    #[must_use]
    pub(crate) fn kind(&self) -> StorageKind {
        self.kind
    }

    #[must_use]
    pub(crate) fn type_name(&self) -> Option<&'static str> {
        self.type_name
    }

    /// Whether this is the descriptor for values of type `T`.
    #[must_use]
    pub(crate) fn holds<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Releases the value held in the slot.
    ///
    /// # Safety
    ///
    /// The slot must have been populated consistently with this descriptor and must not
    /// be accessed as holding a value afterwards.
    pub(crate) unsafe fn destroy(&self, slot: &mut Slot) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe { (self.destroy)(slot) }
    }

    /// Moves the value held in `from` into a new slot.
    ///
    /// # Safety
    ///
    /// The slot must have been populated consistently with this descriptor. Afterwards, `from`
    /// must be treated as vacant: the returned slot owns the value.
    #[must_use]
    pub(crate) unsafe fn relocate(&self, from: &Slot) -> Slot {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe { (self.relocate)(from) }
    }

    /// Creates a new slot holding an independent copy of the value held in `from`.
    ///
    /// # Safety
    ///
    /// The slot must have been populated consistently with this descriptor.
    pub(crate) unsafe fn duplicate(&self, from: &Slot) -> Result<Slot> {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe { (self.duplicate)(from) }
    }

    /// Invokes the value held in the slot.
    ///
    /// # Safety
    ///
    /// The slot must have been populated consistently with this descriptor.
    pub(crate) unsafe fn invoke(&self, slot: &mut Slot, args: S::Args) -> Result<S::Output> {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe { (self.invoke)(slot, args) }
    }
}

impl<S: Signature> fmt::Debug for Descriptor<S> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("kind", &self.kind)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn destroy_vacant(_slot: &mut Slot) {}

fn relocate_vacant(_from: &Slot) -> Slot {
    Slot::vacant()
}

#[expect(
    clippy::unnecessary_wraps,
    reason = "must match the signature of the fallible duplicate entries"
)]
fn duplicate_vacant(_from: &Slot) -> Result<Slot> {
    Ok(Slot::vacant())
}

fn invoke_vacant<S: Signature>(_slot: &mut Slot, _args: S::Args) -> Result<S::Output> {
    Err(Error::CallableMissing)
}

unsafe fn destroy_inline<T>(slot: &mut Slot) {
    // SAFETY: The caller guarantees the slot holds a live inline `T` that is never used again.
    let value = unsafe { slot.inline_mut_ptr::<T>() };

    // SAFETY: See above.
    unsafe {
        ptr::drop_in_place(value);
    }
}

unsafe fn relocate_inline<T>(from: &Slot) -> Slot {
    // SAFETY: The caller guarantees the slot holds a live inline `T`.
    let value = unsafe { from.inline_ptr::<T>() };

    // SAFETY: The caller abandons `from`, so reading the value out transfers ownership.
    Slot::new_inline(unsafe { value.read() })
}

unsafe fn duplicate_inline<T: Clone>(from: &Slot) -> Result<Slot> {
    // SAFETY: The caller guarantees the slot holds a live inline `T`.
    let value = unsafe { &*from.inline_ptr::<T>() };

    Ok(Slot::new_inline(duplicate_value(value)?))
}

unsafe fn invoke_inline<S, T>(slot: &mut Slot, args: S::Args) -> Result<S::Output>
where
    S: Signature,
    T: Callable<S>,
{
    // SAFETY: The caller guarantees the slot holds a live inline `T`. We have exclusive
    // access to the slot, so also to the value.
    let value = unsafe { &mut *slot.inline_mut_ptr::<T>() };

    Ok(value.invoke(args))
}

unsafe fn destroy_boxed<T>(slot: &mut Slot) {
    // SAFETY: The caller guarantees the slot holds a live boxed `T` that is never used again.
    drop(unsafe { slot.take_box::<T>() });
}

unsafe fn relocate_boxed(from: &Slot) -> Slot {
    // Only the address moves, the heap block stays where it is.
    // SAFETY: The caller abandons `from`, so the copy becomes the only owner of the block.
    unsafe { from.relocate() }
}

unsafe fn duplicate_boxed<T: Clone>(from: &Slot) -> Result<Slot> {
    // SAFETY: The caller guarantees the slot holds a live boxed `T`.
    let value = unsafe { from.boxed_ptr::<T>().as_ref() };

    // The new block is allocated first and released again if duplication fails.
    let mut block = Box::<T>::new_uninit();
    block.write(duplicate_value(value)?);

    // SAFETY: We just wrote the duplicate into the block.
    Ok(Slot::from_box(unsafe { block.assume_init() }))
}

unsafe fn invoke_boxed<S, T>(slot: &mut Slot, args: S::Args) -> Result<S::Output>
where
    S: Signature,
    T: Callable<S>,
{
    // SAFETY: The caller guarantees the slot holds a live boxed `T`. We have exclusive
    // access to the slot, which owns the block, so also to the value.
    let value = unsafe { &mut *slot.boxed_ptr::<T>().as_ptr() };

    Ok(value.invoke(args))
}

/// Clones `value`, converting a panic raised by its `Clone` implementation into an error.
fn duplicate_value<T: Clone>(value: &T) -> Result<T> {
    trace!(type_name = type_name::<T>(), "duplicating stored callable");

    panic::catch_unwind(AssertUnwindSafe(|| value.clone())).map_err(|payload| {
        let reason = describe_panic(payload.as_ref());

        warn!(
            type_name = type_name::<T>(),
            reason = %reason,
            "duplication of stored callable failed"
        );

        Error::DuplicationFailed {
            type_name: type_name::<T>(),
            reason,
        }
    })
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{self, AtomicUsize};

    use static_assertions::assert_impl_all;

    use super::*;

    type BinaryOp = fn(i32, i32) -> i32;

    assert_impl_all!(Descriptor<BinaryOp>: Send, Sync);

    fn add(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    /// A callable that counts how many of its instances are alive.
    #[derive(Debug)]
    struct Census {
        alive: Arc<AtomicUsize>,
        padding: [u64; 4],
    }

    impl Census {
        fn new(alive: &Arc<AtomicUsize>) -> Self {
            alive.fetch_add(1, atomic::Ordering::Relaxed);

            Self {
                alive: Arc::clone(alive),
                padding: [1, 2, 3, 4],
            }
        }
    }

    impl Clone for Census {
        fn clone(&self) -> Self {
            Self::new(&self.alive)
        }
    }

    impl Drop for Census {
        fn drop(&mut self) {
            self.alive.fetch_sub(1, atomic::Ordering::Relaxed);
        }
    }

    impl Callable<fn() -> u64> for Census {
        fn invoke(&mut self, (): ()) -> u64 {
            self.padding.iter().sum()
        }
    }

    /// Small enough to be stored inline, but cannot be duplicated.
    struct Unclonable;

    impl Clone for Unclonable {
        fn clone(&self) -> Self {
            panic!("this value refuses to be cloned");
        }
    }

    impl Callable<fn()> for Unclonable {
        fn invoke(&mut self, (): ()) {}
    }

    /// Too large to be stored inline and cannot be duplicated.
    struct LargeUnclonable {
        payload: [u64; 4],
    }

    impl Clone for LargeUnclonable {
        fn clone(&self) -> Self {
            panic!("this large value refuses to be cloned");
        }
    }

    impl Callable<fn() -> u64> for LargeUnclonable {
        fn invoke(&mut self, (): ()) -> u64 {
            self.payload.iter().sum()
        }
    }

    #[test]
    fn descriptors_are_canonical() {
        let first = Descriptor::<BinaryOp>::of::<BinaryOp>();
        let second = Descriptor::<BinaryOp>::of::<BinaryOp>();

        assert!(ptr::eq(first, second));
        assert!(ptr::eq(
            Descriptor::<BinaryOp>::empty(),
            Descriptor::<BinaryOp>::empty()
        ));
        assert!(!ptr::eq(first, Descriptor::<BinaryOp>::empty()));
    }

    #[test]
    fn signature_is_part_of_identity() {
        let narrow = Descriptor::<fn() -> u64>::of::<Census>();
        let address_narrow = ptr::from_ref(narrow).cast::<()>();

        let empty_narrow = Descriptor::<fn() -> u64>::empty();
        let empty_wide = Descriptor::<fn() -> u32>::empty();

        assert!(!ptr::eq(
            ptr::from_ref(empty_narrow).cast::<()>(),
            ptr::from_ref(empty_wide).cast::<()>()
        ));
        assert!(!ptr::eq(
            address_narrow,
            ptr::from_ref(empty_narrow).cast::<()>()
        ));
    }

    #[test]
    fn classification_selects_table() {
        assert_eq!(
            Descriptor::<BinaryOp>::of::<BinaryOp>().kind(),
            StorageKind::Inline
        );
        assert_eq!(
            Descriptor::<fn() -> u64>::of::<Census>().kind(),
            StorageKind::Boxed
        );
        assert_eq!(Descriptor::<BinaryOp>::empty().kind(), StorageKind::Empty);
    }

    #[test]
    fn holds_checks_type_identity() {
        let descriptor = Descriptor::<BinaryOp>::of::<BinaryOp>();

        assert!(descriptor.holds::<BinaryOp>());
        assert!(!descriptor.holds::<fn(i32, i32) -> i64>());
        assert!(!Descriptor::<BinaryOp>::empty().holds::<BinaryOp>());
        assert_eq!(
            descriptor.type_name(),
            Some(type_name::<BinaryOp>())
        );
        assert_eq!(Descriptor::<BinaryOp>::empty().type_name(), None);
    }

    #[test]
    fn inline_table_invokes_duplicates_and_destroys() {
        let descriptor = Descriptor::<BinaryOp>::of::<BinaryOp>();
        let mut slot = descriptor.store::<BinaryOp>(add);

        // SAFETY: The slot was populated by this descriptor.
        let mut copy = unsafe { descriptor.duplicate(&slot) }.unwrap();

        // SAFETY: Both slots were populated by this descriptor.
        unsafe {
            assert_eq!(descriptor.invoke(&mut slot, (2, 3)).unwrap(), 5);
            assert_eq!(descriptor.invoke(&mut copy, (4, 5)).unwrap(), 9);
            descriptor.destroy(&mut slot);
            descriptor.destroy(&mut copy);
        }
    }

    #[test]
    fn boxed_table_manages_heap_value() {
        let alive = Arc::new(AtomicUsize::new(0));
        let descriptor = Descriptor::<fn() -> u64>::of::<Census>();

        let slot = descriptor.store(Census::new(&alive));
        assert_eq!(alive.load(atomic::Ordering::Relaxed), 1);

        // SAFETY: The slot was populated by this descriptor.
        let mut copy = unsafe { descriptor.duplicate(&slot) }.unwrap();
        assert_eq!(alive.load(atomic::Ordering::Relaxed), 2);

        // SAFETY: The slot was populated by this descriptor and we abandon it afterwards.
        let mut relocated = unsafe { descriptor.relocate(&slot) };

        // SAFETY: Both slots were populated by this descriptor.
        unsafe {
            assert_eq!(descriptor.invoke(&mut relocated, ()).unwrap(), 10);
            assert_eq!(descriptor.invoke(&mut copy, ()).unwrap(), 10);
        }

        // Relocation does not create or destroy values.
        assert_eq!(alive.load(atomic::Ordering::Relaxed), 2);

        // SAFETY: Both slots were populated by this descriptor and are not used afterwards.
        unsafe {
            descriptor.destroy(&mut relocated);
            descriptor.destroy(&mut copy);
        }

        // The original slot was abandoned by relocation and is never touched again.
        assert_eq!(alive.load(atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn empty_table_refuses_to_invoke() {
        let descriptor = Descriptor::<BinaryOp>::empty();
        let mut slot = Slot::vacant();

        // SAFETY: A vacant slot is what the empty descriptor expects.
        let result = unsafe { descriptor.invoke(&mut slot, (1, 1)) };

        assert!(matches!(result, Err(Error::CallableMissing)));
    }

    #[test]
    fn panicking_clone_becomes_duplication_error() {
        let descriptor = Descriptor::<fn()>::of::<Unclonable>();
        let mut slot = descriptor.store(Unclonable);

        // SAFETY: The slot was populated by this descriptor.
        let result = unsafe { descriptor.duplicate(&slot) };

        match result {
            Err(Error::DuplicationFailed { type_name, reason }) => {
                assert!(type_name.contains("Unclonable"));
                assert_eq!(reason, "this value refuses to be cloned");
            }
            other => panic!("expected duplication failure, got {:?}", other.map(|_| ())),
        }

        // SAFETY: The slot was populated by this descriptor and is not used afterwards.
        unsafe {
            descriptor.destroy(&mut slot);
        }
    }

    #[test]
    fn failed_boxed_duplication_leaves_source_intact() {
        let descriptor = Descriptor::<fn() -> u64>::of::<LargeUnclonable>();
        assert_eq!(descriptor.kind(), StorageKind::Boxed);

        let mut slot = descriptor.store(LargeUnclonable {
            payload: [5, 6, 7, 8],
        });

        // SAFETY: The slot was populated by this descriptor.
        let result = unsafe { descriptor.duplicate(&slot) };
        assert!(matches!(result, Err(Error::DuplicationFailed { .. })));

        // SAFETY: The slot was populated by this descriptor.
        let total = unsafe { descriptor.invoke(&mut slot, ()) }.unwrap();
        assert_eq!(total, 26);

        // SAFETY: The slot was populated by this descriptor and is not used afterwards.
        unsafe {
            descriptor.destroy(&mut slot);
        }
    }

    #[test]
    fn describe_panic_handles_payload_kinds() {
        let static_payload: Box<dyn Any + Send> = Box::new("static message");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other_payload: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(describe_panic(static_payload.as_ref()), "static message");
        assert_eq!(describe_panic(owned_payload.as_ref()), "owned message");
        assert_eq!(
            describe_panic(other_payload.as_ref()),
            "panic with non-string payload"
        );
    }
}
