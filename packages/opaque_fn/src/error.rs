use thiserror::Error;

/// Errors that can occur when operating on a [`Function`][crate::Function].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The container was invoked while holding no callable.
    #[error("the function container is empty, there is no callable to invoke")]
    CallableMissing,

    /// Copying the container failed because the held callable could not be duplicated.
    ///
    /// Both the source and the target of the copy are left exactly as they were before the
    /// attempt.
    #[error("failed to duplicate stored callable of type {type_name}: {reason}")]
    DuplicationFailed {
        /// Name of the concrete type whose duplication failed.
        type_name: &'static str,

        /// Human-readable description of the failure, typically the panic message raised by
        /// the type's `Clone` implementation.
        reason: String,
    },

    /// The container was accessed mutably while its callable was already being invoked,
    /// for example because the callable tried to call the container that holds it.
    #[error("callable of type {type_name} is already being invoked through this container")]
    ReentrantCall {
        /// Name of the concrete type that is being invoked.
        type_name: &'static str,
    },
}

/// A specialized `Result` type for function container operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
