use crate::error::{Result, SecureMemoryError};

/// A piece of sensitive data held outside ordinary heap memory.
///
/// The trait is object safe so owners can hold `Box<dyn Secret>` regardless of which
/// factory produced it.
pub trait Secret: Send + Sync {
    /// Length of the secret in bytes
    fn len(&self) -> usize;

    /// Check if the secret is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the secret has been closed
    fn is_closed(&self) -> bool;

    /// Wipes and releases the secret. Calling this more than once is a no-op.
    ///
    /// Blocks until every in-flight [`Secret::access`] call has returned.
    fn close(&self) -> Result<()>;

    /// Runs `action` with read-only access to the secret bytes.
    ///
    /// The slice must not escape the callback; the underlying pages go back to
    /// no-access once the last concurrent reader returns.
    fn access(&self, action: &mut dyn FnMut(&[u8])) -> Result<()>;
}

/// Convenience wrappers over [`Secret::access`].
pub trait SecretExtensions {
    /// Provides temporary, read-only access to the secret and returns whatever the
    /// closure produces.
    fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R;
}

impl<S: Secret + ?Sized> SecretExtensions for S {
    fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let mut action = Some(action);
        let mut output = None;

        self.access(&mut |bytes| {
            if let Some(f) = action.take() {
                output = Some(f(bytes));
            }
        })?;

        output.ok_or_else(|| {
            SecureMemoryError::OperationFailed("secret accessor was not invoked".to_string())
        })
    }
}

/// Creates secrets.
pub trait SecretFactory: Send + Sync {
    /// Copies `b` into a new secret and wipes `b`, whether or not creation succeeds.
    fn create(&self, b: &mut [u8]) -> Result<Box<dyn Secret>>;

    /// Creates a secret of `size` random bytes. The random bytes are written straight
    /// into protected memory.
    fn create_random(&self, size: usize) -> Result<Box<dyn Secret>>;
}
