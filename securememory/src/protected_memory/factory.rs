use crate::error::Result;
use crate::protected_memory::secret::ProtectedMemorySecret;
use crate::secret::{Secret, SecretFactory};
use zeroize::Zeroize;

/// Default implementation of SecretFactory that produces ProtectedMemorySecret instances.
///
/// # Example
///
/// ```rust,no_run
/// # use securememory::secret::SecretFactory;
/// # use securememory::protected_memory::DefaultSecretFactory;
/// #
/// let factory = DefaultSecretFactory::new();
///
/// let mut password = b"secure-password-123".to_vec();
/// let secret = factory.create(&mut password).unwrap();
///
/// // Password data is now wiped from the original slice
/// assert_ne!(password, b"secure-password-123");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSecretFactory;

impl DefaultSecretFactory {
    /// Creates a new DefaultSecretFactory.
    pub fn new() -> Self {
        Self
    }
}

impl SecretFactory for DefaultSecretFactory {
    fn create(&self, b: &mut [u8]) -> Result<Box<dyn Secret>> {
        let secret = ProtectedMemorySecret::new(b);
        b.zeroize();

        Ok(Box::new(secret?))
    }

    fn create_random(&self, size: usize) -> Result<Box<dyn Secret>> {
        Ok(Box::new(ProtectedMemorySecret::random(size)?))
    }
}
