use crate::error::{Result, SecureMemoryError};
use crate::protected_memory::pages::{MemoryProtection, Pages};
use crate::secret::Secret;
use log::{trace, warn};
use parking_lot::{Condvar, Mutex};

struct State {
    pages: Option<Pages>,
    closing: bool,
    access_counter: usize,
}

/// A secret stored in locked pages that are `PROT_NONE` while nobody is reading them.
///
/// Any number of threads may be inside [`Secret::access`] at once; the pages are flipped
/// to read-only by the first reader and back to no-access by the last. [`Secret::close`]
/// blocks new readers, waits for in-flight ones, then wipes and unmaps.
pub struct ProtectedMemorySecret {
    state: Mutex<State>,
    released: Condvar,
    len: usize,
}

impl std::fmt::Debug for ProtectedMemorySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedMemorySecret")
            .field("len", &self.len)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProtectedMemorySecret {
    /// Creates a secret holding a copy of `data`. The caller remains responsible for
    /// wiping `data`.
    pub fn new(data: &[u8]) -> Result<Self> {
        trace!("creating ProtectedMemorySecret with {} bytes", data.len());

        let mut pages = Pages::allocate(data.len())?;
        unsafe { pages.as_mut_slice() }.copy_from_slice(data);

        Self::seal(pages)
    }

    /// Creates a secret of `len` random bytes drawn from the OS.
    pub fn random(len: usize) -> Result<Self> {
        let mut pages = Pages::allocate(len)?;
        getrandom::getrandom(unsafe { pages.as_mut_slice() })
            .map_err(|e| SecureMemoryError::RandomGenerationFailed(e.to_string()))?;

        Self::seal(pages)
    }

    fn seal(mut pages: Pages) -> Result<Self> {
        pages.lock();
        pages.protect(MemoryProtection::NoAccess)?;

        Ok(Self {
            len: pages.len(),
            state: Mutex::new(State {
                pages: Some(pages),
                closing: false,
                access_counter: 0,
            }),
            released: Condvar::new(),
        })
    }

    fn acquire(&self) -> Result<AccessGuard<'_>> {
        let mut state = self.state.lock();

        if state.closing {
            return Err(SecureMemoryError::SecretClosed);
        }

        let pages = state.pages.as_ref().ok_or(SecureMemoryError::SecretClosed)?;

        // only the first reader changes protection
        if state.access_counter == 0 {
            pages.protect(MemoryProtection::ReadOnly)?;
        }

        let view = (unsafe { pages.as_slice() }).as_ptr();
        state.access_counter += 1;

        Ok(AccessGuard {
            secret: self,
            view,
        })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.access_counter -= 1;

        if state.access_counter == 0 {
            if let Some(pages) = state.pages.as_ref() {
                if let Err(e) = pages.protect(MemoryProtection::NoAccess) {
                    warn!("failed to set memory to NoAccess: {}", e);
                }
            }
        }

        self.released.notify_all();
    }
}

/// Holds one reader slot open; returning it (even by unwinding) gives the slot back.
struct AccessGuard<'a> {
    secret: &'a ProtectedMemorySecret,
    view: *const u8,
}

impl AccessGuard<'_> {
    fn bytes(&self) -> &[u8] {
        // close() cannot free the pages while this guard holds an access slot
        unsafe { std::slice::from_raw_parts(self.view, self.secret.len) }
    }
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.secret.release();
    }
}

impl Secret for ProtectedMemorySecret {
    fn len(&self) -> usize {
        self.len
    }

    fn is_closed(&self) -> bool {
        self.state.lock().pages.is_none()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closing = true;

        while state.access_counter > 0 {
            self.released.wait(&mut state);
        }

        match state.pages.take() {
            Some(mut pages) => {
                trace!("wiping ProtectedMemorySecret with {} bytes", self.len);
                pages.release()
            }
            None => Ok(()),
        }
    }

    fn access(&self, action: &mut dyn FnMut(&[u8])) -> Result<()> {
        let guard = self.acquire()?;
        action(guard.bytes());
        Ok(())
    }
}

impl Drop for ProtectedMemorySecret {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("error closing secret during drop: {}", e);
        }
    }
}
