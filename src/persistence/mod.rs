//! Data row record persistence
//!
//! [`Session::store`](crate::Session::store) and [`Session::load`](crate::Session::load)
//! encrypt straight into, and decrypt straight out of, any [`Storer`](crate::Storer) /
//! [`Loader`](crate::Loader). This module has closure adapters for both and an in-memory
//! store for tests.

mod functions;
mod memory;

pub use functions::{LoaderFn, StorerFn};
pub use memory::InMemoryPersistence;
