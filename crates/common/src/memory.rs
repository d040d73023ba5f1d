//! In-process back ends, used when no database is configured and in tests.

mod credential_store;
mod device_repository;

pub use credential_store::*;
pub use device_repository::*;
