mod client;
mod credential_store;
mod device_repository;

pub use client::*;
pub use credential_store::*;
pub use device_repository::*;
