mod client;
mod event_publisher;
mod traits;

pub use client::*;
pub use event_publisher::*;
pub use traits::*;
