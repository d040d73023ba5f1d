mod credential;
mod device;
mod event;
mod result;

pub use credential::*;
pub use device::*;
pub use event::*;
pub use result::*;
