mod error;
mod logging;
mod router;
mod server;

pub use error::*;
pub use logging::*;
pub use router::*;
pub use server::*;
