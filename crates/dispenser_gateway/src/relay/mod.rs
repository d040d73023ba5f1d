mod channel_relay;
mod logging_publisher;
mod relay_worker;

pub use channel_relay::*;
pub use logging_publisher::*;
pub use relay_worker::*;
