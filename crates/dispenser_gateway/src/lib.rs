pub mod dispenser_gateway;
pub mod domain;
pub mod http;
pub mod relay;

pub use dispenser_gateway::*;
pub use domain::*;
pub use http::*;
pub use relay::*;
