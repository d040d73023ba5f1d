mod authenticator;
mod event_admission_service;
mod event_dispatcher;
mod event_validator;
mod transitions;

pub use authenticator::*;
pub use event_admission_service::*;
pub use event_dispatcher::*;
pub use event_validator::*;
pub use transitions::*;
