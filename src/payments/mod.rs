//! Contract for inbound payment-provider events: signature checking and the
//! provider-neutral event envelope.

mod event;
mod signature;

pub use event::*;
pub use signature::*;
