mod external_event;
mod job;
mod license;
mod tenant;
mod validation_attempt;

pub use external_event::*;
pub use job::*;
pub use license::*;
pub use tenant::*;
pub use validation_attempt::*;
