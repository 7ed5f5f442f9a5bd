mod operator_auth;
mod tenant_auth;

pub use operator_auth::*;
pub use tenant_auth::*;
