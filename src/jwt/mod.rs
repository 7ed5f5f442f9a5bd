mod tenant_token;

pub use tenant_token::{TENANT_TOKEN_ISSUER, TenantTokenKey};
