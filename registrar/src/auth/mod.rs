//! Authentication: password hashing, lockout policy, credential validation,
//! session tokens, SSO exchange, and the request-time session gate.

pub mod credentials;
pub mod current_user;
pub mod lockout;
pub mod password;
pub mod session;
pub mod sso;
