//! Types related to [`SessionConfig`][crate::SessionConfig].
mod cookie;
mod store;

pub use cookie::SessionCookieConfig;
pub use store::SessionStoreConfig;
