pub mod auth_ctx;
pub mod client_meta;

pub use auth_ctx::{AuthCtx, AuthCtxExtractor};
pub use client_meta::ClientMeta;
