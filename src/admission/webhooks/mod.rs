//! Webhook implementations
//!
//! - HTTP-backed webhooks built from configuration
//! - Closure-backed webhooks evaluated in-process

pub mod func;
pub mod http;

pub use self::func::FnWebhook;
pub use self::http::HttpWebhook;
