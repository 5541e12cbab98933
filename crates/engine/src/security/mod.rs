//! Outbound request safety: SSRF validation and log sanitization.

pub mod sanitize;
mod ssrf;

pub use ssrf::{SsrfGuard, UrlValidation, UrlValidator};
