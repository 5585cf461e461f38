//! Enforcement primitives for the console request-security layer.
//!
//! This crate provides:
//! - `TokenAuthority` - Anti-forgery token issue, rotation and mirroring
//! - `ContentScanner` - Pattern catalog rejecting unsafe markup
//! - `RateLimiter` - Fixed-window quotas per endpoint pattern
//! - `PermissionCache` - Deny-by-default capability checks
//! - `AuthCredential` / `CredentialStore` - Stored bearer credential
//! - `InputValidator` / `FileUploadPolicy` - Form and upload validation
//! - `SecurityHeaders` - CSP and security meta entries
//! - `html_encode` / `js_encode` / `url_encode` - Output encoding
//!
//! # Example
//!
//! ```ignore
//! use guard_security::{ContentScanner, RateLimiter, TokenAuthority};
//!
//! let scanner = ContentScanner::builtin()?;
//! assert!(scanner.scan("<img src=x onerror=alert(1)>").is_unsafe());
//!
//! let limiter = RateLimiter::from_config(&config.rate_limit, clock.clone());
//! if !limiter.allow("/api/login") {
//!     // reject with RateLimited
//! }
//! ```

mod credential;
mod csrf;
mod encoding;
mod headers;
mod permissions;
mod rate_limit;
mod scanner;
mod validation;

pub use credential::*;
pub use csrf::*;
pub use encoding::*;
pub use headers::*;
pub use permissions::*;
pub use rate_limit::*;
pub use scanner::*;
pub use validation::*;
