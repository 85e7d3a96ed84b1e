//! # Composable HTTP Core
//!
//! Core types shared by the Composable HTTP runtime and web crates.
//!
//! The web layer treats every request handler as an *effect*: an asynchronous
//! unit of work that is scheduled by a supervisor rather than awaited by the
//! HTTP framework. This crate holds the vocabulary that both sides agree on:
//!
//! - **Verb**: the fixed set of HTTP methods a route can be registered for
//! - **`PathSpec`**: template, regex, or list patterns a route or middleware matches
//! - **Cause**: why a handler terminated abnormally (it died or was interrupted)
//! - **`HandlerOutput`**: what a handler future may return
//!
//! ## Example
//!
//! ```
//! use composable_http_core::{path::PathSpec, verb::Verb};
//!
//! let spec = PathSpec::from("/users/:id");
//! let params = spec.matches_route("/users/42").unwrap();
//! assert_eq!(params.get("id"), Some("42"));
//!
//! assert!(Verb::Get.matches(&http::Method::HEAD));
//! ```

pub mod cause;
pub mod path;
pub mod verb;

// Re-export commonly used types
pub use cause::{Cause, Defect, HandlerOutput};
pub use path::{Params, PathError, PathSpec};
pub use verb::{ParseVerbError, Verb};
