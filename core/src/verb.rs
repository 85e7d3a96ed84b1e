//! HTTP verbs a route can be registered for.
//!
//! The set covers the standard methods, the WebDAV and extension methods the
//! underlying server accepts as raw tokens, and the `All` wildcard.

use http::Method;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `Verb` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown HTTP verb: {0}")]
pub struct ParseVerbError(String);

/// A verb a route can be registered for.
///
/// `All` is not an HTTP method; it registers a route for every method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Verb {
    All,
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
    Checkout,
    Connect,
    Copy,
    Lock,
    Merge,
    MkActivity,
    MkCol,
    Move,
    MSearch,
    Notify,
    PropFind,
    PropPatch,
    Purge,
    Report,
    Search,
    Subscribe,
    Trace,
    Unlock,
    Unsubscribe,
}

impl Verb {
    /// Every verb in registration-surface order, `All` first.
    pub const ALL_VERBS: &'static [Self] = &[
        Self::All,
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Delete,
        Self::Patch,
        Self::Options,
        Self::Head,
        Self::Checkout,
        Self::Connect,
        Self::Copy,
        Self::Lock,
        Self::Merge,
        Self::MkActivity,
        Self::MkCol,
        Self::Move,
        Self::MSearch,
        Self::Notify,
        Self::PropFind,
        Self::PropPatch,
        Self::Purge,
        Self::Report,
        Self::Search,
        Self::Subscribe,
        Self::Trace,
        Self::Unlock,
        Self::Unsubscribe,
    ];

    /// The method token, upper-case (`"ALL"` for the wildcard).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Checkout => "CHECKOUT",
            Self::Connect => "CONNECT",
            Self::Copy => "COPY",
            Self::Lock => "LOCK",
            Self::Merge => "MERGE",
            Self::MkActivity => "MKACTIVITY",
            Self::MkCol => "MKCOL",
            Self::Move => "MOVE",
            Self::MSearch => "M-SEARCH",
            Self::Notify => "NOTIFY",
            Self::PropFind => "PROPFIND",
            Self::PropPatch => "PROPPATCH",
            Self::Purge => "PURGE",
            Self::Report => "REPORT",
            Self::Search => "SEARCH",
            Self::Subscribe => "SUBSCRIBE",
            Self::Trace => "TRACE",
            Self::Unlock => "UNLOCK",
            Self::Unsubscribe => "UNSUBSCRIBE",
        }
    }

    /// Whether a request with `method` is routed to a handler registered for this verb.
    ///
    /// `Get` routes also answer `HEAD` requests.
    #[must_use]
    pub fn matches(self, method: &Method) -> bool {
        match self {
            Self::All => true,
            Self::Get => *method == Method::GET || *method == Method::HEAD,
            verb => method.as_str() == verb.as_str(),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ParseVerbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL_VERBS
            .iter()
            .copied()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseVerbError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_get_matches_head() {
        assert!(Verb::Get.matches(&Method::GET));
        assert!(Verb::Get.matches(&Method::HEAD));
        assert!(!Verb::Get.matches(&Method::POST));
        assert!(!Verb::Head.matches(&Method::GET));
    }

    #[test]
    fn test_all_matches_extension_methods() {
        let propfind = Method::from_bytes(b"PROPFIND").unwrap();
        assert!(Verb::All.matches(&propfind));
        assert!(Verb::PropFind.matches(&propfind));
        assert!(!Verb::PropPatch.matches(&propfind));
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("m-search".parse::<Verb>().unwrap(), Verb::MSearch);
        assert_eq!("Unsubscribe".parse::<Verb>().unwrap(), Verb::Unsubscribe);
        assert!("FETCH".parse::<Verb>().is_err());
    }

    #[test]
    fn test_every_concrete_verb_matches_its_own_method() {
        for verb in Verb::ALL_VERBS.iter().skip(1) {
            let method = Method::from_bytes(verb.as_str().as_bytes()).unwrap();
            assert!(verb.matches(&method), "{verb} should match its own method");
        }
    }
}
