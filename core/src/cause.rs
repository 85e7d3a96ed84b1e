//! Why a handler terminated abnormally.
//!
//! A handler effect either completes, dies (panics, or returns an error
//! through a channel that is not supposed to carry one), or is interrupted
//! because its supervisor shut down. Only the last two reach an exit handler,
//! as a [`Cause`].

use std::any::Any;
use std::fmt;

/// An unexpected termination that the handler's type does not describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    message: String,
    chain: Vec<String>,
}

impl Defect {
    /// Create a defect with a message and no source chain.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            chain: Vec::new(),
        }
    }

    /// Build a defect from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked with a non-string payload".to_string());

        Self::new(message)
    }

    /// Build a defect from an error, keeping its source chain.
    #[must_use]
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            chain: error.chain().skip(1).map(ToString::to_string).collect(),
        }
    }

    /// The top-level message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rendered source errors, outermost first.
    #[must_use]
    pub fn chain(&self) -> &[String] {
        &self.chain
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The cause handed to an exit handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    /// The handler panicked or failed through its error channel
    Die(Defect),

    /// The handler was cancelled by its supervisor
    Interrupt,
}

impl Cause {
    /// Shorthand for `Cause::Die(Defect::new(message))`.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// Whether this cause carries a defect.
    #[must_use]
    pub const fn is_die(&self) -> bool {
        matches!(self, Self::Die(_))
    }

    /// Whether the handler was interrupted.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupt)
    }

    /// The defect, if any.
    #[must_use]
    pub const fn defect(&self) -> Option<&Defect> {
        match self {
            Self::Die(defect) => Some(defect),
            Self::Interrupt => None,
        }
    }

    /// Multi-line report suitable for logs.
    #[must_use]
    pub fn pretty(&self) -> String {
        match self {
            Self::Interrupt => "Interrupted: the handler was cancelled".to_string(),
            Self::Die(defect) => {
                let mut out = format!("Died: {}", defect.message);
                for source in &defect.chain {
                    out.push_str("\n  caused by: ");
                    out.push_str(source);
                }
                out
            },
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Die(defect) => write!(f, "died: {defect}"),
            Self::Interrupt => f.write_str("interrupted"),
        }
    }
}

/// Output of a handler future.
///
/// Handlers have no typed failure channel. `()` is a normal completion; an
/// `Err` from a `Result`-returning handler is reported as [`Cause::Die`].
pub trait HandlerOutput: Send + 'static {
    /// `None` on normal completion, otherwise the defect to report.
    fn into_cause(self) -> Option<Cause>;
}

impl HandlerOutput for () {
    fn into_cause(self) -> Option<Cause> {
        None
    }
}

impl<E> HandlerOutput for Result<(), E>
where
    E: Into<anyhow::Error> + Send + 'static,
{
    fn into_cause(self) -> Option<Cause> {
        self.err()
            .map(|error| Cause::Die(Defect::from_error(&error.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defect_from_str_panic() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "boom");
    }

    #[test]
    fn test_defect_from_string_panic() {
        let payload: Box<dyn Any + Send> = Box::new(format!("boom {}", 7));
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "boom 7");
    }

    #[test]
    fn test_defect_from_opaque_panic() {
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert!(Defect::from_panic(payload.as_ref())
            .message()
            .contains("non-string"));
    }

    #[test]
    fn test_error_output_is_a_defect() {
        let output: Result<(), anyhow::Error> =
            Err(anyhow::anyhow!("disk full").context("saving upload"));
        let cause = output.into_cause();
        let Some(Cause::Die(defect)) = cause else {
            unreachable!("expected a defect");
        };
        assert_eq!(defect.message(), "saving upload");
        assert_eq!(defect.chain(), ["disk full".to_string()]);
    }

    #[test]
    fn test_unit_output_is_success() {
        assert!(().into_cause().is_none());
        assert!(Ok::<(), std::io::Error>(()).into_cause().is_none());
    }

    #[test]
    fn test_pretty_rendering() {
        let cause = Cause::Die(Defect::from_error(
            &anyhow::anyhow!("root").context("outer"),
        ));
        assert_eq!(cause.pretty(), "Died: outer\n  caused by: root");
        assert!(Cause::Interrupt.pretty().starts_with("Interrupted"));
        assert!(cause.is_die());
        assert!(Cause::Interrupt.is_interrupted());
        assert!(Cause::Interrupt.defect().is_none());
    }
}
