//! A newtype wrapping [`anyhow::Error`] that marks a failure as expected and
//! non-actionable, so it can be logged at `WARN` instead of `ERROR` without
//! losing the error's context chain.

use std::fmt;

/// Wraps an error to indicate it is a "warning": something that went wrong
/// but doesn't indicate a bug or an operational problem, e.g. a client
/// request that failed validation. [`Provider::log`](crate::Provider::log)
/// and the HTTP client use [`IsWarning::is_warning`] to decide whether to
/// log (and count) a failure as a warning or a hard error.
#[derive(Debug)]
pub struct Warning(anyhow::Error);

impl Warning {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(error.into())
    }

    /// Converts this [`Warning`] into an [`anyhow::Error`] that still
    /// downcasts to [`Warning`], so [`IsWarning::is_warning`] keeps working
    /// after the error is wrapped with further `.context(...)`.
    pub fn into_anyhow(self) -> anyhow::Error {
        anyhow::Error::new(self)
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Warning {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Determines whether an error should be treated as a [`Warning`] for the
/// purposes of logging level and the `warning`/`error` synthetic span
/// counters. Implemented for [`Warning`] itself and for `anyhow::Error`
/// (walking the error's downcast chain for a [`Warning`]).
pub trait IsWarning {
    fn is_warning(&self) -> bool;
}

impl IsWarning for Warning {
    fn is_warning(&self) -> bool {
        true
    }
}

impl IsWarning for anyhow::Error {
    fn is_warning(&self) -> bool {
        self.downcast_ref::<Warning>().is_some()
            || self.chain().any(|cause| cause.is::<Warning>())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn anyhow_error_detects_wrapped_warning() {
        let base = anyhow::anyhow!("not found");
        assert!(!base.is_warning());

        let warning = Warning::new(anyhow::anyhow!("bad input")).into_anyhow();
        assert!(warning.is_warning());

        let wrapped = warning.context("while handling request");
        assert!(wrapped.is_warning());
    }
}
