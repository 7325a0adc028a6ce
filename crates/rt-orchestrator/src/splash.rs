//! The error-splash state machine (§4.9). Entered on any terminal load
//! failure (bundle resolution, signature verification, WASM load/link, or
//! app-init); never entered from within a running frame.

use rt_resolver::BundleHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplashState {
    NoError,
    DefaultSplash,
    BundleSplash,
}

/// Built-in message shown when no bundle was ever open, so there is no
/// fallback image list to walk.
const DEFAULT_MESSAGE: &str = "Unable to start. Please try again later.";

pub struct ErrorSplash {
    state: SplashState,
    message: String,
    image: Option<Vec<u8>>,
}

impl ErrorSplash {
    #[must_use]
    pub fn none() -> Self {
        Self {
            state: SplashState::NoError,
            message: String::new(),
            image: None,
        }
    }

    /// Picks the splash to show for a terminal failure. If `bundle` is
    /// `Some` and open, walks its fixed priority list of fallback images
    /// (`BundleHandle::first_fallback_image`) and renders the first one
    /// present alongside `message`; otherwise falls back to the built-in
    /// default image and message, discarding `message` in favor of the
    /// fixed default text (a bundle-less failure happened too early for the
    /// caller's message to have anything bundle-specific to say).
    #[must_use]
    pub fn for_failure(bundle: Option<&BundleHandle>, message: impl Into<String>) -> Self {
        if let Some((_path, bytes)) = bundle.filter(|b| b.is_mounted()).and_then(BundleHandle::first_fallback_image) {
            return Self {
                state: SplashState::BundleSplash,
                message: message.into(),
                image: Some(bytes),
            };
        }
        Self {
            state: SplashState::DefaultSplash,
            message: DEFAULT_MESSAGE.to_string(),
            image: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SplashState {
        self.state
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_bundle_falls_back_to_the_default_splash() {
        let splash = ErrorSplash::for_failure(None, "bundle fetch failed");
        assert_eq!(splash.state(), SplashState::DefaultSplash);
        assert_eq!(splash.message(), DEFAULT_MESSAGE);
        assert!(splash.image().is_none());
    }

    #[test]
    fn none_reports_no_error() {
        let splash = ErrorSplash::none();
        assert_eq!(splash.state(), SplashState::NoError);
    }
}
