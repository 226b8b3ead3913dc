//! Capability traits for the host page.
//!
//! The paywall never touches a browser (or any UI toolkit) directly. The
//! host supplies these two capabilities and the crate stays mockable in
//! tests, the same way transports are injected elsewhere in the codebase.

/// Read access to the host page's current address, plus an optional
/// replace-navigation used to scrub consumed query parameters.
pub trait Environment: Send + Sync {
    /// The full current URL, query string included.
    fn current_url(&self) -> String;

    /// Replace the current URL without a reload, returning `true` when the
    /// host actually navigated. The default models a host with no navigation
    /// function: URL scrubbing is skipped.
    fn replace_url(&self, _url: &str) -> bool {
        false
    }
}

/// Full-page redirect capability. Leaving the page is the whole effect;
/// there is nothing to await or return.
pub trait Navigator: Send + Sync {
    /// Navigate the host page to `url`.
    fn redirect(&self, url: &str);
}
