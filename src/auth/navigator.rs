//! User-agent navigation seam.
//!
//! Browsers change `location`; the CLI prints the URL. Guards call this
//! instead of rendering anything when a caller must leave the current page.

pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Writes the destination to stderr so an operator can follow it.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, target: &str) {
        tracing::info!(target_url = target, "Navigating");
        eprintln!("Open this URL to continue:\n  {target}");
    }
}
