use std::{sync::Arc, time::Duration};

use crate::config::Config;

/// Outcome of a bounded wait for an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Element appeared; carries its `href` if it has one
    Found(Option<String>),
    TimedOut,
}

/// One isolated browsing session. Dropping it closes the browser, so every
/// exit path of a scrape releases it.
pub trait BrowserSession: Send {
    fn navigate(&mut self, url: &str) -> anyhow::Result<()>;

    fn type_into(&mut self, selector: &str, text: &str) -> anyhow::Result<()>;

    fn click(&mut self, selector: &str) -> anyhow::Result<()>;

    fn wait_for_href(&mut self, selector: &str, timeout: Duration)
        -> anyhow::Result<WaitOutcome>;
}

pub trait BrowserDriver: Send + Sync {
    fn open(&self) -> anyhow::Result<Box<dyn BrowserSession>>;
}

/// Driver used when the crate is built without the `headless` feature.
#[cfg_attr(feature = "headless", allow(dead_code))]
pub struct NoBrowser;

impl BrowserDriver for NoBrowser {
    fn open(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        anyhow::bail!("headless browser support is not compiled in")
    }
}

#[cfg(feature = "headless")]
pub fn default_driver(config: &Config) -> Arc<dyn BrowserDriver> {
    Arc::new(super::chrome::ChromeDriver::new(
        config.chrome_path.clone(),
        config.proxy.clone(),
    ))
}

#[cfg(not(feature = "headless"))]
pub fn default_driver(_config: &Config) -> Arc<dyn BrowserDriver> {
    Arc::new(NoBrowser)
}
