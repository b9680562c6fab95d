use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use url::Url;

use super::LinkExtractor;
use crate::{
    config::{parse_url, BrowserMirror, ConfigError},
    errors::RetrievalError,
    scrape::{
        headless::{BrowserDriver, WaitOutcome},
        resolve_link, ScrapeSession,
    },
};

const NAME: &str = "browser";

#[derive(Clone)]
struct Selectors {
    input: String,
    submit: String,
    result: String,
}

/// Fills in the mirror's form in a headless browser and waits for the
/// result list to render.
pub struct BrowserScrape {
    driver: Arc<dyn BrowserDriver>,
    base: Url,
    selectors: Selectors,
    wait_timeout: Duration,
}

impl BrowserScrape {
    pub fn new(mirror: &BrowserMirror, driver: Arc<dyn BrowserDriver>) -> Result<Self, ConfigError> {
        Ok(Self {
            driver,
            base: parse_url("mirrors.browser.base_url", &mirror.base_url)?,
            selectors: Selectors {
                input: mirror.input_selector.clone(),
                submit: mirror.submit_selector.clone(),
                result: mirror.result_selector.clone(),
            },
            wait_timeout: Duration::from_secs(mirror.wait_timeout_secs),
        })
    }
}

/// Runs the whole browser interaction. The session is owned by this frame,
/// so it is closed however the function returns.
fn scrape_with_browser(
    driver: &dyn BrowserDriver,
    base: &Url,
    selectors: &Selectors,
    wait_timeout: Duration,
    source: &str,
) -> Result<String, RetrievalError> {
    let mut session = driver
        .open()
        .map_err(|err| RetrievalError::UpstreamUnreachable {
            service: NAME,
            message: format!("failed to start browser: {err}"),
        })?;

    session
        .navigate(base.as_str())
        .map_err(|err| RetrievalError::UpstreamUnreachable {
            service: NAME,
            message: format!("{base}: {err}"),
        })?;

    session
        .type_into(&selectors.input, source)
        .and_then(|_| session.click(&selectors.submit))
        .map_err(|err| RetrievalError::extraction(format!("mirror form not usable: {err}")))?;

    let outcome = session
        .wait_for_href(&selectors.result, wait_timeout)
        .map_err(|err| RetrievalError::extraction(format!("result list not readable: {err}")))?;

    match outcome {
        WaitOutcome::Found(Some(href)) if !href.trim().is_empty() => Ok(href),
        WaitOutcome::Found(_) => Err(RetrievalError::extraction(
            "first result link has no href",
        )),
        WaitOutcome::TimedOut => Err(RetrievalError::UpstreamTimeout(format!(
            "{:?} after {}s",
            selectors.result,
            wait_timeout.as_secs()
        ))),
    }
}

#[async_trait]
impl LinkExtractor for BrowserScrape {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn extract_link(
        &self,
        source: &Url,
        extra: &BTreeMap<String, String>,
        session: &mut ScrapeSession,
    ) -> Result<Url, RetrievalError> {
        if !extra.is_empty() {
            log::debug!("{NAME}: extra params are not used by the browser form");
        }

        let driver = self.driver.clone();
        let base = self.base.clone();
        let selectors = self.selectors.clone();
        let wait_timeout = self.wait_timeout;
        let source_str = source.to_string();

        // headless_chrome blocks, keep it off the async workers
        let href = tokio::task::spawn_blocking(move || {
            scrape_with_browser(driver.as_ref(), &base, &selectors, wait_timeout, &source_str)
        })
        .await
        .map_err(|err| RetrievalError::UpstreamUnreachable {
            service: NAME,
            message: format!("browser task failed: {err}"),
        });

        session.record(
            format!("BROWSER {} submit {}", self.base, self.selectors.submit),
            None,
            None,
        );
        let href = href??;
        session.extracted(&href);

        resolve_link(&self.base, &href)
    }
}
