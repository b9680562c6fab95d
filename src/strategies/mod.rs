mod browser;
mod direct_redirect;
mod form_post;
mod token_form;

pub use browser::BrowserScrape;
pub use direct_redirect::DirectRedirectScrape;
pub use form_post::FormPostScrape;
pub use token_form::TokenFormScrape;

use std::collections::BTreeMap;

use async_trait::async_trait;
use url::Url;

use crate::{errors::RetrievalError, scrape::ScrapeSession};

/// A mirror-specific way of turning a source url into a download link.
///
/// Everything that depends on a third-party page layout stays behind this
/// trait; the gateway only sees the resulting link.
#[async_trait]
pub trait LinkExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract_link(
        &self,
        source: &Url,
        extra: &BTreeMap<String, String>,
        session: &mut ScrapeSession,
    ) -> Result<Url, RetrievalError>;
}

/// Form or query pairs for a mirror request: fixed fields first, then any
/// caller-supplied extras that don't clash with them.
fn with_extra<'a>(
    fixed: Vec<(&'a str, &'a str)>,
    extra: &'a BTreeMap<String, String>,
) -> Vec<(&'a str, &'a str)> {
    let mut pairs = fixed;
    for (key, value) in extra {
        if pairs.iter().any(|(k, _)| *k == key.as_str()) {
            log::debug!("ignoring extra param {key:?}, it is set by the strategy");
            continue;
        }
        pairs.push((key.as_str(), value.as_str()));
    }
    pairs
}
