use std::collections::BTreeMap;

use async_trait::async_trait;
use url::Url;

use super::{with_extra, LinkExtractor};
use crate::{
    config::{parse_url, ConfigError, DirectRedirectMirror},
    errors::RetrievalError,
    scrape::{find_anchor, read_html, resolve_link, ScrapeSession},
};

const NAME: &str = "direct_redirect";

/// Queries the mirror with redirects disabled. A redirect points straight at
/// the video; otherwise the page is scraped for a CDN anchor.
pub struct DirectRedirectScrape {
    /// Must not follow redirects
    client: reqwest::Client,
    base: Url,
    cdn_host: String,
    path_marker: String,
}

impl DirectRedirectScrape {
    pub fn new(
        client: reqwest::Client,
        mirror: &DirectRedirectMirror,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            base: parse_url("mirrors.direct_redirect.base_url", &mirror.base_url)?,
            cdn_host: mirror.cdn_host.clone(),
            path_marker: mirror.path_marker.clone(),
        })
    }
}

#[async_trait]
impl LinkExtractor for DirectRedirectScrape {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn extract_link(
        &self,
        source: &Url,
        extra: &BTreeMap<String, String>,
        session: &mut ScrapeSession,
    ) -> Result<Url, RetrievalError> {
        let query = with_extra(vec![("url", source.as_str())], extra);

        let resp = self
            .client
            .get(self.base.clone())
            .query(&query)
            .send()
            .await
            .map_err(|err| RetrievalError::from_upstream(NAME, err))?;

        let status = resp.status();
        session.record(format!("GET {}", resp.url()), Some(status.as_u16()), None);

        if status.is_redirection() {
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
                .ok_or_else(|| RetrievalError::ExtractionFailed {
                    message: "mirror redirected without a Location header".to_string(),
                    upstream_status: Some(status.as_u16()),
                })?;
            session.extracted(&location);

            return resolve_link(&self.base, &location);
        }

        let html = read_html(resp, NAME).await?;

        let href = find_anchor(&html, |href| {
            href.contains(&self.cdn_host) && href.contains(&self.path_marker)
        })
        .ok_or_else(|| {
            log::warn!(
                "{NAME}: no anchor containing {:?} and {:?}",
                self.cdn_host,
                self.path_marker
            );
            RetrievalError::extraction(
                "Failed to find video download URL. The site structure may have changed or the video is unavailable.",
            )
        })?;
        session.extracted(&href);

        resolve_link(&self.base, &href)
    }
}
