use std::collections::BTreeMap;

use async_trait::async_trait;
use url::Url;

use super::{with_extra, LinkExtractor};
use crate::{
    config::{parse_url, ConfigError, FormPostMirror},
    errors::RetrievalError,
    scrape::{find_anchor, read_html, resolve_link, ScrapeSession},
};

const NAME: &str = "form_post";

/// POSTs the source url to the mirror and takes the first download anchor
/// of the page it answers with.
pub struct FormPostScrape {
    client: reqwest::Client,
    base: Url,
    link_pattern: String,
}

impl FormPostScrape {
    pub fn new(client: reqwest::Client, mirror: &FormPostMirror) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            base: parse_url("mirrors.form_post.base_url", &mirror.base_url)?,
            link_pattern: mirror.link_pattern.clone(),
        })
    }
}

#[async_trait]
impl LinkExtractor for FormPostScrape {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn extract_link(
        &self,
        source: &Url,
        extra: &BTreeMap<String, String>,
        session: &mut ScrapeSession,
    ) -> Result<Url, RetrievalError> {
        let form = with_extra(vec![("url", source.as_str()), ("submit", "")], extra);

        let resp = self
            .client
            .post(self.base.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| RetrievalError::from_upstream(NAME, err))?;

        session.record(format!("POST {}", self.base), Some(resp.status().as_u16()), None);
        let html = read_html(resp, NAME).await?;

        let href = find_anchor(&html, |href| href.contains(&self.link_pattern)).ok_or_else(|| {
            log::warn!("{NAME}: no anchor containing {:?}", self.link_pattern);
            RetrievalError::extraction("Failed to fetch download link")
        })?;
        session.extracted(&href);

        resolve_link(&self.base, &href)
    }
}
