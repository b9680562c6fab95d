use std::collections::BTreeMap;

use async_trait::async_trait;
use url::Url;

use super::{with_extra, LinkExtractor};
use crate::{
    config::{parse_url, ConfigError, TokenFormMirror},
    errors::RetrievalError,
    scrape::{find_anchor, find_hidden_field, read_html, resolve_link, ScrapeSession},
};

const NAME: &str = "token_form";

/// Two-step scrape: the mirror homepage hands out a hidden form token which
/// has to accompany the submitted url.
pub struct TokenFormScrape {
    client: reqwest::Client,
    base: Url,
    submit_url: Url,
    token_selector: String,
    cdn_prefix: String,
}

impl TokenFormScrape {
    pub fn new(client: reqwest::Client, mirror: &TokenFormMirror) -> Result<Self, ConfigError> {
        let base = parse_url("mirrors.token_form.base_url", &mirror.base_url)?;
        let submit_url = base
            .join(&mirror.submit_path)
            .map_err(|source| ConfigError::InvalidUrl {
                field: "mirrors.token_form.submit_path",
                value: mirror.submit_path.clone(),
                source,
            })?;

        Ok(Self {
            client,
            base,
            submit_url,
            token_selector: mirror.token_selector.clone(),
            cdn_prefix: mirror.cdn_prefix.clone(),
        })
    }

    async fn fetch_token(
        &self,
        session: &mut ScrapeSession,
    ) -> Result<(String, String), RetrievalError> {
        let resp = self
            .client
            .get(self.base.clone())
            .send()
            .await
            .map_err(|err| RetrievalError::from_upstream(NAME, err))?;

        session.record(format!("GET {}", self.base), Some(resp.status().as_u16()), None);
        let html = read_html(resp, NAME).await?;

        let (name, token) = find_hidden_field(&html, &self.token_selector).ok_or_else(|| {
            log::warn!("{NAME}: no token at {:?}", self.token_selector);
            RetrievalError::extraction("form token not found on mirror homepage")
        })?;
        session.extracted(&token);

        Ok((name, token))
    }

    /// Follows the short-link redirect chain to the canonical video url.
    async fn resolve_source(
        &self,
        source: &Url,
        session: &mut ScrapeSession,
    ) -> Result<Url, RetrievalError> {
        let resp = self
            .client
            .get(source.clone())
            .send()
            .await
            .map_err(|err| RetrievalError::from_upstream("source", err))?;

        let resolved = resp.url().clone();
        session.record(format!("GET {source}"), Some(resp.status().as_u16()), None);
        session.extracted(resolved.as_str());

        Ok(resolved)
    }
}

#[async_trait]
impl LinkExtractor for TokenFormScrape {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn extract_link(
        &self,
        source: &Url,
        extra: &BTreeMap<String, String>,
        session: &mut ScrapeSession,
    ) -> Result<Url, RetrievalError> {
        let (token_name, token) = self.fetch_token(session).await?;
        let resolved = self.resolve_source(source, session).await?;

        let form = with_extra(
            vec![
                ("id", resolved.as_str()),
                ("locale", "en"),
                (token_name.as_str(), token.as_str()),
            ],
            extra,
        );

        let resp = self
            .client
            .post(self.submit_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| RetrievalError::from_upstream(NAME, err))?;

        session.record(
            format!("POST {}", self.submit_url),
            Some(resp.status().as_u16()),
            None,
        );
        let html = read_html(resp, NAME).await?;

        let href = find_anchor(&html, |href| href.starts_with(&self.cdn_prefix)).ok_or_else(|| {
            log::warn!("{NAME}: no anchor starting with {:?}", self.cdn_prefix);
            RetrievalError::extraction("no download link on the mirror's result page")
        })?;
        session.extracted(&href);

        resolve_link(&self.base, &href)
    }
}
