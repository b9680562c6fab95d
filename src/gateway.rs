use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::Config,
    errors::RetrievalError,
    generative::GenerativeClient,
    scrape::{
        self,
        headless::{self, BrowserDriver},
        ScrapeSession,
    },
    strategies::{
        BrowserScrape, DirectRedirectScrape, FormPostScrape, LinkExtractor, TokenFormScrape,
    },
};

/// Mime type assumed for downloads that come without a `Content-Type`.
pub const DEFAULT_ARTIFACT_MIME: &str = "video/mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Drive the mirror's form in a headless browser
    Browser,
    /// POST the url to a mirror and scrape the download page
    FormPost,
    /// Fetch a hidden form token first, then POST the resolved url with it
    TokenForm,
    /// Query a mirror without following redirects
    DirectRedirect,
    /// Send an image through the generative model
    GenerativeTransform,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Browser,
        Strategy::FormPost,
        Strategy::TokenForm,
        Strategy::DirectRedirect,
        Strategy::GenerativeTransform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Browser => "browser",
            Strategy::FormPost => "form_post",
            Strategy::TokenForm => "token_form",
            Strategy::DirectRedirect => "direct_redirect",
            Strategy::GenerativeTransform => "generative_transform",
        }
    }

    /// Video strategies only accept urls from the configured source hosts.
    pub fn is_video(&self) -> bool {
        !matches!(self, Strategy::GenerativeTransform)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<_> = Strategy::ALL.iter().map(Strategy::as_str).collect();
                format!("unknown strategy {s:?}, expected one of: {}", names.join(", "))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    #[serde(default)]
    pub source_url: String,
    pub strategy: Strategy,
    /// Extra form/query fields forwarded to the mirror
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl RetrievalRequest {
    pub fn new(source_url: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            source_url: source_url.into(),
            strategy,
            extra_params: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub success: bool,
    pub artifact_base64: String,
    pub mime_type: String,
    pub size_bytes: usize,
    pub source_url: String,
}

impl RetrievalResult {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>, source_url: &Url) -> Self {
        Self {
            success: true,
            artifact_base64: STANDARD.encode(bytes),
            mime_type: mime_type.into(),
            size_bytes: bytes.len(),
            source_url: source_url.to_string(),
        }
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.artifact_base64)
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.artifact_base64)
    }
}

/// Turns a source url into an artifact using one of the [`Strategy`] variants.
///
/// Holds no per-request state: the http client is a shared connection pool
/// and everything a retrieval learns lives in its own [`ScrapeSession`].
pub struct Gateway {
    config: Arc<Config>,
    client: reqwest::Client,
    browser: BrowserScrape,
    form_post: FormPostScrape,
    token_form: TokenFormScrape,
    direct_redirect: DirectRedirectScrape,
    generative: GenerativeClient,
}

impl Gateway {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let driver = headless::default_driver(&config);
        Self::with_browser(config, driver)
    }

    pub fn with_browser(
        config: Arc<Config>,
        driver: Arc<dyn BrowserDriver>,
    ) -> anyhow::Result<Self> {
        let client = scrape::build_client(&config, true)?;
        let no_redirect_client = scrape::build_client(&config, false)?;

        Ok(Self {
            browser: BrowserScrape::new(&config.mirrors.browser, driver)?,
            form_post: FormPostScrape::new(client.clone(), &config.mirrors.form_post)?,
            token_form: TokenFormScrape::new(client.clone(), &config.mirrors.token_form)?,
            direct_redirect: DirectRedirectScrape::new(
                no_redirect_client,
                &config.mirrors.direct_redirect,
            )?,
            generative: GenerativeClient::new(client.clone(), &config)?,
            client,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks a request before anything touches the network.
    pub fn validate(&self, request: &RetrievalRequest) -> Result<Url, RetrievalError> {
        let raw = request.source_url.trim();
        if raw.is_empty() {
            return Err(RetrievalError::invalid_input("missing source url"));
        }

        let url = Url::parse(raw).map_err(|err| {
            RetrievalError::invalid_input(format!("{raw:?} is not a valid url: {err}"))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RetrievalError::invalid_input(format!(
                "unsupported url scheme {:?}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| RetrievalError::invalid_input("url has no host"))?
            .to_lowercase();

        if request.strategy.is_video() && !self.is_source_host(&host) {
            return Err(RetrievalError::invalid_input(format!(
                "{host} is not a supported video host"
            )));
        }

        Ok(url)
    }

    fn is_source_host(&self, host: &str) -> bool {
        self.config.source_hosts.iter().any(|allowed| {
            let allowed = allowed.trim().to_lowercase();
            host == allowed || host.ends_with(&format!(".{allowed}"))
        })
    }

    fn extractor(&self, strategy: Strategy) -> Option<&dyn LinkExtractor> {
        match strategy {
            Strategy::Browser => Some(&self.browser),
            Strategy::FormPost => Some(&self.form_post),
            Strategy::TokenForm => Some(&self.token_form),
            Strategy::DirectRedirect => Some(&self.direct_redirect),
            Strategy::GenerativeTransform => None,
        }
    }

    /// Runs only the link extraction half of a scrape strategy.
    pub async fn extract_link(&self, request: &RetrievalRequest) -> Result<Url, RetrievalError> {
        let source = self.validate(request)?;
        let mut session = ScrapeSession::new();
        let link = self.extract_with(request, &source, &mut session).await;
        log::debug!(
            "{}: link extraction finished after {} steps",
            request.strategy,
            session.steps().len()
        );
        link
    }

    async fn extract_with(
        &self,
        request: &RetrievalRequest,
        source: &Url,
        session: &mut ScrapeSession,
    ) -> Result<Url, RetrievalError> {
        let extractor = self.extractor(request.strategy).ok_or_else(|| {
            RetrievalError::invalid_input(format!(
                "{} does not produce a download link",
                request.strategy
            ))
        })?;

        log::debug!("extracting link with {}", extractor.name());
        extractor
            .extract_link(source, &request.extra_params, session)
            .await
    }

    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
    ) -> Result<RetrievalResult, RetrievalError> {
        let source = self.validate(request)?;
        let mut session = ScrapeSession::new();

        log::info!("{}: retrieving {source}", request.strategy);

        let result = match request.strategy {
            Strategy::GenerativeTransform => {
                if !request.extra_params.is_empty() {
                    log::debug!("generative_transform ignores extra params");
                }
                self.generative.transform(&source, &mut session).await
            }
            _ => match self.extract_with(request, &source, &mut session).await {
                Ok(link) => self.download(&link, &source, &mut session).await,
                Err(err) => Err(err),
            },
        };

        match &result {
            Ok(r) => log::info!(
                "{}: {} bytes of {} after {} steps",
                request.strategy,
                r.size_bytes,
                r.mime_type,
                session.steps().len()
            ),
            Err(err) => log::warn!(
                "{}: failed after {} steps: {err}",
                request.strategy,
                session.steps().len()
            ),
        }

        result
    }

    async fn download(
        &self,
        link: &Url,
        source: &Url,
        session: &mut ScrapeSession,
    ) -> Result<RetrievalResult, RetrievalError> {
        let fetched = scrape::fetch_binary(&self.client, link, self.config.max_artifact_bytes).await;
        session.record(
            format!("GET {link}"),
            fetched.as_ref().ok().map(|f| f.status),
            None,
        );
        let fetched = fetched?;

        let mime = fetched
            .content_type
            .unwrap_or_else(|| DEFAULT_ARTIFACT_MIME.to_string());

        Ok(RetrievalResult::from_bytes(&fetched.bytes, mime, source))
    }
}
