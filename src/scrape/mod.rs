#[cfg(feature = "headless")]
pub mod chrome;
pub mod headless;

use std::time::Duration;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use crate::config::Config;
use crate::errors::RetrievalError;

pub const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile anchor selector"));

/// Builds the outbound client every strategy shares. `follow_redirects`
/// is off only for mirrors whose redirect *is* the answer.
pub fn build_client(config: &Config, follow_redirects: bool) -> anyhow::Result<reqwest::Client> {
    let redirect = if follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut client = reqwest::Client::builder()
        .user_agent(USER_AGENT_DEFAULT)
        .redirect(redirect)
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(10));

    if let Some(ref proxy) = config.proxy {
        log::debug!("using proxy {proxy:#?}");
        client = client.proxy(reqwest::Proxy::all(proxy)?);
    }

    Ok(client.build()?)
}

#[derive(Debug, Clone)]
pub struct ScrapeStep {
    pub request: String,
    pub status: Option<u16>,
    pub extracted: Option<String>,
}

/// Ordered record of what one retrieval sent and found. Lives for a single
/// `retrieve` call.
#[derive(Debug, Default)]
pub struct ScrapeSession {
    steps: Vec<ScrapeStep>,
}

impl ScrapeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        request: impl Into<String>,
        status: Option<u16>,
        extracted: Option<&str>,
    ) {
        let step = ScrapeStep {
            request: request.into(),
            status,
            extracted: extracted.map(str::to_owned),
        };
        log::debug!(
            "step #{}: {} -> {:?} {:?}",
            self.steps.len() + 1,
            step.request,
            step.status,
            step.extracted
        );
        self.steps.push(step);
    }

    /// Attaches what was found to the latest step.
    pub fn extracted(&mut self, value: &str) {
        let n = self.steps.len();
        if let Some(step) = self.steps.last_mut() {
            log::debug!("step #{n}: extracted {value:?}");
            step.extracted = Some(value.to_string());
        }
    }

    pub fn steps(&self) -> &[ScrapeStep] {
        &self.steps
    }
}

/// Reads a mirror page. Error statuses count as a failed extraction since
/// the mirror did answer.
pub async fn read_html(
    resp: reqwest::Response,
    service: &'static str,
) -> Result<String, RetrievalError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(RetrievalError::ExtractionFailed {
            message: format!("{service} answered with status {status}"),
            upstream_status: Some(status.as_u16()),
        });
    }

    resp.text()
        .await
        .map_err(|err| RetrievalError::from_upstream(service, err))
}

pub struct FetchedBinary {
    pub bytes: Vec<u8>,
    /// Mime essence of `Content-Type`, parameters stripped
    pub content_type: Option<String>,
    pub status: u16,
}

/// Buffers a whole binary response chunk by chunk, giving up as soon as it
/// outgrows `max_bytes`. Anything but a non-empty success body within the
/// limit is a failed download.
pub async fn fetch_binary(
    client: &reqwest::Client,
    url: &Url,
    max_bytes: u64,
) -> Result<FetchedBinary, RetrievalError> {
    let mut resp = client
        .get(url.clone())
        .send()
        .await
        .map_err(RetrievalError::from_download)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(RetrievalError::DownloadFailed {
            message: format!("{url} answered with status {status}"),
            upstream_status: Some(status.as_u16()),
        });
    }

    if let Some(len) = resp.content_length() {
        if len > max_bytes {
            return Err(RetrievalError::download(format!(
                "artifact is {len} bytes, limit is {max_bytes}"
            )));
        }
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let mut bytes = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(RetrievalError::from_download)? {
        if (bytes.len() + chunk.len()) as u64 > max_bytes {
            return Err(RetrievalError::download(format!(
                "artifact exceeds the limit of {max_bytes} bytes"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    if bytes.is_empty() {
        return Err(RetrievalError::download(format!("{url} returned an empty body")));
    }

    Ok(FetchedBinary {
        bytes,
        content_type,
        status: status.as_u16(),
    })
}

/// First anchor href in `html` accepted by `accept`.
pub fn find_anchor<F>(html: &str, accept: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty() && accept(href))
        .map(str::to_owned)
}

/// `name` and `value` of the first element matching `selector`, typically
/// a hidden form input.
pub fn find_hidden_field(html: &str, selector: &str) -> Option<(String, String)> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;

    let name = element.value().attr("name")?.to_string();
    let value = element.value().attr("value")?.trim().to_string();
    if value.is_empty() {
        return None;
    }

    Some((name, value))
}

/// Resolves a scraped href against the mirror it came from.
pub fn resolve_link(base: &Url, href: &str) -> Result<Url, RetrievalError> {
    let href = href.trim();
    let joined = if href.starts_with("//") {
        Url::parse(&format!("{}:{href}", base.scheme()))
    } else {
        base.join(href)
    };

    let url = joined.map_err(|err| {
        RetrievalError::extraction(format!("candidate link {href:?} is not a url: {err}"))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(RetrievalError::extraction(format!(
            "candidate link has unsupported scheme {scheme:?}"
        ))),
    }
}

/// Checks a css selector from config against the same parser the scrapers use.
pub fn is_valid_selector(selector: &str) -> bool {
    Selector::parse(selector).is_ok()
}
