use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 250 * 1024 * 1024;
const DEFAULT_BROWSER_WAIT_SECS: u64 = 15;

const DEFAULT_GENERATIVE_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GENERATIVE_MODEL: &str = "gemini-2.0-flash-exp-image-generation";

const DLPANDA_BASE_URL: &str = "https://dlpanda.com/";
const MUSICALDOWN_BASE_URL: &str = "https://musicaldown.com/";
const SSSTIK_BASE_URL: &str = "https://ssstik.io/";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is not set. Please set it as an environment variable.")]
    MissingApiKey,

    #[error("{field}: invalid url {value:?}: {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },

    #[error("{field}: invalid css selector {value:?}")]
    InvalidSelector { field: &'static str, value: String },

    #[error("{field} must be greater than 0")]
    Zero { field: &'static str },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),
}

/// Generative model endpoint used by the image transform strategy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerativeConfig {
    #[serde(default = "default_generative_api_base")]
    pub api_base: String,

    #[serde(default = "default_generative_model")]
    pub model: String,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            api_base: default_generative_api_base(),
            model: default_generative_model(),
        }
    }
}

/// Mirror driven through a headless browser.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserMirror {
    #[serde(default = "default_dlpanda")]
    pub base_url: String,
    #[serde(default = "default_input_selector")]
    pub input_selector: String,
    #[serde(default = "default_submit_selector")]
    pub submit_selector: String,
    #[serde(default = "default_result_selector")]
    pub result_selector: String,
    /// How long to wait for `result_selector` to show up after submit
    #[serde(default = "default_browser_wait_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for BrowserMirror {
    fn default() -> Self {
        Self {
            base_url: default_dlpanda(),
            input_selector: default_input_selector(),
            submit_selector: default_submit_selector(),
            result_selector: default_result_selector(),
            wait_timeout_secs: default_browser_wait_secs(),
        }
    }
}

/// Mirror that answers a plain form POST with a download page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormPostMirror {
    #[serde(default = "default_musicaldown")]
    pub base_url: String,
    /// Substring the download anchor href must contain
    #[serde(default = "default_link_pattern")]
    pub link_pattern: String,
}

impl Default for FormPostMirror {
    fn default() -> Self {
        Self {
            base_url: default_musicaldown(),
            link_pattern: default_link_pattern(),
        }
    }
}

/// Mirror that hands out a hidden form token on its homepage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenFormMirror {
    #[serde(default = "default_ssstik")]
    pub base_url: String,
    #[serde(default = "default_token_selector")]
    pub token_selector: String,
    #[serde(default = "default_submit_path")]
    pub submit_path: String,
    /// Download anchors must start with this prefix
    #[serde(default = "default_token_cdn_prefix")]
    pub cdn_prefix: String,
}

impl Default for TokenFormMirror {
    fn default() -> Self {
        Self {
            base_url: default_ssstik(),
            token_selector: default_token_selector(),
            submit_path: default_submit_path(),
            cdn_prefix: default_token_cdn_prefix(),
        }
    }
}

/// Mirror queried with redirects disabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectRedirectMirror {
    #[serde(default = "default_dlpanda")]
    pub base_url: String,
    #[serde(default = "default_cdn_host")]
    pub cdn_host: String,
    #[serde(default = "default_video_marker")]
    pub path_marker: String,
}

impl Default for DirectRedirectMirror {
    fn default() -> Self {
        Self {
            base_url: default_dlpanda(),
            cdn_host: default_cdn_host(),
            path_marker: default_video_marker(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MirrorsConfig {
    #[serde(default)]
    pub browser: BrowserMirror,
    #[serde(default)]
    pub form_post: FormPostMirror,
    #[serde(default)]
    pub token_form: TokenFormMirror,
    #[serde(default)]
    pub direct_redirect: DirectRedirectMirror,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Hides error chains from HTTP responses
    #[serde(default)]
    pub production: bool,

    #[serde(default)]
    pub gemini_api_key: String,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,

    /// Proxy for every outbound HTTP request (http, https or socks5)
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub chrome_path: Option<String>,

    /// Hosts accepted as source urls for the video strategies, subdomains included
    #[serde(default = "default_source_hosts")]
    pub source_hosts: Vec<String>,

    #[serde(default)]
    pub generative: GenerativeConfig,

    #[serde(default)]
    pub mirrors: MirrorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            production: false,
            gemini_api_key: String::new(),
            http_timeout_secs: default_http_timeout_secs(),
            max_artifact_bytes: default_max_artifact_bytes(),
            proxy: None,
            chrome_path: None,
            source_hosts: default_source_hosts(),
            generative: GenerativeConfig::default(),
            mirrors: MirrorsConfig::default(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_max_artifact_bytes() -> u64 {
    DEFAULT_MAX_ARTIFACT_BYTES
}

fn default_source_hosts() -> Vec<String> {
    vec!["tiktok.com".to_string()]
}

fn default_generative_api_base() -> String {
    DEFAULT_GENERATIVE_API_BASE.to_string()
}

fn default_generative_model() -> String {
    DEFAULT_GENERATIVE_MODEL.to_string()
}

fn default_dlpanda() -> String {
    DLPANDA_BASE_URL.to_string()
}

fn default_musicaldown() -> String {
    MUSICALDOWN_BASE_URL.to_string()
}

fn default_ssstik() -> String {
    SSSTIK_BASE_URL.to_string()
}

fn default_input_selector() -> String {
    "#url".to_string()
}

fn default_submit_selector() -> String {
    "#submit".to_string()
}

fn default_result_selector() -> String {
    ".download-links a".to_string()
}

fn default_browser_wait_secs() -> u64 {
    DEFAULT_BROWSER_WAIT_SECS
}

fn default_link_pattern() -> String {
    "/download/".to_string()
}

fn default_token_selector() -> String {
    r#"input[name="tt"]"#.to_string()
}

fn default_submit_path() -> String {
    "/abc?url=dl".to_string()
}

fn default_token_cdn_prefix() -> String {
    "https://tikcdn.io/".to_string()
}

fn default_cdn_host() -> String {
    "tiktokcdn.com".to_string()
}

fn default_video_marker() -> String {
    "video/".to_string()
}

impl Config {
    /// Loads defaults, then the YAML file at `path` if given, then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let config_str = std::fs::read_to_string(path)?;
                serde_yml::from_str::<Self>(&config_str)?
            }
            None => Self::default(),
        };

        config.apply_env(env);
        config.validate()?;

        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("GEMINI_API_KEY") {
            self.gemini_api_key = key;
        }

        if let Some(base) = non_empty("DLPANDA_BASE_URL") {
            self.mirrors.browser.base_url = base.clone();
            self.mirrors.direct_redirect.base_url = base;
        }

        if let Some(port) = non_empty("PORT") {
            self.listen = format!("0.0.0.0:{}", port.trim());
        }

        let env_name = non_empty("APP_ENV").or_else(|| non_empty("NODE_ENV"));
        if let Some(env_name) = env_name {
            self.production = env_name.eq_ignore_ascii_case("production");
        }

        if let Some(path) = non_empty("CHROME_PATH") {
            self.chrome_path = Some(path);
        }

        if let Some(proxy) = non_empty("OPT_PROXY") {
            self.proxy = Some(proxy);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gemini_api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "http_timeout_secs",
            });
        }

        if self.max_artifact_bytes == 0 {
            return Err(ConfigError::Zero {
                field: "max_artifact_bytes",
            });
        }

        if self.mirrors.browser.wait_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "mirrors.browser.wait_timeout_secs",
            });
        }

        let urls = [
            ("generative.api_base", &self.generative.api_base),
            ("mirrors.browser.base_url", &self.mirrors.browser.base_url),
            ("mirrors.form_post.base_url", &self.mirrors.form_post.base_url),
            ("mirrors.token_form.base_url", &self.mirrors.token_form.base_url),
            (
                "mirrors.direct_redirect.base_url",
                &self.mirrors.direct_redirect.base_url,
            ),
        ];
        for (field, value) in urls {
            parse_url(field, value)?;
        }

        if let Some(ref proxy) = self.proxy {
            parse_url("proxy", proxy)?;
        }

        let selectors = [
            ("mirrors.browser.input_selector", &self.mirrors.browser.input_selector),
            ("mirrors.browser.submit_selector", &self.mirrors.browser.submit_selector),
            ("mirrors.browser.result_selector", &self.mirrors.browser.result_selector),
            ("mirrors.token_form.token_selector", &self.mirrors.token_form.token_selector),
        ];
        for (field, value) in selectors {
            if !crate::scrape::is_valid_selector(value) {
                return Err(ConfigError::InvalidSelector {
                    field,
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Parses a configured url, naming the offending field on failure.
pub fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })
}
