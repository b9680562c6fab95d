use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use url::Url;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::scrape::headless::{BrowserDriver, BrowserSession, NoBrowser, WaitOutcome};

pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00not-really-a-video";

/// Binds an ephemeral local port. The returned url is the server root,
/// with a trailing slash.
pub async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    (listener, Url::parse(&format!("http://{addr}/")).unwrap())
}

/// Root of a host nothing listens on (tcpmux, never served locally).
pub fn unreachable_base() -> Url {
    Url::parse("http://127.0.0.1:1/").unwrap()
}

/// Serves a fake upstream (mirror, CDN and model endpoint in one) in the
/// background for the rest of the test.
pub fn serve(listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
}

/// Points every mirror and the model endpoint at the fake upstream.
pub fn config_for(base: &Url) -> Config {
    let mut config = Config::default();
    config.gemini_api_key = "test-key".to_string();
    config.http_timeout_secs = 5;
    config.source_hosts = vec!["tiktok.com".to_string(), "127.0.0.1".to_string()];

    config.mirrors.browser.base_url = base.join("dlpanda/").unwrap().to_string();
    config.mirrors.form_post.base_url = base.join("musicaldown/").unwrap().to_string();
    config.mirrors.token_form.base_url = base.join("ssstik/").unwrap().to_string();
    config.mirrors.token_form.submit_path = "/ssstik/abc?url=dl".to_string();
    config.mirrors.token_form.cdn_prefix = base.join("tikcdn/").unwrap().to_string();
    config.mirrors.direct_redirect.base_url = base.join("dlpanda/").unwrap().to_string();

    config.generative.api_base = base.join("gemini/v1beta").unwrap().to_string();
    config.generative.model = "test-model".to_string();

    config.validate().expect("test config must be valid");
    config
}

pub fn gateway_for(config: Config) -> Gateway {
    Gateway::with_browser(Arc::new(config), Arc::new(NoBrowser)).unwrap()
}

/// Request counter shared with upstream handlers.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub enum FakeBehavior {
    Href(String),
    NoHref,
    TimesOut,
    BrokenForm,
    LaunchFails,
}

/// Browser driver that scripts the mirror's reaction and tracks how many
/// sessions are still open.
#[derive(Clone)]
pub struct FakeBrowser {
    behavior: FakeBehavior,
    pub opened: Arc<AtomicUsize>,
    pub live: Arc<AtomicUsize>,
    pub typed: Arc<Mutex<Vec<String>>>,
    pub navigated: Arc<Mutex<Vec<String>>>,
    pub waited: Arc<Mutex<Option<Duration>>>,
}

impl FakeBrowser {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            opened: Default::default(),
            live: Default::default(),
            typed: Default::default(),
            navigated: Default::default(),
            waited: Default::default(),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl BrowserDriver for FakeBrowser {
    fn open(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        if let FakeBehavior::LaunchFails = self.behavior {
            anyhow::bail!("chromium not found");
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeSession {
            browser: self.clone(),
        }))
    }
}

struct FakeSession {
    browser: FakeBrowser,
}

impl BrowserSession for FakeSession {
    fn navigate(&mut self, url: &str) -> anyhow::Result<()> {
        self.browser.navigated.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn type_into(&mut self, selector: &str, text: &str) -> anyhow::Result<()> {
        if let FakeBehavior::BrokenForm = self.browser.behavior {
            anyhow::bail!("no node found for selector {selector}");
        }
        self.browser.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn click(&mut self, _selector: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn wait_for_href(
        &mut self,
        _selector: &str,
        timeout: Duration,
    ) -> anyhow::Result<WaitOutcome> {
        *self.browser.waited.lock().unwrap() = Some(timeout);

        Ok(match &self.browser.behavior {
            FakeBehavior::Href(href) => WaitOutcome::Found(Some(href.clone())),
            FakeBehavior::NoHref => WaitOutcome::Found(None),
            _ => WaitOutcome::TimedOut,
        })
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.browser.live.fetch_sub(1, Ordering::SeqCst);
    }
}
