use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::anyhow;
use headless_chrome::{util::Timeout, Browser, LaunchOptionsBuilder, Tab};

use super::headless::{BrowserDriver, BrowserSession, WaitOutcome};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

pub struct ChromeDriver {
    path: Option<PathBuf>,
    proxy: Option<String>,
}

impl ChromeDriver {
    pub fn new(path: Option<String>, proxy: Option<String>) -> Self {
        Self {
            path: path.map(PathBuf::from),
            proxy,
        }
    }
}

impl BrowserDriver for ChromeDriver {
    fn open(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        let options = LaunchOptionsBuilder::default()
            .sandbox(false)
            .proxy_server(self.proxy.as_deref())
            .path(self.path.clone())
            .build()
            .map_err(|err| anyhow!("invalid launch options: {err}"))?;

        let browser = Browser::new(options)?;
        let tab = browser.new_tab()?;

        stealth_tab(&tab)?;
        tab.set_default_timeout(Duration::from_secs(10));

        log::debug!("browser session opened");

        Ok(Box::new(ChromeSession { browser, tab }))
    }
}

fn stealth_tab(tab: &Tab) -> anyhow::Result<()> {
    tab.enable_stealth_mode()?;
    tab.set_user_agent(BROWSER_USER_AGENT, Some("en-US,en"), Some("Mac OS X"))?;
    Ok(())
}

pub struct ChromeSession {
    // killed on drop
    #[allow(dead_code)]
    browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> anyhow::Result<()> {
        self.tab.navigate_to(url)?.wait_until_navigated()?;
        Ok(())
    }

    fn type_into(&mut self, selector: &str, text: &str) -> anyhow::Result<()> {
        self.tab.wait_for_element(selector)?.type_into(text)?;
        Ok(())
    }

    fn click(&mut self, selector: &str) -> anyhow::Result<()> {
        self.tab.wait_for_element(selector)?.click()?;
        Ok(())
    }

    fn wait_for_href(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> anyhow::Result<WaitOutcome> {
        match self.tab.wait_for_element_with_custom_timeout(selector, timeout) {
            Ok(element) => Ok(WaitOutcome::Found(element.get_attribute_value("href")?)),
            Err(err) if err.is::<Timeout>() => Ok(WaitOutcome::TimedOut),
            Err(err) => Err(err),
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(err) = self.tab.close(true) {
            log::debug!("failed to close tab: {err}");
        }
        log::debug!("browser session closed");
    }
}
