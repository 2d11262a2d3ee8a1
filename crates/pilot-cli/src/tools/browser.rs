//! Chromium executor driven over the DevTools protocol

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::Page;
use futures::StreamExt;
use llm_core::config::BrowserSection;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{ActionOutput, ClickStrategy, Executor};

const ROLE_CLICK_TIMEOUT: Duration = Duration::from_millis(2000);
const TEXT_CLICK_TIMEOUT: Duration = Duration::from_millis(2000);
const SELECTOR_CLICK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Elements with a button or link role
const ROLE_SELECTOR: &str =
    r#"button, [role="button"], input[type="button"], input[type="submit"], a[href], [role="link"]"#;

/// Launch options for the browser
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub executable: Option<PathBuf>,
    /// Characters of body text returned by `read_page`
    pub read_page_chars: usize,
    /// Delay between typed characters
    pub type_delay: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self::from(&BrowserSection::default())
    }
}

impl From<&BrowserSection> for BrowserOptions {
    fn from(section: &BrowserSection) -> Self {
        Self {
            headless: section.headless,
            viewport_width: section.viewport_width,
            viewport_height: section.viewport_height,
            executable: section.executable.clone(),
            read_page_chars: section.read_page_chars,
            type_delay: Duration::from_millis(20),
        }
    }
}

/// A single Chromium window with one page, held for the whole run.
///
/// The caller owns the lifecycle: `launch` before the run, `close` after it.
pub struct BrowserTool {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    options: BrowserOptions,
}

impl BrowserTool {
    pub async fn launch(options: BrowserOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.viewport_width, options.viewport_height)
            .arg("--disable-features=InterestCohort");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(ref path) = options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch Chromium")?;

        // The CDP connection only makes progress while its handler is polled
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open a page")?;

        info!(
            headless = options.headless,
            width = options.viewport_width,
            height = options.viewport_height,
            "Browser launched"
        );

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler,
            options,
        })
    }

    /// Close the browser and wait for the CDP handler to wind down
    pub async fn close(self) -> Result<()> {
        let mut browser = self.browser.into_inner();
        browser.close().await.context("Failed to close browser")?;
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "Browser process did not exit cleanly");
        }
        let _ = self.handler.await;
        info!("Browser closed");
        Ok(())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    /// Run a click script that returns whether it found and clicked a target
    async fn click_with_script(&self, script: String, limit: Duration) -> Result<bool> {
        let evaluated = timeout(limit, self.page.evaluate(script))
            .await
            .map_err(|_| anyhow!("timed out after {}ms", limit.as_millis()))??;
        Ok(evaluated.into_value::<bool>()?)
    }

    async fn click_selector(&self, selector: &str) -> Result<()> {
        timeout(SELECTOR_CLICK_TIMEOUT, async {
            self.page.find_element(selector).await?.click().await?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow!("timed out after {}ms", SELECTOR_CLICK_TIMEOUT.as_millis()))?
    }
}

#[async_trait]
impl Executor for BrowserTool {
    #[instrument(skip(self))]
    async fn open_url(&self, url: &str) -> Result<ActionOutput> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to open {}", url))?;

        let current = self.page.url().await?.unwrap_or_else(|| url.to_string());
        let title = self.title().await?;
        Ok(ActionOutput::Opened {
            url: current,
            title,
        })
    }

    #[instrument(skip(self))]
    async fn click(&self, text_or_selector: &str) -> Result<ActionOutput> {
        let target = serde_json::to_string(text_or_selector)?;

        match self
            .click_with_script(role_click_script(&target), ROLE_CLICK_TIMEOUT)
            .await
        {
            Ok(true) => return Ok(ActionOutput::Clicked { strategy: ClickStrategy::Role }),
            Ok(false) => debug!("No button matched by role"),
            Err(e) => debug!(error = %e, "Role click failed"),
        }

        match self
            .click_with_script(text_click_script(&target), TEXT_CLICK_TIMEOUT)
            .await
        {
            Ok(true) => return Ok(ActionOutput::Clicked { strategy: ClickStrategy::Text }),
            Ok(false) => debug!("No element matched by text"),
            Err(e) => debug!(error = %e, "Text click failed"),
        }

        match self.click_selector(text_or_selector).await {
            Ok(()) => Ok(ActionOutput::Clicked {
                strategy: ClickStrategy::Selector,
            }),
            Err(e) => bail!("Nothing to click for '{}': {:#}", text_or_selector, e),
        }
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn type_text(&self, text: &str) -> Result<ActionOutput> {
        let mut typed = 0;
        for ch in text.chars() {
            self.page
                .execute(InsertTextParams::new(ch.to_string()))
                .await
                .context("Failed to send keystroke")?;
            typed += 1;
            tokio::time::sleep(self.options.type_delay).await;
        }
        Ok(ActionOutput::Typed { typed })
    }

    async fn wait(&self, seconds: f64) -> Result<ActionOutput> {
        let duration = Duration::try_from_secs_f64(seconds)
            .with_context(|| format!("Cannot wait {} seconds", seconds))?;
        tokio::time::sleep(duration).await;
        Ok(ActionOutput::Waited { seconds })
    }

    #[instrument(skip(self))]
    async fn read_page(&self) -> Result<ActionOutput> {
        let title = self.title().await?;
        let body: String = self
            .page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .context("Failed to read page text")?
            .into_value()?;

        Ok(ActionOutput::Page {
            title,
            text: truncate_chars(&body, self.options.read_page_chars),
        })
    }
}

/// Clicks the first button or link whose accessible name contains the target
fn role_click_script(target: &str) -> String {
    format!(
        r#"(() => {{
  const t = {target}.toLowerCase();
  const buttons = document.querySelectorAll('{ROLE_SELECTOR}');
  for (const b of buttons) {{
    const name = (b.getAttribute('aria-label') || b.innerText || b.value || '').trim().toLowerCase();
    if (name && name.includes(t)) {{
      b.scrollIntoView({{block: 'center'}});
      b.click();
      return true;
    }}
  }}
  return false;
}})()"#
    )
}

/// Clicks the innermost element whose visible text contains the target
fn text_click_script(target: &str) -> String {
    format!(
        r#"(() => {{
  const t = {target}.toLowerCase();
  const has = (e) => (e.innerText || '').toLowerCase().includes(t);
  const hits = Array.from(document.querySelectorAll('body *')).filter(has);
  const leaf = hits.find((e) => !Array.from(e.children).some(has));
  if (!leaf) return false;
  leaf.scrollIntoView({{block: 'center'}});
  leaf.click();
  return true;
}})()"#
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_click_scripts_embed_escaped_target() {
        let target = serde_json::to_string(r#"Say "hi""#).unwrap();
        let script = text_click_script(&target);
        assert!(script.contains(r#"const t = "Say \"hi\"".toLowerCase();"#));

        let script = role_click_script(&target);
        assert!(script.contains(r#"const t = "Say \"hi\"".toLowerCase();"#));
    }

    #[test]
    fn test_role_script_covers_buttons_and_links() {
        let script = role_click_script("\"Next\"");
        assert!(script.contains(r#"[role="button"]"#));
        assert!(script.contains("a[href]"));
        assert!(script.contains(r#"[role="link"]"#));
    }

    #[test]
    fn test_options_from_config_section() {
        let section = BrowserSection {
            headless: true,
            read_page_chars: 100,
            ..BrowserSection::default()
        };
        let options = BrowserOptions::from(&section);
        assert!(options.headless);
        assert_eq!(options.read_page_chars, 100);
        assert_eq!(options.viewport_width, 1400);
        assert_eq!(options.type_delay, Duration::from_millis(20));
    }
}
