//! Black-box headless-browser interface: navigate, wait, evaluate,
//! capture. Generalized to a trait so the crate never depends on a
//! concrete browser driver.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timed out waiting for load after {0:?}")]
    Timeout(Duration),
    #[error("evaluate failed: {0}")]
    Evaluate(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

pub type Result<T> = std::result::Result<T, RendererError>;

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub network_json: Vec<Value>,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn wait_for_load(&self, timeout: Duration) -> Result<()>;
    async fn evaluate(&self, expression: &str) -> Result<Value>;
    async fn capture_screenshot(&self) -> Result<Vec<u8>>;

    /// Convenience composition of navigate + wait + DOM snapshot used by
    /// the extraction orchestrator's L4 discovery and full-render paths.
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage> {
        self.navigate(url).await?;
        self.wait_for_load(timeout).await?;
        let dom = self.evaluate("document.documentElement.outerHTML").await?;
        let html = dom.as_str().unwrap_or_default().to_string();
        Ok(RenderedPage {
            html,
            network_json: Vec::new(),
        })
    }
}

/// Backs the renderer interface with `chromiumoxide`. One `Page` per call to
/// `render()`: the driver fans render work out across a tenant's worker
/// pool, and a single shared tab cannot serve two concurrent navigations.
/// `navigate`/`wait_for_load`/`evaluate`/`capture_screenshot` operate on the
/// most recently opened page and exist for trait completeness; callers that
/// need the granular steps are expected to serialize their own access.
pub struct ChromiumRenderer {
    browser: chromiumoxide::Browser,
    current: tokio::sync::Mutex<Option<chromiumoxide::Page>>,
}

impl ChromiumRenderer {
    pub fn new(browser: chromiumoxide::Browser) -> Self {
        Self {
            browser,
            current: tokio::sync::Mutex::new(None),
        }
    }

    async fn open(&self, url: &str) -> Result<chromiumoxide::Page> {
        self.browser
            .new_page(url)
            .await
            .map_err(|e| RendererError::Navigation(e.to_string()))
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.open(url).await?;
        *self.current.lock().await = Some(page);
        Ok(())
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<()> {
        let guard = self.current.lock().await;
        let page = guard.as_ref().ok_or_else(|| RendererError::Navigation("no active page".into()))?;
        tokio::time::timeout(timeout, page.wait_for_navigation())
            .await
            .map_err(|_| RendererError::Timeout(timeout))?
            .map_err(|e| RendererError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let guard = self.current.lock().await;
        let page = guard.as_ref().ok_or_else(|| RendererError::Evaluate("no active page".into()))?;
        let result = page
            .evaluate(expression)
            .await
            .map_err(|e| RendererError::Evaluate(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| RendererError::Evaluate(e.to_string()))
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        let guard = self.current.lock().await;
        let page = guard.as_ref().ok_or_else(|| RendererError::Capture("no active page".into()))?;
        page.screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|e| RendererError::Capture(e.to_string()))
    }

    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage> {
        let page = self.open(url).await?;
        tokio::time::timeout(timeout, page.wait_for_navigation())
            .await
            .map_err(|_| RendererError::Timeout(timeout))?
            .map_err(|e| RendererError::Navigation(e.to_string()))?;
        let dom = page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| RendererError::Evaluate(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| RendererError::Evaluate(e.to_string()))?;
        let _ = page.close().await;
        Ok(RenderedPage {
            html: dom,
            network_json: Vec::new(),
        })
    }
}

/// Fixed-response mock used by unit and integration tests in place of a
/// real browser.
pub struct NullRenderer {
    pub html: String,
}

#[async_trait]
impl Renderer for NullRenderer {
    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value> {
        Ok(Value::String(self.html.clone()))
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn render(&self, _url: &str, _timeout: Duration) -> Result<RenderedPage> {
        Ok(RenderedPage {
            html: self.html.clone(),
            network_json: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_renderer_returns_fixed_html() {
        let renderer = NullRenderer {
            html: "<p>hi</p>".into(),
        };
        let page = renderer.render("https://example.com", Duration::from_secs(1)).await.unwrap();
        assert_eq!(page.html, "<p>hi</p>");
    }
}
