//! Best-effort favicon lookup in an off-screen page.
//!
//! Each lookup gets its own [`RenderContext`], waits for the first content
//! load, then probes for an icon once per entry of the retry schedule. The
//! first icon found is delivered to the page as
//! `<callback>(pageUrl, dataUri);` on the UI thread. Nothing is delivered
//! when every probe comes back empty.
use crate::config::FaviconConfig;
use crate::icon::Icon;
use crate::ui::{script_call, UiHandle};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// An off-screen page, never attached to a visible surface.
#[async_trait]
pub trait RenderContext: Send {
    /// Start loading `url`, returning once the first content load finishes.
    async fn load(&mut self, url: &str) -> Result<()>;

    /// The icon the page exposes right now, if any.
    fn favicon(&self) -> Option<Icon>;
}

/// Creates one isolated [`RenderContext`] per lookup.
pub trait RenderContextFactory: Send + Sync + 'static {
    fn create(&self) -> Result<Box<dyn RenderContext>>;
}

#[derive(Clone)]
pub struct FaviconResolver {
    factory: Arc<dyn RenderContextFactory>,
    schedule: Arc<[Duration]>,
    callback: Arc<str>,
    ui: UiHandle,
    runtime: Handle,
}

impl FaviconResolver {
    pub fn new(
        config: &FaviconConfig,
        factory: Arc<dyn RenderContextFactory>,
        ui: UiHandle,
        runtime: Handle,
    ) -> FaviconResolver {
        FaviconResolver {
            factory,
            schedule: config.retry_schedule().into(),
            callback: config.callback.as_str().into(),
            ui,
            runtime,
        }
    }

    /// Load `page_url` off-screen and probe it on the retry schedule.
    ///
    /// Returns the icon as a PNG data URI, or `None` once the schedule is
    /// used up.
    pub async fn resolve(&self, page_url: &str) -> Result<Option<String>> {
        let mut context = self.factory.create()?;
        context.load(page_url).await?;
        for (attempt, delay) in self.schedule.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            if let Some(icon) = context.favicon() {
                log::debug!("favicon for {} found on attempt {}", page_url, attempt + 1);
                return icon.to_data_uri().map(Some);
            }
        }
        Ok(None)
    }

    /// Fire-and-forget form of [`resolve`](Self::resolve). Failures are only
    /// logged and a missing icon produces no callback.
    pub fn fetch_favicon(&self, page_url: String) {
        let resolver = self.clone();
        self.runtime.spawn(async move {
            match resolver.resolve(&page_url).await {
                Ok(Some(data_uri)) => {
                    let script = script_call(&resolver.callback, &[&page_url, &data_uri]);
                    if let Err(err) = resolver.ui.evaluate(script) {
                        log::warn!("dropping favicon for {}: {}", page_url, err);
                    }
                }
                Ok(None) => log::debug!("no favicon for {}", page_url),
                Err(err) => log::warn!("favicon lookup for {} failed: {}", page_url, err),
            }
        });
    }
}
