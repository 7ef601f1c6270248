//! Script-facing objects and the dispatcher the script host calls into.
//!
//! Script arguments arrive as JSON values where `null` stands for a missing
//! string. Every method has a `try_` form that reports failures and a silent
//! form that logs them and answers the way the page expects: absent for
//! reads, nothing for writes.
use crate::config::Config;
use crate::engines::KVStoreEngine;
use crate::favicon::{FaviconResolver, RenderContextFactory};
use crate::ui::{ScriptHost, UiHandle, UiThread};
use crate::{KVStoreError, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;

/// The browsing session currently shown to the user.
pub trait BrowsingSession: Send + Sync + 'static {
    fn load_uri(&self, uri: &str);
}

fn silently<T: Default>(op: &str, result: Result<T>) -> T {
    result.unwrap_or_else(|err| {
        match err {
            KVStoreError::InvalidKey => log::debug!("{}: {}", op, err),
            _ => log::warn!("{} failed: {}", op, err),
        }
        T::default()
    })
}

/// `getItem` / `setItem` / `removeItem` / `clear`
pub struct LocalStorage<E: KVStoreEngine> {
    engine: E,
}

impl<E: KVStoreEngine> LocalStorage<E> {
    pub fn new(engine: E) -> Self {
        LocalStorage { engine }
    }

    pub fn try_get_item(&self, key: Option<String>) -> Result<Option<String>> {
        let key = key.ok_or(KVStoreError::InvalidKey)?;
        self.engine.get(key)
    }

    pub fn try_set_item(&self, key: Option<String>, value: Option<String>) -> Result<()> {
        match (key, value) {
            (Some(key), Some(value)) => self.engine.set(key, value),
            _ => Err(KVStoreError::InvalidKey),
        }
    }

    pub fn try_remove_item(&self, key: Option<String>) -> Result<()> {
        let key = key.ok_or(KVStoreError::InvalidKey)?;
        self.engine.remove(key)
    }

    pub fn try_clear(&self) -> Result<()> {
        self.engine.clear()
    }

    pub fn get_item(&self, key: Option<String>) -> Option<String> {
        silently("getItem", self.try_get_item(key))
    }

    pub fn set_item(&self, key: Option<String>, value: Option<String>) {
        silently("setItem", self.try_set_item(key, value))
    }

    pub fn remove_item(&self, key: Option<String>) {
        silently("removeItem", self.try_remove_item(key))
    }

    pub fn clear(&self) {
        silently("clear", self.try_clear())
    }
}

/// `openURL` / `getFavicon`
pub struct HomeObject {
    session: Arc<dyn BrowsingSession>,
    favicons: FaviconResolver,
}

impl HomeObject {
    pub fn new(session: Arc<dyn BrowsingSession>, favicons: FaviconResolver) -> Self {
        HomeObject { session, favicons }
    }

    pub fn try_open_url(&self, url: Option<String>) -> Result<()> {
        let url = url.ok_or_else(|| KVStoreError::InvalidArgument("openURL(null)".to_owned()))?;
        log::debug!("openURL {}", url);
        self.session.load_uri(&url);
        Ok(())
    }

    pub fn try_get_favicon(&self, page_url: Option<String>) -> Result<()> {
        let page_url = page_url
            .ok_or_else(|| KVStoreError::InvalidArgument("getFavicon(null)".to_owned()))?;
        self.favicons.fetch_favicon(page_url);
        Ok(())
    }

    pub fn open_url(&self, url: Option<String>) {
        silently("openURL", self.try_open_url(url))
    }

    pub fn get_favicon(&self, page_url: Option<String>) {
        silently("getFavicon", self.try_get_favicon(page_url))
    }
}

/// Routes `object.method(args)` from script to the native objects.
pub struct Bridge<E: KVStoreEngine> {
    storage_name: String,
    home_name: String,
    storage: LocalStorage<E>,
    home: HomeObject,
}

impl<E: KVStoreEngine> Bridge<E> {
    pub fn new(config: &Config, storage: LocalStorage<E>, home: HomeObject) -> Self {
        Bridge {
            storage_name: config.storage_object.clone(),
            home_name: config.home_object.clone(),
            storage,
            home,
        }
    }

    /// Names under which the objects are exposed to script.
    pub fn object_names(&self) -> [&str; 2] {
        [self.storage_name.as_str(), self.home_name.as_str()]
    }

    pub fn storage(&self) -> &LocalStorage<E> {
        &self.storage
    }

    pub fn home(&self) -> &HomeObject {
        &self.home
    }

    pub fn try_dispatch(&self, object: &str, method: &str, args: &[Value]) -> Result<Option<String>> {
        log::debug!("{}.{} {:?}", object, method, args);
        if object == self.storage_name {
            match method {
                "getItem" => {
                    let [key] = string_args::<1>(method, args)?;
                    self.storage.try_get_item(key)
                }
                "setItem" => {
                    let [key, value] = string_args::<2>(method, args)?;
                    self.storage.try_set_item(key, value).map(|_| None)
                }
                "removeItem" => {
                    let [key] = string_args::<1>(method, args)?;
                    self.storage.try_remove_item(key).map(|_| None)
                }
                "clear" => {
                    let [] = string_args::<0>(method, args)?;
                    self.storage.try_clear().map(|_| None)
                }
                _ => Err(unknown_method(object, method)),
            }
        } else if object == self.home_name {
            match method {
                "openURL" => {
                    let [url] = string_args::<1>(method, args)?;
                    self.home.try_open_url(url).map(|_| None)
                }
                "getFavicon" => {
                    let [page_url] = string_args::<1>(method, args)?;
                    self.home.try_get_favicon(page_url).map(|_| None)
                }
                _ => Err(unknown_method(object, method)),
            }
        } else {
            Err(unknown_method(object, method))
        }
    }

    /// What the page sees: a string or nothing, never an error.
    pub fn dispatch(&self, object: &str, method: &str, args: &[Value]) -> Option<String> {
        silently(&format!("{}.{}", object, method), self.try_dispatch(object, method, args))
    }
}

fn unknown_method(object: &str, method: &str) -> KVStoreError {
    KVStoreError::UnknownMethod {
        object: object.to_owned(),
        method: method.to_owned(),
    }
}

fn string_args<const N: usize>(method: &str, args: &[Value]) -> Result<[Option<String>; N]> {
    if args.len() != N {
        return Err(KVStoreError::InvalidArgument(format!(
            "{} takes {} arguments, got {}",
            method,
            N,
            args.len()
        )));
    }
    let mut out: [Option<String>; N] = std::array::from_fn(|_| None);
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = match arg {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => {
                return Err(KVStoreError::InvalidArgument(format!(
                    "{} expects strings, got {}",
                    method, other
                )))
            }
        };
    }
    Ok(out)
}

/// Everything the home page talks to, wired from one [`Config`].
pub struct HomeBridge<E: KVStoreEngine> {
    bridge: Bridge<E>,
    ui: UiThread,
}

impl<E: KVStoreEngine> HomeBridge<E> {
    pub fn new<H: ScriptHost>(
        config: &Config,
        engine: E,
        session: Arc<dyn BrowsingSession>,
        renderer: Arc<dyn RenderContextFactory>,
        host: H,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let ui = UiThread::spawn(host)?;
        let favicons = FaviconResolver::new(&config.favicon, renderer, ui.handle(), runtime);
        let bridge = Bridge::new(
            config,
            LocalStorage::new(engine),
            HomeObject::new(session, favicons),
        );
        log::info!(
            "bridge ready, exposing {} and {}",
            config.storage_object,
            config.home_object
        );
        Ok(HomeBridge { bridge, ui })
    }

    pub fn bridge(&self) -> &Bridge<E> {
        &self.bridge
    }

    pub fn ui(&self) -> UiHandle {
        self.ui.handle()
    }

    /// Stop the UI thread once already-queued callbacks have run.
    pub fn shutdown(self) {
        self.ui.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_args_maps_null_and_checks_arity() {
        let [a, b] = string_args::<2>("setItem", &[json!("k"), Value::Null]).unwrap();
        assert_eq!(a.as_deref(), Some("k"));
        assert_eq!(b, None);
        assert!(string_args::<1>("getItem", &[]).is_err());
        assert!(string_args::<1>("getItem", &[json!(3)]).is_err());
        let [] = string_args::<0>("clear", &[]).unwrap();
    }
}
