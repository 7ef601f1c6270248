use crate::config::{Config, EngineKind};
use crate::Result;
use std::path::Path;

/// Storage behind the script-visible `LocalStorage` object.
///
/// Handles are cheap to clone and every clone points at the same store, so
/// an engine can be shared between the bridge and any other thread.
pub trait KVStoreEngine: Clone + Send + 'static {
    /// set key, value
    ///
    /// if key exists, overwrite the value. The write is committed before
    /// returning.
    fn set(&self, key: String, value: String) -> Result<()>;

    /// get value by key
    ///
    /// return None if the key does not exists
    fn get(&self, key: String) -> Result<Option<String>>;

    /// remove key
    ///
    /// removing a key that does not exist is a no-op
    fn remove(&self, key: String) -> Result<()>;

    /// remove every key
    fn clear(&self) -> Result<()>;
}

mod kvs;
mod sled;

pub use self::kvs::KVStore;
pub use self::sled::SledKVStore;

/// Engine picked at runtime from configuration.
#[derive(Clone)]
pub enum AnyEngine {
    Kvs(KVStore),
    Sled(SledKVStore),
}

impl AnyEngine {
    pub fn open(kind: EngineKind, path: &Path) -> Result<Self> {
        log::info!("opening {:?} store at {}", kind, path.display());
        Ok(match kind {
            EngineKind::Kvs => AnyEngine::Kvs(KVStore::open(path)?),
            EngineKind::Sled => AnyEngine::Sled(SledKVStore::open(::sled::open(path)?)),
        })
    }
}

/// Open the engine named by `config` at its `db_path`.
pub fn open_engine(config: &Config) -> Result<AnyEngine> {
    AnyEngine::open(config.engine, &config.db_path)
}

impl KVStoreEngine for AnyEngine {
    fn set(&self, key: String, value: String) -> Result<()> {
        match self {
            AnyEngine::Kvs(engine) => engine.set(key, value),
            AnyEngine::Sled(engine) => engine.set(key, value),
        }
    }

    fn get(&self, key: String) -> Result<Option<String>> {
        match self {
            AnyEngine::Kvs(engine) => engine.get(key),
            AnyEngine::Sled(engine) => engine.get(key),
        }
    }

    fn remove(&self, key: String) -> Result<()> {
        match self {
            AnyEngine::Kvs(engine) => engine.remove(key),
            AnyEngine::Sled(engine) => engine.remove(key),
        }
    }

    fn clear(&self) -> Result<()> {
        match self {
            AnyEngine::Kvs(engine) => engine.clear(),
            AnyEngine::Sled(engine) => engine.clear(),
        }
    }
}
