pub mod cache;
pub mod config;
pub mod error;
pub mod html;
pub mod index;
pub mod lemmatizer;
pub mod persist;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::TtlLruCache;
pub use config::{AppConfig, CacheConfig, SiteConfig};
pub use error::{EngineError, Result};
pub use index::*;
pub use lemmatizer::{Language, Lemmatizer, StemmingLemmatizer};
pub use persist::{SledStore, Storage};
