mod cache;
mod key;

pub use cache::{
    file_bytes_loader, AssetCache, AssetData, AssetHandle, AssetLoader, AssetStatus, CacheError,
    LoadError,
};
pub use key::{AssetKey, AssetKind, KeyParseError};
