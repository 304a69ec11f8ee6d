// Asset lifecycle: registry, ref-counted cache and the progressive loader.

pub mod cache;
pub mod events;
pub mod loader;
pub mod lod;
pub mod manager;
pub mod preload;
pub mod record;
pub mod registry;
pub mod stats;
