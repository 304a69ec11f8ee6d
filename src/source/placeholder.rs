// Procedural stand-ins handed out when an asset cannot be produced.

use crate::engine::record::{AssetHandle, AssetKind};

use super::traits::PlaceholderProvider;

/// Raw handle values reserved for built-in primitives.
pub const PLACEHOLDER_MODEL_RAW: u64 = u64::MAX;
pub const PLACEHOLDER_TEXTURE_RAW: u64 = u64::MAX - 1;

pub const PLACEHOLDER_MODEL_URL: &str = "placeholder://model/box";
pub const PLACEHOLDER_TEXTURE_URL: &str = "placeholder://texture/checker";

/// A box for models and a checkerboard for textures, shared by every id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProceduralPlaceholders;

impl ProceduralPlaceholders {
    pub fn is_placeholder(handle: &AssetHandle) -> bool {
        handle.source().starts_with("placeholder://")
    }
}

impl PlaceholderProvider for ProceduralPlaceholders {
    fn placeholder(&self, _id: &str, kind: AssetKind) -> AssetHandle {
        match kind {
            AssetKind::Model => AssetHandle::new(PLACEHOLDER_MODEL_RAW, PLACEHOLDER_MODEL_URL),
            AssetKind::Texture => {
                AssetHandle::new(PLACEHOLDER_TEXTURE_RAW, PLACEHOLDER_TEXTURE_URL)
            }
        }
    }
}
