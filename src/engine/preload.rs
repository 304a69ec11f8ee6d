use std::collections::BTreeMap;

use tracing::debug;

use super::record::{AssetSource, GenerationSpec, LoadRequest};
use crate::config::EntityAssetSource;

/// What to do with each configured entity at startup.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PreloadPlan {
    /// Requests to enqueue, highest priority first.
    pub requests: Vec<LoadRequest>,
    /// Entities rendered with a built-in primitive.
    pub procedural: Vec<String>,
    /// Generated entities skipped because generation is disabled; they get
    /// placeholders.
    pub skipped: Vec<String>,
}

/// Build the startup load requests from per-entity source selection.
///
/// The entity name is used as the asset id.
pub fn plan(
    entities: &BTreeMap<String, EntityAssetSource>,
    generation_enabled: bool,
) -> PreloadPlan {
    let mut out = PreloadPlan::default();

    for (name, source) in entities {
        match source {
            EntityAssetSource::Local {
                path,
                kind,
                priority,
            } => out.requests.push(LoadRequest {
                id: name.clone(),
                priority: *priority,
                kind: *kind,
                source: AssetSource::Url(path.clone()),
            }),
            EntityAssetSource::Generated {
                prompt,
                kind,
                priority,
            } => {
                if generation_enabled {
                    out.requests.push(LoadRequest {
                        id: name.clone(),
                        priority: *priority,
                        kind: *kind,
                        source: AssetSource::Generation(GenerationSpec::model(prompt.clone())),
                    });
                } else {
                    out.skipped.push(name.clone());
                }
            }
            EntityAssetSource::Procedural => out.procedural.push(name.clone()),
        }
    }

    // Stable: equal priorities keep entity-name order.
    out.requests.sort_by(|a, b| b.priority.cmp(&a.priority));
    debug!(
        "preload plan: {} requests, {} procedural, {} skipped",
        out.requests.len(),
        out.procedural.len(),
        out.skipped.len()
    );
    out
}
