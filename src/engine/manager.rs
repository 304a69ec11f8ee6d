// Asset manager: wires configuration, loader and generation client into one instance.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::loader::{ProgressiveLoader, Resolution};
use super::lod::{variant_id, LodLevel, LodPolicy};
use super::preload::{self, PreloadPlan};
use super::record::{AssetKind, GenerationSpec, LoadRequest};
use crate::config::{AssetConfig, EntityAssetSource};
use crate::error::AssetError;
use crate::source::generation::GenerationClient;
use crate::source::http_loader::HttpAssetLoader;
use crate::source::traits::{AssetLoader, GenerationService, HandleDisposer, PlaceholderProvider};

/// Loader collaborators supplied by the host.
pub struct Collaborators {
    pub loader: Arc<dyn AssetLoader>,
    pub disposer: Arc<dyn HandleDisposer>,
    pub generation: Option<Arc<dyn GenerationService>>,
    pub placeholders: Option<Arc<dyn PlaceholderProvider>>,
}

pub struct AssetManager {
    config: AssetConfig,
    loader: ProgressiveLoader,
    generation_client: Option<Arc<GenerationClient>>,
    /// Set when built by [`AssetManager::start`]; holds the loaded bytes.
    http_loader: Option<Arc<HttpAssetLoader>>,
    lod: LodPolicy,
}

impl AssetManager {
    /// Build from configuration with the default HTTP loader and generation
    /// client, connecting to the service when `mcp.connect_on_start` is set.
    ///
    /// A failed startup connection is logged, not fatal: the client keeps
    /// reconnecting in the background.
    pub async fn start(config: AssetConfig) -> Result<Self> {
        config.validate().context("invalid asset config")?;

        let http_loader = Arc::new(HttpAssetLoader::new(
            config.asset_root.clone(),
            config.loader.request_timeout(),
        )?);

        let generation_client = if config.generation_enabled() {
            Some(Arc::new(GenerationClient::from_config(&config)?))
        } else {
            None
        };

        if let (Some(client), true) = (&generation_client, config.mcp.connect_on_start) {
            if let Err(e) = client.connect().await {
                warn!("generation service not reachable at startup: {}", e);
            }
        }

        let collaborators = Collaborators {
            loader: http_loader.clone(),
            disposer: http_loader.clone(),
            generation: generation_client
                .clone()
                .map(|c| c as Arc<dyn GenerationService>),
            placeholders: None,
        };
        let mut manager = Self::with_collaborators(config, collaborators)?;
        manager.generation_client = generation_client;
        manager.http_loader = Some(http_loader);
        Ok(manager)
    }

    /// Build around host-provided collaborators.
    pub fn with_collaborators(config: AssetConfig, parts: Collaborators) -> Result<Self> {
        config.validate().context("invalid asset config")?;

        let mut builder =
            ProgressiveLoader::builder(config.loader.clone(), parts.loader, parts.disposer);
        if let Some(service) = parts.generation.filter(|_| config.generation_enabled()) {
            builder = builder.generation(service);
        }
        if let Some(placeholders) = parts.placeholders {
            builder = builder.placeholders(placeholders);
        }

        info!(
            "asset manager ready: max_concurrency={} generation={}",
            config.loader.max_concurrency,
            config.generation_enabled()
        );
        Ok(Self {
            lod: LodPolicy::new(&config.lod, &config.export),
            loader: builder.build(),
            generation_client: None,
            http_loader: None,
            config,
        })
    }

    pub fn loader(&self) -> &ProgressiveLoader {
        &self.loader
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    pub fn lod(&self) -> &LodPolicy {
        &self.lod
    }

    pub fn generation_client(&self) -> Option<&Arc<GenerationClient>> {
        self.generation_client.as_ref()
    }

    /// Resource table of the default loader, for reading loaded bytes.
    pub fn resources(&self) -> Option<&Arc<HttpAssetLoader>> {
        self.http_loader.as_ref()
    }

    pub fn preload_plan(&self) -> PreloadPlan {
        preload::plan(&self.config.entities, self.config.generation_enabled())
    }

    /// Enqueue every configured entity asset and wait for all of them.
    /// Failures and skipped generations resolve to placeholders.
    pub async fn preload(&self) -> Vec<Resolution> {
        let plan = self.preload_plan();
        // Enqueue everything first so the loader sees the whole batch.
        let pending: Vec<_> = plan
            .requests
            .into_iter()
            .map(|r| self.loader.enqueue_or_placeholder(r))
            .collect();

        let mut resolved = Vec::with_capacity(pending.len() + plan.skipped.len());
        for fut in pending {
            resolved.push(fut.await);
        }
        for name in &plan.skipped {
            let kind = match self.config.entities.get(name) {
                Some(EntityAssetSource::Generated { kind, .. }) => *kind,
                _ => AssetKind::Model,
            };
            let error = AssetError::generation(name, "generation disabled");
            resolved.push(self.loader.fall_back(name.clone(), kind, error));
        }
        let fallbacks = resolved.iter().filter(|r| r.is_placeholder()).count();
        info!(
            "preload finished: {} assets, {} placeholders, {} procedural, {} skipped",
            resolved.len(),
            fallbacks,
            plan.procedural.len(),
            plan.skipped.len()
        );
        resolved
    }

    /// Load request for a configured entity, if it needs one.
    pub fn entity_request(&self, name: &str) -> Option<LoadRequest> {
        match self.config.entities.get(name)? {
            EntityAssetSource::Local {
                path,
                kind,
                priority,
            } => Some(LoadRequest::url(name, *kind, path.clone()).with_priority(*priority)),
            EntityAssetSource::Generated {
                prompt,
                kind,
                priority,
            } if self.config.generation_enabled() => Some(
                LoadRequest::generation(name, *kind, GenerationSpec::model(prompt.clone()))
                    .with_priority(*priority),
            ),
            _ => None,
        }
    }

    /// Texture download request using the configured defaults.
    pub fn texture_request(&self, id: &str, category: &str) -> LoadRequest {
        let textures = &self.config.textures;
        let spec = GenerationSpec::texture(
            category,
            &textures.default_resolution,
            &textures.default_format,
        );
        LoadRequest::generation(id, AssetKind::Texture, spec)
    }

    /// Request for the LOD variant of `base` suited to `distance`.
    ///
    /// `url_for` maps a level to its file; the caller releases the previous
    /// variant when it switches.
    pub fn lod_request(
        &self,
        base: &str,
        kind: AssetKind,
        distance: f32,
        url_for: impl Fn(LodLevel) -> String,
    ) -> LoadRequest {
        let level = self.lod.select(distance);
        LoadRequest::url(variant_id(base, level), kind, url_for(level))
    }

    pub fn shutdown(&self) {
        self.loader.shutdown();
        if let Some(client) = &self.generation_client {
            client.shutdown();
        }
    }
}
