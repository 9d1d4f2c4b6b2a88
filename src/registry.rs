//! Model registry.
//!
//! A capability-indexed catalogue of the models the engine can route to,
//! each paired with the provider that serves it. The registry is the only
//! long-lived mutable structure shared across requests, so all state sits
//! behind one reader-writer lock. Locks are never held across an `.await`:
//! health probes clone the provider out, ping it, then write the result
//! back.
//!
//! # Defaults
//!
//! The first model registered with a capability becomes that capability's
//! default. [`ModelRegistry::set_default`] overrides it. No default state
//! exists outside the registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use answer_engine_core::models::Mode;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::llm::LlmProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Vision,
    Embeddings,
    Voice,
}

impl Capability {
    pub fn parse(s: &str) -> Option<Capability> {
        match s {
            "text" => Some(Capability::Text),
            "vision" => Some(Capability::Vision),
            "embeddings" => Some(Capability::Embeddings),
            "voice" => Some(Capability::Voice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Fast,
    #[default]
    Balanced,
    Thorough,
}

impl Speed {
    pub fn parse(s: &str) -> Speed {
        match s {
            "fast" => Speed::Fast,
            "thorough" => Speed::Thorough,
            _ => Speed::Balanced,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: Vec<Capability>,
    pub context_size: u32,
    pub speed: Speed,
    pub available: bool,
    /// Set on listing when this model is the default for any capability.
    #[serde(default)]
    pub is_default: bool,
}

impl ModelInfo {
    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

struct Entry {
    info: ModelInfo,
    provider: Arc<dyn LlmProvider>,
}

#[derive(Default)]
struct Inner {
    models: BTreeMap<String, Entry>,
    defaults: HashMap<Capability, String>,
}

/// A selected model and the provider that serves it.
#[derive(Clone)]
pub struct Selection {
    pub info: ModelInfo,
    pub provider: Arc<dyn LlmProvider>,
}

#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<Inner>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register (or replace) a model.
    pub fn register_model(&self, info: ModelInfo, provider: Arc<dyn LlmProvider>) {
        let mut inner = self.write();
        for cap in &info.capabilities {
            inner.defaults.entry(*cap).or_insert_with(|| info.id.clone());
        }
        tracing::debug!(model = %info.id, provider = %info.provider, "registered model");
        inner.models.insert(info.id.clone(), Entry { info, provider });
    }

    /// Make `id` the default for `cap`. The model must be registered and
    /// declare the capability.
    pub fn set_default(&self, cap: Capability, id: &str) -> EngineResult<()> {
        let mut inner = self.write();
        match inner.models.get(id) {
            Some(e) if e.info.has(cap) => {
                inner.defaults.insert(cap, id.to_string());
                Ok(())
            }
            Some(_) => Err(EngineError::InvalidRequest(format!(
                "model {} does not support {:?}",
                id, cap
            ))),
            None => Err(EngineError::UnknownModel(id.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read().models.is_empty()
    }

    /// Pick a model for a request.
    ///
    /// An explicit id wins if registered. Otherwise the default vision
    /// model (for queries with images) or default text model is used while
    /// available, then any available model in id order.
    pub fn select_model(
        &self,
        explicit_id: Option<&str>,
        mode: Mode,
        has_images: bool,
    ) -> EngineResult<Selection> {
        let inner = self.read();
        let pick = |id: &str| {
            inner.models.get(id).map(|e| Selection {
                info: e.info.clone(),
                provider: e.provider.clone(),
            })
        };

        if let Some(id) = explicit_id.filter(|s| !s.is_empty()) {
            if let Some(sel) = pick(id) {
                return Ok(sel);
            }
            tracing::debug!(model = id, "explicit model not registered, falling back");
        }

        let cap = if has_images {
            Capability::Vision
        } else {
            Capability::Text
        };
        if let Some(id) = inner.defaults.get(&cap) {
            if let Some(sel) = pick(id).filter(|s| s.info.available) {
                return Ok(sel);
            }
        }

        inner
            .models
            .values()
            .find(|e| e.info.available)
            .map(|e| Selection {
                info: e.info.clone(),
                provider: e.provider.clone(),
            })
            .ok_or_else(|| {
                tracing::debug!(%mode, "no model available");
                EngineError::NoModelAvailable
            })
    }

    /// All models, sorted by id.
    pub fn list_models(&self) -> Vec<ModelInfo> {
        let inner = self.read();
        inner
            .models
            .values()
            .map(|e| {
                let mut info = e.info.clone();
                info.is_default = inner.defaults.values().any(|d| d == &info.id);
                info
            })
            .collect()
    }

    pub fn update_availability(&self, id: &str, available: bool) -> EngineResult<()> {
        let mut inner = self.write();
        let entry = inner
            .models
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownModel(id.to_string()))?;
        entry.info.available = available;
        Ok(())
    }

    /// Ping the model's provider and record the outcome.
    pub async fn check_health(&self, id: &str) -> EngineResult<bool> {
        let provider = self
            .read()
            .models
            .get(id)
            .map(|e| e.provider.clone())
            .ok_or_else(|| EngineError::UnknownModel(id.to_string()))?;

        let healthy = match provider.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(model = id, error = %e, "health check failed");
                false
            }
        };
        self.update_availability(id, healthy)?;
        Ok(healthy)
    }

    /// Probe every registered model.
    pub async fn check_all(&self) -> Vec<(String, bool)> {
        let ids: Vec<String> = self.read().models.keys().cloned().collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let ok = self.check_health(&id).await.unwrap_or(false);
            out.push((id, ok));
        }
        out
    }
}
