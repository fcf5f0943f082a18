// src/source.rs
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{Origin, OwnerIdentity, OwnerKind, ResolverError, SourceStore, StoreError};

/// The channel a mutation is attributed to, unique by slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub slug: String,
    pub host_ip: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSource {
    pub slug: String,
    pub host_ip: String,
}

impl Source {
    pub fn from_new(new: NewSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            slug: new.slug,
            host_ip: new.host_ip,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Get-or-create of sources by slug.
///
/// Resolution runs outside any owner lane, so two first-time callers can both
/// miss and both insert. The store's unique constraint rejects the loser with
/// [`StoreError::Conflict`], which is answered by re-reading the winner's row.
pub struct SourceResolver {
    store: Arc<dyn SourceStore>,
    cache: RwLock<HashMap<&'static str, Source>>,
}

impl SourceResolver {
    pub fn new(store: Arc<dyn SourceStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve_or_create(
        &self,
        identity: &OwnerIdentity,
        origin: &Origin,
    ) -> Result<Source, ResolverError> {
        self.resolve_kind(identity.classify()?.kind, origin).await
    }

    /// Same as [`resolve_or_create`](Self::resolve_or_create) for an owner
    /// that has already been classified.
    pub async fn resolve_kind(
        &self,
        kind: OwnerKind,
        origin: &Origin,
    ) -> Result<Source, ResolverError> {
        let slug = kind.slug();

        if let Some(source) = self.cache.read().get(slug) {
            counter!("cashback.sources.resolved.total", "outcome" => "cached").increment(1);
            return Ok(source.clone());
        }

        let source = self.lookup_or_insert(slug, origin).await?;
        self.cache.write().insert(slug, source.clone());
        Ok(source)
    }

    async fn lookup_or_insert(&self, slug: &str, origin: &Origin) -> Result<Source, ResolverError> {
        if let Some(source) = self.store.get_source_by_slug(slug).await? {
            counter!("cashback.sources.resolved.total", "outcome" => "found").increment(1);
            return Ok(source);
        }

        let new = NewSource {
            slug: slug.to_string(),
            host_ip: origin.host_ip.clone(),
        };

        match self.store.create_source(new).await {
            Ok(source) => {
                counter!("cashback.sources.resolved.total", "outcome" => "created").increment(1);
                info!(slug, source_id = %source.id, "created source");
                Ok(source)
            }
            Err(StoreError::Conflict(reason)) => {
                counter!("cashback.sources.resolved.total", "outcome" => "conflict").increment(1);
                debug!(slug, %reason, "source created concurrently, re-reading");
                self.store
                    .get_source_by_slug(slug)
                    .await?
                    .ok_or_else(|| {
                        ResolverError::Store(StoreError::Backend(format!(
                            "source {slug} missing after conflict"
                        )))
                    })
            }
            Err(err) => Err(err.into()),
        }
    }
}
