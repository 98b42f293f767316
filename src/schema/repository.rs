//! Process-wide schema repository.
//!
//! Caches parsed schema sources by identifier and fetches them lazily from an
//! ordered list of providers. The cache is append-only: entries are never
//! evicted, so once an identifier resolves it keeps resolving to the same
//! parsed content for the life of the repository.
//!
//! Concurrent resolutions of the same identifier share one in-flight fetch
//! (moka's `try_get_with` coalesces initializers per key). A failed fetch is not
//! cached; the next caller triggers a fresh attempt.

use std::sync::Arc;

use moka::future::Cache;
use tracing::{debug, warn};

use super::{ParsedSchemaSource, SchemaContext, SchemaError, SchemaSourceProvider, SourceIdentifier};
use crate::topology::metrics;

/// Shared schema repository, one per process.
pub struct SchemaRepository {
    name: String,
    providers: Arc<[Arc<dyn SchemaSourceProvider>]>,
    cache: Cache<SourceIdentifier, Arc<ParsedSchemaSource>>,
}

impl std::fmt::Debug for SchemaRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRepository")
            .field("name", &self.name)
            .field("providers", &self.providers.len())
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

impl SchemaRepository {
    /// Create a repository backed by a single provider.
    pub fn new(name: impl Into<String>, provider: Arc<dyn SchemaSourceProvider>) -> Self {
        Self::with_providers(name, vec![provider])
    }

    /// Create a repository that consults `providers` in order.
    ///
    /// A provider answering "not found" (or failing) hands over to the next one.
    pub fn with_providers(
        name: impl Into<String>,
        providers: Vec<Arc<dyn SchemaSourceProvider>>,
    ) -> Self {
        let name = name.into();
        let cache = Cache::builder().name(&name).build();
        Self {
            name,
            providers: providers.into(),
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a single source, fetching it on a cache miss.
    pub async fn resolve(
        &self,
        identifier: &SourceIdentifier,
    ) -> Result<Arc<ParsedSchemaSource>, SchemaError> {
        if let Some(cached) = self.cache.get(identifier).await {
            metrics::record_schema_lookup("hit");
            return Ok(cached);
        }
        metrics::record_schema_lookup("miss");

        let providers = Arc::clone(&self.providers);
        let key = identifier.clone();
        self.cache
            .try_get_with(identifier.clone(), async move {
                fetch_and_parse(&providers, &key).await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Resolve every identifier and assemble them into one schema context.
    ///
    /// Fails on the first source that cannot be resolved.
    pub async fn resolve_context(
        &self,
        identifiers: &[SourceIdentifier],
    ) -> Result<SchemaContext, SchemaError> {
        let mut modules = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            modules.push(self.resolve(identifier).await?);
        }
        Ok(SchemaContext::new(modules))
    }

    /// Whether the identifier has been resolved and cached.
    pub fn contains(&self, identifier: &SourceIdentifier) -> bool {
        self.cache.contains_key(identifier)
    }

    /// Number of cached sources.
    pub async fn cached_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

async fn fetch_and_parse(
    providers: &[Arc<dyn SchemaSourceProvider>],
    identifier: &SourceIdentifier,
) -> Result<ParsedSchemaSource, SchemaError> {
    let mut provider_failure = None;

    for (index, provider) in providers.iter().enumerate() {
        match provider.get_source(identifier).await {
            Ok(source) => {
                metrics::record_schema_fetch("success");
                debug!(source = %identifier, provider = index, "Fetched schema source");
                return ParsedSchemaSource::parse(&source);
            }
            Err(SchemaError::SourceNotFound(_)) => {
                debug!(source = %identifier, provider = index, "Provider does not have source");
            }
            Err(e) if e.is_recoverable() => {
                warn!(source = %identifier, provider = index, error = %e, "Schema provider failed, trying next");
                provider_failure.get_or_insert(e);
            }
            Err(e) => {
                metrics::record_schema_fetch("error");
                return Err(e);
            }
        }
    }

    metrics::record_schema_fetch("not_found");
    Err(provider_failure.unwrap_or_else(|| SchemaError::SourceNotFound(identifier.clone())))
}
