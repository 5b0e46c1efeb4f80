//! Shared application state

use cosri_upstream::{
    header::AUTHORIZATION, DrugClassClient, HeaderAllowList, UpstreamClient, UpstreamClientConfig,
};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::services::aggregator::{BundleAggregator, Dialect, UpstreamSource};
use crate::services::audit::{AuditSink, TracingAuditSink};
use crate::services::drug_class::{
    DrugClassAnnotator, DrugClassCache, DrugClassCacheConfig, DrugClassMap, DrugClassSource,
    RxNavSource,
};
use crate::services::router::FhirRouter;
use crate::session::{MemorySessionStore, RedisSessionStore, SessionStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub router: Arc<FhirRouter>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    /// Build the production state: Redis sessions when configured, RxNav lookups,
    /// audit events on the `audit` tracing target.
    pub async fn new(config: Config) -> Result<Self> {
        let sessions: Arc<dyn SessionStore> = match &config.session.redis_url {
            Some(url) => Arc::new(
                RedisSessionStore::connect(
                    url,
                    &config.session.key_prefix,
                    config.session.ttl_seconds,
                )
                .await?,
            ),
            None => {
                tracing::warn!("No session.redis_url configured; using in-process session store");
                Arc::new(MemorySessionStore::new())
            }
        };
        let audit: Arc<dyn AuditSink> =
            Arc::new(TracingAuditSink::new(config.logging.service_name.clone()));

        Self::with_components(config, sessions, audit, None)
    }

    /// Assemble the state around explicit collaborators.
    ///
    /// `drug_classes` replaces the RxNav-backed lookup when given.
    pub fn with_components(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        drug_classes: Option<Arc<dyn DrugClassSource>>,
    ) -> Result<Self> {
        let upstream = UpstreamClient::new(UpstreamClientConfig {
            timeout: config.upstream.timeout(),
            max_retries: config.upstream.max_retries,
            retry_backoff: config.upstream.retry_backoff(),
        })
        .map_err(|e| Error::Config(format!("failed to build upstream client: {e}")))?;

        let forward = HeaderAllowList::new(&config.upstream.forwarded_headers)?;
        let sources = upstream_sources(&config, &forward)?;

        let annotator = if config.drug_class.enabled {
            let source = drug_classes.unwrap_or_else(|| {
                Arc::new(RxNavSource::new(
                    DrugClassClient::new(
                        upstream.clone(),
                        config.upstream.drug_reference_base_url.clone(),
                    ),
                    config.drug_class.rela_source.clone(),
                ))
            });
            let cache = DrugClassCache::new(
                source,
                DrugClassCacheConfig {
                    ttl: config.drug_class.cache_ttl(),
                    capacity: config.drug_class.cache_capacity,
                    slow_lookup_threshold: config.drug_class.slow_lookup_threshold(),
                },
            );
            let map = DrugClassMap::from_config(config.drug_class.map_path.as_deref())?;
            Some(Arc::new(DrugClassAnnotator::new(
                Arc::new(cache),
                Arc::new(map),
                audit.clone(),
            )))
        } else {
            tracing::info!("Drug class annotation disabled");
            None
        };

        let aggregator = Arc::new(BundleAggregator::new(
            upstream.clone(),
            sources,
            annotator,
            audit.clone(),
            config.upstream.default_dea.clone(),
        ));

        tracing::info!(
            sources = ?aggregator
                .sources()
                .iter()
                .map(|source| source.dialect.name())
                .collect::<Vec<_>>(),
            "Aggregation sources configured"
        );

        let router = Arc::new(FhirRouter::new(upstream, aggregator, forward));

        Ok(Self {
            config: Arc::new(config),
            sessions,
            router,
            audit,
        })
    }
}

/// Sources in merge priority order: EMR, then PDMP, then PHR.
///
/// Third-party sources never receive the inbound `Authorization` header; it
/// belongs to the issuer.
fn upstream_sources(config: &Config, forward: &HeaderAllowList) -> Result<Vec<UpstreamSource>> {
    let third_party = HeaderAllowList::new(
        forward
            .names()
            .iter()
            .filter(|name| **name != AUTHORIZATION)
            .map(|name| name.as_str()),
    )?;

    let mut sources = vec![UpstreamSource::emr(forward.clone())];
    if let Some(base_url) = &config.upstream.pdmp_base_url {
        sources.push(UpstreamSource {
            dialect: Dialect::Pdmp,
            base_url: Some(base_url.clone()),
            required: config.upstream.pdmp_required,
            headers: third_party.clone(),
        });
    }
    if let Some(base_url) = &config.upstream.phr_base_url {
        sources.push(UpstreamSource {
            dialect: Dialect::Phr,
            base_url: Some(base_url.clone()),
            required: config.upstream.phr_required,
            headers: third_party,
        });
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_follow_priority_and_header_policy() {
        let mut config = Config::default();
        config.upstream.pdmp_base_url = Some("https://pdmp.example/fhir".into());
        config.upstream.phr_base_url = Some("https://phr.example/fhir".into());
        let forward = HeaderAllowList::new(&config.upstream.forwarded_headers).unwrap();

        let sources = upstream_sources(&config, &forward).unwrap();
        let dialects: Vec<Dialect> = sources.iter().map(|source| source.dialect).collect();
        assert_eq!(dialects, vec![Dialect::Emr, Dialect::Pdmp, Dialect::Phr]);
        assert!(sources[0].headers.allows(&AUTHORIZATION));
        assert!(!sources[1].headers.allows(&AUTHORIZATION));
        assert!(sources[1].required);
        assert!(!sources[2].required);
    }

    #[test]
    fn emr_only_without_third_party_urls() {
        let config = Config::default();
        let forward = HeaderAllowList::default();
        let sources = upstream_sources(&config, &forward).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].base_url.is_none());
    }
}
