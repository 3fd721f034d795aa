use async_trait::async_trait;
use vigil_core::{AntivirusConfig, PoolEndpoint};

use super::error::ClamAvError;

/// Source of daemon addresses. Consulted on every availability check so that DNS
/// changes are picked up without a restart.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self) -> Result<Vec<PoolEndpoint>, ClamAvError>;
}

/// Fixed list of `host:port` endpoints.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    endpoints: Vec<PoolEndpoint>,
}

impl StaticResolver {
    pub fn new(endpoints: Vec<PoolEndpoint>) -> Self {
        Self { endpoints }
    }

    /// Every configured host on the configured port.
    pub fn from_config(config: &AntivirusConfig) -> Self {
        Self::new(
            config
                .clamav_hosts
                .iter()
                .map(|host| PoolEndpoint::new(host.clone(), config.clamav_port))
                .collect(),
        )
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self) -> Result<Vec<PoolEndpoint>, ClamAvError> {
        Ok(self.endpoints.clone())
    }
}

#[cfg(feature = "srv-discovery")]
pub use srv::SrvResolver;

#[cfg(feature = "srv-discovery")]
mod srv {
    use super::*;
    use hickory_resolver::TokioAsyncResolver;

    /// Looks daemons up through a DNS SRV record.
    pub struct SrvResolver {
        record: String,
        resolver: TokioAsyncResolver,
    }

    impl SrvResolver {
        pub fn new(record: impl Into<String>) -> Result<Self, ClamAvError> {
            let resolver = TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| ClamAvError::Resolve(e.to_string()))?;
            Ok(Self {
                record: record.into(),
                resolver,
            })
        }
    }

    #[async_trait]
    impl EndpointResolver for SrvResolver {
        /// Targets ordered by priority, then by descending weight.
        #[tracing::instrument(skip(self), fields(srv.record = %self.record))]
        async fn resolve(&self) -> Result<Vec<PoolEndpoint>, ClamAvError> {
            let lookup = self
                .resolver
                .srv_lookup(self.record.as_str())
                .await
                .map_err(|e| ClamAvError::Resolve(e.to_string()))?;

            let mut records: Vec<_> = lookup
                .iter()
                .map(|srv| {
                    let target = srv.target().to_utf8();
                    (
                        srv.priority(),
                        srv.weight(),
                        PoolEndpoint::new(target.trim_end_matches('.'), srv.port()),
                    )
                })
                .collect();
            records.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

            Ok(records.into_iter().map(|(_, _, endpoint)| endpoint).collect())
        }
    }
}
