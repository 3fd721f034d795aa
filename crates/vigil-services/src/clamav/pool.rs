use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use vigil_core::constants::UNAVAILABLE_STATUS_KEY;
use vigil_core::{AntivirusConfig, PoolEndpoint};
use vigil_db::{StatusStore, StatusStoreExt};

use super::client::ClamAvClient;
use super::connection::ClamConnection;
use super::error::ClamAvError;
use super::resolver::{EndpointResolver, StaticResolver};

/// The set of daemons the scanner may talk to.
///
/// Endpoints are resolved afresh for every operation. The outcome of the last
/// availability check is persisted under `clamav-unavailable` so that other processes
/// (the admin dashboard, the live upload check) can read it without pinging.
#[derive(Clone)]
pub struct ClamAvServicesPool {
    resolver: Arc<dyn EndpointResolver>,
    status: Arc<dyn StatusStore>,
    client: ClamAvClient,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ClamAvServicesPool {
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        status: Arc<dyn StatusStore>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            status,
            client: ClamAvClient::default(),
            connect_timeout,
            io_timeout,
        }
    }

    /// SRV discovery when a record is configured, the static host list otherwise.
    pub fn from_config(
        config: &AntivirusConfig,
        status: Arc<dyn StatusStore>,
    ) -> Result<Self, ClamAvError> {
        let resolver: Arc<dyn EndpointResolver> = match &config.srv_record {
            #[cfg(feature = "srv-discovery")]
            Some(record) => Arc::new(super::resolver::SrvResolver::new(record.clone())?),
            #[cfg(not(feature = "srv-discovery"))]
            Some(_) => {
                return Err(ClamAvError::Resolve(
                    "SRV discovery not available (srv-discovery feature not enabled)".to_string(),
                ))
            }
            None => Arc::new(StaticResolver::from_config(config)),
        };

        Ok(Self::new(
            resolver,
            status,
            config.connect_timeout(),
            config.read_timeout(),
        ))
    }

    pub fn with_client(mut self, client: ClamAvClient) -> Self {
        self.client = client;
        self
    }

    pub fn client(&self) -> &ClamAvClient {
        &self.client
    }

    /// Current endpoints. A resolution failure yields an empty list.
    pub async fn resolve_endpoints(&self) -> Vec<PoolEndpoint> {
        match self.resolver.resolve().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to resolve antivirus endpoints");
                Vec::new()
            }
        }
    }

    pub async fn connect(&self, endpoint: &PoolEndpoint) -> Result<ClamConnection, ClamAvError> {
        ClamConnection::connect(endpoint, self.connect_timeout, self.io_timeout).await
    }

    /// One fresh session per endpoint, `None` where the endpoint could not be reached.
    pub async fn all_connections(&self) -> Vec<Option<ClamConnection>> {
        let endpoints = self.resolve_endpoints().await;
        join_all(endpoints.iter().map(|endpoint| async move {
            match self.connect(endpoint).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "Antivirus endpoint unreachable");
                    None
                }
            }
        }))
        .await
    }

    /// Pings every endpoint and records the result in the status store.
    ///
    /// All endpoints are pinged even after one answers so each session closes its socket.
    #[tracing::instrument(skip(self))]
    pub async fn any_online(&self) -> bool {
        let connections = self.all_connections().await;
        let results = join_all(
            connections
                .into_iter()
                .flatten()
                .map(|conn| self.client.ping(conn)),
        )
        .await;
        let online = results.into_iter().any(|alive| alive);

        if let Err(e) = self
            .status
            .set_typed(UNAVAILABLE_STATUS_KEY, &!online)
            .await
        {
            tracing::warn!(error = %e, "Failed to persist antivirus availability");
        }
        if !online {
            tracing::warn!("No antivirus daemon answered PING");
        }
        online
    }

    pub async fn all_offline(&self) -> bool {
        !self.any_online().await
    }

    /// A fresh session on the first endpoint (in resolution order) that answers PING.
    pub async fn find_online(&self) -> Option<ClamConnection> {
        for endpoint in self.resolve_endpoints().await {
            let ping_conn = match self.connect(&endpoint).await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            if !self.client.ping(ping_conn).await {
                continue;
            }
            match self.connect(&endpoint).await {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "Antivirus endpoint went away after PING");
                }
            }
        }
        None
    }

    /// Last persisted availability. Unknown counts as available.
    pub async fn is_unavailable(&self) -> bool {
        match self.status.get_typed::<bool>(UNAVAILABLE_STATUS_KEY).await {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read antivirus availability");
                false
            }
        }
    }
}
