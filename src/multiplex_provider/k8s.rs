//! Endpoint discovery from a Kubernetes service.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use kube::{
    Api, Client, Config,
    config::{KubeConfigOptions, Kubeconfig},
};

use super::{discovery::Discovery, errors::Error};

/// Discovers endpoint URLs from the addresses of a Kubernetes `Endpoints`
/// object, as `{scheme}://{ip}:{port}` for every subset address × port.
///
/// Two ways to reach the cluster:
/// 1. no kubeconfig path — configuration is inferred: the pod's service
///    account token in-cluster, the default kubeconfig outside;
/// 2. an explicit kubeconfig path via [`kubeconfig`](Self::kubeconfig).
#[derive(Debug, Clone)]
pub struct KubernetesEndpoints {
    namespace: String,
    service: String,
    scheme: String,
    kubeconfig: Option<PathBuf>,
}

impl KubernetesEndpoints {
    /// Discovery for the `Endpoints` of `service` in `namespace`, building
    /// URLs with `scheme` (`"http"`, `"ws"`, ...).
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            scheme: scheme.into(),
            kubeconfig: None,
        }
    }

    /// Use an explicit kubeconfig file instead of the inferred configuration.
    #[must_use]
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    async fn client(&self) -> Result<Client, Error> {
        let config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(discovery_err)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(discovery_err)?
            }
            None => Config::infer().await.map_err(discovery_err)?,
        };
        Client::try_from(config).map_err(discovery_err)
    }
}

#[async_trait]
impl Discovery for KubernetesEndpoints {
    async fn discover(&self) -> Result<Vec<String>, Error> {
        let client = self.client().await?;

        // Surface a bad apiserver address here rather than as a confusing
        // lookup failure.
        let version = client.apiserver_version().await.map_err(discovery_err)?;
        trace!(version = %version.git_version, "kubernetes api server reachable");

        let api: Api<Endpoints> = Api::namespaced(client, &self.namespace);
        let endpoints = api.get(&self.service).await.map_err(|err| {
            error!(
                namespace = %self.namespace,
                service = %self.service,
                error = %err,
                "failed to read service endpoints"
            );
            discovery_err(err)
        })?;

        let mut urls = Vec::new();
        for subset in endpoints.subsets.unwrap_or_default() {
            for address in subset.addresses.iter().flatten() {
                for port in subset.ports.iter().flatten() {
                    urls.push(format!("{}://{}:{}", self.scheme, address.ip, port.port));
                }
            }
        }

        info!(
            namespace = %self.namespace,
            service = %self.service,
            urls = ?urls,
            "endpoints from kubernetes"
        );
        Ok(urls)
    }
}

fn discovery_err(err: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Discovery(Arc::new(err))
}
