//! Locating this host in the node list.

use std::io;
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result, TopologyError};
use crate::topology::{NodeSpec, Topology};

/// Name and address lookups used to find this host in the node list.
#[async_trait]
pub trait HostResolver
where
    Self: Send + Sync + 'static,
{
    /// Address of the local machine.
    async fn local_address(&self) -> io::Result<IpAddr>;

    /// Addresses `host` resolves to.
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// `HostResolver` backed by the system resolver.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHostResolver;

#[async_trait]
impl HostResolver for SystemHostResolver {
    async fn local_address(&self) -> io::Result<IpAddr> {
        let hostname = nix::unistd::gethostname()?;
        let hostname = hostname.to_string_lossy();

        let addresses = self.resolve(&hostname).await?;

        addresses
            .iter()
            .find(|address| !address.is_loopback())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{hostname} does not resolve to any address"),
                )
            })
    }

    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(vec![address]);
        }

        Ok(lookup_host((host, 0))
            .await?
            .map(|address| address.ip())
            .collect())
    }
}

/// Returns the node this host runs as.
///
/// Standalone servers are always `localhost`. In distributed mode the first explicit node
/// resolving to the local address wins.
///
/// # Errors
///
/// Returns an error if the local address cannot be determined, if no node matches it, or
/// if the node list uses range expressions.
pub async fn self_node<R>(config: &RuntimeConfig, resolver: &R) -> Result<NodeSpec>
where
    R: HostResolver,
{
    if !config.distributed().is_yes() {
        return Ok(NodeSpec::local(config.scheme()));
    }

    let nodes = match config.topology() {
        Topology::Explicit(nodes) => nodes,
        Topology::Range(_) => return Err(TopologyError::RangeNotSelfIdentifiable.into()),
    };

    let local = resolver
        .local_address()
        .await
        .map_err(|e| Error::Io("failed to determine local address", e))?;

    for node in nodes {
        match resolver.resolve(node.host()).await {
            Ok(addresses) if addresses.contains(&local) => return Ok(node.clone()),
            Ok(_) => {}
            Err(e) => debug!("failed to resolve {}: {e}", node.host()),
        }
    }

    Err(TopologyError::NodeNotFound(local).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    use crate::config::{ConfigInput, ConfigValidator};

    struct StaticResolver {
        hosts: HashMap<&'static str, IpAddr>,
        local: IpAddr,
    }

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn local_address(&self) -> io::Result<IpAddr> {
            Ok(self.local)
        }

        async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.hosts
                .get(host)
                .map(|address| vec![*address])
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, host.to_string()))
        }
    }

    fn resolver(local: u8) -> StaticResolver {
        StaticResolver {
            hosts: (1..=4)
                .map(|i| {
                    let host: &'static str = ["minio1", "minio2", "minio3", "minio4"][i - 1];
                    (host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, i as u8)))
                })
                .collect(),
            local: IpAddr::V4(Ipv4Addr::new(10, 0, 0, local)),
        }
    }

    fn config(distributed: &str, nodes: &str) -> RuntimeConfig {
        ConfigValidator::new()
            .with_privileged_ports(false)
            .validate(ConfigInput {
                distributed_mode: distributed.to_string(),
                distributed_nodes: Some(nodes.to_string()),
                root_password: Some("miniosecret".to_string()),
                root_user: Some("minio".to_string()),
                ..ConfigInput::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_standalone_is_localhost() {
        let node = self_node(&config("no", ""), &resolver(9)).await.unwrap();

        assert_eq!(node.host(), "localhost");
    }

    #[tokio::test]
    async fn test_finds_first_matching_node() {
        let config = config("yes", "minio1,minio2/data,unknown,minio3,minio4,minio5");

        let node = self_node(&config, &resolver(2)).await.unwrap();

        assert_eq!(node.host(), "minio2");
        assert_eq!(node.drive(), Some("/data"));
    }

    #[tokio::test]
    async fn test_missing_node_is_fatal() {
        let config = config("yes", "minio1,minio2,minio3,minio4");

        let result = self_node(&config, &resolver(9)).await;

        assert!(matches!(
            result,
            Err(Error::Topology(TopologyError::NodeNotFound(address)))
                if address == IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))
        ));
    }

    #[tokio::test]
    async fn test_range_is_not_self_identifiable() {
        let config = config("yes", "minio{1...4}");

        let result = self_node(&config, &resolver(1)).await;

        assert!(matches!(
            result,
            Err(Error::Topology(TopologyError::RangeNotSelfIdentifiable))
        ));
    }

    #[tokio::test]
    async fn test_system_resolver_passes_addresses_through() {
        let addresses = SystemHostResolver.resolve("[::1]").await.unwrap();

        assert_eq!(addresses, vec!["::1".parse::<IpAddr>().unwrap()]);
    }
}
