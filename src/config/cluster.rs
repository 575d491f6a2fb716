use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Cluster identity and bootstrap parameters
///
/// # Defaults
/// Field-level defaults use helper functions prefixed with `default_`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Name the members must report during the handshake
    ///
    /// Default: `dev`
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Seed member addresses (`host:port`)
    ///
    /// Default: `["127.0.0.1:5701"]`
    #[serde(default = "default_addresses")]
    pub addresses: Vec<String>,

    /// Open a connection to every known member instead of a single one
    ///
    /// Default: true
    #[serde(default = "default_smart_routing")]
    pub smart_routing: bool,

    /// Client instance name used in logs and the handshake
    ///
    /// Default: `client-<nanoid>`
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            addresses: default_addresses(),
            smart_routing: default_smart_routing(),
            client_name: default_client_name(),
        }
    }
}

impl ClusterConfig {
    /// Validates cluster configuration consistency
    /// # Errors
    /// Returns `Error::Configuration` if any configuration rules are violated
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(Error::Configuration("cluster_name cannot be empty".into()));
        }

        if self.addresses.is_empty() {
            return Err(Error::Configuration(
                "addresses must contain at least one member address".into(),
            ));
        }

        for address in &self.addresses {
            validate_address(address)?;
        }

        Ok(())
    }
}

/// accept `host:port` where host is an ip or a docker host name like node1
pub(crate) fn validate_address(address: &str) -> Result<()> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::Configuration(format!("address {address} is missing a port")))?;

    if host.is_empty() {
        return Err(Error::Configuration(format!(
            "address {address} is missing a host"
        )));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::Configuration(format!(
            "address {address} must specify a non-zero port"
        ))),
        Ok(_) => Ok(()),
    }
}

fn default_cluster_name() -> String {
    "dev".to_string()
}
fn default_addresses() -> Vec<String> {
    vec!["127.0.0.1:5701".to_string()]
}
fn default_smart_routing() -> bool {
    true
}
fn default_client_name() -> String {
    format!("client-{}", nanoid::nanoid!(8))
}
