//! Controller configuration, read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ControllerError;

/// Runtime configuration of the cluster controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base domain for synthesized API server DNS names
    pub external_url: String,
    /// Passes running at the same time
    pub worker_count: usize,
    /// Fleet-wide limit of clusters converging at the same time
    pub concurrent_cluster_updates: usize,
    /// Address used for Tunneling exposure
    pub tunneling_agent_ip: String,
    /// Replaces the datacenter name in synthesized DNS names
    pub seed_dns_overwrite: Option<String>,
    /// Image registry override for the standard catalog
    pub overwrite_registry: Option<String>,
    pub etcd_replicas: i32,
    pub enable_vpa: bool,
    pub enable_etcd_backups: bool,
    pub metrics_addr: SocketAddr,
    /// Requeue delay after a fully converged pass
    pub resync_period: Duration,
    /// Namespace of credential Secrets without an explicit namespace
    pub credentials_namespace: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            external_url: String::new(),
            worker_count: 4,
            concurrent_cluster_updates: 3,
            tunneling_agent_ip: "100.64.30.10".to_string(),
            seed_dns_overwrite: None,
            overwrite_registry: None,
            etcd_replicas: 3,
            enable_vpa: false,
            enable_etcd_backups: false,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8085)),
            resync_period: Duration::from_secs(300),
            credentials_namespace: "clusterkit".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let external_url = lookup("EXTERNAL_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "EXTERNAL_URL environment variable is required".to_string(),
                )
            })?;

        let worker_count = parse_or(&lookup, "WORKER_COUNT", defaults.worker_count)?;
        if worker_count == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }
        let concurrent_cluster_updates = parse_or(
            &lookup,
            "CONCURRENT_CLUSTER_UPDATES",
            defaults.concurrent_cluster_updates,
        )?;
        if concurrent_cluster_updates == 0 {
            return Err(ControllerError::InvalidConfig(
                "CONCURRENT_CLUSTER_UPDATES must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            external_url,
            worker_count,
            concurrent_cluster_updates,
            tunneling_agent_ip: lookup("TUNNELING_AGENT_IP")
                .unwrap_or(defaults.tunneling_agent_ip),
            seed_dns_overwrite: lookup("SEED_DNS_OVERWRITE").filter(|v| !v.is_empty()),
            overwrite_registry: lookup("OVERWRITE_REGISTRY").filter(|v| !v.is_empty()),
            etcd_replicas: parse_or(&lookup, "ETCD_REPLICAS", defaults.etcd_replicas)?,
            enable_vpa: parse_or(&lookup, "ENABLE_VPA", defaults.enable_vpa)?,
            enable_etcd_backups: parse_or(
                &lookup,
                "ENABLE_ETCD_BACKUPS",
                defaults.enable_etcd_backups,
            )?,
            metrics_addr: parse_or(&lookup, "METRICS_ADDR", defaults.metrics_addr)?,
            resync_period: Duration::from_secs(parse_or(
                &lookup,
                "RESYNC_PERIOD_SECONDS",
                defaults.resync_period.as_secs(),
            )?),
            credentials_namespace: lookup("CREDENTIALS_NAMESPACE")
                .unwrap_or(defaults.credentials_namespace),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{key} has an invalid value: {raw}"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_external_url_is_required() {
        let err = ControllerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("EXTERNAL_URL"));
    }

    #[test]
    fn test_defaults_apply() {
        let config =
            ControllerConfig::from_lookup(lookup(&[("EXTERNAL_URL", "dev.kubermatic.io")])).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.concurrent_cluster_updates, 3);
        assert_eq!(config.tunneling_agent_ip, "100.64.30.10");
        assert_eq!(config.resync_period, Duration::from_secs(300));
        assert!(!config.enable_vpa);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("EXTERNAL_URL", "example.com"),
            ("WORKER_COUNT", "8"),
            ("ENABLE_VPA", "true"),
            ("METRICS_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.worker_count, 8);
        assert!(config.enable_vpa);
        assert_eq!(config.metrics_addr.port(), 9000);

        let err = ControllerConfig::from_lookup(lookup(&[
            ("EXTERNAL_URL", "example.com"),
            ("CONCURRENT_CLUSTER_UPDATES", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}
