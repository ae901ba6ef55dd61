//! Address synchronization
//!
//! Works out where the managed API server can be reached and returns the
//! status fields that need to change. Nothing is written here; the caller
//! folds the mutations into one status update.

use std::net::{IpAddr, Ipv4Addr};

use crds::{ClusterAddress, ExposeStrategy, ManagedCluster};
use k8s_openapi::api::core::v1::Service;
use store_client::Store;
use tracing::{debug, warn};

use crate::dns::Resolver;
use crate::error::ControllerError;
use crate::resources::{APISERVER_SERVICE, FRONT_LB_SERVICE};

/// Seed-level inputs of address synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSettings {
    /// Base domain appended to synthesized names
    pub base_domain: String,
    /// Replaces the datacenter label when set
    pub dns_overwrite: Option<String>,
    pub tunneling_agent_ip: String,
}

/// One pending change to `status.address`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMutation {
    ExternalName(String),
    InternalName(String),
    Ip(String),
    Port(i32),
    Url(String),
}

impl AddressMutation {
    pub fn apply(&self, address: &mut ClusterAddress) {
        match self {
            AddressMutation::ExternalName(v) => address.external_name.clone_from(v),
            AddressMutation::InternalName(v) => address.internal_name.clone_from(v),
            AddressMutation::Ip(v) => address.ip.clone_from(v),
            AddressMutation::Port(v) => address.port = *v,
            AddressMutation::Url(v) => address.url.clone_from(v),
        }
    }
}

/// In-cluster DNS name of the API server Service
pub fn internal_name(namespace: &str) -> String {
    format!("{APISERVER_SERVICE}.{namespace}.svc.cluster.local")
}

/// `https://host:port`, bracketing IPv6 literals
pub fn format_url(host: &str, port: i32) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("https://[{host}]:{port}"),
        _ => format!("https://{host}:{port}"),
    }
}

fn is_public(ip: Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation())
}

/// First public IPv4, else the first IPv4, else the first entry
pub fn pick_lb_ip(candidates: &[String]) -> Option<String> {
    let v4: Vec<(&String, Ipv4Addr)> = candidates
        .iter()
        .filter_map(|c| c.parse::<Ipv4Addr>().ok().map(|ip| (c, ip)))
        .collect();
    v4.iter()
        .find(|(_, ip)| is_public(*ip))
        .or_else(|| v4.first())
        .map(|(c, _)| (*c).clone())
        .or_else(|| candidates.first().cloned())
}

/// Resolves `host` to one address.
///
/// A `current` address that is still among the results is kept. Otherwise
/// the IPv4 results are sorted as strings and the first one wins; IPv6 is
/// only used when there is no IPv4 result.
pub async fn resolve_address(
    resolver: &dyn Resolver,
    host: &str,
    current: &str,
) -> Result<String, ControllerError> {
    let addrs = resolver.lookup(host).await?;
    if addrs.is_empty() {
        return Err(ControllerError::Dns(format!("no addresses found for {host}")));
    }
    if !current.is_empty() && addrs.iter().any(|a| a.to_string() == current) {
        return Ok(current.to_string());
    }

    let mut v4: Vec<String> = addrs
        .iter()
        .filter(|a| a.is_ipv4())
        .map(ToString::to_string)
        .collect();
    v4.sort();
    if v4.len() > 1 {
        warn!(
            "{} resolves to several IPv4 addresses ({}), using {}",
            host,
            v4.join(", "),
            v4[0]
        );
    }
    if let Some(first) = v4.into_iter().next() {
        return Ok(first);
    }

    let mut v6: Vec<String> = addrs.iter().map(ToString::to_string).collect();
    v6.sort();
    v6.into_iter()
        .next()
        .ok_or_else(|| ControllerError::Dns(format!("no addresses found for {host}")))
}

/// External name and IP taken from the front load balancer
async fn load_balancer_address(
    store: &Store,
    resolver: &dyn Resolver,
    namespace: &str,
    current_ip: &str,
) -> Result<(String, String), ControllerError> {
    let Some(service) = store.get::<Service>(Some(namespace), FRONT_LB_SERVICE).await? else {
        debug!("Service {}/{} does not exist yet", namespace, FRONT_LB_SERVICE);
        return Ok((String::new(), String::new()));
    };
    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.clone())
        .unwrap_or_default();

    let ips: Vec<String> = ingress.iter().filter_map(|i| i.ip.clone()).collect();
    if let Some(ip) = pick_lb_ip(&ips) {
        return Ok((ip.clone(), ip));
    }
    if let Some(hostname) = ingress.iter().find_map(|i| i.hostname.clone()) {
        let ip = resolve_address(resolver, &hostname, current_ip).await?;
        return Ok((hostname, ip));
    }
    match service.spec.and_then(|s| s.load_balancer_ip) {
        Some(ip) if !ip.is_empty() => Ok((ip.clone(), ip)),
        _ => Ok((String::new(), String::new())),
    }
}

/// Computes the desired address and returns the fields that differ from
/// `status.address`.
pub async fn sync_address(
    cluster: &ManagedCluster,
    seed: &SeedSettings,
    store: &Store,
    resolver: &dyn Resolver,
) -> Result<Vec<AddressMutation>, ControllerError> {
    let name = cluster
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidObject("cluster has no name".to_string()))?;
    let status = cluster.status_or_default();
    let namespace = status.namespace_name.as_str();
    if namespace.is_empty() {
        return Err(ControllerError::InvalidObject(format!(
            "cluster {name} has no namespace yet"
        )));
    }
    let current = &status.address;
    let strategy = cluster.spec.expose_strategy;

    let service = store
        .get::<Service>(Some(namespace), APISERVER_SERVICE)
        .await?
        .ok_or_else(|| {
            ControllerError::Address(format!("service {namespace}/{APISERVER_SERVICE} not found"))
        })?;
    let first_port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|p| p.first())
        .ok_or_else(|| {
            ControllerError::Address(format!(
                "service {namespace}/{APISERVER_SERVICE} has no ports"
            ))
        })?;
    let port = match strategy {
        ExposeStrategy::Tunneling => first_port.port,
        ExposeStrategy::NodePort | ExposeStrategy::LoadBalancer => {
            first_port.node_port.unwrap_or(first_port.port)
        }
    };

    let datacenter = seed
        .dns_overwrite
        .as_deref()
        .unwrap_or(cluster.spec.cloud.datacenter.as_str());
    let dns_name = format!("{name}.{datacenter}.{}", seed.base_domain);

    let (external_name, ip) = match strategy {
        ExposeStrategy::NodePort => {
            let ip = resolve_address(resolver, &dns_name, &current.ip).await?;
            (dns_name, ip)
        }
        ExposeStrategy::Tunneling => (dns_name, seed.tunneling_agent_ip.clone()),
        ExposeStrategy::LoadBalancer => {
            load_balancer_address(store, resolver, namespace, &current.ip).await?
        }
    };
    let url = if external_name.is_empty() {
        String::new()
    } else {
        format_url(&external_name, port)
    };

    let mut mutations = Vec::new();
    if current.external_name != external_name {
        mutations.push(AddressMutation::ExternalName(external_name));
    }
    let internal = internal_name(namespace);
    if current.internal_name != internal {
        mutations.push(AddressMutation::InternalName(internal));
    }
    if current.ip != ip {
        mutations.push(AddressMutation::Ip(ip));
    }
    if current.port != port {
        mutations.push(AddressMutation::Port(port));
    }
    if current.url != url {
        mutations.push(AddressMutation::Url(url));
    }
    Ok(mutations)
}
