use std::sync::Arc;

use crds::ExposeStrategy;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use reconciling::{NamedObjectCreator, named_creator};

use super::{APISERVER_DEPLOYMENT, APISERVER_SERVICE, ETCD_SERVICE, ETCD_STATEFULSET, FRONT_LB_SERVICE};
use crate::reconciler::ClusterContext;

/// Port the API server containers listen on
pub const APISERVER_SECURE_PORT: i32 = 6443;

pub fn services(ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Service>> {
    let mut services = vec![apiserver(ctx), etcd(ctx)];
    if ctx.expose_strategy == ExposeStrategy::LoadBalancer {
        services.push(front_load_balancer(ctx));
    }
    services
}

/// Sets a port by name. An allocated nodePort survives because the
/// existing entry is edited in place.
fn upsert_port(spec: &mut ServiceSpec, name: &str, port: i32, target: i32) {
    let ports = spec.ports.get_or_insert_with(Vec::new);
    let entry = match ports.iter().position(|p| p.name.as_deref() == Some(name)) {
        Some(index) => &mut ports[index],
        None => {
            ports.push(ServicePort {
                name: Some(name.to_string()),
                ..Default::default()
            });
            let last = ports.len() - 1;
            &mut ports[last]
        }
    };
    entry.port = port;
    entry.target_port = Some(IntOrString::Int(target));
    entry.protocol = Some("TCP".to_string());
}

fn apiserver(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<Service> {
    let ctx = Arc::clone(ctx);
    named_creator(APISERVER_SERVICE, move |mut service: Service| {
        service.metadata.labels = Some(ctx.labels(APISERVER_DEPLOYMENT));
        let spec = service.spec.get_or_insert_with(Default::default);
        // Tunneled clusters are only reached through the agent
        spec.type_ = Some(match ctx.expose_strategy {
            ExposeStrategy::Tunneling => "ClusterIP".to_string(),
            ExposeStrategy::NodePort | ExposeStrategy::LoadBalancer => "NodePort".to_string(),
        });
        spec.selector = Some(ctx.labels(APISERVER_DEPLOYMENT));
        upsert_port(spec, "secure", 443, APISERVER_SECURE_PORT);
        Ok(service)
    })
}

fn front_load_balancer(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<Service> {
    let ctx = Arc::clone(ctx);
    named_creator(FRONT_LB_SERVICE, move |mut service: Service| {
        service.metadata.labels = Some(ctx.labels(FRONT_LB_SERVICE));
        let spec = service.spec.get_or_insert_with(Default::default);
        spec.type_ = Some("LoadBalancer".to_string());
        spec.selector = Some(ctx.labels(APISERVER_DEPLOYMENT));
        upsert_port(spec, "secure", 443, APISERVER_SECURE_PORT);
        Ok(service)
    })
}

fn etcd(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<Service> {
    let ctx = Arc::clone(ctx);
    named_creator(ETCD_SERVICE, move |mut service: Service| {
        service.metadata.labels = Some(ctx.labels(ETCD_STATEFULSET));
        let spec = service.spec.get_or_insert_with(Default::default);
        spec.cluster_ip = Some("None".to_string());
        spec.publish_not_ready_addresses = Some(true);
        spec.selector = Some(ctx.labels(ETCD_STATEFULSET));
        upsert_port(spec, "client", 2379, 2379);
        upsert_port(spec, "peer", 2380, 2380);
        Ok(service)
    })
}
