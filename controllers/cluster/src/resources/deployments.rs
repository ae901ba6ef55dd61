use std::sync::Arc;

use crds::ExposeStrategy;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use reconciling::{NamedObjectCreator, named_creator};
use serde_json::{Value, json};

use super::services::APISERVER_SECURE_PORT;
use super::{
    ADMIN_KUBECONFIG_SECRET, APISERVER_DEPLOYMENT, CONTROLLER_MANAGER_DEPLOYMENT, ETCD_SERVICE,
    MACHINE_CONTROLLER_DEPLOYMENT, OPENVPN_DEPLOYMENT, SCHEDULER_DEPLOYMENT,
    USERCLUSTER_CONTROLLER_DEPLOYMENT, overlay,
};
use crate::reconciler::ClusterContext;

const KUBE_REGISTRY: &str = "registry.k8s.io";
const MACHINE_CONTROLLER_IMAGE: &str = "quay.io/kubermatic/machine-controller";
const MACHINE_CONTROLLER_TAG: &str = "v1.61.0";
const USERCLUSTER_CONTROLLER_IMAGE: &str = "quay.io/clusterkit/usercluster-controller";
const OPENVPN_IMAGE: &str = "quay.io/kubermatic/openvpn";
const OPENVPN_TAG: &str = "v2.5.2-r0";

/// One control-plane container plus its replica count
struct Component {
    name: &'static str,
    replicas: i32,
    image: String,
    command: Vec<String>,
    args: Vec<String>,
    volumes: Vec<Value>,
    volume_mounts: Vec<Value>,
    port: Option<i32>,
}

impl Component {
    fn new(name: &'static str, image: String) -> Self {
        Self {
            name,
            replicas: 1,
            image,
            command: Vec::new(),
            args: Vec::new(),
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            port: None,
        }
    }

    fn spec(&self, ctx: &ClusterContext) -> Value {
        let labels = ctx.labels(self.name);
        let mut container = json!({
            "name": self.name,
            "image": self.image,
            "args": self.args,
            "volumeMounts": self.volume_mounts,
        });
        if !self.command.is_empty() {
            container["command"] = json!(self.command);
        }
        if let Some(port) = self.port {
            container["ports"] = json!([{ "containerPort": port, "protocol": "TCP" }]);
        }
        json!({
            "replicas": self.replicas,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "serviceAccountName": self.service_account(),
                    "containers": [container],
                    "volumes": self.volumes,
                },
            },
        })
    }

    fn service_account(&self) -> &'static str {
        match self.name {
            MACHINE_CONTROLLER_DEPLOYMENT | USERCLUSTER_CONTROLLER_DEPLOYMENT => self.name,
            _ => "default",
        }
    }
}

fn creator(ctx: &Arc<ClusterContext>, build: fn(&ClusterContext) -> Component) -> NamedObjectCreator<Deployment> {
    let ctx = Arc::clone(ctx);
    let name = build(&ctx).name;
    named_creator(name, move |mut deployment: Deployment| {
        let component = build(&ctx);
        deployment.metadata.labels = Some(ctx.labels(component.name));
        deployment.spec = Some(overlay(deployment.spec.take(), &component.spec(&ctx))?);
        Ok(deployment)
    })
}

fn kubeconfig_volume() -> (Value, Value) {
    (
        json!({ "name": "kubeconfig", "secret": { "secretName": ADMIN_KUBECONFIG_SECRET } }),
        json!({ "name": "kubeconfig", "mountPath": "/etc/kubernetes/kubeconfig", "readOnly": true }),
    )
}

fn with_kubeconfig(mut component: Component) -> Component {
    let (volume, mount) = kubeconfig_volume();
    component.volumes.push(volume);
    component.volume_mounts.push(mount);
    component
        .args
        .push("--kubeconfig=/etc/kubernetes/kubeconfig/kubeconfig".to_string());
    component
}

fn apiserver(ctx: &ClusterContext) -> Component {
    let mut component = Component::new(
        APISERVER_DEPLOYMENT,
        ctx.image(&format!("{KUBE_REGISTRY}/kube-apiserver"), &ctx.kubernetes_tag()),
    );
    component.replicas = 2;
    component.command = vec!["/usr/local/bin/kube-apiserver".to_string()];
    component.args = vec![
        format!(
            "--etcd-servers=http://{ETCD_SERVICE}.{}.svc.cluster.local:2379",
            ctx.namespace
        ),
        format!("--secure-port={APISERVER_SECURE_PORT}"),
        format!(
            "--service-cluster-ip-range={}",
            ctx.network.services_cidr_blocks.join(",")
        ),
        "--token-auth-file=/etc/kubernetes/kubeconfig/tokens.csv".to_string(),
        "--authorization-mode=Node,RBAC".to_string(),
    ];
    if !ctx.address.ip.is_empty() {
        component
            .args
            .push(format!("--advertise-address={}", ctx.address.ip));
    }
    let (volume, mount) = kubeconfig_volume();
    component.volumes.push(volume);
    component.volume_mounts.push(mount);
    component.port = Some(APISERVER_SECURE_PORT);
    component
}

fn controller_manager(ctx: &ClusterContext) -> Component {
    let mut component = Component::new(
        CONTROLLER_MANAGER_DEPLOYMENT,
        ctx.image(
            &format!("{KUBE_REGISTRY}/kube-controller-manager"),
            &ctx.kubernetes_tag(),
        ),
    );
    component.command = vec!["/usr/local/bin/kube-controller-manager".to_string()];
    component.args = vec![
        format!("--cluster-name={}", ctx.cluster_name),
        format!("--cluster-cidr={}", ctx.network.pods_cidr_blocks.join(",")),
        format!(
            "--service-cluster-ip-range={}",
            ctx.network.services_cidr_blocks.join(",")
        ),
        "--leader-elect=true".to_string(),
    ];
    with_kubeconfig(component)
}

fn scheduler(ctx: &ClusterContext) -> Component {
    let mut component = Component::new(
        SCHEDULER_DEPLOYMENT,
        ctx.image(&format!("{KUBE_REGISTRY}/kube-scheduler"), &ctx.kubernetes_tag()),
    );
    component.command = vec!["/usr/local/bin/kube-scheduler".to_string()];
    component.args = vec!["--leader-elect=true".to_string()];
    with_kubeconfig(component)
}

fn machine_controller(ctx: &ClusterContext) -> Component {
    let mut component = Component::new(
        MACHINE_CONTROLLER_DEPLOYMENT,
        ctx.image(MACHINE_CONTROLLER_IMAGE, MACHINE_CONTROLLER_TAG),
    );
    component.args = vec![
        format!("--cluster-dns={}", ctx.network.dns_domain),
        format!("--external-cloud-provider={}", ctx.provider),
    ];
    with_kubeconfig(component)
}

fn usercluster_controller(ctx: &ClusterContext) -> Component {
    let mut component = Component::new(
        USERCLUSTER_CONTROLLER_DEPLOYMENT,
        ctx.image(USERCLUSTER_CONTROLLER_IMAGE, &ctx.kubernetes_tag()),
    );
    component.args = vec![
        format!("--namespace={}", ctx.namespace),
        format!("--cluster-url={}", ctx.address.url),
        format!("--cluster-name={}", ctx.cluster_name),
    ];
    with_kubeconfig(component)
}

fn openvpn_server(ctx: &ClusterContext) -> Component {
    let mut component = Component::new(OPENVPN_DEPLOYMENT, ctx.image(OPENVPN_IMAGE, OPENVPN_TAG));
    component.command = vec!["/usr/sbin/openvpn".to_string()];
    component.args = vec![
        "--proto".to_string(),
        "tcp".to_string(),
        "--port".to_string(),
        "1194".to_string(),
        "--dev".to_string(),
        "tun".to_string(),
        format!(
            "--route={}",
            ctx.network
                .pods_cidr_blocks
                .first()
                .map(String::as_str)
                .unwrap_or_default()
        ),
    ];
    component.port = Some(1194);
    component
}

pub fn deployments(ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Deployment>> {
    let mut deployments = vec![
        creator(ctx, apiserver),
        creator(ctx, controller_manager),
        creator(ctx, scheduler),
        creator(ctx, machine_controller),
        creator(ctx, usercluster_controller),
    ];
    // Tunneled clusters reach their nodes through the agent instead
    if ctx.expose_strategy != ExposeStrategy::Tunneling {
        deployments.push(creator(ctx, openvpn_server));
    }
    deployments
}

pub fn apiserver_disruption_budget(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<PodDisruptionBudget> {
    let ctx = Arc::clone(ctx);
    named_creator(APISERVER_DEPLOYMENT, move |mut pdb: PodDisruptionBudget| {
        let labels = ctx.labels(APISERVER_DEPLOYMENT);
        pdb.metadata.labels = Some(labels.clone());
        let desired = json!({
            "minAvailable": 1,
            "selector": { "matchLabels": labels },
        });
        pdb.spec = Some(overlay(pdb.spec.take(), &desired)?);
        Ok(pdb)
    })
}
