use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ServiceAccount;
use reconciling::{NamedObjectCreator, named_creator};
use serde_json::json;

use super::{ADMIN_KUBECONFIG_SECRET, POLICY_CONTROLLER, overlay};
use crate::reconciler::ClusterContext;

const POLICY_IMAGE: &str = "quay.io/clusterkit/policy-controller";
const POLICY_TAG: &str = "v0.4.0";

pub fn service_account(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<ServiceAccount> {
    let ctx = Arc::clone(ctx);
    named_creator(POLICY_CONTROLLER, move |mut sa: ServiceAccount| {
        sa.metadata.labels = Some(ctx.labels(POLICY_CONTROLLER));
        Ok(sa)
    })
}

pub fn deployment(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<Deployment> {
    let ctx = Arc::clone(ctx);
    named_creator(POLICY_CONTROLLER, move |mut deployment: Deployment| {
        let labels = ctx.labels(POLICY_CONTROLLER);
        deployment.metadata.labels = Some(labels.clone());
        let desired = json!({
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "serviceAccountName": POLICY_CONTROLLER,
                    "containers": [{
                        "name": POLICY_CONTROLLER,
                        "image": ctx.image(POLICY_IMAGE, POLICY_TAG),
                        "args": [
                            "--kubeconfig=/etc/kubernetes/kubeconfig/kubeconfig",
                            "--audit-interval=60",
                        ],
                        "volumeMounts": [{
                            "name": "kubeconfig",
                            "mountPath": "/etc/kubernetes/kubeconfig",
                            "readOnly": true,
                        }],
                    }],
                    "volumes": [{
                        "name": "kubeconfig",
                        "secret": { "secretName": ADMIN_KUBECONFIG_SECRET },
                    }],
                },
            },
        });
        deployment.spec = Some(overlay(deployment.spec.take(), &desired)?);
        Ok(deployment)
    })
}
