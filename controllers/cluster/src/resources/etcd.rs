use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use reconciling::{NamedObjectCreator, named_creator};
use serde_json::json;

use super::{ETCD_SERVICE, ETCD_STATEFULSET, overlay};
use crate::reconciler::ClusterContext;

const ETCD_IMAGE: &str = "gcr.io/etcd-development/etcd";
const ETCD_TAG: &str = "v3.5.17";
const DEFRAGGER: &str = "etcd-defragger";

/// Smallest member count that keeps quorum
pub fn quorum(replicas: i32) -> i32 {
    replicas / 2 + 1
}

fn initial_cluster(ctx: &ClusterContext) -> String {
    (0..ctx.etcd_replicas)
        .map(|i| {
            format!(
                "{ETCD_STATEFULSET}-{i}=http://{ETCD_STATEFULSET}-{i}.{ETCD_SERVICE}.{}.svc.cluster.local:2380",
                ctx.namespace
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn stateful_set(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<StatefulSet> {
    let ctx = Arc::clone(ctx);
    named_creator(ETCD_STATEFULSET, move |mut set: StatefulSet| {
        let labels = ctx.labels(ETCD_STATEFULSET);
        set.metadata.labels = Some(labels.clone());
        let desired = json!({
            "replicas": ctx.etcd_replicas,
            "serviceName": ETCD_SERVICE,
            "podManagementPolicy": "Parallel",
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "serviceAccountName": "etcd-launcher",
                    "containers": [{
                        "name": "etcd",
                        "image": ctx.image(ETCD_IMAGE, ETCD_TAG),
                        "command": ["/usr/local/bin/etcd"],
                        "args": [
                            "--name=$(POD_NAME)",
                            "--data-dir=/var/run/etcd/pod_$(POD_NAME)",
                            "--listen-client-urls=http://0.0.0.0:2379",
                            "--listen-peer-urls=http://0.0.0.0:2380",
                            format!(
                                "--advertise-client-urls=http://$(POD_NAME).{ETCD_SERVICE}.{}.svc.cluster.local:2379",
                                ctx.namespace
                            ),
                            format!(
                                "--initial-advertise-peer-urls=http://$(POD_NAME).{ETCD_SERVICE}.{}.svc.cluster.local:2380",
                                ctx.namespace
                            ),
                            format!("--initial-cluster={}", initial_cluster(&ctx)),
                            "--initial-cluster-state=new",
                        ],
                        "env": [{
                            "name": "POD_NAME",
                            "valueFrom": { "fieldRef": { "fieldPath": "metadata.name" } },
                        }],
                        "ports": [
                            { "name": "client", "containerPort": 2379, "protocol": "TCP" },
                            { "name": "peer", "containerPort": 2380, "protocol": "TCP" },
                        ],
                        "volumeMounts": [{ "name": "data", "mountPath": "/var/run/etcd" }],
                    }],
                },
            },
            "volumeClaimTemplates": [{
                "metadata": { "name": "data" },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": "5Gi" } },
                },
            }],
        });
        set.spec = Some(overlay(set.spec.take(), &desired)?);
        Ok(set)
    })
}

pub fn disruption_budget(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<PodDisruptionBudget> {
    let ctx = Arc::clone(ctx);
    named_creator(ETCD_STATEFULSET, move |mut pdb: PodDisruptionBudget| {
        let labels = ctx.labels(ETCD_STATEFULSET);
        pdb.metadata.labels = Some(labels.clone());
        let desired = json!({
            "minAvailable": quorum(ctx.etcd_replicas),
            "selector": { "matchLabels": labels },
        });
        pdb.spec = Some(overlay(pdb.spec.take(), &desired)?);
        Ok(pdb)
    })
}

/// Periodically defragments every etcd member.
pub fn defragger(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<CronJob> {
    let ctx = Arc::clone(ctx);
    named_creator(DEFRAGGER, move |mut job: CronJob| {
        job.metadata.labels = Some(ctx.labels(DEFRAGGER));
        let endpoints = format!(
            "http://{ETCD_SERVICE}.{}.svc.cluster.local:2379",
            ctx.namespace
        );
        let desired = json!({
            "schedule": "0 */3 * * *",
            "concurrencyPolicy": "Forbid",
            "successfulJobsHistoryLimit": 0,
            "failedJobsHistoryLimit": 1,
            "jobTemplate": {
                "spec": {
                    "template": {
                        "metadata": { "labels": ctx.labels(DEFRAGGER) },
                        "spec": {
                            "restartPolicy": "OnFailure",
                            "containers": [{
                                "name": "defragger",
                                "image": ctx.image(ETCD_IMAGE, ETCD_TAG),
                                "command": ["/usr/local/bin/etcdctl"],
                                "args": [
                                    format!("--endpoints={endpoints}"),
                                    "defrag",
                                    "--cluster",
                                ],
                            }],
                        },
                    },
                },
            },
        });
        job.spec = Some(overlay(job.spec.take(), &desired)?);
        Ok(job)
    })
}
