use std::sync::Arc;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject};
use reconciling::{NamedObjectCreator, named_creator};

use super::{ETCD_STATEFULSET, MACHINE_CONTROLLER_DEPLOYMENT, USERCLUSTER_CONTROLLER_DEPLOYMENT};
use crate::reconciler::ClusterContext;

const ETCD_LAUNCHER: &str = "etcd-launcher";

pub fn service_accounts(ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<ServiceAccount>> {
    [
        ETCD_LAUNCHER,
        MACHINE_CONTROLLER_DEPLOYMENT,
        USERCLUSTER_CONTROLLER_DEPLOYMENT,
    ]
    .into_iter()
    .map(|name| {
        let ctx = Arc::clone(ctx);
        named_creator(name, move |mut sa: ServiceAccount| {
            sa.metadata.labels = Some(ctx.labels(name));
            Ok(sa)
        })
    })
    .collect()
}

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| (*r).to_string()).collect()),
        verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
        ..Default::default()
    }
}

pub fn roles(ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<Role>> {
    let etcd_ctx = Arc::clone(ctx);
    let machine_ctx = Arc::clone(ctx);
    vec![
        named_creator(ETCD_LAUNCHER, move |mut role: Role| {
            role.metadata.labels = Some(etcd_ctx.labels(ETCD_STATEFULSET));
            role.rules = Some(vec![
                rule("", &["pods"], &["get", "list", "watch"]),
                rule("apps", &["statefulsets"], &["get", "list"]),
            ]);
            Ok(role)
        }),
        named_creator(MACHINE_CONTROLLER_DEPLOYMENT, move |mut role: Role| {
            role.metadata.labels = Some(machine_ctx.labels(MACHINE_CONTROLLER_DEPLOYMENT));
            role.rules = Some(vec![
                rule("", &["secrets", "configmaps"], &["get", "list", "watch"]),
                rule("", &["events"], &["create", "patch"]),
            ]);
            Ok(role)
        }),
    ]
}

fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn binding(ctx: &Arc<ClusterContext>, name: &'static str) -> NamedObjectCreator<RoleBinding> {
    let ctx = Arc::clone(ctx);
    named_creator(name, move |mut binding: RoleBinding| {
        binding.metadata.labels = Some(ctx.labels(name));
        binding.role_ref = RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        };
        binding.subjects = Some(vec![service_account_subject(name, &ctx.namespace)]);
        Ok(binding)
    })
}

pub fn role_bindings(ctx: &Arc<ClusterContext>) -> Vec<NamedObjectCreator<RoleBinding>> {
    vec![
        binding(ctx, ETCD_LAUNCHER),
        binding(ctx, MACHINE_CONTROLLER_DEPLOYMENT),
    ]
}

/// Name of the auth-delegator binding of a cluster namespace
pub fn auth_delegator_binding_name(namespace: &str) -> String {
    format!("clusterkit:{namespace}:auth-delegator")
}

/// Lets the user-cluster controller delegate authentication to the seed.
pub fn auth_delegator_binding(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<ClusterRoleBinding> {
    let ctx = Arc::clone(ctx);
    named_creator(
        auth_delegator_binding_name(&ctx.namespace),
        move |mut binding: ClusterRoleBinding| {
            binding.metadata.labels = Some(ctx.labels(USERCLUSTER_CONTROLLER_DEPLOYMENT));
            binding.role_ref = RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "system:auth-delegator".to_string(),
            };
            binding.subjects = Some(vec![service_account_subject(
                USERCLUSTER_CONTROLLER_DEPLOYMENT,
                &ctx.namespace,
            )]);
            Ok(binding)
        },
    )
}
