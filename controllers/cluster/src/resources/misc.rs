use std::collections::BTreeMap;
use std::sync::Arc;

use crds::{
    BackupConfig, CrossVersionObjectReference, UpdatePolicy, VerticalPodAutoscaler,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Resource;
use reconciling::{BuildError, NamedObjectCreator, named_creator};
use serde_json::json;

use super::{
    ADMIN_KUBECONFIG_SECRET, APISERVER_DEPLOYMENT, CLOUD_CONFIG, CONTROLLER_MANAGER_DEPLOYMENT,
    SCHEDULER_DEPLOYMENT,
};
use crate::reconciler::ClusterContext;
use crate::user_cluster::KUBECONFIG_KEY;

const TOKEN_KEY: &str = "token";
const TOKEN_FILE_KEY: &str = "tokens.csv";
const DEFAULT_BACKUP: &str = "default-backups";

/// Serving certificates are issued outside this controller, so there is no
/// CA to pin and the kubeconfig skips server verification.
fn render_kubeconfig(ctx: &ClusterContext, token: &str) -> Result<String, BuildError> {
    let kubeconfig = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": ctx.cluster_name,
            "cluster": {
                "server": ctx.address.url,
                "insecure-skip-tls-verify": true,
            },
        }],
        "users": [{
            "name": "admin",
            "user": { "token": token },
        }],
        "contexts": [{
            "name": "default",
            "context": { "cluster": ctx.cluster_name, "user": "admin" },
        }],
        "current-context": "default",
    });
    serde_yaml::to_string(&kubeconfig)
        .map_err(|e| BuildError::new(format!("failed to render kubeconfig: {e}")))
}

/// Admin credentials of the managed API server. The token is generated
/// once and kept across passes.
pub fn admin_kubeconfig(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<Secret> {
    let ctx = Arc::clone(ctx);
    named_creator(ADMIN_KUBECONFIG_SECRET, move |mut secret: Secret| {
        if ctx.address.url.is_empty() {
            return Err(BuildError::new("cluster address has no URL yet"));
        }
        let data = secret.data.get_or_insert_with(BTreeMap::new);
        let token = match data
            .get(TOKEN_KEY)
            .and_then(|t| String::from_utf8(t.0.clone()).ok())
            .filter(|t| !t.is_empty())
        {
            Some(token) => token,
            None => uuid::Uuid::new_v4().simple().to_string(),
        };

        data.insert(
            KUBECONFIG_KEY.to_string(),
            ByteString(render_kubeconfig(&ctx, &token)?.into_bytes()),
        );
        data.insert(
            TOKEN_FILE_KEY.to_string(),
            ByteString(format!("{token},admin,admin,system:masters\n").into_bytes()),
        );
        data.insert(TOKEN_KEY.to_string(), ByteString(token.into_bytes()));
        secret.metadata.labels = Some(ctx.labels(ADMIN_KUBECONFIG_SECRET));
        secret.type_ = Some("Opaque".to_string());
        Ok(secret)
    })
}

pub fn cloud_config(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<ConfigMap> {
    let ctx = Arc::clone(ctx);
    named_creator(CLOUD_CONFIG, move |mut cm: ConfigMap| {
        let config = format!(
            "[Global]\nprovider = \"{}\"\ndatacenter = \"{}\"\ncluster = \"{}\"\n",
            ctx.provider, ctx.datacenter, ctx.cluster_name
        );
        cm.metadata.labels = Some(ctx.labels(CLOUD_CONFIG));
        cm.data = Some(BTreeMap::from([("config".to_string(), config)]));
        Ok(cm)
    })
}

/// One autoscaler per resource-hungry control-plane Deployment
pub fn vertical_pod_autoscalers(
    ctx: &Arc<ClusterContext>,
) -> Vec<NamedObjectCreator<VerticalPodAutoscaler>> {
    [
        APISERVER_DEPLOYMENT,
        CONTROLLER_MANAGER_DEPLOYMENT,
        SCHEDULER_DEPLOYMENT,
    ]
    .into_iter()
    .map(|target| {
        let ctx = Arc::clone(ctx);
        named_creator(target, move |mut vpa: VerticalPodAutoscaler| {
            vpa.metadata.labels = Some(ctx.labels(target));
            vpa.spec.target_ref = CrossVersionObjectReference {
                api_version: Deployment::api_version(&()).to_string(),
                kind: Deployment::kind(&()).to_string(),
                name: target.to_string(),
            };
            vpa.spec.update_policy = Some(UpdatePolicy {
                update_mode: Some("Auto".to_string()),
            });
            Ok(vpa)
        })
    })
    .collect()
}

pub fn default_backup(ctx: &Arc<ClusterContext>) -> NamedObjectCreator<BackupConfig> {
    let ctx = Arc::clone(ctx);
    named_creator(DEFAULT_BACKUP, move |mut backup: BackupConfig| {
        backup.metadata.labels = Some(ctx.labels(DEFAULT_BACKUP));
        backup.spec.cluster.clone_from(&ctx.cluster_name);
        backup.spec.schedule = "*/20 * * * *".to_string();
        backup.spec.keep = Some(20);
        Ok(backup)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_context;
    use crds::ExposeStrategy;
    use kube::config::Kubeconfig;

    fn data_string(secret: &Secret, key: &str) -> String {
        String::from_utf8(secret.data.as_ref().unwrap()[key].0.clone()).unwrap()
    }

    #[test]
    fn test_admin_token_is_kept_across_passes() {
        let ctx = Arc::new(test_context(ExposeStrategy::NodePort));
        let (_, create) = admin_kubeconfig(&ctx)();

        let first = create(Secret::default()).unwrap();
        let second = create(first.clone()).unwrap();
        assert_eq!(first, second);

        let kubeconfig = Kubeconfig::from_yaml(&data_string(&first, KUBECONFIG_KEY)).unwrap();
        let cluster = kubeconfig.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(cluster.server.as_deref(), Some(ctx.address.url.as_str()));
        assert!(data_string(&first, TOKEN_FILE_KEY).starts_with(&data_string(&first, TOKEN_KEY)));
    }

    #[tokio::test]
    async fn test_admin_kubeconfig_builds_client_config() {
        let ctx = Arc::new(test_context(ExposeStrategy::NodePort));
        let (_, create) = admin_kubeconfig(&ctx)();
        let secret = create(Secret::default()).unwrap();

        let kubeconfig = Kubeconfig::from_yaml(&data_string(&secret, KUBECONFIG_KEY)).unwrap();
        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &kube::config::KubeConfigOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            config.cluster_url.host(),
            Some("abc.europe-west3-c.dev.kubermatic.io")
        );
        assert_eq!(config.cluster_url.port_u16(), Some(32000));
        assert!(config.accept_invalid_certs);
    }

    #[test]
    fn test_admin_kubeconfig_needs_address() {
        let mut ctx = test_context(ExposeStrategy::NodePort);
        ctx.address.url = String::new();
        let (_, create) = admin_kubeconfig(&Arc::new(ctx))();
        assert!(create(Secret::default()).is_err());
    }
}
