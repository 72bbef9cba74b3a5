//! Unit tests for the operator configuration resources
//!
//! Covers decoding of administrator-written manifests and CRD generation.

#[cfg(test)]
mod operator_config_decoding {
    use kube::CustomResourceExt;

    use crate::crd::{
        ApiServerOperatorConfig, ManagementState, OperatorManifest, OperatorStatus,
        WebConsoleOperatorConfig,
    };

    const WEB_CONSOLE_MANIFEST: &str = r#"
apiVersion: webconsole.operator.controlplane.io/v1alpha1
kind: WebConsoleOperatorConfig
metadata:
  name: instance
spec:
  managementState: Managed
  imagePullSpec: quay.io/openshift/origin-web-console:v3.11
  version: 3.11.0
  replicas: 0
  nodeSelector:
    node-role.kubernetes.io/master: "true"
  webConsoleConfig:
    logLevel: 2
    features:
      clusterResourceOverridesEnabled: true
"#;

    #[test]
    fn test_web_console_manifest_decodes_flattened_spec() {
        let config: WebConsoleOperatorConfig =
            serde_yaml::from_str(WEB_CONSOLE_MANIFEST).expect("manifest should decode");

        let spec = config.operator_spec();
        assert_eq!(spec.management_state, ManagementState::Managed);
        assert_eq!(spec.version, "3.11.0");
        assert_eq!(
            spec.image_pull_spec,
            "quay.io/openshift/origin-web-console:v3.11"
        );
        assert_eq!(config.spec.web_console_config.log_level, Some(2));
        assert!(config.operator_status().is_none());
    }

    #[test]
    fn test_explicit_zero_replicas_is_distinct_from_unset() {
        let config: WebConsoleOperatorConfig =
            serde_yaml::from_str(WEB_CONSOLE_MANIFEST).expect("manifest should decode");
        assert_eq!(config.spec.operator.replicas, Some(0));

        let unset = WEB_CONSOLE_MANIFEST.replace("  replicas: 0\n", "");
        let config: WebConsoleOperatorConfig =
            serde_yaml::from_str(&unset).expect("manifest should decode");
        assert_eq!(config.spec.operator.replicas, None);
    }

    #[test]
    fn test_enabled_and_disabled_are_aliases() {
        let enabled = WEB_CONSOLE_MANIFEST.replace("Managed", "Enabled");
        let config: WebConsoleOperatorConfig = serde_yaml::from_str(&enabled).unwrap();
        assert_eq!(config.spec.operator.management_state, ManagementState::Managed);

        let disabled = WEB_CONSOLE_MANIFEST.replace("Managed", "Disabled");
        let config: WebConsoleOperatorConfig = serde_yaml::from_str(&disabled).unwrap();
        assert_eq!(config.spec.operator.management_state, ManagementState::Removed);
    }

    #[test]
    fn test_management_state_defaults_to_managed() {
        let yaml = r#"
apiVersion: apiserver.operator.controlplane.io/v1alpha1
kind: ApiServerOperatorConfig
metadata:
  name: instance
spec:
  imagePullSpec: quay.io/openshift/origin-hypershift:v3.10
  version: 3.10.0
"#;
        let config: ApiServerOperatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.spec.operator.management_state, ManagementState::Managed);
        assert_eq!(config.spec.api_server_config.audit_enabled, None);
    }

    #[test]
    fn test_status_round_trips_through_json() {
        let mut config: WebConsoleOperatorConfig =
            serde_yaml::from_str(WEB_CONSOLE_MANIFEST).unwrap();
        config.set_operator_status(OperatorStatus {
            last_successful_version: "3.11.0".to_string(),
            last_unsuccessful_run_errors: vec!["boom".to_string()],
            ..Default::default()
        });

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["status"]["lastSuccessfulVersion"], "3.11.0");
        assert_eq!(json["status"]["lastUnsuccessfulRunErrors"][0], "boom");
        assert!(json["status"].get("targetVersionAvailability").is_none());
    }

    #[test]
    fn test_crds_are_cluster_scoped() {
        let crd = WebConsoleOperatorConfig::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "webconsole.operator.controlplane.io");

        let crd = ApiServerOperatorConfig::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, "ApiServerOperatorConfig");
    }
}
