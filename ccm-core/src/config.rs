//! The configuration structures option groups apply onto
//!
//! [`CloudControllerManagerConfiguration`] is the component configuration
//! controllers read, and can be loaded from a YAML file. The remaining types
//! are resolved, runtime-only slices of the assembled configuration.
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs,
    net::{SocketAddr, TcpListener},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// The `kind` of a component configuration document
pub const KIND: &str = "CloudControllerManagerConfiguration";
/// The `apiVersion` of a component configuration document
pub const API_VERSION: &str = "cloudcontrollermanager.config.k8s.io/v1alpha1";

/// Errors loading a component configuration file
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read
    #[error("failed to read {path:?}: {source}")]
    Read {
        /// The file that was attempted
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid YAML for this configuration
    #[error("failed to parse component configuration: {0}")]
    Parse(#[source] serde_yaml::Error),
    /// The document declares another kind
    #[error("unexpected kind {0:?}, expected {KIND:?}")]
    UnexpectedKind(String),
}

/// Component configuration of the cloud controller manager
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudControllerManagerConfiguration {
    /// Legacy field from TypeMeta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Legacy field from TypeMeta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Settings shared by every controller manager
    pub generic: GenericControllerManagerConfiguration,
    /// Settings shared between the kube and cloud controllers
    pub kube_cloud_shared: KubeCloudSharedConfiguration,
    /// Service controller settings
    pub service_controller: ServiceControllerConfiguration,
    /// How often node status is updated by the node controllers
    #[serde(with = "go_duration")]
    pub node_status_update_frequency: Duration,
}

impl Default for CloudControllerManagerConfiguration {
    fn default() -> Self {
        Self {
            api_version: Some(API_VERSION.into()),
            kind: Some(KIND.into()),
            generic: GenericControllerManagerConfiguration::default(),
            kube_cloud_shared: KubeCloudSharedConfiguration::default(),
            service_controller: ServiceControllerConfiguration::default(),
            node_status_update_frequency: Duration::from_secs(5 * 60),
        }
    }
}

impl CloudControllerManagerConfiguration {
    /// Parse a YAML document, filling in defaults for absent fields
    pub fn from_yaml(text: &str) -> Result<Self, ConfigFileError> {
        let config: Self = serde_yaml::from_str(text).map_err(ConfigFileError::Parse)?;
        match config.kind.as_deref() {
            Some(kind) if kind != KIND => Err(ConfigFileError::UnexpectedKind(kind.into())),
            _ => Ok(config),
        }
    }

    /// Read a configuration from an arbitrary location
    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigFileError> {
        let text = fs::read_to_string(&path).map_err(|source| ConfigFileError::Read {
            path: path.as_ref().into(),
            source,
        })?;
        Self::from_yaml(&text)
    }
}

/// Settings shared by every controller manager
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenericControllerManagerConfiguration {
    /// Lower bound of the jittered informer resync period
    #[serde(with = "go_duration")]
    pub min_resync_period: Duration,
    /// Connection settings for the apiserver client
    pub client_connection: ClientConnectionConfiguration,
    /// Pause between starting two controllers
    #[serde(with = "go_duration")]
    pub controller_start_interval: Duration,
    /// Leader election settings
    pub leader_election: LeaderElectionConfiguration,
    /// Controllers to run: `*`, `name` or `-name`
    pub controllers: Vec<String>,
    /// Profiling toggles
    pub debugging: DebuggingConfiguration,
}

impl Default for GenericControllerManagerConfiguration {
    fn default() -> Self {
        Self {
            min_resync_period: Duration::from_secs(12 * 60 * 60),
            client_connection: ClientConnectionConfiguration::default(),
            controller_start_interval: Duration::ZERO,
            leader_election: LeaderElectionConfiguration::default(),
            controllers: vec!["*".into()],
            debugging: DebuggingConfiguration::default(),
        }
    }
}

impl GenericControllerManagerConfiguration {
    /// Whether the controller `name` should run
    ///
    /// An explicit `name` or `-name` wins, whichever comes first. Otherwise the
    /// controller only runs under `*`, and only if it is not disabled by default.
    pub fn is_controller_enabled(&self, name: &str, disabled_by_default: &BTreeSet<String>) -> bool {
        let mut has_star = false;
        for ctrl in &self.controllers {
            if ctrl == name {
                return true;
            }
            if ctrl.strip_prefix('-') == Some(name) {
                return false;
            }
            if ctrl == "*" {
                has_star = true;
            }
        }
        has_star && !disabled_by_default.contains(name)
    }
}

/// Connection settings for the apiserver client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConnectionConfiguration {
    /// Path to a kubeconfig file
    pub kubeconfig: String,
    /// Content types sent in the `Accept` header
    pub accept_content_types: String,
    /// Content type of requests sent to the apiserver
    pub content_type: String,
    /// Sustained queries per second; zero or less disables client side limiting
    pub qps: f32,
    /// Extra queries allowed in a burst
    pub burst: i32,
}

impl Default for ClientConnectionConfiguration {
    fn default() -> Self {
        Self {
            kubeconfig: String::new(),
            accept_content_types: String::new(),
            content_type: "application/json".into(),
            qps: 20.0,
            burst: 30,
        }
    }
}

/// Leader election settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaderElectionConfiguration {
    /// Whether to run leader election at all
    pub leader_elect: bool,
    /// How long non-leaders wait before trying to take over
    #[serde(with = "go_duration")]
    pub lease_duration: Duration,
    /// How long the leader keeps retrying to renew
    #[serde(with = "go_duration")]
    pub renew_deadline: Duration,
    /// Pause between acquire/renew attempts
    #[serde(with = "go_duration")]
    pub retry_period: Duration,
    /// The lock object type; only `leases` is supported
    pub resource_lock: String,
    /// Name of the lock object
    pub resource_name: String,
    /// Namespace of the lock object
    pub resource_namespace: String,
}

impl Default for LeaderElectionConfiguration {
    fn default() -> Self {
        Self {
            leader_elect: true,
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            resource_lock: "leases".into(),
            resource_name: String::new(),
            resource_namespace: String::new(),
        }
    }
}

/// Profiling toggles
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebuggingConfiguration {
    /// Serve profiling handlers
    pub enable_profiling: bool,
    /// Also collect lock contention profiles
    pub enable_contention_profiling: bool,
}

impl Default for DebuggingConfiguration {
    fn default() -> Self {
        Self {
            enable_profiling: true,
            enable_contention_profiling: false,
        }
    }
}

/// The cloud provider to run against
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudProviderConfiguration {
    /// Provider identifier
    pub name: String,
    /// Path to the provider's configuration file
    pub cloud_config_file: String,
}

/// Settings shared between the kube and cloud controllers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeCloudSharedConfiguration {
    #[allow(missing_docs)]
    pub cloud_provider: CloudProviderConfiguration,
    /// Plugin to use when the cloud provider is external
    pub external_cloud_volume_plugin: String,
    /// Give every controller its own service account credentials
    pub use_service_account_credentials: bool,
    /// Allow running against untagged cloud instances
    pub allow_untagged_cloud: bool,
    /// Period for reconciling routes created for nodes by the cloud provider
    #[serde(with = "go_duration")]
    pub route_reconciliation_period: Duration,
    /// Period for syncing node status
    #[serde(with = "go_duration")]
    pub node_monitor_period: Duration,
    /// Instance prefix for the cluster
    pub cluster_name: String,
    /// CIDR range for pods in the cluster
    pub cluster_cidr: String,
    /// Whether pod CIDRs are allocated and set on nodes
    pub allocate_node_cidrs: bool,
    /// Which CIDR allocator to use
    pub cidr_allocator_type: String,
    /// Whether pod CIDRs are configured on the cloud provider
    pub configure_cloud_routes: bool,
    /// Deprecated; kept so old configuration files still parse
    #[serde(with = "go_duration")]
    pub node_sync_period: Duration,
}

impl Default for KubeCloudSharedConfiguration {
    fn default() -> Self {
        Self {
            cloud_provider: CloudProviderConfiguration::default(),
            external_cloud_volume_plugin: String::new(),
            use_service_account_credentials: false,
            allow_untagged_cloud: false,
            route_reconciliation_period: Duration::from_secs(10),
            node_monitor_period: Duration::from_secs(5),
            cluster_name: "kubernetes".into(),
            cluster_cidr: String::new(),
            allocate_node_cidrs: false,
            cidr_allocator_type: "RangeAllocator".into(),
            configure_cloud_routes: true,
            node_sync_period: Duration::ZERO,
        }
    }
}

/// Service controller settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceControllerConfiguration {
    /// Services reconciled in parallel
    pub concurrent_service_syncs: i32,
}

impl Default for ServiceControllerConfiguration {
    fn default() -> Self {
        Self {
            concurrent_service_syncs: 1,
        }
    }
}

/// Resolved node IPAM controller settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeIpamControllerConfiguration {
    /// Primary service cluster IP range
    pub service_cidr: String,
    /// Secondary service cluster IP range for dual-stack clusters
    pub secondary_service_cidr: String,
    /// Mask size for single-stack clusters, zero when unset
    pub node_cidr_mask_size: i32,
    /// Mask size for IPv4 node CIDRs
    pub node_cidr_mask_size_ipv4: i32,
    /// Mask size for IPv6 node CIDRs
    pub node_cidr_mask_size_ipv6: i32,
}

/// A PEM encoded serving certificate and key
#[derive(Clone, PartialEq, Eq)]
pub struct ServingCert {
    /// Where the certificate came from, for logging
    pub name: String,
    /// PEM certificate chain
    pub cert_pem: String,
    /// PEM private key
    pub key_pem: String,
}

impl std::fmt::Debug for ServingCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingCert").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Resolved secure serving settings
#[derive(Debug)]
pub struct SecureServingInfo {
    /// Where to listen, unless a listener was handed over
    pub bind_address: SocketAddr,
    /// A pre-bound listener
    pub listener: Option<TcpListener>,
    /// The certificate served
    pub cert: ServingCert,
    /// CA bundle used to verify client certificates, set by authentication
    pub client_ca_file: Option<PathBuf>,
}

/// Resolved delegated authentication settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationInfo {
    /// Kubeconfig used to reach the TokenReview API; `None` means in-cluster
    pub remote_kubeconfig: Option<PathBuf>,
    /// How long token review results are cached
    pub cache_ttl: Duration,
    /// Front proxy settings, when a request header CA is configured
    pub request_header: Option<RequestHeaderInfo>,
}

/// Resolved front proxy authentication settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHeaderInfo {
    /// CA bundle used to verify the front proxy
    pub client_ca_file: PathBuf,
    /// Headers carrying the user name
    pub username_headers: Vec<String>,
    /// Headers carrying the groups
    pub group_headers: Vec<String>,
    /// Header prefixes carrying extra attributes
    pub extra_header_prefixes: Vec<String>,
    /// Common names allowed for the front proxy, empty allows all
    pub allowed_names: Vec<String>,
}

/// Resolved delegated authorization settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationInfo {
    /// Kubeconfig used to reach the SubjectAccessReview API; `None` means in-cluster
    pub remote_kubeconfig: Option<PathBuf>,
    /// How long allowed decisions are cached
    pub allow_cache_ttl: Duration,
    /// How long denied decisions are cached
    pub deny_cache_ttl: Duration,
    /// Paths allowed without asking the apiserver
    pub always_allow_paths: Vec<String>,
    /// Groups allowed without asking the apiserver
    pub always_allow_groups: Vec<String>,
    /// Attempts made against the authorization webhook
    pub webhook_retry_steps: i32,
}

/// Resolved dynamic reloading settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicReloadingConfig {
    /// Reload the cloud config from a secret instead of a static file
    pub enable_dynamic_reloading: bool,
    /// Secret holding the cloud config
    pub cloud_config_secret_name: String,
    /// Namespace of that secret
    pub cloud_config_secret_namespace: String,
    /// Key of the cloud config within that secret
    pub cloud_config_key: String,
}

/// Resolved node filtering settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeFilteringConfig {
    /// Whether node filtering was requested explicitly
    pub enable_node_filtering: bool,
    /// Raw include list
    pub node_label_selector: String,
    /// Raw exclude list
    pub node_exclude_labels: String,
}

/// Go duration strings (`"12h0m0s"`, `"5m"`) for [`Duration`] fields
mod go_duration {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        kube::core::Duration::from(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let duration = kube::core::Duration::deserialize(deserializer)?;
        if duration.is_negative() {
            return Err(de::Error::custom("duration must not be negative"));
        }
        Ok(duration.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_a_yaml_round_trip() {
        let config = CloudControllerManagerConfiguration::default();
        let text = serde_yaml::to_string(&config).unwrap();
        let parsed = CloudControllerManagerConfiguration::from_yaml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_documents_are_defaulted() {
        let parsed = CloudControllerManagerConfiguration::from_yaml(
            r#"
            apiVersion: cloudcontrollermanager.config.k8s.io/v1alpha1
            kind: CloudControllerManagerConfiguration
            generic:
              minResyncPeriod: 1h30m
              clientConnection:
                qps: 50
              controllers: ["*", "-route"]
            kubeCloudShared:
              cloudProvider:
                name: azure
                cloudConfigFile: /etc/kubernetes/azure.json
              useServiceAccountCredentials: true
            nodeStatusUpdateFrequency: 1m
            "#,
        )
        .unwrap();
        assert_eq!(parsed.generic.min_resync_period, Duration::from_secs(90 * 60));
        assert_eq!(parsed.generic.client_connection.qps, 50.0);
        assert_eq!(parsed.generic.client_connection.burst, 30);
        assert_eq!(parsed.generic.controllers, vec!["*", "-route"]);
        assert!(parsed.generic.leader_election.leader_elect);
        assert_eq!(parsed.kube_cloud_shared.cloud_provider.name, "azure");
        assert!(parsed.kube_cloud_shared.use_service_account_credentials);
        assert_eq!(parsed.kube_cloud_shared.cluster_name, "kubernetes");
        assert_eq!(parsed.service_controller.concurrent_service_syncs, 1);
        assert_eq!(parsed.node_status_update_frequency, Duration::from_secs(60));
    }

    #[test]
    fn rejects_other_kinds_and_negative_durations() {
        let err =
            CloudControllerManagerConfiguration::from_yaml("kind: KubeSchedulerConfiguration").unwrap_err();
        assert!(matches!(err, ConfigFileError::UnexpectedKind(kind) if kind == "KubeSchedulerConfiguration"));

        let err =
            CloudControllerManagerConfiguration::from_yaml("nodeStatusUpdateFrequency: -5m").unwrap_err();
        assert!(matches!(err, ConfigFileError::Parse(_)));
    }

    #[test]
    fn reads_from_file() {
        let file = tempfile::NamedTempFile::new().expect("create config tempfile");
        std::fs::write(file.path(), "serviceController:\n  concurrentServiceSyncs: 3\n").unwrap();
        let parsed = CloudControllerManagerConfiguration::read_from(file.path()).unwrap();
        assert_eq!(parsed.service_controller.concurrent_service_syncs, 3);

        let err = CloudControllerManagerConfiguration::read_from("/nonexistent/ccm.yaml").unwrap_err();
        assert!(matches!(err, ConfigFileError::Read { .. }));
    }

    #[test]
    fn controller_enablement() {
        let disabled: BTreeSet<String> = ["node-ipam".to_string()].into();
        let generic = |controllers: &[&str]| GenericControllerManagerConfiguration {
            controllers: controllers.iter().map(ToString::to_string).collect(),
            ..Default::default()
        };

        let star = generic(&["*"]);
        assert!(star.is_controller_enabled("service", &disabled));
        assert!(!star.is_controller_enabled("node-ipam", &disabled));

        let explicit = generic(&["*", "node-ipam", "-route"]);
        assert!(explicit.is_controller_enabled("node-ipam", &disabled));
        assert!(!explicit.is_controller_enabled("route", &disabled));

        let no_star = generic(&["service"]);
        assert!(no_star.is_controller_enabled("service", &disabled));
        assert!(!no_star.is_controller_enabled("route", &disabled));

        let first_wins = generic(&["-service", "service"]);
        assert!(!first_wins.is_controller_enabled("service", &disabled));
    }
}
