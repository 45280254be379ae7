//! Option groups and the top level options they are bundled into
//!
//! Each group owns its own settings and knows how to [`Validate`] them and how
//! to [`ApplyTo`] them onto its slice of the configuration. Groups never look at
//! each other; constraints spanning several groups live on
//! [`CloudControllerManagerOptions::validate`].
use crate::{
    config::{
        AuthenticationInfo, AuthorizationInfo, CloudControllerManagerConfiguration, DynamicReloadingConfig,
        NodeFilteringConfig, NodeIpamControllerConfiguration, SecureServingInfo,
    },
    validation::{validate_all, AggregateError, Validate, ValidationError},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;

mod auth;
pub use auth::{DelegatingAuthenticationOptions, DelegatingAuthorizationOptions, RequestHeaderOptions};

mod cloud;
pub use cloud::{KubeCloudSharedOptions, ServiceControllerOptions};

mod filtering;
pub use filtering::NodeFilteringOptions;

mod generic;
pub use generic::{GenericControllerManagerOptions, GenericOptionsFor};

mod nodeipam;
pub use nodeipam::NodeIpamControllerOptions;

mod reloading;
pub use reloading::DynamicReloadingOptions;

mod serving;
pub use serving::{generate_self_signed, CertError, CertKey, GeneratableKeyCert, SecureServingOptions};

/// User agent, event reporter and default certificate pair name
pub const DEFAULT_USER_AGENT: &str = "cloud-controller-manager";
/// Default port of the secure serving endpoint
pub const DEFAULT_SECURE_PORT: i32 = 10258;
/// Cloud provider selected unless configured otherwise
pub const DEFAULT_CLOUD_PROVIDER: &str = "azure";
/// Namespace holding the leader election lock and controller service accounts
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Apply an option group onto its slice of the configuration
pub trait ApplyTo<T> {
    /// Overwrite `target` with the resolved settings of this group
    fn apply_to(&self, target: &mut T) -> Result<(), ApplyError>;
}

/// Errors resolving option groups into configuration
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A configured serving certificate or key could not be read
    #[error("failed to read serving certificate {path:?}: {source}")]
    ReadServingCert {
        /// The file that was attempted
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Serving is enabled but no certificate was configured or generated
    #[error("secure serving is enabled but no serving certificate is available")]
    MissingServingCert,

    /// The secure port does not fit a socket address
    #[error("invalid secure port {0}")]
    InvalidPort(i32),

    /// The pre-bound listener could not be shared
    #[error("failed to clone serving listener: {0}")]
    Listener(#[source] std::io::Error),

    /// A remote kubeconfig is required for delegation but none was given
    #[error("no remote kubeconfig given for delegated {0}")]
    RemoteKubeconfigRequired(&'static str),

    /// The remote kubeconfig does not exist
    #[error("remote kubeconfig {0:?} does not exist")]
    MissingRemoteKubeconfig(PathBuf),
}

/// The controllers a binary knows how to run
///
/// Used to validate `--controllers` and to resolve aliases to canonical names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerNames {
    /// Every controller name
    pub all: BTreeSet<String>,
    /// Controllers that only run when named explicitly
    pub disabled_by_default: BTreeSet<String>,
    /// Alternative names mapped to their canonical controller name
    pub aliases: BTreeMap<String, String>,
}

impl ControllerNames {
    /// Names with nothing disabled by default and no aliases
    pub fn new<I, S>(all: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all: all.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Only run `name` when it is named explicitly
    #[must_use]
    pub fn disabled_by_default(mut self, name: impl Into<String>) -> Self {
        self.disabled_by_default.insert(name.into());
        self
    }

    /// Accept `alias` as another name for `canonical`
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    /// The canonical name for `name`, which may be an alias
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map_or(name, String::as_str)
    }

    /// Whether `name`, after alias resolution, is a known controller
    pub fn is_known(&self, name: &str) -> bool {
        self.all.contains(self.resolve(name))
    }
}

/// Every option group of the cloud controller manager
#[derive(Debug)]
pub struct CloudControllerManagerOptions {
    /// Settings shared by every controller manager
    pub generic: GenericControllerManagerOptions,
    /// Settings shared between the kube and cloud controllers
    pub kube_cloud_shared: KubeCloudSharedOptions,
    /// Service controller settings
    pub service_controller: ServiceControllerOptions,
    /// Node IPAM controller settings
    pub node_ipam_controller: NodeIpamControllerOptions,
    /// Secure serving endpoint settings
    pub secure_serving: SecureServingOptions,
    /// Delegated authentication of serving requests
    pub authentication: DelegatingAuthenticationOptions,
    /// Delegated authorization of serving requests
    pub authorization: DelegatingAuthorizationOptions,
    /// Address of the apiserver, overriding any kubeconfig
    pub master: String,
    /// Path to a kubeconfig with the apiserver location and credentials
    pub kubeconfig: String,
    /// How often the node controllers update node status
    pub node_status_update_frequency: Duration,
    /// Cloud config reloading from a secret
    pub dynamic_reloading: DynamicReloadingOptions,
    /// Which nodes the controllers observe
    pub node_filtering: NodeFilteringOptions,
}

/// Everything the option groups resolve to before any client is built
#[derive(Debug)]
pub struct AppliedOptions {
    /// The component configuration controllers read
    pub component_config: CloudControllerManagerConfiguration,
    /// Node IPAM controller settings
    pub node_ipam: NodeIpamControllerConfiguration,
    /// Serving settings, when anything listens
    pub secure_serving: Option<SecureServingInfo>,
    /// Authentication settings, only present alongside serving
    pub authentication: Option<AuthenticationInfo>,
    /// Authorization settings, only present alongside serving
    pub authorization: Option<AuthorizationInfo>,
    /// Cloud config reloading settings
    pub dynamic_reloading: DynamicReloadingConfig,
    /// Node filtering settings
    pub node_filtering: NodeFilteringConfig,
}

impl Default for CloudControllerManagerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudControllerManagerOptions {
    /// Options seeded from the default component configuration
    pub fn new() -> Self {
        Self::from_component_config(CloudControllerManagerConfiguration::default())
    }

    /// Options seeded from a loaded component configuration
    ///
    /// Fills in the cloud provider and leader election lock when the
    /// configuration leaves them empty.
    pub fn from_component_config(mut config: CloudControllerManagerConfiguration) -> Self {
        if config.kube_cloud_shared.cloud_provider.name.is_empty() {
            config.kube_cloud_shared.cloud_provider.name = DEFAULT_CLOUD_PROVIDER.into();
        }
        let leader_election = &mut config.generic.leader_election;
        if leader_election.resource_name.is_empty() {
            leader_election.resource_name = DEFAULT_USER_AGENT.into();
        }
        if leader_election.resource_namespace.is_empty() {
            leader_election.resource_namespace = SYSTEM_NAMESPACE.into();
        }

        // certificates are generated in memory unless a directory is configured
        let secure_serving = SecureServingOptions {
            bind_port: DEFAULT_SECURE_PORT,
            server_cert: GeneratableKeyCert {
                pair_name: DEFAULT_USER_AGENT.into(),
                ..GeneratableKeyCert::default()
            },
            ..SecureServingOptions::default()
        };

        Self {
            generic: GenericControllerManagerOptions::new(config.generic),
            kube_cloud_shared: KubeCloudSharedOptions::new(config.kube_cloud_shared),
            service_controller: ServiceControllerOptions::new(config.service_controller),
            node_ipam_controller: NodeIpamControllerOptions::default(),
            secure_serving,
            authentication: DelegatingAuthenticationOptions {
                remote_kubeconfig_optional: true,
                ..DelegatingAuthenticationOptions::default()
            },
            authorization: DelegatingAuthorizationOptions {
                remote_kubeconfig_optional: true,
                ..DelegatingAuthorizationOptions::default()
            },
            master: String::new(),
            kubeconfig: String::new(),
            node_status_update_frequency: config.node_status_update_frequency,
            dynamic_reloading: DynamicReloadingOptions::default(),
            node_filtering: NodeFilteringOptions::default(),
        }
    }

    /// Validate every group plus the constraints spanning groups
    ///
    /// Every failure is reported, not just the first.
    pub fn validate(&self, controllers: &ControllerNames) -> Result<(), AggregateError> {
        let generic = self.generic.for_controllers(controllers);
        let groups: [&dyn Validate; 9] = [
            &generic,
            &self.kube_cloud_shared,
            &self.service_controller,
            &self.node_ipam_controller,
            &self.secure_serving,
            &self.authentication,
            &self.authorization,
            &self.dynamic_reloading,
            &self.node_filtering,
        ];
        let mut errors = validate_all(groups);

        if self.kube_cloud_shared.config.cloud_provider.name.is_empty() {
            errors.push(ValidationError::CloudProviderEmpty);
        }
        let syncs = self.service_controller.config.concurrent_service_syncs;
        if syncs != 1 {
            errors.push(ValidationError::ConcurrentServiceSyncs(syncs));
        }
        if !self.dynamic_reloading.enable_dynamic_reloading
            && self.kube_cloud_shared.config.cloud_provider.cloud_config_file.is_empty()
        {
            errors.push(ValidationError::CloudConfigRequired);
        }

        AggregateError::from_errors(errors)
    }

    /// Resolve every group onto a fresh configuration
    ///
    /// Authentication and authorization are only resolved when something
    /// listens, and then delegate to the apiserver named by `--kubeconfig`.
    pub fn apply(&self, controllers: &ControllerNames) -> Result<AppliedOptions, ApplyError> {
        let mut component_config = CloudControllerManagerConfiguration::default();
        self.generic
            .for_controllers(controllers)
            .apply_to(&mut component_config.generic)?;
        self.kube_cloud_shared
            .apply_to(&mut component_config.kube_cloud_shared)?;
        self.service_controller
            .apply_to(&mut component_config.service_controller)?;

        let mut node_ipam = NodeIpamControllerConfiguration::default();
        self.node_ipam_controller.apply_to(&mut node_ipam)?;

        let mut secure_serving = None;
        self.secure_serving.apply_to(&mut secure_serving)?;

        let mut dynamic_reloading = DynamicReloadingConfig::default();
        self.dynamic_reloading.apply_to(&mut dynamic_reloading)?;

        let mut node_filtering = NodeFilteringConfig::default();
        self.node_filtering.apply_to(&mut node_filtering)?;

        let (authentication, authorization) = match secure_serving.as_mut() {
            Some(serving) => {
                let authn = self.authentication.apply_to(&self.kubeconfig, serving)?;
                let authz = self.authorization.apply_to(&self.kubeconfig, serving)?;
                (Some(authn), Some(authz))
            }
            None => {
                tracing::debug!(
                    "secure serving disabled, skipping delegated authentication and authorization"
                );
                (None, None)
            }
        };

        Ok(AppliedOptions {
            component_config,
            node_ipam,
            secure_serving,
            authentication,
            authorization,
            dynamic_reloading,
            node_filtering,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> ControllerNames {
        ControllerNames::new(["cloud-node", "cloud-node-lifecycle", "service", "route", "node-ipam"])
            .disabled_by_default("node-ipam")
            .alias("service-lb-controller", "service")
    }

    fn valid_options() -> CloudControllerManagerOptions {
        let mut options = CloudControllerManagerOptions::new();
        options.kube_cloud_shared.config.cloud_provider.cloud_config_file =
            "/etc/kubernetes/azure.json".into();
        options
    }

    #[test]
    fn defaults() {
        let options = CloudControllerManagerOptions::new();
        assert_eq!(options.kube_cloud_shared.config.cloud_provider.name, "azure");
        assert_eq!(options.secure_serving.bind_port, 10258);
        assert_eq!(options.secure_serving.server_cert.pair_name, "cloud-controller-manager");
        assert!(options.secure_serving.server_cert.cert_directory.is_empty());
        assert!(options.authentication.remote_kubeconfig_optional);
        assert!(options.authorization.remote_kubeconfig_optional);
        let leader_election = &options.generic.config.leader_election;
        assert_eq!(leader_election.resource_name, "cloud-controller-manager");
        assert_eq!(leader_election.resource_namespace, "kube-system");
        assert_eq!(options.node_status_update_frequency, Duration::from_secs(300));
        assert!(!options.node_filtering.is_filtering());
    }

    #[test]
    fn configured_values_are_kept() {
        let mut config = CloudControllerManagerConfiguration::default();
        config.kube_cloud_shared.cloud_provider.name = "external".into();
        config.generic.leader_election.resource_name = "my-ccm".into();
        let options = CloudControllerManagerOptions::from_component_config(config);
        assert_eq!(options.kube_cloud_shared.config.cloud_provider.name, "external");
        assert_eq!(options.generic.config.leader_election.resource_name, "my-ccm");
        assert_eq!(options.generic.config.leader_election.resource_namespace, "kube-system");
    }

    #[test]
    fn valid_options_pass() {
        assert_eq!(valid_options().validate(&names()), Ok(()));
    }

    #[test]
    fn cross_group_checks_are_all_reported() {
        let mut options = CloudControllerManagerOptions::new();
        options.kube_cloud_shared.config.cloud_provider.name.clear();
        options.service_controller.config.concurrent_service_syncs = 3;

        let err = options.validate(&names()).unwrap_err();
        assert_eq!(err.errors(), &[
            ValidationError::CloudProviderEmpty,
            ValidationError::ConcurrentServiceSyncs(3),
            ValidationError::CloudConfigRequired,
        ]);
        let msg = err.to_string();
        assert!(msg.contains("--cloud-provider cannot be empty"));
        assert!(msg.contains("--concurrent-service-syncs is limited to 1 only"));
        assert!(
            msg.contains("--cloud-config cannot be empty when --enable-dynamic-reloading is not set to true")
        );
    }

    #[test]
    fn dynamic_reloading_lifts_the_cloud_config_requirement() {
        let mut options = CloudControllerManagerOptions::new();
        options.dynamic_reloading.enable_dynamic_reloading = true;
        assert_eq!(options.validate(&names()), Ok(()));
    }

    #[test]
    fn group_and_cross_group_errors_are_collected_together() {
        let mut options = valid_options();
        options.generic.config.controllers = vec!["*".into(), "bogus".into()];
        options.secure_serving.bind_port = 70000;
        options.service_controller.config.concurrent_service_syncs = 0;

        let err = options.validate(&names()).unwrap_err();
        assert_eq!(err.errors(), &[
            ValidationError::UnknownController("bogus".into()),
            ValidationError::SecurePortOutOfRange(70000),
            ValidationError::ConcurrentServiceSyncs(0),
        ]);
    }

    #[test]
    fn apply_resolves_every_group() {
        let mut options = valid_options();
        options.secure_serving.bind_port = 0;
        options.generic.config.controllers = vec!["*".into(), "-service-lb-controller".into()];
        options.node_filtering.node_exclude_labels = "role=infra".into();
        options.node_status_update_frequency = Duration::from_secs(30);

        let applied = options.apply(&names()).unwrap();
        assert_eq!(applied.component_config.generic.controllers, vec!["*", "-service"]);
        assert_eq!(
            applied.component_config.kube_cloud_shared.cloud_provider.cloud_config_file,
            "/etc/kubernetes/azure.json"
        );
        assert_eq!(applied.node_ipam.node_cidr_mask_size_ipv4, 24);
        assert_eq!(applied.node_filtering.node_exclude_labels, "role=infra");
        assert!(applied.secure_serving.is_none());
        assert!(applied.authentication.is_none());
        assert!(applied.authorization.is_none());
        // synced back by the assembler, not by apply
        assert_eq!(
            applied.component_config.node_status_update_frequency,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn apply_with_serving_resolves_delegation() {
        let mut options = valid_options();
        options.secure_serving.bind_port = 0;
        options.secure_serving.listener =
            Some(std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port"));
        options
            .secure_serving
            .maybe_default_with_self_signed_certs("localhost", &[], &["127.0.0.1".parse().unwrap()])
            .unwrap();

        let applied = options.apply(&names()).unwrap();
        assert!(applied.secure_serving.is_some());
        let authn = applied.authentication.unwrap();
        assert_eq!(authn.remote_kubeconfig, None);
        let authz = applied.authorization.unwrap();
        assert_eq!(authz.remote_kubeconfig, None);
        assert_eq!(authz.webhook_retry_steps, 5);
    }

    #[test]
    fn controller_names() {
        let names = names();
        assert_eq!(names.resolve("service-lb-controller"), "service");
        assert_eq!(names.resolve("route"), "route");
        assert!(names.is_known("service-lb-controller"));
        assert!(!names.is_known("bogus"));
    }
}
