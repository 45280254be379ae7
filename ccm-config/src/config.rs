//! The runtime configuration and how it is assembled from options
use crate::{
    client_builder::{ControllerClientBuilder, DynamicClientBuilder, SimpleClientBuilder},
    connection::{build_config_from_flags, ClientConnection},
    informers::SharedInformerFactory,
    recorder::EventRecorder,
    Error, Result,
};
use ccm_core::{
    config::{
        AuthenticationInfo, AuthorizationInfo, DynamicReloadingConfig, NodeFilteringConfig,
        NodeIpamControllerConfiguration, SecureServingInfo,
    },
    options::{AppliedOptions, DEFAULT_USER_AGENT, SYSTEM_NAMESPACE},
    CloudControllerManagerConfiguration, CloudControllerManagerOptions, ControllerNames, ResyncPeriod,
};
use kube::Client;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
};

/// Name of the client backing the shared informers
pub const SHARED_INFORMERS_CLIENT: &str = "shared-informers";

/// Everything the cloud controller manager needs to start its controllers
///
/// Built once per process by [`Config::assemble`].
pub struct Config {
    /// The component configuration controllers read
    pub component_config: CloudControllerManagerConfiguration,
    /// Node IPAM controller settings
    pub node_ipam_controller: NodeIpamControllerConfiguration,
    /// Serving settings, when anything listens
    pub secure_serving: Option<SecureServingInfo>,
    /// Delegated authentication, present alongside serving
    pub authentication: Option<AuthenticationInfo>,
    /// Delegated authorization, present alongside serving
    pub authorization: Option<AuthorizationInfo>,
    /// Cloud config reloading settings
    pub dynamic_reloading: DynamicReloadingConfig,
    /// Node filtering settings as given
    pub node_filtering: NodeFilteringConfig,
    /// The resolved apiserver connection, with the connection settings applied
    pub kubeconfig: kube::Config,
    /// Content negotiation, rate limits and user agent of the primary client
    pub connection: ClientConnection,
    /// The manager's own client
    pub client: Client,
    /// The client backing [`Config::shared_informers`]
    pub versioned_client: Client,
    /// Records events as the manager
    pub event_recorder: EventRecorder,
    /// Hands out per-controller clients
    pub client_builder: ControllerClientBuilder,
    /// Hands out watches, scoped to the node selector when filtering
    pub shared_informers: SharedInformerFactory,
    /// Resync periods for anything not going through the informer factory
    pub resync: ResyncPeriod,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("component_config", &self.component_config)
            .field("node_ipam_controller", &self.node_ipam_controller)
            .field("secure_serving", &self.secure_serving)
            .field("authentication", &self.authentication)
            .field("authorization", &self.authorization)
            .field("dynamic_reloading", &self.dynamic_reloading)
            .field("node_filtering", &self.node_filtering)
            .field("kubeconfig", &self.kubeconfig)
            .field("connection", &self.connection)
            .field("event_recorder", &self.event_recorder)
            .field("client_builder", &self.client_builder)
            .field("shared_informers", &self.shared_informers)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Assemble with the default `cloud-controller-manager` user agent
    pub async fn from_options(
        options: CloudControllerManagerOptions,
        controllers: &ControllerNames,
    ) -> Result<Self> {
        Self::assemble(options, DEFAULT_USER_AGENT, controllers).await
    }

    /// Validate `options` and build the runtime configuration from them
    ///
    /// Steps run in order and the first failure is returned:
    ///
    /// 1. every option group is validated, and all failures reported together
    /// 2. a self-signed serving certificate is provided when serving without one
    /// 3. option groups are applied; authentication and authorization only when serving
    /// 4. the apiserver connection is resolved from `--master` and `--kubeconfig`
    /// 5. the primary client is built, identifying as `user_agent`
    /// 6. an event recorder is bound to that client
    /// 7. controllers get either the root credentials or service account credentials
    /// 8. the informer factory is created, filtered when node filtering applies
    /// 9. the node status update frequency is synced into the component configuration
    pub async fn assemble(
        options: CloudControllerManagerOptions,
        user_agent: &str,
        controllers: &ControllerNames,
    ) -> Result<Self> {
        Self::assemble_with_rng(options, user_agent, controllers, StdRng::from_os_rng()).await
    }

    /// [`Config::assemble`], with resync periods drawn from `rng`
    pub async fn assemble_with_rng(
        mut options: CloudControllerManagerOptions,
        user_agent: &str,
        controllers: &ControllerNames,
        rng: impl RngCore + Send + 'static,
    ) -> Result<Self> {
        options.validate(controllers).map_err(Error::Validation)?;

        options
            .secure_serving
            .maybe_default_with_self_signed_certs("localhost", &[], &[IpAddr::V4(Ipv4Addr::LOCALHOST)])
            .map_err(Error::SelfSignedCerts)?;

        let AppliedOptions {
            mut component_config,
            node_ipam,
            secure_serving,
            authentication,
            authorization,
            dynamic_reloading,
            node_filtering,
        } = options.apply(controllers).map_err(Error::Apply)?;
        tracing::debug!(
            serving = secure_serving.is_some(),
            controllers = ?component_config.generic.controllers,
            "applied options"
        );

        let mut kubeconfig = build_config_from_flags(&options.master, &options.kubeconfig).await?;
        let connection = ClientConnection::new(&component_config.generic.client_connection, user_agent);
        connection.apply(&mut kubeconfig)?;
        tracing::debug!(cluster_url = %kubeconfig.cluster_url, "resolved apiserver connection");

        let client = connection.client(kubeconfig.clone())?;
        let event_recorder = EventRecorder::new(client.clone(), user_agent);

        let root = SimpleClientBuilder::new(kubeconfig.clone(), connection.clone());
        let client_builder = if component_config.kube_cloud_shared.use_service_account_credentials {
            tracing::debug!(
                namespace = SYSTEM_NAMESPACE,
                "using service account credentials for controllers"
            );
            ControllerClientBuilder::Delegated(DynamicClientBuilder::new(
                &kubeconfig,
                connection.clone(),
                client.clone(),
                SYSTEM_NAMESPACE,
            ))
        } else {
            ControllerClientBuilder::Root(root.clone())
        };

        let versioned_client = root.client(SHARED_INFORMERS_CLIENT)?;
        let resync = ResyncPeriod::with_rng(component_config.generic.min_resync_period, rng);
        let shared_informers = if options.node_filtering.is_filtering() {
            let selector = options.node_filtering.selector();
            tracing::info!(%selector, "scoping shared informers to node selector");
            SharedInformerFactory::filtered(versioned_client.clone(), resync.clone(), selector)
        } else {
            SharedInformerFactory::new(versioned_client.clone(), resync.clone())
        };

        component_config.node_status_update_frequency = options.node_status_update_frequency;

        Ok(Self {
            component_config,
            node_ipam_controller: node_ipam,
            secure_serving,
            authentication,
            authorization,
            dynamic_reloading,
            node_filtering,
            kubeconfig,
            connection,
            client,
            versioned_client,
            event_recorder,
            client_builder,
            shared_informers,
            resync,
        })
    }
}
