//! Clients handed out to individual controllers
//!
//! Controllers either share the manager's own credentials, or each run as a
//! service account of their own so their access can be scoped by RBAC.
use crate::{connection::ClientConnection, Error, Result};
use k8s_openapi::api::{
    authentication::v1::{TokenRequest, TokenRequestSpec},
    core::v1::ServiceAccount,
};
use kube::{
    api::{Api, PostParams},
    config::AuthInfo,
    core::{ObjectMeta, Request},
    Client, Config, Resource,
};
use secrecy::SecretString;
use std::{fmt, time::Duration};

/// Lifetime requested for service account tokens
pub const DEFAULT_TOKEN_EXPIRATION: Duration = Duration::from_secs(60 * 60);

fn controller_user_agent(base: &str, name: &str) -> String {
    format!("{base}/{name}")
}

/// Hands out clients using the manager's own credentials
#[derive(Clone, Debug)]
pub struct SimpleClientBuilder {
    config: Config,
    connection: ClientConnection,
}

impl SimpleClientBuilder {
    /// Clients derived from `config`, identified by `connection`'s user agent
    pub fn new(config: Config, connection: ClientConnection) -> Self {
        Self { config, connection }
    }

    /// The configuration of the client named `name`
    pub fn config(&self, name: &str) -> Result<Config> {
        let mut config = self.config.clone();
        self.connection_for(name).apply(&mut config)?;
        Ok(config)
    }

    /// A client for the controller `name`
    pub fn client(&self, name: &str) -> Result<Client> {
        self.connection_for(name).client(self.config.clone())
    }

    fn connection_for(&self, name: &str) -> ClientConnection {
        self.connection
            .with_user_agent(controller_user_agent(&self.connection.user_agent, name))
    }
}

/// Hands out clients authenticated as one service account per controller
///
/// Service accounts live in a single namespace and are created on first use.
/// Each client gets a token minted through the TokenRequest API.
#[derive(Clone)]
pub struct DynamicClientBuilder {
    base: Config,
    connection: ClientConnection,
    root: Client,
    namespace: String,
    expiration: Duration,
}

impl fmt::Debug for DynamicClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicClientBuilder")
            .field("cluster_url", &self.base.cluster_url)
            .field("namespace", &self.namespace)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl DynamicClientBuilder {
    /// Clients derived from `base`, with accounts managed through `root`
    ///
    /// Any credentials in `base` are dropped; see [`anonymous`].
    pub fn new(
        base: &Config,
        connection: ClientConnection,
        root: Client,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            base: anonymous(base),
            connection,
            root,
            namespace: namespace.into(),
            expiration: DEFAULT_TOKEN_EXPIRATION,
        }
    }

    /// Request tokens valid for `expiration`
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Namespace holding the controller service accounts
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The configuration of the client named `name`, carrying a fresh token
    pub async fn config(&self, name: &str) -> Result<Config> {
        self.ensure_service_account(name).await?;
        let token = self.request_token(name).await?;
        let mut config = self.base.clone();
        config.auth_info.token = Some(SecretString::from(token));
        self.connection_for(name).apply(&mut config)?;
        Ok(config)
    }

    /// A client for the controller `name`
    // TODO: refresh tokens before they expire instead of minting one per client
    pub async fn client(&self, name: &str) -> Result<Client> {
        let config = self.config(name).await?;
        self.connection_for(name).client(config)
    }

    fn connection_for(&self, name: &str) -> ClientConnection {
        self.connection
            .with_user_agent(controller_user_agent(&self.connection.user_agent, name))
    }

    async fn ensure_service_account(&self, name: &str) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.root.clone(), &self.namespace);
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }
        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            ..ServiceAccount::default()
        };
        match api.create(&PostParams::default(), &account).await {
            Ok(_) => {
                tracing::info!(namespace = %self.namespace, name, "created controller service account");
                Ok(())
            }
            // created concurrently
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn request_token(&self, name: &str) -> Result<String> {
        let token_request = TokenRequest {
            spec: TokenRequestSpec {
                expiration_seconds: i64::try_from(self.expiration.as_secs()).ok(),
                ..TokenRequestSpec::default()
            },
            ..TokenRequest::default()
        };
        let data = serde_json::to_vec(&token_request).map_err(kube::Error::SerdeError)?;
        let request = Request::new(ServiceAccount::url_path(&(), Some(self.namespace.as_str())))
            .create_subresource("token", name, &PostParams::default(), data)
            .map_err(Error::TokenRequest)?;
        let response: TokenRequest = self.root.request(request).await?;
        response
            .status
            .map(|status| status.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::MissingToken {
                namespace: self.namespace.clone(),
                name: name.into(),
            })
    }
}

/// A copy of `config` stripped of all credentials
///
/// Keeps the server location and its trust roots.
pub fn anonymous(config: &Config) -> Config {
    Config {
        auth_info: AuthInfo::default(),
        ..config.clone()
    }
}

/// How controllers get their clients
#[derive(Clone, Debug)]
pub enum ControllerClientBuilder {
    /// Every controller shares the manager's credentials
    Root(SimpleClientBuilder),
    /// Every controller runs as its own service account
    Delegated(DynamicClientBuilder),
}

impl ControllerClientBuilder {
    /// Whether controllers get service account credentials
    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::Delegated(_))
    }

    /// The configuration of the client named `name`
    pub async fn config(&self, name: &str) -> Result<Config> {
        match self {
            Self::Root(builder) => builder.config(name),
            Self::Delegated(builder) => builder.config(name).await,
        }
    }

    /// A client for the controller `name`
    pub async fn client(&self, name: &str) -> Result<Client> {
        match self {
            Self::Root(builder) => builder.client(name),
            Self::Delegated(builder) => builder.client(name).await,
        }
    }
}
