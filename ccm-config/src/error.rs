//! Error handling in [`ccm_config`][crate]
use ccm_core::{
    options::{ApplyError, CertError},
    AggregateError,
};
use thiserror::Error;

/// Possible errors assembling the runtime configuration
#[derive(Error, Debug)]
pub enum Error {
    /// One or more option groups failed validation
    #[error("invalid options: {0}")]
    Validation(#[source] AggregateError),

    /// No serving certificate could be provided
    #[error("error creating self-signed certificates: {0}")]
    SelfSignedCerts(#[source] CertError),

    /// An option group could not be applied
    #[error("failed to apply options: {0}")]
    Apply(#[source] ApplyError),

    /// The kubeconfig could not be loaded
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[source] kube::config::KubeconfigError),

    /// Neither in-cluster nor local configuration was found
    #[error("failed to infer client configuration: {0}")]
    InferConfig(#[source] kube::config::InferConfigError),

    /// `--master` is not a valid URL
    #[error("invalid apiserver url {url:?}: {source}")]
    InvalidUri {
        /// The rejected value
        url: String,
        /// The parse failure
        #[source]
        source: http::uri::InvalidUri,
    },

    /// A connection setting does not fit in an HTTP header
    #[error("invalid {name} header value {value:?}")]
    InvalidHeader {
        /// The header being set
        name: http::HeaderName,
        /// The rejected value
        value: String,
    },

    /// Errors from the kube client
    #[error("client error: {0}")]
    Client(#[source] kube::Error),

    /// A token request could not be built
    #[error("failed to build token request: {0}")]
    TokenRequest(#[source] kube::core::request::Error),

    /// The apiserver did not return a token for a service account
    #[error("no token returned for service account {namespace}/{name}")]
    MissingToken {
        /// Namespace of the service account
        namespace: String,
        /// Name of the service account
        name: String,
    },
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::Client(error)
    }
}
