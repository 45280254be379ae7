//! Apiserver connection settings shared by every client the manager builds
use crate::{Error, Result};
use ccm_core::config::ClientConnectionConfiguration;
use http::{
    header::{ACCEPT, USER_AGENT},
    HeaderName, HeaderValue, Uri,
};
use kube::{
    client::ClientBuilder,
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use std::time::Duration;
use tower::limit::RateLimitLayer;

const JSON: &str = "application/json";

/// Content negotiation, rate limits and identity of a client
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConnection {
    /// Sent as `Accept` when set, otherwise `content_type` is
    pub accept_content_types: String,
    /// Content type spoken with the apiserver
    pub content_type: String,
    /// Sustained requests per second; zero or less disables limiting
    pub qps: f32,
    /// Requests allowed in a burst
    pub burst: i32,
    /// Sent as `User-Agent`
    pub user_agent: String,
}

impl ClientConnection {
    /// Connection settings from the component configuration
    pub fn new(config: &ClientConnectionConfiguration, user_agent: impl Into<String>) -> Self {
        Self {
            accept_content_types: config.accept_content_types.clone(),
            content_type: config.content_type.clone(),
            qps: config.qps,
            burst: config.burst,
            user_agent: user_agent.into(),
        }
    }

    /// The same settings identifying as `user_agent`
    #[must_use]
    pub fn with_user_agent(&self, user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..self.clone()
        }
    }

    /// Write these settings into a client configuration
    ///
    /// Replaces any `Accept` or `User-Agent` header already configured, and
    /// always disables response compression.
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        let accept = [&self.accept_content_types, &self.content_type]
            .into_iter()
            .find(|ct| !ct.is_empty())
            .map_or(JSON, String::as_str);
        let accept = header_value(ACCEPT, accept)?;
        let user_agent = header_value(USER_AGENT, &self.user_agent)?;

        config.headers.retain(|(name, _)| *name != ACCEPT && *name != USER_AGENT);
        config.headers.push((ACCEPT, accept));
        config.headers.push((USER_AGENT, user_agent));
        config.disable_compression = true;
        Ok(())
    }

    /// Build a client from `config` with these settings applied
    pub fn client(&self, mut config: Config) -> Result<Client> {
        self.apply(&mut config)?;
        let builder = ClientBuilder::try_from(config)?;
        let client = match self.rate_limit() {
            Some(limit) => builder.with_layer(&limit).build(),
            None => builder.build(),
        };
        Ok(client)
    }

    /// `burst` requests per `burst / qps` seconds
    ///
    /// No limit when `qps` is not a positive finite number, or is so large the
    /// period rounds down to nothing.
    fn rate_limit(&self) -> Option<RateLimitLayer> {
        if !self.qps.is_finite() || self.qps <= 0.0 {
            return None;
        }
        let burst = u64::try_from(self.burst).unwrap_or_default().max(1);
        let period = Duration::try_from_secs_f64(burst as f64 / f64::from(self.qps))
            .ok()
            .filter(|period| !period.is_zero())?;
        Some(RateLimitLayer::new(burst, period))
    }
}

fn header_value(name: HeaderName, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader {
        name,
        value: value.into(),
    })
}

fn parse_uri(url: &str) -> Result<Uri> {
    url.parse().map_err(|source| Error::InvalidUri {
        url: url.into(),
        source,
    })
}

/// Resolve a client configuration from `--master` and `--kubeconfig`
///
/// With neither given the in-cluster environment is used, falling back to
/// the usual local kubeconfig lookup. `master` always overrides the server of
/// a loaded kubeconfig.
pub async fn build_config_from_flags(master: &str, kubeconfig: &str) -> Result<Config> {
    if kubeconfig.is_empty() {
        if !master.is_empty() {
            return Ok(Config::new(parse_uri(master)?));
        }
        return match Config::incluster() {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "neither --kubeconfig nor --master was specified and in-cluster configuration failed, \
                     inferring config"
                );
                Config::infer().await.map_err(Error::InferConfig)
            }
        };
    }

    let kubeconfig = Kubeconfig::read_from(kubeconfig).map_err(Error::Kubeconfig)?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(Error::Kubeconfig)?;
    if !master.is_empty() {
        config.cluster_url = parse_uri(master)?;
    }
    Ok(config)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn kubeconfig_file(server: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create kubeconfig");
        write!(
            file,
            r#"
apiVersion: v1
kind: Config
clusters:
- name: test
  cluster:
    server: {server}
users:
- name: admin
  user:
    token: root-token
contexts:
- name: test
  context:
    cluster: test
    user: admin
    namespace: default
current-context: test
"#
        )
        .expect("write kubeconfig");
        file
    }

    fn connection() -> ClientConnection {
        ClientConnection::new(&ClientConnectionConfiguration::default(), "cloud-controller-manager")
    }

    #[tokio::test]
    async fn kubeconfig_with_master_override() {
        let file = kubeconfig_file("http://127.0.0.1:6443");
        let path = file.path().to_string_lossy().into_owned();

        let config = build_config_from_flags("", &path).await.unwrap();
        assert_eq!(config.cluster_url, "http://127.0.0.1:6443".parse::<Uri>().unwrap());
        assert_eq!(config.default_namespace, "default");

        let config = build_config_from_flags("http://127.0.0.1:8080", &path).await.unwrap();
        assert_eq!(config.cluster_url, "http://127.0.0.1:8080".parse::<Uri>().unwrap());
        assert!(config.auth_info.token.is_some());
    }

    #[tokio::test]
    async fn master_alone_is_a_bare_url() {
        let config = build_config_from_flags("http://127.0.0.1:8080", "").await.unwrap();
        assert_eq!(config.cluster_url, "http://127.0.0.1:8080".parse::<Uri>().unwrap());
        assert!(config.auth_info.token.is_none());

        let err = build_config_from_flags("not a url", "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUri { .. }));
    }

    #[tokio::test]
    async fn missing_kubeconfig_fails() {
        let err = build_config_from_flags("", "/nonexistent/kubeconfig").await.unwrap_err();
        assert!(matches!(err, Error::Kubeconfig(_)));
    }

    #[test]
    fn headers_replace_existing_and_disable_compression() {
        let mut config = Config::new("http://127.0.0.1:6443".parse().unwrap());
        config
            .headers
            .push((USER_AGENT, HeaderValue::from_static("something-else")));
        connection().apply(&mut config).unwrap();

        assert!(config.disable_compression);
        let values = |name: HeaderName| -> Vec<&HeaderValue> {
            config.headers.iter().filter(|(n, _)| *n == name).map(|(_, v)| v).collect()
        };
        assert_eq!(values(USER_AGENT), vec!["cloud-controller-manager"]);
        assert_eq!(values(ACCEPT), vec!["application/json"]);
    }

    #[test]
    fn accept_content_types_take_precedence() {
        let mut connection = connection();
        connection.accept_content_types = "application/json, */*".into();
        let mut config = Config::new("http://127.0.0.1:6443".parse().unwrap());
        connection.apply(&mut config).unwrap();
        assert!(config
            .headers
            .iter()
            .any(|(n, v)| *n == ACCEPT && v == "application/json, */*"));
    }

    #[test]
    fn invalid_user_agent_is_rejected() {
        let connection = connection().with_user_agent("bad\nagent");
        let mut config = Config::new("http://127.0.0.1:6443".parse().unwrap());
        let err = connection.apply(&mut config).unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { name, .. } if name == USER_AGENT));
    }

    #[test]
    fn rate_limit_follows_qps_and_burst() {
        let mut connection = connection();
        assert!(connection.rate_limit().is_some());
        connection.qps = 0.0;
        assert!(connection.rate_limit().is_none());
        connection.qps = f32::NAN;
        assert!(connection.rate_limit().is_none());
        connection.qps = f32::INFINITY;
        assert!(connection.rate_limit().is_none());
        connection.qps = 1e12;
        assert!(connection.rate_limit().is_none());
        connection.qps = 1e6;
        assert!(connection.rate_limit().is_some());
    }

    #[tokio::test]
    async fn builds_clients_with_and_without_limits() {
        let config = Config::new("http://127.0.0.1:6443".parse().unwrap());
        let mut connection = connection();
        assert!(connection.client(config.clone()).is_ok());
        connection.qps = -1.0;
        assert!(connection.client(config.clone()).is_ok());
        connection.qps = 1e12;
        assert!(connection.client(config.clone()).is_ok());
        connection.qps = f32::INFINITY;
        assert!(connection.client(config).is_ok());
    }

    #[tokio::test]
    async fn builds_tls_clients() {
        let mut config = Config::new("https://127.0.0.1:6443".parse().unwrap());
        config.accept_invalid_certs = true;
        assert!(connection().client(config.clone()).is_ok());

        config.accept_invalid_certs = false;
        config.root_cert = None;
        assert!(connection().client(config).is_ok());
    }
}
