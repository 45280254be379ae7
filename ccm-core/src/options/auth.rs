//! Delegated authentication and authorization of serving requests
//!
//! Both groups resolve against the apiserver named by the remote kubeconfig,
//! and are only applied when secure serving is enabled.
use super::ApplyError;
use crate::{
    config::{AuthenticationInfo, AuthorizationInfo, RequestHeaderInfo, SecureServingInfo},
    validation::{Validate, ValidationError},
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Front proxy (request header) authentication settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHeaderOptions {
    /// CA bundle used to verify the front proxy; empty disables it
    pub client_ca_file: String,
    /// Headers carrying the user name
    pub username_headers: Vec<String>,
    /// Headers carrying the groups
    pub group_headers: Vec<String>,
    /// Header prefixes carrying extra attributes
    pub extra_header_prefixes: Vec<String>,
    /// Common names allowed for the front proxy, empty allows all
    pub allowed_names: Vec<String>,
}

impl Default for RequestHeaderOptions {
    fn default() -> Self {
        Self {
            client_ca_file: String::new(),
            username_headers: vec!["x-remote-user".into()],
            group_headers: vec!["x-remote-group".into()],
            extra_header_prefixes: vec!["x-remote-extra-".into()],
            allowed_names: vec![],
        }
    }
}

/// Authentication delegated to the apiserver's TokenReview API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegatingAuthenticationOptions {
    /// Kubeconfig used to reach the apiserver; filled from `--kubeconfig`
    pub remote_kubeconfig_file: String,
    /// Fall back to in-cluster configuration when no kubeconfig is given
    pub remote_kubeconfig_optional: bool,
    /// How long token review results are cached
    pub cache_ttl: Duration,
    /// CA bundle used to verify client certificates
    pub client_ca_file: String,
    #[allow(missing_docs)]
    pub request_header: RequestHeaderOptions,
}

impl Default for DelegatingAuthenticationOptions {
    fn default() -> Self {
        Self {
            remote_kubeconfig_file: String::new(),
            remote_kubeconfig_optional: false,
            cache_ttl: Duration::from_secs(10),
            client_ca_file: String::new(),
            request_header: RequestHeaderOptions::default(),
        }
    }
}

impl DelegatingAuthenticationOptions {
    /// Resolve against `remote_kubeconfig`, registering the client CA with `serving`
    pub fn apply_to(
        &self,
        remote_kubeconfig: &str,
        serving: &mut SecureServingInfo,
    ) -> Result<AuthenticationInfo, ApplyError> {
        let remote_kubeconfig = remote_kubeconfig_path(
            "authentication",
            remote_kubeconfig,
            &self.remote_kubeconfig_file,
            self.remote_kubeconfig_optional,
        )?;
        if !self.client_ca_file.is_empty() {
            serving.client_ca_file = Some(PathBuf::from(&self.client_ca_file));
        }
        let header = &self.request_header;
        let request_header = (!header.client_ca_file.is_empty()).then(|| RequestHeaderInfo {
            client_ca_file: PathBuf::from(&header.client_ca_file),
            username_headers: header.username_headers.clone(),
            group_headers: header.group_headers.clone(),
            extra_header_prefixes: header.extra_header_prefixes.clone(),
            allowed_names: header.allowed_names.clone(),
        });
        Ok(AuthenticationInfo {
            remote_kubeconfig,
            cache_ttl: self.cache_ttl,
            request_header,
        })
    }
}

impl Validate for DelegatingAuthenticationOptions {
    fn validate(&self) -> Vec<ValidationError> {
        let header = &self.request_header;
        if !header.client_ca_file.is_empty() && header.username_headers.is_empty() {
            vec![ValidationError::RequestHeaderUsernameHeaders]
        } else {
            vec![]
        }
    }
}

/// Authorization delegated to the apiserver's SubjectAccessReview API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegatingAuthorizationOptions {
    /// Kubeconfig used to reach the apiserver; filled from `--kubeconfig`
    pub remote_kubeconfig_file: String,
    /// Fall back to in-cluster configuration when no kubeconfig is given
    pub remote_kubeconfig_optional: bool,
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

impl Default for DelegatingAuthorizationOptions {
    fn default() -> Self {
        Self {
            remote_kubeconfig_file: String::new(),
            remote_kubeconfig_optional: false,
            allow_cache_ttl: Duration::from_secs(10),
            deny_cache_ttl: Duration::from_secs(10),
            always_allow_paths: vec!["/healthz".into(), "/readyz".into(), "/livez".into()],
            always_allow_groups: vec!["system:masters".into()],
            webhook_retry_steps: 5,
        }
    }
}

impl DelegatingAuthorizationOptions {
    /// Resolve against `remote_kubeconfig`
    pub fn apply_to(
        &self,
        remote_kubeconfig: &str,
        _serving: &mut SecureServingInfo,
    ) -> Result<AuthorizationInfo, ApplyError> {
        Ok(AuthorizationInfo {
            remote_kubeconfig: remote_kubeconfig_path(
                "authorization",
                remote_kubeconfig,
                &self.remote_kubeconfig_file,
                self.remote_kubeconfig_optional,
            )?,
            allow_cache_ttl: self.allow_cache_ttl,
            deny_cache_ttl: self.deny_cache_ttl,
            always_allow_paths: self.always_allow_paths.clone(),
            always_allow_groups: self.always_allow_groups.clone(),
            webhook_retry_steps: self.webhook_retry_steps,
        })
    }
}

impl Validate for DelegatingAuthorizationOptions {
    fn validate(&self) -> Vec<ValidationError> {
        if self.webhook_retry_steps <= 0 {
            vec![ValidationError::WebhookRetrySteps(self.webhook_retry_steps)]
        } else {
            vec![]
        }
    }
}

/// `given` wins over `configured`; `None` means in-cluster configuration
fn remote_kubeconfig_path(
    purpose: &'static str,
    given: &str,
    configured: &str,
    optional: bool,
) -> Result<Option<PathBuf>, ApplyError> {
    let path = if given.is_empty() { configured } else { given };
    if path.is_empty() {
        if !optional {
            return Err(ApplyError::RemoteKubeconfigRequired(purpose));
        }
        tracing::debug!(purpose, "no remote kubeconfig given, delegating with in-cluster configuration");
        return Ok(None);
    }
    let path = Path::new(path);
    if !path.exists() {
        return Err(ApplyError::MissingRemoteKubeconfig(path.into()));
    }
    Ok(Some(path.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServingCert;

    fn serving() -> SecureServingInfo {
        SecureServingInfo {
            bind_address: "127.0.0.1:10258".parse().unwrap(),
            listener: None,
            cert: ServingCert {
                name: "test".into(),
                cert_pem: String::new(),
                key_pem: String::new(),
            },
            client_ca_file: None,
        }
    }

    #[test]
    fn validation() {
        let mut authn = DelegatingAuthenticationOptions::default();
        assert!(authn.validate().is_empty());
        authn.request_header.client_ca_file = "/front-proxy-ca.crt".into();
        assert!(authn.validate().is_empty());
        authn.request_header.username_headers.clear();
        assert_eq!(authn.validate(), vec![ValidationError::RequestHeaderUsernameHeaders]);

        let mut authz = DelegatingAuthorizationOptions::default();
        assert!(authz.validate().is_empty());
        authz.webhook_retry_steps = 0;
        assert_eq!(authz.validate(), vec![ValidationError::WebhookRetrySteps(0)]);
    }

    #[test]
    fn optional_remote_kubeconfig_falls_back_to_in_cluster() {
        let mut serving = serving();
        let authn = DelegatingAuthenticationOptions {
            remote_kubeconfig_optional: true,
            ..Default::default()
        };
        let info = authn.apply_to("", &mut serving).unwrap();
        assert_eq!(info.remote_kubeconfig, None);
        assert_eq!(info.request_header, None);

        let authz = DelegatingAuthorizationOptions::default();
        let err = authz.apply_to("", &mut serving).unwrap_err();
        assert!(matches!(err, ApplyError::RemoteKubeconfigRequired("authorization")));
    }

    #[test]
    fn remote_kubeconfig_must_exist() {
        let mut serving = serving();
        let kubeconfig = tempfile::NamedTempFile::new().expect("create kubeconfig");
        let path = kubeconfig.path().to_string_lossy().into_owned();

        let authz = DelegatingAuthorizationOptions::default();
        let info = authz.apply_to(&path, &mut serving).unwrap();
        assert_eq!(info.remote_kubeconfig.as_deref(), Some(kubeconfig.path()));
        assert_eq!(info.always_allow_groups, vec!["system:masters"]);

        let err = authz.apply_to("/nonexistent/kubeconfig", &mut serving).unwrap_err();
        assert!(matches!(err, ApplyError::MissingRemoteKubeconfig(_)));
    }

    #[test]
    fn client_ca_is_registered_with_serving() {
        let mut serving = serving();
        let authn = DelegatingAuthenticationOptions {
            remote_kubeconfig_optional: true,
            client_ca_file: "/etc/kubernetes/pki/ca.crt".into(),
            request_header: RequestHeaderOptions {
                client_ca_file: "/etc/kubernetes/pki/front-proxy-ca.crt".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let info = authn.apply_to("", &mut serving).unwrap();
        assert_eq!(serving.client_ca_file, Some("/etc/kubernetes/pki/ca.crt".into()));
        let header = info.request_header.unwrap();
        assert_eq!(header.username_headers, vec!["x-remote-user"]);
        assert_eq!(header.client_ca_file, PathBuf::from("/etc/kubernetes/pki/front-proxy-ca.crt"));
    }
}
