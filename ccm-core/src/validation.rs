//! Validation errors, collected across all option groups
use std::fmt;
use thiserror::Error;

/// A single violated constraint
///
/// Messages name the command line flag a user would change to fix it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("--cloud-provider cannot be empty")]
    CloudProviderEmpty,

    #[error("--concurrent-service-syncs is limited to 1 only (got {0})")]
    ConcurrentServiceSyncs(i32),

    #[error("--cloud-config cannot be empty when --enable-dynamic-reloading is not set to true")]
    CloudConfigRequired,

    #[error("{0:?} is not in the list of known controllers")]
    UnknownController(String),

    #[error("resourceLock value must be \"leases\" (got {0:?})")]
    ResourceLock(String),

    #[error("leader election: {0}")]
    LeaderElection(String),

    #[error("--kube-api-content-type {0:?} is not supported, only JSON content types are")]
    UnsupportedContentType(String),

    #[error("--kube-api-qps must not be negative (got {0})")]
    NegativeQps(String),

    #[error("--secure-port {0} must be between 0 and 65535, inclusive")]
    SecurePortOutOfRange(i32),

    #[error("--tls-cert-file and --tls-private-key-file must be specified together")]
    IncompleteCertKey,

    #[error("--requestheader-username-headers must be set when --requestheader-client-ca-file is set")]
    RequestHeaderUsernameHeaders,

    #[error("number of webhook retry attempts must be greater than 0 (got {0})")]
    WebhookRetrySteps(i32),

    #[error("--cluster-cidr must be set when --allocate-node-cidrs is true")]
    ClusterCidrRequired,

    #[error("{flag} {value:?} is not valid: {reason}")]
    InvalidCidr {
        flag: &'static str,
        value: String,
        reason: String,
    },

    #[error("{flag} can not contain \",\"")]
    CidrListNotAllowed { flag: &'static str },

    #[error("--service-cluster-ip-range and --secondary-service-cluster-ip-range must be of different IP families")]
    ServiceCidrFamilies,

    #[error("usage of --node-cidr-mask-size is not allowed with dual-stack clusters")]
    NodeCidrMaskSizeDualStack,

    #[error("{flag} {size} must be between 0 and {max}")]
    NodeCidrMaskSize { flag: &'static str, size: i32, max: u8 },

    #[error("--cloud-config-secret-name should not be empty when --enable-dynamic-reloading is specified")]
    CloudConfigSecretName,

    #[error("--cloud-config-secret-namespace should not be empty when --enable-dynamic-reloading is specified")]
    CloudConfigSecretNamespace,
}

/// Something that can check its own settings
///
/// Implementations only look at their own fields, so groups can be validated
/// in any order and every failure is reported.
pub trait Validate {
    /// Every constraint this group violates
    fn validate(&self) -> Vec<ValidationError>;
}

/// Run every validator, collecting all failures
pub fn validate_all<'a>(groups: impl IntoIterator<Item = &'a dyn Validate>) -> Vec<ValidationError> {
    groups.into_iter().flat_map(|group| group.validate()).collect()
}

/// All failures of one validation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateError(Vec<ValidationError>);

impl AggregateError {
    /// `Ok` if and only if no errors were collected
    pub fn from_errors(errors: Vec<ValidationError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self(errors))
        }
    }

    /// Every underlying failure, in the order they were found
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "{only}");
        }
        let msgs: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", msgs.join(", "))
    }
}

impl std::error::Error for AggregateError {}

impl IntoIterator for AggregateError {
    type IntoIter = std::vec::IntoIter<ValidationError>;
    type Item = ValidationError;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing(Vec<ValidationError>);

    impl Validate for Failing {
        fn validate(&self) -> Vec<ValidationError> {
            self.0.clone()
        }
    }

    #[test]
    fn collects_from_every_group() {
        let a = Failing(vec![ValidationError::CloudProviderEmpty]);
        let ok = Failing(vec![]);
        let b = Failing(vec![ValidationError::ConcurrentServiceSyncs(5)]);
        let groups: [&dyn Validate; 3] = [&a, &ok, &b];

        let err = AggregateError::from_errors(validate_all(groups)).unwrap_err();
        assert_eq!(err.errors(), &[
            ValidationError::CloudProviderEmpty,
            ValidationError::ConcurrentServiceSyncs(5),
        ]);
        assert_eq!(
            err.to_string(),
            "[--cloud-provider cannot be empty, --concurrent-service-syncs is limited to 1 only (got 5)]"
        );
        assert_eq!(err.into_iter().count(), 2);
    }

    #[test]
    fn no_errors_is_ok() {
        let ok = Failing(vec![]);
        let groups: [&dyn Validate; 2] = [&ok, &ok];
        assert_eq!(AggregateError::from_errors(validate_all(groups)), Ok(()));
    }

    #[test]
    fn single_error_displays_plainly() {
        let err = AggregateError::from_errors(vec![ValidationError::CloudConfigRequired]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "--cloud-config cannot be empty when --enable-dynamic-reloading is not set to true"
        );
    }
}
