use super::{ApplyError, ApplyTo};
use crate::{
    config::{KubeCloudSharedConfiguration, ServiceControllerConfiguration},
    net,
    validation::{Validate, ValidationError},
};

/// Settings shared between the kube and cloud controllers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KubeCloudSharedOptions {
    /// The settings being edited
    pub config: KubeCloudSharedConfiguration,
}

impl KubeCloudSharedOptions {
    /// Options starting out from `config`
    pub fn new(config: KubeCloudSharedConfiguration) -> Self {
        Self { config }
    }
}

impl Validate for KubeCloudSharedOptions {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        let cluster_cidr = self.config.cluster_cidr.trim();
        if self.config.allocate_node_cidrs && cluster_cidr.is_empty() {
            errors.push(ValidationError::ClusterCidrRequired);
        }
        if !cluster_cidr.is_empty() {
            for (cidr, parsed) in net::parse_cidrs(cluster_cidr) {
                if let Err(reason) = parsed {
                    errors.push(ValidationError::InvalidCidr {
                        flag: "--cluster-cidr",
                        value: cidr.into(),
                        reason,
                    });
                }
            }
        }
        errors
    }
}

impl ApplyTo<KubeCloudSharedConfiguration> for KubeCloudSharedOptions {
    fn apply_to(&self, target: &mut KubeCloudSharedConfiguration) -> Result<(), ApplyError> {
        target.clone_from(&self.config);
        Ok(())
    }
}

/// Service controller settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceControllerOptions {
    /// The settings being edited
    pub config: ServiceControllerConfiguration,
}

impl ServiceControllerOptions {
    /// Options starting out from `config`
    pub fn new(config: ServiceControllerConfiguration) -> Self {
        Self { config }
    }
}

// the concurrency limit spans groups and is checked by the aggregate
impl Validate for ServiceControllerOptions {
    fn validate(&self) -> Vec<ValidationError> {
        vec![]
    }
}

impl ApplyTo<ServiceControllerConfiguration> for ServiceControllerOptions {
    fn apply_to(&self, target: &mut ServiceControllerConfiguration) -> Result<(), ApplyError> {
        target.clone_from(&self.config);
        Ok(())
    }
}
