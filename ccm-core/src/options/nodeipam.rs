use super::{ApplyError, ApplyTo};
use crate::{
    config::NodeIpamControllerConfiguration,
    net::{self, Cidr},
    validation::{Validate, ValidationError},
};

/// Node IPAM controller settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIpamControllerOptions {
    /// Primary service cluster IP range
    pub service_cidr: String,
    /// Secondary service cluster IP range, for dual-stack clusters
    pub secondary_service_cidr: String,
    /// Mask size for single-stack clusters, zero when unset
    pub node_cidr_mask_size: i32,
    /// Mask size for IPv4 node CIDRs in dual-stack clusters
    pub node_cidr_mask_size_ipv4: i32,
    /// Mask size for IPv6 node CIDRs in dual-stack clusters
    pub node_cidr_mask_size_ipv6: i32,
}

impl Default for NodeIpamControllerOptions {
    fn default() -> Self {
        Self {
            service_cidr: String::new(),
            secondary_service_cidr: String::new(),
            node_cidr_mask_size: 0,
            node_cidr_mask_size_ipv4: 24,
            node_cidr_mask_size_ipv6: 64,
        }
    }
}

fn service_cidr(flag: &'static str, value: &str, errors: &mut Vec<ValidationError>) -> Option<Cidr> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.contains(',') {
        errors.push(ValidationError::CidrListNotAllowed { flag });
        return None;
    }
    net::parse_cidr(value)
        .map_err(|reason| {
            errors.push(ValidationError::InvalidCidr {
                flag,
                value: value.into(),
                reason,
            })
        })
        .ok()
}

fn mask_size(flag: &'static str, size: i32, max: u8, errors: &mut Vec<ValidationError>) {
    if !(0..=i32::from(max)).contains(&size) {
        errors.push(ValidationError::NodeCidrMaskSize { flag, size, max });
    }
}

impl Validate for NodeIpamControllerOptions {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        let primary = service_cidr("--service-cluster-ip-range", &self.service_cidr, &mut errors);
        let secondary = service_cidr(
            "--secondary-service-cluster-ip-range",
            &self.secondary_service_cidr,
            &mut errors,
        );

        let dual_stack = match (primary, secondary) {
            (Some(primary), Some(secondary)) if primary.is_ipv4() == secondary.is_ipv4() => {
                errors.push(ValidationError::ServiceCidrFamilies);
                false
            }
            (Some(_), Some(_)) => true,
            _ => false,
        };

        if dual_stack && self.node_cidr_mask_size != 0 {
            errors.push(ValidationError::NodeCidrMaskSizeDualStack);
        }
        let max = primary.map_or(32, |cidr| net::max_prefix(&cidr.addr));
        mask_size("--node-cidr-mask-size", self.node_cidr_mask_size, max, &mut errors);
        mask_size("--node-cidr-mask-size-ipv4", self.node_cidr_mask_size_ipv4, 32, &mut errors);
        mask_size("--node-cidr-mask-size-ipv6", self.node_cidr_mask_size_ipv6, 128, &mut errors);
        errors
    }
}

impl ApplyTo<NodeIpamControllerConfiguration> for NodeIpamControllerOptions {
    fn apply_to(&self, target: &mut NodeIpamControllerConfiguration) -> Result<(), ApplyError> {
        target.service_cidr = self.service_cidr.trim().into();
        target.secondary_service_cidr = self.secondary_service_cidr.trim().into();
        target.node_cidr_mask_size = self.node_cidr_mask_size;
        target.node_cidr_mask_size_ipv4 = self.node_cidr_mask_size_ipv4;
        target.node_cidr_mask_size_ipv6 = self.node_cidr_mask_size_ipv6;
        Ok(())
    }
}
