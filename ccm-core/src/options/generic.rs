use super::{ApplyError, ApplyTo, ControllerNames};
use crate::{
    config::GenericControllerManagerConfiguration,
    validation::{Validate, ValidationError},
};
use std::time::Duration;

/// Tolerance applied to the retry period when checking leader election timing
const JITTER_FACTOR: f64 = 1.2;

/// Settings shared by every controller manager
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenericControllerManagerOptions {
    /// The settings being edited
    pub config: GenericControllerManagerConfiguration,
}

impl GenericControllerManagerOptions {
    /// Options starting out from `config`
    pub fn new(config: GenericControllerManagerConfiguration) -> Self {
        Self { config }
    }

    /// Bind to the controllers a binary knows about
    ///
    /// Validating and applying `controllers` needs the known names, so both
    /// happen through the returned view.
    pub fn for_controllers<'a>(&'a self, names: &'a ControllerNames) -> GenericOptionsFor<'a> {
        GenericOptionsFor { options: self, names }
    }
}

/// [`GenericControllerManagerOptions`] bound to a set of [`ControllerNames`]
#[derive(Clone, Copy, Debug)]
pub struct GenericOptionsFor<'a> {
    options: &'a GenericControllerManagerOptions,
    names: &'a ControllerNames,
}

impl Validate for GenericOptionsFor<'_> {
    fn validate(&self) -> Vec<ValidationError> {
        let config = &self.options.config;
        let mut errors = vec![];

        for controller in &config.controllers {
            if controller == "*" {
                continue;
            }
            let name = controller.strip_prefix('-').unwrap_or(controller);
            if !self.names.is_known(name) {
                errors.push(ValidationError::UnknownController(controller.clone()));
            }
        }

        let connection = &config.client_connection;
        if !is_json(&connection.content_type) {
            errors.push(ValidationError::UnsupportedContentType(connection.content_type.clone()));
        }
        if connection.qps < 0.0 {
            errors.push(ValidationError::NegativeQps(connection.qps.to_string()));
        }

        let leader_election = &config.leader_election;
        if leader_election.leader_elect {
            if leader_election.resource_lock != "leases" {
                errors.push(ValidationError::ResourceLock(leader_election.resource_lock.clone()));
            }
            errors.extend(leader_election_timing(
                leader_election.lease_duration,
                leader_election.renew_deadline,
                leader_election.retry_period,
            ));
            if leader_election.resource_name.is_empty() {
                errors.push(ValidationError::LeaderElection("resourceName is required".into()));
            }
            if leader_election.resource_namespace.is_empty() {
                errors.push(ValidationError::LeaderElection("resourceNamespace is required".into()));
            }
        }

        errors
    }
}

impl ApplyTo<GenericControllerManagerConfiguration> for GenericOptionsFor<'_> {
    fn apply_to(&self, target: &mut GenericControllerManagerConfiguration) -> Result<(), ApplyError> {
        let config = &self.options.config;
        target.min_resync_period = config.min_resync_period;
        target.client_connection = config.client_connection.clone();
        target.controller_start_interval = config.controller_start_interval;
        target.leader_election = config.leader_election.clone();
        target.debugging = config.debugging.clone();
        target.controllers = config
            .controllers
            .iter()
            .map(|controller| match controller.strip_prefix('-') {
                Some(name) => format!("-{}", self.names.resolve(name)),
                None => self.names.resolve(controller).to_string(),
            })
            .collect();
        Ok(())
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.is_empty() || essence.eq_ignore_ascii_case("application/json")
}

fn leader_election_timing(lease: Duration, renew: Duration, retry: Duration) -> Vec<ValidationError> {
    let mut errors = vec![];
    let mut fail = |msg: String| errors.push(ValidationError::LeaderElection(msg));
    if lease.is_zero() {
        fail("leaseDuration must be greater than zero".into());
    }
    if renew.is_zero() {
        fail("renewDeadline must be greater than zero".into());
    }
    if retry.is_zero() {
        fail("retryPeriod must be greater than zero".into());
    }
    if lease <= renew {
        fail("leaseDuration must be greater than renewDeadline".into());
    }
    if renew <= retry.mul_f64(JITTER_FACTOR) {
        fail(format!("renewDeadline must be greater than retryPeriod*{JITTER_FACTOR}"));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> ControllerNames {
        ControllerNames::new(["cloud-node", "service", "route"]).alias("service-lb-controller", "service")
    }

    fn options(controllers: &[&str]) -> GenericControllerManagerOptions {
        let mut options = GenericControllerManagerOptions::default();
        options.config.controllers = controllers.iter().map(ToString::to_string).collect();
        options.config.leader_election.resource_name = "cloud-controller-manager".into();
        options.config.leader_election.resource_namespace = "kube-system".into();
        options
    }

    #[test]
    fn known_controllers_and_aliases_validate() {
        let names = names();
        let options = options(&["*", "-route", "service-lb-controller", "-service-lb-controller"]);
        assert_eq!(options.for_controllers(&names).validate(), vec![]);
    }

    #[test]
    fn unknown_controllers_are_reported_as_given() {
        let names = names();
        let options = options(&["bogus", "-nope"]);
        assert_eq!(options.for_controllers(&names).validate(), vec![
            ValidationError::UnknownController("bogus".into()),
            ValidationError::UnknownController("-nope".into()),
        ]);
    }

    #[test]
    fn aliases_resolve_keeping_the_disable_prefix() {
        let names = names();
        let options = options(&["*", "-service-lb-controller", "cloud-node"]);
        let mut target = GenericControllerManagerConfiguration::default();
        options.for_controllers(&names).apply_to(&mut target).unwrap();
        assert_eq!(target.controllers, vec!["*", "-service", "cloud-node"]);
    }

    #[test]
    fn apply_copies_every_field() {
        let names = names();
        let mut options = options(&["*"]);
        options.config.min_resync_period = Duration::from_secs(60);
        options.config.client_connection.qps = 5.0;
        options.config.leader_election.leader_elect = false;
        let mut target = GenericControllerManagerConfiguration::default();
        options.for_controllers(&names).apply_to(&mut target).unwrap();
        assert_eq!(target, options.config);
    }

    #[test]
    fn connection_settings() {
        let names = names();
        let mut options = options(&["*"]);
        options.config.client_connection.content_type = "application/vnd.kubernetes.protobuf".into();
        options.config.client_connection.qps = -1.0;
        assert_eq!(options.for_controllers(&names).validate(), vec![
            ValidationError::UnsupportedContentType("application/vnd.kubernetes.protobuf".into()),
            ValidationError::NegativeQps("-1".into()),
        ]);

        options.config.client_connection.content_type = "application/json; charset=utf-8".into();
        options.config.client_connection.qps = 0.0;
        assert_eq!(options.for_controllers(&names).validate(), vec![]);
    }

    #[test]
    fn leader_election_is_only_checked_when_enabled() {
        let names = names();
        let mut options = options(&["*"]);
        options.config.leader_election.resource_lock = "endpoints".into();
        options.config.leader_election.renew_deadline = Duration::from_secs(20);
        let errors = options.for_controllers(&names).validate();
        assert_eq!(errors, vec![
            ValidationError::ResourceLock("endpoints".into()),
            ValidationError::LeaderElection("leaseDuration must be greater than renewDeadline".into()),
        ]);

        options.config.leader_election.leader_elect = false;
        assert_eq!(options.for_controllers(&names).validate(), vec![]);
    }

    #[test]
    fn renew_deadline_must_outlast_jittered_retries() {
        let secs = Duration::from_secs;
        let errors = leader_election_timing(secs(15), secs(2), secs(2));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("renewDeadline must be greater than retryPeriod"));
        assert!(leader_election_timing(secs(15), secs(10), secs(2)).is_empty());
    }
}
