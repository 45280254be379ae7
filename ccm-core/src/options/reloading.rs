use super::{ApplyError, ApplyTo, SYSTEM_NAMESPACE};
use crate::{
    config::DynamicReloadingConfig,
    validation::{Validate, ValidationError},
};

/// Reload the cloud config from a secret instead of a static file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicReloadingOptions {
    /// Watch the secret and reload on change
    pub enable_dynamic_reloading: bool,
    /// Secret holding the cloud config
    pub cloud_config_secret_name: String,
    /// Namespace of that secret
    pub cloud_config_secret_namespace: String,
    /// Key of the cloud config within that secret
    pub cloud_config_key: String,
}

impl Default for DynamicReloadingOptions {
    fn default() -> Self {
        Self {
            enable_dynamic_reloading: false,
            cloud_config_secret_name: "azure-cloud-provider".into(),
            cloud_config_secret_namespace: SYSTEM_NAMESPACE.into(),
            cloud_config_key: "cloud-config".into(),
        }
    }
}

impl Validate for DynamicReloadingOptions {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        if self.enable_dynamic_reloading {
            if self.cloud_config_secret_name.is_empty() {
                errors.push(ValidationError::CloudConfigSecretName);
            }
            if self.cloud_config_secret_namespace.is_empty() {
                errors.push(ValidationError::CloudConfigSecretNamespace);
            }
        }
        errors
    }
}

impl ApplyTo<DynamicReloadingConfig> for DynamicReloadingOptions {
    fn apply_to(&self, target: &mut DynamicReloadingConfig) -> Result<(), ApplyError> {
        target.enable_dynamic_reloading = self.enable_dynamic_reloading;
        target.cloud_config_secret_name.clone_from(&self.cloud_config_secret_name);
        target
            .cloud_config_secret_namespace
            .clone_from(&self.cloud_config_secret_namespace);
        target.cloud_config_key.clone_from(&self.cloud_config_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_only_required_when_enabled() {
        let mut options = DynamicReloadingOptions {
            cloud_config_secret_name: String::new(),
            cloud_config_secret_namespace: String::new(),
            ..Default::default()
        };
        assert!(options.validate().is_empty());

        options.enable_dynamic_reloading = true;
        assert_eq!(options.validate(), vec![
            ValidationError::CloudConfigSecretName,
            ValidationError::CloudConfigSecretNamespace,
        ]);
    }

    #[test]
    fn apply_copies() {
        let options = DynamicReloadingOptions {
            enable_dynamic_reloading: true,
            ..Default::default()
        };
        let mut target = DynamicReloadingConfig::default();
        options.apply_to(&mut target).unwrap();
        assert!(target.enable_dynamic_reloading);
        assert_eq!(target.cloud_config_secret_name, "azure-cloud-provider");
        assert_eq!(target.cloud_config_secret_namespace, "kube-system");
        assert_eq!(target.cloud_config_key, "cloud-config");
    }
}
