use super::{ApplyError, ApplyTo};
use crate::{
    config::NodeFilteringConfig,
    labels::Selector,
    validation::{Validate, ValidationError},
};

/// Which nodes the controllers observe
///
/// The selector strings stay raw until [`NodeFilteringOptions::selector`]
/// compiles them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeFilteringOptions {
    /// Filter nodes even when only an include selector is given
    pub enable_node_filtering: bool,
    /// `key=value` pairs a node must carry, e.g. `kubernetes.azure.com/managed=true`
    pub node_label_selector: String,
    /// `key=value` pairs a node must not carry
    pub node_exclude_labels: String,
}

impl NodeFilteringOptions {
    /// Whether watches should be scoped by [`Self::selector`]
    ///
    /// Exclusions alone turn filtering on. An include selector without
    /// `enable_node_filtering` does not.
    pub fn is_filtering(&self) -> bool {
        self.enable_node_filtering || !self.node_exclude_labels.is_empty()
    }

    /// Compile both selector strings into one selector
    pub fn selector(&self) -> Selector {
        Selector::compile(&self.node_label_selector, &self.node_exclude_labels)
    }
}

// malformed selector segments are logged and dropped when compiled
impl Validate for NodeFilteringOptions {
    fn validate(&self) -> Vec<ValidationError> {
        vec![]
    }
}

impl ApplyTo<NodeFilteringConfig> for NodeFilteringOptions {
    fn apply_to(&self, target: &mut NodeFilteringConfig) -> Result<(), ApplyError> {
        target.enable_node_filtering = self.enable_node_filtering;
        target.node_label_selector.clone_from(&self.node_label_selector);
        target.node_exclude_labels.clone_from(&self.node_exclude_labels);
        Ok(())
    }
}
