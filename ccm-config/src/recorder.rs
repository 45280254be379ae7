//! Publishes events on behalf of the manager and logs each one
use crate::{Error, Result};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, Recorder, Reporter},
    Client,
};
use std::fmt;

/// Environment variables naming the instance publishing events, in order
const INSTANCE_ENV: [&str; 3] = ["CONTROLLER_POD_NAME", "POD_NAME", "HOSTNAME"];

/// Records events to the apiserver, logging them first
///
/// Events are reported as coming from the manager's user agent. The instance
/// is the pod name when it is injected through the downward API.
#[derive(Clone)]
pub struct EventRecorder {
    recorder: Recorder,
    reporter: Reporter,
}

impl fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecorder")
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

impl EventRecorder {
    /// A recorder reporting as `component`
    pub fn new(client: Client, component: &str) -> Self {
        let reporter = Reporter {
            controller: component.into(),
            instance: instance_name(|key| std::env::var(key).ok()),
        };
        Self {
            recorder: Recorder::new(client, reporter.clone()),
            reporter,
        }
    }

    /// Who events are reported as
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Log `event` and publish it against `reference`
    pub async fn publish(&self, event: &Event, reference: &ObjectReference) -> Result<()> {
        tracing::info!(
            kind = reference.kind.as_deref().unwrap_or_default(),
            namespace = reference.namespace.as_deref().unwrap_or_default(),
            name = reference.name.as_deref().unwrap_or_default(),
            event_type = ?event.type_,
            reason = %event.reason,
            note = event.note.as_deref().unwrap_or_default(),
            "event"
        );
        self.recorder
            .publish(event, reference)
            .await
            .map_err(Error::Client)
    }
}

fn instance_name(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    INSTANCE_ENV
        .into_iter()
        .filter_map(lookup)
        .find(|name| !name.is_empty())
}
