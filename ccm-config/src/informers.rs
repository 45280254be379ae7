//! Shared watches for controllers, optionally scoped to a node selector
use ccm_core::{ResyncPeriod, Selector};
use futures::Stream;
use k8s_openapi::api::core::v1::Node;
use kube::{
    runtime::{watcher, watcher::Event},
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{fmt, fmt::Debug, time::Duration};

/// Hands out watches sharing one client, resync generator and label selector
///
/// A filtered factory sets its selector as the server-side `labelSelector` of
/// every watch it hands out, whatever the resource.
#[derive(Clone)]
pub struct SharedInformerFactory {
    client: Client,
    resync: ResyncPeriod,
    selector: Option<Selector>,
}

impl fmt::Debug for SharedInformerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedInformerFactory")
            .field("resync", &self.resync)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl SharedInformerFactory {
    /// A factory watching everything
    pub fn new(client: Client, resync: ResyncPeriod) -> Self {
        Self {
            client,
            resync,
            selector: None,
        }
    }

    /// A factory scoping every watch to `selector`
    pub fn filtered(client: Client, resync: ResyncPeriod, selector: Selector) -> Self {
        Self {
            client,
            resync,
            selector: Some(selector),
        }
    }

    /// Whether this factory was built with a selector
    pub fn is_filtered(&self) -> bool {
        self.selector.is_some()
    }

    /// The selector applied to every watch, if any
    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    /// The server-side label selector, `None` when nothing is filtered out
    pub fn label_selector(&self) -> Option<String> {
        self.selector
            .as_ref()
            .filter(|selector| !selector.selects_all())
            .map(Selector::to_selector_string)
    }

    /// Whether `obj` passes this factory's selector
    pub fn selects<K: ResourceExt>(&self, obj: &K) -> bool {
        self.selector
            .as_ref()
            .is_none_or(|selector| selector.matches(obj.labels()))
    }

    /// Watch configuration carrying the label selector
    pub fn watcher_config(&self) -> watcher::Config {
        let config = watcher::Config::default();
        match self.label_selector() {
            Some(selector) => config.labels(&selector),
            None => config,
        }
    }

    /// The shared resync generator
    pub fn resync(&self) -> &ResyncPeriod {
        &self.resync
    }

    /// A cluster-wide watch of `K`, with its own jittered resync period
    pub fn informer<K>(&self) -> Informer<K>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
    {
        Informer {
            api: Api::all(self.client.clone()),
            config: self.watcher_config(),
            resync_period: self.resync.draw(),
        }
    }

    /// A watch of all nodes
    pub fn nodes(&self) -> Informer<Node> {
        self.informer()
    }
}

/// A watch handed out by [`SharedInformerFactory`]
#[derive(Clone)]
pub struct Informer<K> {
    api: Api<K>,
    config: watcher::Config,
    resync_period: Duration,
}

impl<K> Informer<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    /// The api being watched
    pub fn api(&self) -> &Api<K> {
        &self.api
    }

    /// The watch configuration, including any label selector
    pub fn config(&self) -> &watcher::Config {
        &self.config
    }

    /// How often consumers should resync their caches
    pub fn resync_period(&self) -> Duration {
        self.resync_period
    }

    /// Start watching
    pub fn stream(&self) -> impl Stream<Item = Result<Event<K>, watcher::Error>> + Send {
        watcher(self.api.clone(), self.config.clone())
    }
}
