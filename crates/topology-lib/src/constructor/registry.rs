//! Pass-scoped lookup of instances and containers
//!
//! The registry is rebuilt from the world at the start of every pass, so
//! instances discovered earlier are found instead of duplicated. It caches
//! the outcome for each `(node, container id)` pair, including failures, so
//! a malformed identifier is reported once per pass rather than per sample.

use super::identifier::{ApplicationRef, ContainerIdentity, NO_NAMESPACE};
use crate::model::{InstanceRef, MetricValues, NodeContainerId, NodeId, Project, World};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    namespace: String,
    name: String,
    node: Option<NodeId>,
}

impl InstanceKey {
    fn new(namespace: &str, name: &str, node: Option<&NodeId>) -> Self {
        let namespace = if namespace.is_empty() {
            NO_NAMESPACE
        } else {
            namespace
        };
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            node: node.cloned(),
        }
    }
}

/// Entity a sample applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub instance: InstanceRef,
    /// Raw container id; `None` for application-scoped samples
    pub container: Option<String>,
}

/// Get-or-create index of instances and containers for one pass
#[derive(Debug, Default)]
pub struct EntityRegistry {
    instances: HashMap<InstanceKey, InstanceRef>,
    apps: HashMap<(String, String), usize>,
    containers: HashMap<NodeContainerId, Option<Target>>,
    instances_created: usize,
}

impl EntityRegistry {
    /// Index the instances and namespaced applications already in `world`
    pub fn new(world: &World) -> Self {
        let mut registry = Self::default();
        for (app_idx, app) in world.applications().iter().enumerate() {
            if !app.id.namespace.is_empty() {
                registry
                    .apps
                    .entry((app.id.namespace.clone(), app.id.name.clone()))
                    .or_insert(app_idx);
            }
            for (idx, instance) in app.instances().iter().enumerate() {
                let key =
                    InstanceKey::new(&app.id.namespace, &instance.name, instance.node.as_ref());
                registry.instances.insert(
                    key,
                    InstanceRef {
                        app: app_idx,
                        instance: idx,
                    },
                );
            }
        }
        registry
    }

    pub fn instances_created(&self) -> usize {
        self.instances_created
    }

    /// Find or create the instance and container for a parsed identity
    ///
    /// Application overrides from project settings apply only when the
    /// instance is created.
    pub fn resolve(
        &mut self,
        world: &mut World,
        project: &Project,
        identity: &ContainerIdentity,
        container_id: &str,
        node: Option<&NodeId>,
    ) -> Option<Target> {
        let node_name = node
            .and_then(|id| world.node(id))
            .map(|n| n.name.clone())
            .unwrap_or_default();
        let resolved = identity.resolve(&node_name);
        let key = InstanceKey::new(&resolved.namespace, &resolved.instance_name, node);

        let instance = match self.instances.get(&key) {
            Some(&r) => r,
            None => {
                let Some(mut app_id) = resolved.application else {
                    debug!(
                        namespace = %resolved.namespace,
                        instance = %resolved.instance_name,
                        "Instance not discovered yet, skipping"
                    );
                    return None;
                };
                let custom = project.custom_application_name(&resolved.instance_name);
                if let Some(name) = custom {
                    app_id.name = name.to_string();
                }
                let app = world.get_or_create_application(app_id, custom.is_some());
                let before = world.application(app).instances().len();
                let r = world.get_or_create_instance(app, &resolved.instance_name, node);
                if world.application(app).instances().len() > before {
                    self.instances_created += 1;
                }
                self.instances.insert(key, r);
                r
            }
        };

        world
            .instance_mut(instance)
            .get_or_create_container(container_id, &resolved.container_name);
        Some(Target {
            instance,
            container: Some(container_id.to_string()),
        })
    }

    /// First instance of an application named by a compact `app_id`
    pub fn resolve_by_application_id(&self, world: &World, app_id: &str) -> Option<InstanceRef> {
        let app_ref = match ApplicationRef::parse(app_id) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Skipping sample with invalid app id");
                return None;
            }
        };
        let &app = self.apps.get(&(app_ref.namespace, app_ref.name))?;
        if world.application(app).instances().is_empty() {
            debug!(app_id = %app_id, "Application has no instances yet");
            return None;
        }
        Some(InstanceRef { app, instance: 0 })
    }

    /// Resolve the entity a container-scoped sample refers to
    pub fn resolve_metric(
        &mut self,
        world: &mut World,
        project: &Project,
        metric: &MetricValues,
    ) -> Option<Target> {
        let app_id = metric.label("app_id");
        if !app_id.is_empty() {
            return self
                .resolve_by_application_id(world, app_id)
                .map(|instance| Target {
                    instance,
                    container: None,
                });
        }

        let key = metric.node_container_id();
        if let Some(cached) = self.containers.get(&key) {
            return cached.clone();
        }
        let target = self.resolve_container(world, project, metric);
        self.containers.insert(key, target.clone());
        target
    }

    fn resolve_container(
        &mut self,
        world: &mut World,
        project: &Project,
        metric: &MetricValues,
    ) -> Option<Target> {
        let node_id = metric.node_id();
        let node = if node_id.machine_id.is_empty() {
            None
        } else if world.node(&node_id).is_some() {
            Some(node_id)
        } else {
            debug!(node = %node_id, "Unknown node, skipping container");
            return None;
        };

        let container_id = metric.container_id();
        let identity = match ContainerIdentity::parse(container_id) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Skipping sample with unresolvable container id");
                return None;
            }
        };
        if identity.is_orchestrated() {
            world.integration_status.kube_state_metrics_required = true;
        }
        self.resolve(world, project, &identity, container_id, node.as_ref())
    }
}
