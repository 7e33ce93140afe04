//! The topology graph: nodes, applications and pass-independent context

use super::application::{Application, ApplicationId};
use super::instance::Instance;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Node identity as reported by the collection agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub machine_id: String,
    #[serde(default)]
    pub system_uuid: String,
}

impl NodeId {
    pub fn new(machine_id: impl Into<String>, system_uuid: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            system_uuid: system_uuid.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.system_uuid.is_empty() {
            f.write_str(&self.machine_id)
        } else {
            write!(f, "{}/{}", self.machine_id, self.system_uuid)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gpu {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    /// Names of instances using this GPU
    #[serde(default)]
    pub instances: BTreeSet<String>,
}

/// A host running instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub gpus: HashMap<String, Gpu>,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            region: None,
            availability_zone: None,
            gpus: HashMap::new(),
        }
    }

    pub fn with_placement(mut self, region: impl Into<String>, az: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self.availability_zone = Some(az.into());
        self
    }
}

/// Virtual address fronting a set of instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub cluster_ip: String,
    /// Application the service routes to, when known
    #[serde(default)]
    pub destination: Option<ApplicationId>,
}

/// Project-level settings consulted during construction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Instance name -> application name overrides
    #[serde(default)]
    pub custom_applications: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub settings: ProjectSettings,
}

impl Project {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settings: ProjectSettings::default(),
        }
    }

    pub fn custom_application_name(&self, instance_name: &str) -> Option<&str> {
        self.settings
            .custom_applications
            .get(instance_name)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntegrationStatus {
    /// Orchestrator pod identifiers were seen; pods come from kube-state-metrics
    pub kube_state_metrics_required: bool,
}

/// Stable address of an instance within a [`World`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub app: usize,
    pub instance: usize,
}

/// The topology graph. Owns every entity; nothing is removed during a pass,
/// so [`InstanceRef`] indices stay valid.
#[derive(Debug, Default)]
pub struct World {
    nodes: Vec<Node>,
    node_index: HashMap<NodeId, usize>,
    applications: Vec<Application>,
    app_index: HashMap<ApplicationId, usize>,
    pub integration_status: IntegrationStatus,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        match self.node_index.get(&node.id) {
            Some(&idx) => self.nodes[idx] = node,
            None => {
                self.node_index.insert(node.id.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.node_index.get(id).map(|&idx| &mut self.nodes[idx])
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    pub fn application(&self, idx: usize) -> &Application {
        &self.applications[idx]
    }

    pub fn application_mut(&mut self, idx: usize) -> &mut Application {
        &mut self.applications[idx]
    }

    pub fn application_index(&self, id: &ApplicationId) -> Option<usize> {
        self.app_index.get(id).copied()
    }

    pub fn get_application(&self, id: &ApplicationId) -> Option<&Application> {
        self.application_index(id).map(|idx| &self.applications[idx])
    }

    /// First application with this namespace and name, any kind
    pub fn application_by_ns_and_name(&self, namespace: &str, name: &str) -> Option<usize> {
        self.applications
            .iter()
            .position(|a| a.id.namespace == namespace && a.id.name == name)
    }

    pub fn get_or_create_application(&mut self, id: ApplicationId, custom: bool) -> usize {
        if let Some(idx) = self.application_index(&id) {
            return idx;
        }
        let idx = self.applications.len();
        self.app_index.insert(id.clone(), idx);
        self.applications.push(Application::new(id, custom));
        idx
    }

    /// Instance of `app` with this name on this node, created if absent
    pub fn get_or_create_instance(
        &mut self,
        app: usize,
        name: &str,
        node: Option<&NodeId>,
    ) -> InstanceRef {
        let application = &mut self.applications[app];
        let instance = match application.find_instance(name, node) {
            Some(idx) => idx,
            None => {
                let owner = application.id.clone();
                application.push_instance(Instance::new(name, owner, node.cloned()))
            }
        };
        InstanceRef { app, instance }
    }

    pub fn instance(&self, r: InstanceRef) -> &Instance {
        &self.applications[r.app].instances()[r.instance]
    }

    pub fn instance_mut(&mut self, r: InstanceRef) -> &mut Instance {
        &mut self.applications[r.app].instances_mut()[r.instance]
    }

    /// All instance refs in application then instance order
    pub fn instance_refs(&self) -> Vec<InstanceRef> {
        self.applications
            .iter()
            .enumerate()
            .flat_map(|(app, a)| {
                (0..a.instances().len()).map(move |instance| InstanceRef { app, instance })
            })
            .collect()
    }

    /// Node hosting an instance, if placed on a known node
    pub fn instance_node(&self, r: InstanceRef) -> Option<&Node> {
        self.instance(r).node.as_ref().and_then(|id| self.node(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApplicationKind;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut world = World::new();
        let id = ApplicationId::new("_", ApplicationKind::Unknown, "nginx");
        let node = NodeId::new("m1", "");

        let app = world.get_or_create_application(id.clone(), false);
        assert_eq!(world.get_or_create_application(id, true), app);

        let a = world.get_or_create_instance(app, "nginx@n1", Some(&node));
        let b = world.get_or_create_instance(app, "nginx@n1", Some(&node));
        assert_eq!(a, b);
        assert!(!world.application(app).custom);

        // same name on another node is a distinct instance
        let other = NodeId::new("m2", "");
        let c = world.get_or_create_instance(app, "nginx@n1", Some(&other));
        assert_ne!(a, c);
        assert_eq!(world.application(app).instances().len(), 2);
    }

    #[test]
    fn test_instance_owner_and_node_lookup() {
        let mut world = World::new();
        let node_id = NodeId::new("m1", "u1");
        world.add_node(Node::new(node_id.clone(), "node-1").with_placement("eu", "eu-a"));

        let id = ApplicationId::new("shop", ApplicationKind::Deployment, "api");
        let app = world.get_or_create_application(id.clone(), false);
        let r = world.get_or_create_instance(app, "api-7d9f", Some(&node_id));

        assert_eq!(world.instance(r).owner, id);
        assert_eq!(world.instance_node(r).map(|n| n.name.as_str()), Some("node-1"));
        assert_eq!(world.application_by_ns_and_name("shop", "api"), Some(app));
        assert_eq!(world.instance_refs(), vec![r]);
    }

    #[test]
    fn test_custom_application_name() {
        let mut project = Project::new("p1");
        project
            .settings
            .custom_applications
            .insert("10.0.0.5:6379".into(), "cache".into());
        assert_eq!(project.custom_application_name("10.0.0.5:6379"), Some("cache"));
        assert_eq!(project.custom_application_name("10.0.0.6:6379"), None);
    }
}
