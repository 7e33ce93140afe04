//! Serialized form of a pre-existing topology graph

use super::application::ApplicationId;
use super::instance::Listen;
use super::world::{Node, NodeId, World};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenSnapshot {
    pub ip: String,
    pub port: String,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub name: String,
    #[serde(default)]
    pub node: Option<NodeId>,
    #[serde(default)]
    pub tcp_listens: Vec<ListenSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSnapshot {
    pub id: ApplicationId,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub instances: Vec<InstanceSnapshot>,
}

/// Nodes and applications discovered before this pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub applications: Vec<ApplicationSnapshot>,
}

impl WorldSnapshot {
    pub fn into_world(self) -> World {
        let mut world = World::new();
        for node in self.nodes {
            world.add_node(node);
        }
        for app in self.applications {
            let idx = world.get_or_create_application(app.id, app.custom);
            for i in app.instances {
                let r = world.get_or_create_instance(idx, &i.name, i.node.as_ref());
                let instance = world.instance_mut(r);
                for l in i.tcp_listens {
                    instance.add_listen(Listen::new(l.ip, l.port, l.proxied), l.active);
                }
            }
        }
        world
    }
}
