//! Cross-zone and internet traffic accounting

use super::merge::merge_into;
use crate::model::{Connection, InstanceRef, World};
use crate::net::{is_ip_external, parse_ip};
use crate::timeseries::{Reducer, TimeSeries};

/// Region and availability zone of one end of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub region: Option<String>,
    pub zone: Option<String>,
}

impl Placement {
    pub fn new(region: impl Into<String>, zone: impl Into<String>) -> Self {
        let (region, zone): (String, String) = (region.into(), zone.into());
        Self {
            region: (!region.is_empty()).then_some(region),
            zone: (!zone.is_empty()).then_some(zone),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    SameZone,
    CrossZone,
    Internet,
    Unclassified,
}

/// Classify traffic between two placements
///
/// Zones are compared only within one region. Without comparable zones the
/// destination address decides: public IPs and hostnames are internet.
pub fn classify(source: &Placement, destination: &Placement, destination_ip: &str) -> TrafficClass {
    if let (Some(src_region), Some(src_zone), Some(dst_region), Some(dst_zone)) = (
        &source.region,
        &source.zone,
        &destination.region,
        &destination.zone,
    ) {
        if src_region == dst_region {
            return if src_zone == dst_zone {
                TrafficClass::SameZone
            } else {
                TrafficClass::CrossZone
            };
        }
    }
    match parse_ip(destination_ip) {
        None => TrafficClass::Internet,
        Some(ip) if is_ip_external(ip) => TrafficClass::Internet,
        Some(_) => TrafficClass::Unclassified,
    }
}

fn source_placement(world: &World, r: InstanceRef, conn: &Connection) -> Placement {
    if let Some(node) = world.instance_node(r) {
        if node.availability_zone.is_some() {
            return Placement {
                region: node.region.clone(),
                zone: node.availability_zone.clone(),
            };
        }
    }
    Placement {
        region: conn.source_region.clone(),
        zone: conn.source_az.clone(),
    }
}

fn destination_placement(world: &World, conn: &Connection) -> Placement {
    conn.remote_instance
        .and_then(|r| world.instance_node(r))
        .map(|node| Placement {
            region: node.region.clone(),
            zone: node.availability_zone.clone(),
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
enum Aggregate {
    CrossAzIngress,
    CrossAzEgress,
    InternetEgress,
}

/// Totals of one classification run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSummary {
    pub cross_zone: usize,
    pub internet: usize,
}

/// Add every connection's byte counters to the owning and remote
/// applications' traffic aggregates
///
/// Received bytes mirror sent bytes with ingress and egress swapped; only
/// sent bytes count as internet egress.
pub fn classify_traffic(world: &mut World) -> TrafficSummary {
    let mut summary = TrafficSummary::default();
    let mut updates: Vec<(usize, Aggregate, TimeSeries)> = Vec::new();

    for r in world.instance_refs() {
        for conn in world.instance(r).upstreams.values() {
            if conn.bytes_sent.is_empty() && conn.bytes_received.is_empty() {
                continue;
            }
            let src = source_placement(world, r, conn);
            let dst = destination_placement(world, conn);
            match classify(&src, &dst, &conn.service_remote_ip) {
                TrafficClass::CrossZone => {
                    let Some(remote) = conn.remote_instance else {
                        continue;
                    };
                    summary.cross_zone += 1;
                    if !conn.bytes_sent.is_empty() {
                        updates.push((r.app, Aggregate::CrossAzEgress, conn.bytes_sent.clone()));
                        updates.push((
                            remote.app,
                            Aggregate::CrossAzIngress,
                            conn.bytes_sent.clone(),
                        ));
                    }
                    if !conn.bytes_received.is_empty() {
                        updates.push((
                            r.app,
                            Aggregate::CrossAzIngress,
                            conn.bytes_received.clone(),
                        ));
                        updates.push((
                            remote.app,
                            Aggregate::CrossAzEgress,
                            conn.bytes_received.clone(),
                        ));
                    }
                }
                TrafficClass::Internet if !conn.bytes_sent.is_empty() => {
                    summary.internet += 1;
                    updates.push((r.app, Aggregate::InternetEgress, conn.bytes_sent.clone()));
                }
                _ => {}
            }
        }
    }

    for (app, aggregate, series) in updates {
        let stats = &mut world.application_mut(app).traffic_stats;
        let target = match aggregate {
            Aggregate::CrossAzIngress => &mut stats.cross_az_ingress,
            Aggregate::CrossAzEgress => &mut stats.cross_az_egress,
            Aggregate::InternetEgress => &mut stats.internet_egress,
        };
        merge_into(target, &series, Reducer::NanSum);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApplicationId, ApplicationKind, Node, NodeId};

    fn bytes(v: f32) -> TimeSeries {
        TimeSeries::from_values(0, 30, &[Some(v), Some(v)])
    }

    /// Two single-instance applications on nodes in the given zones
    fn world(src_zone: &str, dst_zone: &str) -> (World, InstanceRef, InstanceRef) {
        let mut world = World::new();
        let n1 = NodeId::new("m1", "");
        let n2 = NodeId::new("m2", "");
        world.add_node(Node::new(n1.clone(), "node-1").with_placement("us-east-1", src_zone));
        world.add_node(Node::new(n2.clone(), "node-2").with_placement("us-east-1", dst_zone));
        let api = world.get_or_create_application(
            ApplicationId::new("shop", ApplicationKind::Deployment, "api"),
            false,
        );
        let db = world.get_or_create_application(
            ApplicationId::new("shop", ApplicationKind::StatefulSet, "db"),
            false,
        );
        let api = world.get_or_create_instance(api, "api-1", Some(&n1));
        let db = world.get_or_create_instance(db, "db-0", Some(&n2));
        (world, api, db)
    }

    fn connect(world: &mut World, from: InstanceRef, to: Option<InstanceRef>, ip: &str) {
        world.instance_mut(from).upstreams.insert(
            format!("{}:5432", ip),
            Connection {
                service_remote_ip: ip.into(),
                service_remote_port: "5432".into(),
                remote_instance: to,
                bytes_sent: bytes(100.0),
                bytes_received: bytes(40.0),
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_cross_zone_traffic() {
        let (mut world, api, db) = world("us-east-1a", "us-east-1b");
        connect(&mut world, api, Some(db), "10.0.1.5");

        let summary = classify_traffic(&mut world);
        assert_eq!(summary.cross_zone, 1);

        let api_stats = &world.application(api.app).traffic_stats;
        let db_stats = &world.application(db.app).traffic_stats;
        assert_eq!(api_stats.cross_az_egress.last(), Some(100.0));
        assert_eq!(api_stats.cross_az_ingress.last(), Some(40.0));
        assert_eq!(db_stats.cross_az_ingress.last(), Some(100.0));
        assert_eq!(db_stats.cross_az_egress.last(), Some(40.0));
        assert!(api_stats.internet_egress.is_empty());
    }

    #[test]
    fn test_same_zone_traffic_untouched() {
        let (mut world, api, db) = world("us-east-1a", "us-east-1a");
        connect(&mut world, api, Some(db), "10.0.1.5");

        assert_eq!(classify_traffic(&mut world), TrafficSummary::default());
        for app in world.applications() {
            assert!(app.traffic_stats.cross_az_egress.is_empty());
            assert!(app.traffic_stats.cross_az_ingress.is_empty());
            assert!(app.traffic_stats.internet_egress.is_empty());
        }
    }

    #[test]
    fn test_internet_egress() {
        let (mut world, api, _) = world("us-east-1a", "us-east-1b");
        connect(&mut world, api, None, "8.8.8.8");
        connect(&mut world, api, None, "10.0.9.9");

        let summary = classify_traffic(&mut world);
        assert_eq!(summary.internet, 1);
        let stats = &world.application(api.app).traffic_stats;
        assert_eq!(stats.internet_egress.last(), Some(100.0));
        assert!(stats.cross_az_ingress.is_empty());
    }

    #[test]
    fn test_label_placement_used_without_node() {
        let (mut world, api, db) = world("us-east-1a", "us-east-1b");
        let orphan_app = world.get_or_create_application(
            ApplicationId::new("", ApplicationKind::Unknown, "batch"),
            false,
        );
        let orphan = world.get_or_create_instance(orphan_app, "batch@", None);
        connect(&mut world, orphan, Some(db), "10.0.1.5");
        for conn in world.instance_mut(orphan).upstreams.values_mut() {
            conn.source_region = Some("us-east-1".into());
            conn.source_az = Some("us-east-1c".into());
        }

        classify_traffic(&mut world);
        assert_eq!(
            world.application(orphan_app).traffic_stats.cross_az_egress.last(),
            Some(100.0)
        );
        assert!(world.application(api.app).traffic_stats.cross_az_egress.is_empty());
    }

    #[test]
    fn test_classify_by_address() {
        let unknown = Placement::default();
        assert_eq!(classify(&unknown, &unknown, "api.stripe.com"), TrafficClass::Internet);
        assert_eq!(classify(&unknown, &unknown, "172.16.0.1"), TrafficClass::Unclassified);
        let a = Placement::new("eu-west-1", "eu-west-1a");
        let b = Placement::new("us-east-1", "us-east-1a");
        // different regions fall through to the address check
        assert_eq!(classify(&a, &b, "10.0.0.1"), TrafficClass::Unclassified);
        assert_eq!(classify(&a, &a, "1.1.1.1"), TrafficClass::SameZone);
    }
}
