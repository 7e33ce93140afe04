//! Label-keyed metric input delivered by the acquisition layer

use super::world::NodeId;
use crate::timeseries::TimeSeries;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Cache key for container-scoped samples
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeContainerId {
    pub node: NodeId,
    pub container_id: String,
}

/// One labeled series returned by a metric query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricValues {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub values: TimeSeries,
}

impl MetricValues {
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>, values: TimeSeries) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            values,
        }
    }

    /// Label value, empty when absent
    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn container_id(&self) -> &str {
        self.label("container_id")
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.label("machine_id"), self.label("system_uuid"))
    }

    pub fn node_container_id(&self) -> NodeContainerId {
        NodeContainerId {
            node: self.node_id(),
            container_id: self.container_id().to_string(),
        }
    }

    /// Destination as seen by the caller (service address)
    pub fn destination(&self) -> &str {
        self.label("destination")
    }

    /// Destination after proxying, empty if not proxied
    pub fn actual_destination(&self) -> &str {
        self.label("actual_destination")
    }

    pub fn connection_key(&self) -> String {
        match self.actual_destination() {
            "" => self.destination().to_string(),
            actual => format!("{} ({})", self.destination(), actual),
        }
    }
}

/// Query name -> returned series
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricBatch(HashMap<String, Vec<MetricValues>>);

impl MetricBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, query: &str) -> &[MetricValues] {
        self.0.get(query).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, query: &str, metric: MetricValues) {
        self.0.entry(query.to_string()).or_default().push(metric);
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scrape parameters of the job that produced a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeJobStatus {
    pub job: String,
    pub instance: String,
    pub scrape_interval_secs: i64,
}

/// Lookup of scrape parameters by `job` / `instance` labels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ScrapeJobStatus>", into = "Vec<ScrapeJobStatus>")]
pub struct ScrapeJobStatuses {
    by_job: HashMap<(String, String), ScrapeJobStatus>,
}

impl ScrapeJobStatuses {
    pub fn insert(&mut self, status: ScrapeJobStatus) {
        self.by_job
            .insert((status.job.clone(), status.instance.clone()), status);
    }

    pub fn get(&self, labels: &BTreeMap<String, String>) -> Option<&ScrapeJobStatus> {
        let job = labels.get("job")?;
        let instance = labels.get("instance")?;
        self.by_job.get(&(job.clone(), instance.clone()))
    }
}

impl From<Vec<ScrapeJobStatus>> for ScrapeJobStatuses {
    fn from(statuses: Vec<ScrapeJobStatus>) -> Self {
        let mut s = Self::default();
        for status in statuses {
            s.insert(status);
        }
        s
    }
}

impl From<ScrapeJobStatuses> for Vec<ScrapeJobStatus> {
    fn from(s: ScrapeJobStatuses) -> Self {
        let mut statuses: Vec<_> = s.by_job.into_values().collect();
        statuses.sort_by(|a, b| (&a.job, &a.instance).cmp(&(&b.job, &b.instance)));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_key() {
        let plain = MetricValues::new([("destination", "10.0.0.5:6379")], TimeSeries::default());
        assert_eq!(plain.connection_key(), "10.0.0.5:6379");

        let proxied = MetricValues::new(
            [
                ("destination", "10.96.0.10:80"),
                ("actual_destination", "10.1.2.3:8080"),
            ],
            TimeSeries::default(),
        );
        assert_eq!(proxied.connection_key(), "10.96.0.10:80 (10.1.2.3:8080)");
        assert_eq!(proxied.label("missing"), "");
    }

    #[test]
    fn test_batch_deserializes_from_json() {
        let json = r#"{
            "container_cpu_usage": [
                {"labels": {"container_id": "/k8s/default/web-1/app", "machine_id": "m1"},
                 "values": {"from": 0, "step": 30, "values": [0.5, null]}}
            ]
        }"#;
        let batch: MetricBatch = serde_json::from_str(json).unwrap();
        let m = &batch.get("container_cpu_usage")[0];
        assert_eq!(m.container_id(), "/k8s/default/web-1/app");
        assert_eq!(m.node_id(), NodeId::new("m1", ""));
        assert_eq!(m.values.values(), vec![Some(0.5), None]);
        assert!(batch.get("container_memory_rss").is_empty());
    }

    #[test]
    fn test_scrape_job_lookup() {
        let statuses = ScrapeJobStatuses::from(vec![ScrapeJobStatus {
            job: "node-agent".into(),
            instance: "10.0.0.1:80".into(),
            scrape_interval_secs: 60,
        }]);
        let mut labels = BTreeMap::new();
        labels.insert("job".to_string(), "node-agent".to_string());
        labels.insert("instance".to_string(), "10.0.0.1:80".to_string());
        assert_eq!(statuses.get(&labels).map(|s| s.scrape_interval_secs), Some(60));

        labels.remove("instance");
        assert!(statuses.get(&labels).is_none());
    }
}
