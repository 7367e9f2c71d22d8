//! Engine telemetry gathered through `dmg telemetry metrics query`.
//!
//! Each host answers with `response.metric_sets`; every set names a metric
//! and lists its samples as `{labels, value}`. Samples are flattened into
//! keys built from the sorted `label:value` pairs plus the host, e.g.
//! `host:server-1,rank:0,target:3`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use crate::core::errors::HarnessError;
use crate::infra::hosts::HostSet;
use crate::tools::dmg::{Dmg, DmgResponse};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricSample {
    #[serde(default)]
    pub labels: BTreeMap<String, Value>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricSet {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metrics: Vec<MetricSample>,
}

/// Metric name → flattened label key → value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricData {
    data: BTreeMap<String, BTreeMap<String, f64>>,
    descriptions: BTreeMap<String, String>,
}

/// Allowed bounds for a metric value; either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

impl MetricData {
    /// Adds one host's `dmg telemetry metrics query` response.
    pub fn add_response(&mut self, host: &str, response: &DmgResponse) -> Result<(), HarnessError> {
        let sets = match response.response.get("metric_sets") {
            Some(sets) => Vec::<MetricSet>::deserialize(sets).map_err(|e| HarnessError::Parse {
                what: format!("telemetry from {host}"),
                detail: e.to_string(),
            })?,
            None => Vec::new(),
        };
        for set in sets {
            self.descriptions
                .entry(set.name.clone())
                .or_insert_with(|| set.description.clone());
            let entry = self.data.entry(set.name).or_default();
            for sample in set.metrics {
                entry.insert(label_key(host, &sample.labels), sample.value);
            }
        }
        Ok(())
    }

    /// Queries `names` on every host and collects the samples.
    pub async fn collect(dmg: &Dmg, hosts: &HostSet, names: &[&str]) -> Result<Self, HarnessError> {
        info!(hosts = %hosts, "querying telemetry metrics {}", names.join(","));
        let mut data = MetricData::default();
        for host in hosts.iter() {
            let response = dmg.telemetry_metrics_query(host, names).await?;
            data.add_response(host, &response)?;
        }
        Ok(data)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.descriptions.get(name).map(String::as_str)
    }

    /// Flattened label key → value for one metric.
    pub fn samples(&self, name: &str) -> Option<&BTreeMap<String, f64>> {
        self.data.get(name)
    }

    /// Sum of a metric across hosts and labels. With a filter, only samples
    /// whose key contains every `label:value` pair are summed.
    pub fn sum(&self, name: &str, filter: &[(&str, &str)]) -> f64 {
        let wanted: Vec<String> = filter.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        self.data
            .get(name)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|(key, _)| {
                        let parts: Vec<&str> = key.split(',').collect();
                        wanted.iter().all(|w| parts.contains(&w.as_str()))
                    })
                    .map(|(_, value)| value)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Every sample outside its metric's range, as `metric[key]=value`.
    /// Metrics without a range must not be negative.
    pub fn verify(&self, ranges: &BTreeMap<String, MetricRange>) -> Vec<String> {
        let fallback = MetricRange {
            min: Some(0.0),
            max: None,
        };
        let mut violations = Vec::new();
        for (name, samples) in &self.data {
            let range = ranges.get(name).copied().unwrap_or(fallback);
            for (key, value) in samples {
                if !range.contains(*value) {
                    violations.push(format!("{name}[{key}]={value}"));
                }
            }
        }
        violations
    }
}

/// Builds `host:<h>,<label>:<value>,...` with the pairs sorted.
pub fn label_key(host: &str, labels: &BTreeMap<String, Value>) -> String {
    let mut parts = vec![format!("host:{host}")];
    for (key, value) in labels {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        parts.push(format!("{key}:{value}"));
    }
    parts.sort();
    parts.join(",")
}
