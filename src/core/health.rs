//! Shared per-service health registry.
//!
//! One record per registered service, created `Unknown` at startup and only
//! mutated by probe results. The aggregate is recomputed from the records on
//! every read.
use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, SystemTime},
};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthRecord {
    pub name: String,
    pub status: ServiceStatus,
    #[serde(with = "unix_secs")]
    pub last_checked: Option<SystemTime>,
    #[serde(rename = "latency_ms", with = "millis")]
    pub latency: Option<Duration>,
    pub consecutive_errors: u32,
}

impl ServiceHealthRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ServiceStatus::Unknown,
            last_checked: None,
            latency: None,
            consecutive_errors: 0,
        }
    }
}

/// Aggregate over all records: healthy when every service is healthy,
/// unhealthy when none is (and at least one is registered), degraded otherwise.
pub fn aggregate_status<'a>(statuses: impl IntoIterator<Item = &'a ServiceStatus>) -> ServiceStatus {
    let (mut total, mut healthy) = (0usize, 0usize);
    for status in statuses {
        total += 1;
        if *status == ServiceStatus::Healthy {
            healthy += 1;
        }
    }

    if healthy == total {
        ServiceStatus::Healthy
    } else if healthy == 0 {
        ServiceStatus::Unhealthy
    } else {
        ServiceStatus::Degraded
    }
}

#[derive(Debug, Default)]
pub struct HealthRegistry {
    records: RwLock<HashMap<String, ServiceHealthRecord>>,
}

impl HealthRegistry {
    pub fn new<'a>(services: impl IntoIterator<Item = &'a str>) -> Self {
        let records = services
            .into_iter()
            .map(|name| (name.to_string(), ServiceHealthRecord::new(name)))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn record_success(&self, service: &str, latency: Duration) -> Option<ServiceStatus> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = records.get_mut(service)?;
        record.consecutive_errors = 0;
        record.status = ServiceStatus::Healthy;
        record.latency = Some(latency);
        record.last_checked = Some(SystemTime::now());
        Some(record.status)
    }

    /// Count a failed probe. The status only flips to unhealthy once the error
    /// streak exceeds `threshold`; below that the previous status is kept.
    pub fn record_failure(&self, service: &str, threshold: u32) -> Option<ServiceStatus> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = records.get_mut(service)?;
        record.consecutive_errors = record.consecutive_errors.saturating_add(1);
        if record.consecutive_errors > threshold {
            record.status = ServiceStatus::Unhealthy;
        }
        record.last_checked = Some(SystemTime::now());
        Some(record.status)
    }

    pub fn status(&self, service: &str) -> Option<ServiceStatus> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(service)
            .map(|record| record.status)
    }

    /// Records sorted by service name.
    pub fn snapshot(&self) -> Vec<ServiceHealthRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn aggregate(&self) -> ServiceStatus {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        aggregate_status(records.values().map(|record| &record.status))
    }

    pub fn healthy_count(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|record| record.status == ServiceStatus::Healthy)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

mod unix_secs {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        match value.and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}
