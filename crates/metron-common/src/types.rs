use crate::proto;
use serde::{Deserialize, Serialize};

/// Metric kind, deciding how an update is applied.
///
/// # Examples
///
/// ```
/// use metron_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last write wins.
    Gauge,
    /// Deltas accumulate.
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = InvalidMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(InvalidMetric::UnknownKind(s.to_string())),
        }
    }
}

/// Reasons a metric record is rejected before it reaches storage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidMetric {
    #[error("unknown metric type: {0}")]
    UnknownKind(String),

    #[error("metric id must not be empty")]
    EmptyId,

    #[error("gauge '{0}' has no value")]
    MissingValue(String),

    #[error("counter '{0}' has no delta")]
    MissingDelta(String),

    #[error("metric '{0}' carries both delta and value")]
    BothFields(String),

    #[error("gauge '{0}' value is not a finite number")]
    NonFinite(String),

    #[error("cannot parse {kind} value '{raw}'")]
    Unparseable { kind: MetricKind, raw: String },
}

/// A single metric update as it travels over the wire.
///
/// Exactly one of `delta` (counters) or `value` (gauges) is set. `hash` is
/// reserved for a signing layer and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
            hash: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
            hash: None,
        }
    }

    /// Builds a metric from the `/update/{type}/{name}/{value}` path form.
    ///
    /// ```
    /// use metron_common::types::Metric;
    ///
    /// let m = Metric::parse("gauge", "Alloc", "12.5").unwrap();
    /// assert_eq!(m.value, Some(12.5));
    /// assert!(Metric::parse("counter", "PollCount", "1.5").is_err());
    /// ```
    pub fn parse(kind: &str, id: &str, raw: &str) -> Result<Self, InvalidMetric> {
        let kind: MetricKind = kind.parse()?;
        let unparseable = || InvalidMetric::Unparseable {
            kind,
            raw: raw.to_string(),
        };
        let metric = match kind {
            MetricKind::Gauge => Metric::gauge(id, raw.parse().map_err(|_| unparseable())?),
            MetricKind::Counter => Metric::counter(id, raw.parse().map_err(|_| unparseable())?),
        };
        metric.validate()?;
        Ok(metric)
    }

    /// Checks the one-of-delta-or-value invariant.
    pub fn validate(&self) -> Result<(), InvalidMetric> {
        if self.id.is_empty() {
            return Err(InvalidMetric::EmptyId);
        }
        match (self.kind, self.delta, self.value) {
            (_, Some(_), Some(_)) => Err(InvalidMetric::BothFields(self.id.clone())),
            (MetricKind::Gauge, _, None) => Err(InvalidMetric::MissingValue(self.id.clone())),
            (MetricKind::Counter, None, _) => Err(InvalidMetric::MissingDelta(self.id.clone())),
            (MetricKind::Gauge, _, Some(v)) if !v.is_finite() => {
                Err(InvalidMetric::NonFinite(self.id.clone()))
            }
            _ => Ok(()),
        }
    }
}

impl From<&Metric> for proto::Metric {
    fn from(m: &Metric) -> Self {
        let kind = match m.kind {
            MetricKind::Gauge => proto::MetricType::Gauge,
            MetricKind::Counter => proto::MetricType::Counter,
        };
        proto::Metric {
            id: m.id.clone(),
            r#type: kind as i32,
            delta: m.delta.unwrap_or_default(),
            value: m.value.unwrap_or_default(),
            hash: m.hash.clone().unwrap_or_default(),
        }
    }
}

impl TryFrom<proto::Metric> for Metric {
    type Error = InvalidMetric;

    fn try_from(m: proto::Metric) -> Result<Self, Self::Error> {
        let kind = proto::MetricType::try_from(m.r#type)
            .map_err(|_| InvalidMetric::UnknownKind(m.r#type.to_string()))?;
        let mut metric = match kind {
            proto::MetricType::Gauge => Metric::gauge(m.id, m.value),
            proto::MetricType::Counter => Metric::counter(m.id, m.delta),
        };
        if !m.hash.is_empty() {
            metric.hash = Some(m.hash);
        }
        metric.validate()?;
        Ok(metric)
    }
}
