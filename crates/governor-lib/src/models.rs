//! Core data models for the resource governor

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

/// Current Unix time in milliseconds
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single resource observation for one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSample {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, f64>,
}

impl ResourceSample {
    /// Create a sample that only carries CPU usage
    pub fn cpu(timestamp: i64, cpu: f64) -> Self {
        Self {
            timestamp,
            cpu,
            ..Default::default()
        }
    }

    /// Create a sample that only carries memory usage
    pub fn memory(timestamp: i64, memory: f64) -> Self {
        Self {
            timestamp,
            memory,
            ..Default::default()
        }
    }

    /// Read the value of the given resource dimension.
    ///
    /// Missing custom dimensions read as zero.
    pub fn value_of(&self, kind: &ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
            ResourceKind::Disk => self.disk,
            ResourceKind::Network => self.network,
            ResourceKind::Custom(name) => self.custom.get(name).copied().unwrap_or(0.0),
        }
    }
}

/// Resource dimension the governor budgets
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    Cpu,
    Memory,
    Disk,
    Network,
    Custom(String),
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "cpu"),
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Disk => write!(f, "disk"),
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Statistic used as the quota baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Average,
    Median,
    P90,
    P95,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Average => write!(f, "average"),
            MetricType::Median => write!(f, "median"),
            MetricType::P90 => write!(f, "p90"),
            MetricType::P95 => write!(f, "p95"),
        }
    }
}

/// Statistics derived from the accepted samples of a rolling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatistics {
    pub average: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub peak: f64,
    pub stddev: f64,
    /// Relative deviation of the short-term moving average from the window average, in [-1, 1]
    pub trend: f64,
    pub sample_count: usize,
}

impl ResourceStatistics {
    /// Pick the statistic named by a tier policy
    pub fn select(&self, metric: MetricType) -> f64 {
        match metric {
            MetricType::Average => self.average,
            MetricType::Median => self.median,
            MetricType::P90 => self.p90,
            MetricType::P95 => self.p95,
        }
    }
}

/// Priority class of a service
///
/// Ordering follows priority: `Critical > Core > Standard > BestEffort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Critical,
    Core,
    Standard,
    BestEffort,
}

impl ServiceTier {
    pub const ALL: [ServiceTier; 4] = [
        ServiceTier::Critical,
        ServiceTier::Core,
        ServiceTier::Standard,
        ServiceTier::BestEffort,
    ];

    /// Numeric priority, higher wins
    pub fn priority(&self) -> u8 {
        match self {
            ServiceTier::Critical => 3,
            ServiceTier::Core => 2,
            ServiceTier::Standard => 1,
            ServiceTier::BestEffort => 0,
        }
    }
}

impl Ord for ServiceTier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for ServiceTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceTier::Critical => write!(f, "critical"),
            ServiceTier::Core => write!(f, "core"),
            ServiceTier::Standard => write!(f, "standard"),
            ServiceTier::BestEffort => write!(f, "best_effort"),
        }
    }
}

/// Per-tier policy knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub metric_type: MetricType,
    /// Multiplier applied to the baseline statistic
    pub safety_margin: f64,
    /// `max_burst = current_guarantee * burst_ratio`
    pub burst_ratio: f64,
    /// Whether burst held by this tier may be reclaimed by higher tiers
    pub preemptible: bool,
    /// Guarantee floor as a fraction of the observed window peak
    pub min_guarantee_ratio: f64,
}

/// One entry of a quota's audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub old_guarantee: f64,
    pub new_guarantee: f64,
    pub reason: String,
    pub statistics: Option<ResourceStatistics>,
}

/// Adaptive quota of a single service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveQuota {
    pub tier: ServiceTier,
    pub base_minimum: f64,
    pub current_guarantee: f64,
    pub max_burst: f64,
    /// Unix timestamp in milliseconds of the last change (0 if never adjusted)
    pub last_adjusted: i64,
    pub adjustment_log: VecDeque<AdjustmentRecord>,
    #[serde(skip)]
    history_limit: usize,
}

impl AdaptiveQuota {
    /// Create a quota sitting at its base minimum
    pub fn new(tier: ServiceTier, base_minimum: f64, burst_ratio: f64, history_limit: usize) -> Self {
        Self {
            tier,
            base_minimum,
            current_guarantee: base_minimum,
            max_burst: base_minimum * burst_ratio,
            last_adjusted: 0,
            adjustment_log: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Publish a new guarantee and append the audit record.
    ///
    /// The guarantee never drops below `base_minimum`.
    pub fn apply(
        &mut self,
        new_guarantee: f64,
        burst_ratio: f64,
        reason: impl Into<String>,
        statistics: Option<ResourceStatistics>,
        now_ms: i64,
    ) -> AdjustmentRecord {
        let new_guarantee = new_guarantee.max(self.base_minimum);
        let record = AdjustmentRecord {
            timestamp: now_ms,
            old_guarantee: self.current_guarantee,
            new_guarantee,
            reason: reason.into(),
            statistics,
        };

        self.current_guarantee = new_guarantee;
        self.max_burst = new_guarantee * burst_ratio;
        self.last_adjusted = now_ms;

        while self.adjustment_log.len() >= self.history_limit {
            self.adjustment_log.pop_front();
        }
        self.adjustment_log.push_back(record.clone());

        record
    }
}

/// Limits handed to the enforcement layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessLimits {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub io: Option<f64>,
    pub fds: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, f64>,
}

impl ProcessLimits {
    /// Build limits that cap only the governed resource
    pub fn for_resource(kind: &ResourceKind, ceiling: f64, fds: Option<u64>) -> Self {
        let mut limits = ProcessLimits {
            fds,
            ..Default::default()
        };
        match kind {
            ResourceKind::Cpu => limits.cpu = Some(ceiling),
            ResourceKind::Memory => limits.memory = Some(ceiling),
            ResourceKind::Disk | ResourceKind::Network => limits.io = Some(ceiling),
            ResourceKind::Custom(name) => {
                limits.custom.insert(name.clone(), ceiling);
            }
        }
        limits
    }
}

/// A request for capacity
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub amount: f64,
    /// Bounded wait for the overflow phase; `None` fails fast
    pub max_wait: Option<Duration>,
}

impl ResourceRequest {
    pub fn fail_fast(amount: f64) -> Self {
        Self {
            amount,
            max_wait: None,
        }
    }

    pub fn wait_up_to(amount: f64, max_wait: Duration) -> Self {
        Self {
            amount,
            max_wait: Some(max_wait),
        }
    }
}

/// Admission phase that satisfied a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPhase {
    Guaranteed,
    Burst,
    Preemption,
}

impl AdmissionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionPhase::Guaranteed => "guaranteed",
            AdmissionPhase::Burst => "burst",
            AdmissionPhase::Preemption => "preemption",
        }
    }
}

/// Capacity granted to a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: u64,
    pub service: String,
    pub guaranteed: f64,
    pub burst: f64,
    /// Unix timestamp in milliseconds
    pub granted_at: i64,
    pub phase: AdmissionPhase,
}

impl Allocation {
    pub fn total(&self) -> f64 {
        self.guaranteed + self.burst
    }
}

/// Queued notice sent to a holder whose burst was reclaimed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreemptionNotice {
    pub allocation_id: u64,
    pub service: String,
    pub reclaimed: f64,
    pub remaining_burst: f64,
    pub preempted_by: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}
