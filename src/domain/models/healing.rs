//! Healing-task domain model and the strategy escalation graph.
//!
//! The graph is a static lookup table (node = strategy, edge = on-exhaustion
//! transition) so tests can enumerate every transition instead of chasing
//! dispatch through code paths.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Remediation tactic. Each carries its own attempt budget and backoff
/// schedule; exhaustion advances to the next node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStrategy {
    RetryWithBackoff,
    ClearCacheRetry,
    SwitchEndpoint,
    ReduceBatchSize,
    NotifyAndSkip,
    FullReset,
    EscalateToAgent,
}

/// Static per-strategy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyConfig {
    pub max_attempts: u32,
    /// Backoff before each attempt, indexed by attempt number
    pub backoff_ms: &'static [u64],
    /// Where exhaustion leads; `None` is terminal
    pub next: Option<HealingStrategy>,
}

impl HealingStrategy {
    /// All strategies, in escalation-graph order.
    pub const ALL: [HealingStrategy; 7] = [
        Self::RetryWithBackoff,
        Self::ClearCacheRetry,
        Self::SwitchEndpoint,
        Self::ReduceBatchSize,
        Self::NotifyAndSkip,
        Self::FullReset,
        Self::EscalateToAgent,
    ];

    pub const fn config(&self) -> StrategyConfig {
        match self {
            Self::RetryWithBackoff => StrategyConfig {
                max_attempts: 5,
                backoff_ms: &[1000, 2000, 4000, 8000, 16000],
                next: Some(Self::ClearCacheRetry),
            },
            Self::ClearCacheRetry => StrategyConfig {
                max_attempts: 2,
                backoff_ms: &[2000, 5000],
                next: Some(Self::SwitchEndpoint),
            },
            Self::SwitchEndpoint => StrategyConfig {
                max_attempts: 3,
                backoff_ms: &[1000, 3000, 5000],
                next: Some(Self::ReduceBatchSize),
            },
            Self::ReduceBatchSize => StrategyConfig {
                max_attempts: 3,
                backoff_ms: &[1000, 2000, 3000],
                next: Some(Self::NotifyAndSkip),
            },
            Self::NotifyAndSkip => StrategyConfig {
                max_attempts: 1,
                backoff_ms: &[0],
                next: Some(Self::EscalateToAgent),
            },
            Self::FullReset => StrategyConfig {
                max_attempts: 1,
                backoff_ms: &[5000],
                next: Some(Self::EscalateToAgent),
            },
            Self::EscalateToAgent => StrategyConfig {
                max_attempts: 1,
                backoff_ms: &[0],
                next: None,
            },
        }
    }

    /// Backoff for a zero-based attempt index, clamped to the schedule tail.
    pub fn backoff_for_attempt(&self, attempt: u32) -> u64 {
        let schedule = self.config().backoff_ms;
        let idx = (attempt as usize).min(schedule.len().saturating_sub(1));
        schedule[idx]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryWithBackoff => "retry_with_backoff",
            Self::ClearCacheRetry => "clear_cache_retry",
            Self::SwitchEndpoint => "switch_endpoint",
            Self::ReduceBatchSize => "reduce_batch_size",
            Self::NotifyAndSkip => "notify_and_skip",
            Self::FullReset => "full_reset",
            Self::EscalateToAgent => "escalate_to_agent",
        }
    }
}

/// Lifecycle of a healing task. `Resolved` and `Escalated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStatus {
    Pending,
    Attempting,
    Resolved,
    Escalated,
}

impl HealingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated)
    }
}

/// Severity attached to a healing task (distinct from cohesiveness issue
/// severity: this grades the operational incident, not the repo finding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// What went wrong, captured when the task is filed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingIssue {
    /// Free-form kind, e.g. "job_failure", "scrape_failure",
    /// "cohesiveness_critical", "stuck_job"
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: HealSeverity,
    pub description: String,
    /// Free-form context consulted by the strategies (repo_name, batch_size,
    /// original payload, offending issues)
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
}

/// Outcome of the attempt that finished a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: HealingStrategy,
    pub success: bool,
    pub message: String,
    pub attempt: u32,
    pub resolved_at: DateTime<Utc>,
    pub metrics: ResolutionMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionMetrics {
    pub time_to_resolve_ms: u64,
    pub resources_used: Vec<String>,
}

/// A remediation work item. `job_id` may be synthetic ("cron-*", "scrape-*",
/// "worker-error") when the trigger was not a coordinator job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingTask {
    pub id: String,
    pub job_id: String,
    pub issue: HealingIssue,
    pub strategy: HealingStrategy,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: HealingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealingTask {
    /// Create a pending task on the given strategy; the attempt budget comes
    /// from the strategy table unless the caller overrides it.
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        issue: HealingIssue,
        strategy: HealingStrategy,
        max_attempts: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            issue,
            strategy,
            attempts: 0,
            max_attempts: max_attempts.unwrap_or(strategy.config().max_attempts),
            status: HealingStatus::Pending,
            resolution: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exhausted after a failed execution once the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Advance to the next strategy in the graph, resetting counters.
    /// Returns false when the current strategy is terminal.
    pub fn escalate_strategy(&mut self, now: DateTime<Utc>) -> bool {
        match self.strategy.config().next {
            Some(next) => {
                self.strategy = next;
                self.attempts = 0;
                self.max_attempts = next.config().max_attempts;
                self.status = HealingStatus::Pending;
                self.updated_at = now;
                true
            }
            None => false,
        }
    }
}

/// Healer-wide counters. The rolling average stays exact under integer
/// arithmetic: avg_new = round((avg_old * (n-1) + sample) / n).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealerMetrics {
    pub total_attempts: u64,
    pub successful_resolutions: u64,
    pub failed_resolutions: u64,
    pub escalations: u64,
    pub average_time_to_resolve_ms: u64,
    #[serde(default)]
    pub strategy_uses: HashMap<HealingStrategy, u64>,
    #[serde(default)]
    pub strategy_successes: HashMap<HealingStrategy, u64>,
}

impl HealerMetrics {
    pub fn record_use(&mut self, strategy: HealingStrategy) {
        self.total_attempts += 1;
        *self.strategy_uses.entry(strategy).or_insert(0) += 1;
    }

    /// Record a successful resolution and fold its duration into the rolling
    /// average.
    pub fn record_success(&mut self, strategy: HealingStrategy, time_to_resolve_ms: u64) {
        self.successful_resolutions += 1;
        *self.strategy_successes.entry(strategy).or_insert(0) += 1;

        let n = self.successful_resolutions;
        let numerator = self.average_time_to_resolve_ms * (n - 1) + time_to_resolve_ms;
        self.average_time_to_resolve_ms = (numerator + n / 2) / n;
    }

    /// Escalation share of all attempts, in [0, 1].
    pub fn escalation_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.escalations as f64 / self.total_attempts as f64
    }
}
