//! Metrics definitions for request coalescing.

/// Label for the coalescer name in metrics.
pub const COALESCER_LABEL: &str = "coalescer";

/// Label for the outcome of a generation in metrics.
pub const OUTCOME_LABEL: &str = "outcome";

/// Counter for upstream executions performed by leaders.
pub const COALESCE_LEADER_EXECUTIONS_TOTAL: &str = "coalesce_leader_executions_total";

/// Counter for callers that joined an in-flight request as followers.
pub const COALESCE_FOLLOWER_JOINS_TOTAL: &str = "coalesce_follower_joins_total";

/// Counter for finished generations, labeled by outcome.
pub const COALESCE_GENERATIONS_TOTAL: &str = "coalesce_generations_total";

/// Histogram of followers served by a single upstream execution.
pub const COALESCE_FOLLOWERS_PER_GENERATION: &str = "coalesce_followers_per_generation";

/// Histogram of upstream execution durations in seconds.
pub const COALESCE_UPSTREAM_DURATION_SECONDS: &str = "coalesce_upstream_duration_seconds";
