//! Effective-priority computation.
//!
//! The scheduler orders ready tasks by a derived key that favors deep
//! dependency chains (unblocking the most downstream work) and imminent
//! deadlines. The computation is a pure function of its inputs so it can
//! be re-run at any time and tested without storage.

use chrono::{DateTime, Utc};

/// Tuning knobs for the priority function.
#[derive(Debug, Clone, Copy)]
pub struct PriorityWeights {
    /// Boost per level of dependency depth.
    pub depth_weight: f64,
    /// Hours before a deadline within which urgency ramps up.
    pub deadline_horizon_hours: u64,
    /// Maximum boost for an imminent or overdue deadline.
    pub deadline_boost: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            depth_weight: 2.0,
            deadline_horizon_hours: 48,
            deadline_boost: 5.0,
        }
    }
}

/// Compute the effective ordering key for a task.
///
/// `base + depth_weight * depth + urgency`, where urgency is zero
/// without a deadline, ramps linearly from zero at the horizon to
/// `deadline_boost` at the deadline, and stays capped there when
/// overdue. `now` is an explicit input so the function stays pure.
pub fn calculated_priority(
    base_priority: u8,
    dependency_depth: u32,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    weights: &PriorityWeights,
) -> f64 {
    let base = base_priority as f64 + weights.depth_weight * dependency_depth as f64;
    base + deadline_urgency(deadline, now, weights)
}

fn deadline_urgency(
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    weights: &PriorityWeights,
) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let horizon_secs = (weights.deadline_horizon_hours * 3600) as f64;
    if horizon_secs <= 0.0 {
        return 0.0;
    }
    let remaining_secs = (deadline - now).num_seconds() as f64;
    if remaining_secs >= horizon_secs {
        return 0.0;
    }
    let fraction = 1.0 - (remaining_secs / horizon_secs).max(0.0);
    weights.deadline_boost * fraction
}
