//! Task classification and task-based model selection

use crate::registry::ModelDescriptor;
use crate::request::UnifiedRequest;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Default long-context threshold in characters of message text
pub const DEFAULT_LONG_CONTEXT_THRESHOLD: usize = 50_000;

// ============================================================================
// Task Type
// ============================================================================

/// Coarse request class used when no model was named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// At least one image part
    Vision,
    /// Tools attached
    FunctionCalling,
    /// Message text above the long-context threshold
    LongContext,
    /// Anything else
    General,
}

impl TaskType {
    /// Get the task type as a string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::FunctionCalling => "function_calling",
            Self::LongContext => "long_context",
            Self::General => "general",
        }
    }

    /// Whether a model has the capability this task needs
    #[must_use]
    pub fn is_served_by(&self, model: &ModelDescriptor) -> bool {
        match self {
            Self::Vision => model.capabilities.vision,
            Self::FunctionCalling => model.capabilities.function_calling,
            Self::LongContext | Self::General => true,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a request; images win over tools, tools over length
#[must_use]
pub fn detect_task_type(request: &UnifiedRequest, long_context_threshold: usize) -> TaskType {
    if request.has_images() {
        TaskType::Vision
    } else if !request.tools.is_empty() {
        TaskType::FunctionCalling
    } else if request.total_text_len() > long_context_threshold {
        TaskType::LongContext
    } else {
        TaskType::General
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Pick the best model for a task among `models`
///
/// Unavailable models, models above `max_cost` (per-1K input price) and models
/// lacking the task's capability are dropped. Long-context tasks order by
/// context window first; the final order is priority ascending, then success
/// rate descending, stable with respect to the earlier ordering.
#[must_use]
pub fn select_for_task(
    models: &[ModelDescriptor],
    task: TaskType,
    max_cost: Option<f64>,
) -> Option<&ModelDescriptor> {
    let mut candidates: Vec<&ModelDescriptor> = models
        .iter()
        .filter(|m| m.is_available())
        .filter(|m| max_cost.map_or(true, |ceiling| m.pricing.input_per_1k <= ceiling))
        .filter(|m| task.is_served_by(m))
        .collect();

    if task == TaskType::LongContext {
        candidates.sort_by(|a, b| b.context_window.cmp(&a.context_window));
    }

    candidates.sort_by(|a, b| {
        a.priority.cmp(&b.priority).then_with(|| {
            b.metrics
                .success_rate
                .partial_cmp(&a.metrics.success_rate)
                .unwrap_or(Ordering::Equal)
        })
    });

    candidates.into_iter().next()
}
