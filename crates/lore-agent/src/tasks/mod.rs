//! Built-in background tasks.

mod goal_research;
mod maintenance;
mod reflection;

pub use goal_research::{GOAL_RESEARCH_ID, GoalResearchTask, pending_goals, research_key};
pub use maintenance::{MAINTENANCE_ID, MaintenanceTask};
pub use reflection::{REFLECTION_ID, ReflectionTask};
