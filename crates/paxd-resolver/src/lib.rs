mod error;
mod graph;
mod order;
mod resolve;
mod types;

pub use error::ResolveError;
pub use graph::DependencyGraph;
pub use resolve::resolve_install_plan;
pub use types::{
    BackendBatch, DependencyNode, InstallPlan, LifecycleEvent, PlanLevel, PlanOperation,
    PlannedPackage,
};

#[cfg(test)]
mod tests;
