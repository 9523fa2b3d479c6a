pub mod api;
pub mod defaults;
pub mod errors;
pub mod loader;
pub mod model;
pub mod override_store;

pub use api::{InMemoryPolicyCenter, PolicyCenter, PolicyGuard};
pub use defaults::default_snapshot;
pub use loader::load_snapshot;
pub use model::{
    PerceiverPolicies, PolicySnapshot, PolicyView, RuntimeOverrideSpec, StructuralCachePolicy,
    StructuralDiffPolicy, StructuralJudgePolicy, StructuralPerceiverPolicy,
    StructuralResolvePolicy, StructuralScoreWeights,
};

#[cfg(test)]
mod tests;
