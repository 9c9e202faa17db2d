//! Capacity admission
//!
//! - [`BurstPool`]: shared reservoir above all guarantees
//! - [`PreemptionEngine`]: victim selection among lower tiers
//! - [`AllocationCoordinator`]: the four-phase admission entry point

mod coordinator;
mod pool;
mod preemption;

pub use coordinator::{Admission, AllocationCoordinator, Published, Released};
pub use pool::{BurstGrant, BurstPool, BurstUtilization, PoolGuard};
pub use preemption::{PreemptionEngine, PreemptionPlan, Reclaim};
