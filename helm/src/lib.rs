//! Helm aggregate crate that re-exports the main components for downstream
//! users.

pub use helm_advisor as advisor;
pub use helm_broker as broker;
pub use helm_config as config;
pub use helm_core as core;
pub use helm_execution as execution;
pub use helm_history as history;
pub use helm_stats as stats;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use helm_advisor::*;
    pub use helm_broker::*;
    pub use helm_config::*;
    pub use helm_core::*;
    pub use helm_execution::*;
    pub use helm_history::*;
    pub use helm_stats::*;
}
