pub mod clock;
pub mod closure;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reconciler;
pub mod remediation;
pub mod remote;
