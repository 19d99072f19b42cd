pub mod assignment;
pub mod config;
pub mod eligibility;
pub mod sampler;
pub mod store;
pub mod token;
