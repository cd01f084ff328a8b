//! The retention core: the tagging cascade engine and the eviction engine.
//!
//! Tagging re-derives tier membership for a policy's entire backup history
//! from scratch; eviction turns the resulting tier flags plus retain-counts
//! into delete elections. Both run under the per-policy retention lock so a
//! freshly materialized backup is never observed untagged.

pub mod retention;
pub mod tagging;
