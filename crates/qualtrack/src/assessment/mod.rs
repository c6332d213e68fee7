//! Vocational assessment engine: qualification tree reconciliation, user
//! enrollment and staff assignment, and the evidence submission lifecycle.

pub mod domain;
pub mod enrollment;
pub mod reconciler;
pub mod router;
pub mod saga;
pub mod store;
pub mod submissions;

#[cfg(test)]
mod tests;
