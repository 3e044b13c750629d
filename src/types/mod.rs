//! Core identifier types shared by the pool, the pollers and the control surfaces.

pub mod ids;

pub use ids::{KEY_DELIMITER, PollerKey, Sha, Target};
