//! Storage implementations behind the seams in [`crate::traits`].

pub mod memory;
pub mod postgres;
