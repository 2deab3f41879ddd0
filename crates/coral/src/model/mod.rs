//! The two-branch Deep CORAL network and tensor conversion helpers.

pub mod bridge;
pub mod network;
