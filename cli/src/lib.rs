//! Strata CLI - build and manage layered images.

pub mod commands;
pub mod output;
