//! Small helpers shared by the wrappers.

pub mod defer;
