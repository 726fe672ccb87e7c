//! Python bindings for medpatch.

pub mod grid;
pub mod module;
pub mod queue;
pub mod subject;
pub mod validation;
