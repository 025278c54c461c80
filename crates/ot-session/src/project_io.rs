//! Project JSON round-trip.
//!
//! The `Project` tree serializes as-is; track and clip order, ids,
//! and parameter values survive unchanged.

use std::fs;
use std::path::Path;

use ot_ir::Project;

use crate::error::SessionError;

/// Serialize a project to pretty-printed JSON.
pub fn save_project(project: &Project) -> Result<String, SessionError> {
    Ok(serde_json::to_string_pretty(project)?)
}

/// Deserialize a project from JSON.
pub fn load_project(json: &str) -> Result<Project, SessionError> {
    Ok(serde_json::from_str(json)?)
}

/// Write a project to disk.
pub fn save_project_file(project: &Project, path: &Path) -> Result<(), SessionError> {
    let json = save_project(project)?;
    fs::write(path, json)?;
    log::info!("saved project '{}' to {}", project.name, path.display());
    Ok(())
}

/// Read a project from disk.
pub fn load_project_file(path: &Path) -> Result<Project, SessionError> {
    let json = fs::read_to_string(path)?;
    load_project(&json)
}
