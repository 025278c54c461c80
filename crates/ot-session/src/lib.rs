//! Session persistence and interchange for Overtone.
//!
//! The external-collaborator edge of the workspace: project JSON
//! round-trip, the flattened interchange snapshot, and validation of
//! pre-decoded import payloads.

mod error;
mod import;
mod interchange;
mod project_io;

pub use error::SessionError;
pub use import::{notes_payload, ImportedAudio, ImportedNote};
pub use interchange::{
    apply_snapshot, export_snapshot, LaneTarget, Snapshot, SnapshotClip, SnapshotClipKind,
    SnapshotLane, SnapshotPlugin, SnapshotTrack,
};
pub use project_io::{load_project, load_project_file, save_project, save_project_file};
