//! Lab context loader.
//!
//! Labs live as JSON files under `paths.labs_dir`, one per lab id. A
//! missing file degrades to a minimal context so a session can still
//! start; malformed JSON is an error.

use std::path::Path;

use tracing::{info, warn};

use crate::error::TutorError;
use crate::types::LabContext;

/// Load `<labs_dir>/<lab_id>.json`.
pub fn load_lab(labs_dir: &str, lab_id: &str) -> Result<LabContext, TutorError> {
    if lab_id.is_empty()
        || lab_id.contains('/')
        || lab_id.contains('\\')
        || lab_id.contains("..")
    {
        return Err(TutorError::Lab(format!("invalid lab id '{lab_id}'")));
    }

    let path = Path::new(labs_dir).join(format!("{lab_id}.json"));

    if !path.exists() {
        warn!(lab_id, path = %path.display(), "lab file missing, using minimal context");
        return Ok(LabContext {
            lab_id: lab_id.to_string(),
            title: lab_id.to_string(),
            objectives: vec!["Complete the lab exercises".to_string()],
            ..Default::default()
        });
    }

    let raw = std::fs::read_to_string(&path)?;
    let mut lab: LabContext = serde_json::from_str(&raw)
        .map_err(|e| TutorError::Lab(format!("{}: {e}", path.display())))?;

    if lab.lab_id.is_empty() {
        lab.lab_id = lab_id.to_string();
    }
    if lab.title.is_empty() {
        lab.title = lab.lab_id.clone();
    }

    info!(lab_id = %lab.lab_id, objectives = lab.objectives.len(), "lab loaded");
    Ok(lab)
}

// ── Tests ─────────────────────────────────────────────────────────────────
