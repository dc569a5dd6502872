//! Prompt assets for the advisor conversation and plan extraction.
//!
//! Defaults are compiled in; either prompt can be replaced by a file at
//! startup without rebuilding.

use std::path::Path;

use tracing::info;

use crate::errors::{Result, SaveFiError};

pub const ADVISOR: &str = include_str!("../prompts/advisor.md");
pub const EXTRACTION: &str = include_str!("../prompts/extraction.md");
pub const GREETING: &str = include_str!("../prompts/greeting.md");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub advisor: String,
    pub extraction: String,
    pub greeting: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            advisor: ADVISOR.to_string(),
            extraction: EXTRACTION.to_string(),
            greeting: GREETING.trim_end().to_string(),
        }
    }
}

impl Prompts {
    /// Embedded defaults with optional file overrides.
    pub fn load(advisor_path: Option<&Path>, extraction_path: Option<&Path>) -> Result<Self> {
        let mut prompts = Self::default();
        if let Some(path) = advisor_path {
            prompts.advisor = read_prompt(path)?;
        }
        if let Some(path) = extraction_path {
            prompts.extraction = read_prompt(path)?;
        }
        Ok(prompts)
    }
}

fn read_prompt(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SaveFiError::Config(format!("cannot read prompt {}: {e}", path.display())))?;
    if text.trim().is_empty() {
        return Err(SaveFiError::Config(format!(
            "prompt file {} is empty",
            path.display()
        )));
    }
    info!("Loaded prompt override from {}", path.display());
    Ok(text)
}
