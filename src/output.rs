use std::fmt;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::HarvestError;
use crate::reduce::ResultSet;

/// Write the result set as pretty JSON, replacing any previous file.
pub fn write_result_set(path: &Path, set: &ResultSet) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(set)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json + "\n")?;
    fs::rename(&tmp, path)?;

    info!("Wrote {} endpoints to {}", set.count, path.display());
    Ok(())
}

/// Final counts reported to the operator.
pub struct Summary {
    pub total: usize,
    pub with_features: usize,
}

impl Summary {
    pub fn of(set: &ResultSet) -> Self {
        Self {
            total: set.count,
            with_features: set.with_features(),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} endpoints ({} with features, {} without)",
            self.total,
            self.with_features,
            self.total - self.with_features
        )
    }
}
