use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/plot/upload`.
///
/// Absent fields decode as empty and are rejected by task validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadPlotInput {
    pub plot_url: String,
    pub finish_url: String,
    pub fail_url: String,
    pub disk_space: u64,
}

/// Body posted to the finish and fail callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlotNotice {
    pub file: String,
}
