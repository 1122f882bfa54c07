use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub max_workspace_bytes: usize,
    /// Accept F16 compute layers in addition to F32.
    pub allow_fp16: bool,
    /// Human-readable label recorded in the engine for logs.
    pub engine_name: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_workspace_bytes: 1 << 30,
            allow_fp16: false,
            engine_name: "engine".to_string(),
        }
    }
}
