use serde::{Deserialize, Serialize};

use crate::cost::CostModel;
use crate::error::{CodecError, CodecResult};

/// Codec configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Byte budget of one rendered message, shared by both directions and
    /// the timing metadata.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub cost: CostModel,
}

fn default_chunk_size() -> usize {
    1024
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            cost: CostModel::default(),
        }
    }
}

impl CodecConfig {
    pub fn from_json(json: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> CodecResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> CodecResult<()> {
        if !self.cost.is_valid() {
            return Err(CodecError::Config(
                "cost widths must be > 0, escape_width >= char_width and window_width must fit =65535x65535".to_string(),
            ));
        }
        let min = self.cost.min_chunk_size();
        if self.chunk_size < min {
            return Err(CodecError::Config(format!(
                "chunk_size {} is below the minimum of {min}",
                self.chunk_size
            )));
        }
        Ok(())
    }
}
