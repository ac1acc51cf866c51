use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use ocf_core::format::{CODEC_NULL, DEFAULT_SYNC_INTERVAL};

/// Settings for `ocf pack`, loadable from a TOML file.
///
/// ```toml
/// codec = "deflate"
/// deflate_level = 6
/// sync_interval = 1000
///
/// [metadata]
/// "source.topic" = "clicks"
/// ```
///
/// Command-line flags override whatever the file sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackConfig {
    /// Codec identifier: `null` | `deflate`
    pub codec: String,
    /// Deflate level (0–9), only used with `codec = "deflate"`
    pub deflate_level: u32,
    /// Records per block
    pub sync_interval: u64,
    /// Extra header metadata (keys must not start with `avro.`)
    pub metadata: BTreeMap<String, String>,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            codec: CODEC_NULL.to_string(),
            deflate_level: 6,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            metadata: BTreeMap::new(),
        }
    }
}

impl PackConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config file {:?}", path))?;
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Fold `--meta key=value` pairs into the metadata table.
    pub fn add_metadata_pairs(&mut self, pairs: &[String]) -> anyhow::Result<()> {
        for pair in pairs {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("metadata '{}' is not of the form key=value", pair))?;
            self.metadata.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Reject settings the writer would refuse later, before the output
    /// file is created.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync_interval == 0 {
            anyhow::bail!("sync_interval must be at least 1");
        }
        if self.deflate_level > 9 {
            anyhow::bail!("deflate_level must be between 0 and 9, got {}", self.deflate_level);
        }
        ocf_codecs::codec_by_name(&self.codec)?;
        Ok(())
    }
}
