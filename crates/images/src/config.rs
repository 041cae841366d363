use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid driver config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Use pixel buffers for uploads when the context supports them.
    pub prefer_pixel_buffers: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            prefer_pixel_buffers: true,
        }
    }
}

impl DriverConfig {
    /// Always upload with direct calls, even when pixel buffers exist.
    pub fn direct_uploads() -> Self {
        Self {
            prefer_pixel_buffers: false,
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}
