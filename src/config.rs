//! Vault configuration, stored as TOML

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::compression::{CompressionScheme, DEFAULT_COMPRESSION_LEVEL};
use crate::crypto::EncryptionScheme;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Fixed chunk window in bytes
    pub chunk_size: usize,
    pub compression: CompressionScheme,
    /// zstd level, 1..=22
    pub compression_level: i32,
    pub encryption: EncryptionScheme,
    /// Recorded in `manifest.json`; a random v4 UUID is used when unset
    pub device_id: Option<String>,
    /// Seal chunks and files on the rayon pool
    pub parallel: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: CompressionScheme::Zstd,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            encryption: EncryptionScheme::default(),
            device_id: None,
            parallel: true,
        }
    }
}

impl VaultConfig {
    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: VaultConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration {
                reason: "chunk_size must be greater than 0".to_string(),
            });
        }

        if self.compression == CompressionScheme::Zstd && !(1..=22).contains(&self.compression_level) {
            return Err(Error::Configuration {
                reason: format!(
                    "compression_level must be between 1 and 22, got {}",
                    self.compression_level
                ),
            });
        }

        if let Some(device_id) = &self.device_id {
            if device_id.trim().is_empty() {
                return Err(Error::Configuration {
                    reason: "device_id must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Configured device id, or a fresh v4 UUID
    pub fn resolve_device_id(&self) -> String {
        self.device_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = VaultConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.compression, CompressionScheme::Zstd);
        assert_eq!(config.compression_level, 3);
        assert_eq!(config.encryption, EncryptionScheme::AesGcm256);
        assert!(config.parallel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() -> Result<()> {
        let config = VaultConfig::from_toml_str(
            r#"
            chunk_size = 1024
            encryption = "XChaCha20-Poly1305"
            device_id = "laptop-01"
            "#,
        )?;

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.encryption, EncryptionScheme::XChaCha20Poly1305);
        assert_eq!(config.compression, CompressionScheme::Zstd);
        assert_eq!(config.resolve_device_id(), "laptop-01");
        Ok(())
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            VaultConfig::from_toml_str("chunk_size = 0"),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            VaultConfig::from_toml_str("compression_level = 40"),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            VaultConfig::from_toml_str("compression = \"lz4\""),
            Err(Error::TomlParse(_))
        ));
    }

    #[test]
    fn test_level_ignored_without_zstd() -> Result<()> {
        let config = VaultConfig::from_toml_str("compression = \"none\"\ncompression_level = 0")?;
        assert_eq!(config.compression, CompressionScheme::None);
        Ok(())
    }

    #[test]
    fn test_save_load_preserves_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("conf/vault.toml");
        let config = VaultConfig {
            chunk_size: 4096,
            device_id: Some("phone".to_string()),
            parallel: false,
            ..VaultConfig::default()
        };

        config.save(&path)?;
        assert_eq!(VaultConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_generated_device_ids_are_uuids() {
        let config = VaultConfig::default();
        let id = config.resolve_device_id();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, config.resolve_device_id());
    }
}
