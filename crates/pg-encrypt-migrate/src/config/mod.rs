//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl DatabaseConfig {
    /// Connection target for logs (password omitted).
    pub fn display_target(&self) -> String {
        format!(
            "{}@{}:{}/{} (schema {})",
            self.user, self.host, self.port, self.database, self.schema
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
database:
  host: localhost
  database: crm
  user: migrator
  password: secret
"#;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.schema, "public");
        assert_eq!(config.migration.chunk_size, 1000);
        assert_eq!(config.migration.workers, 5);
        assert_eq!(config.migration.config_table, "migration_config");
        assert_eq!(config.encryption.key_env, "PG_ENCRYPT_KEY");
        assert!(config.migration.tables.is_empty());
    }

    #[test]
    fn test_overrides_are_read() {
        let yaml = format!(
            "{}\nmigration:\n  chunk_size: 250\n  workers: 2\n  tables: [customer]\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.migration.chunk_size, 250);
        assert_eq!(config.migration.workers, 2);
        assert_eq!(config.migration.tables, vec!["customer".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.database.database, "crm");
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(Config::from_yaml("database: [").is_err());
    }
}
