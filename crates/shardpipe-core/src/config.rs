use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    pub executor: ExecutorConfig,
    pub data_sources: Vec<DataSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    /// 0 means unbounded concurrent dispatch; N caps the number of units
    /// running at once.
    pub executor_size: usize,
}

/// Credentials for one backend data source, consumed by the handshake path.
#[derive(Debug, Deserialize, Clone)]
pub struct DataSourceConfig {
    pub name: String,
    pub username: String,
    pub password: Option<String>,
    pub schema: String,
}

impl ProxyConfig {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ProxyConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executor.executor_size == 0 {
            warn!("executor_size = 0 selects an unbounded worker pool");
        }
        if self.data_sources.is_empty() {
            return Err(anyhow::anyhow!("no data sources configured"));
        }
        let mut seen = std::collections::HashSet::new();
        for data_source in &self.data_sources {
            if data_source.username.is_empty() {
                return Err(anyhow::anyhow!(format!(
                    "data source {} has no username configured",
                    data_source.name
                )));
            }
            if !seen.insert(data_source.name.as_str()) {
                return Err(anyhow::anyhow!(format!(
                    "duplicate data source name: {}",
                    data_source.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> ProxyConfig {
        toml::from_str(contents).expect("parse")
    }

    #[test]
    fn valid_config_passes_validation() {
        let config = parse(
            r#"
            [executor]
            executor_size = 8

            [[data_sources]]
            name = "ds_0"
            username = "root"
            password = "secret"
            schema = "sharding_db"

            [[data_sources]]
            name = "ds_1"
            username = "root"
            schema = "sharding_db"
            "#,
        );
        config.validate().expect("valid");
        assert_eq!(config.executor.executor_size, 8);
        assert_eq!(config.data_sources.len(), 2);
        assert_eq!(config.data_sources[1].password, None);
    }

    #[test]
    fn duplicate_data_source_rejected() {
        let config = parse(
            r#"
            [executor]
            executor_size = 4

            [[data_sources]]
            name = "ds_0"
            username = "root"
            schema = "a"

            [[data_sources]]
            name = "ds_0"
            username = "root"
            schema = "b"
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_username_rejected() {
        let config = parse(
            r#"
            [executor]
            executor_size = 4

            [[data_sources]]
            name = "ds_0"
            username = ""
            schema = "a"
            "#,
        );
        assert!(config.validate().is_err());
    }
}
