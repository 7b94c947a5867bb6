use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "bordereau-stage".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        };

        if config.bucket.trim().is_empty() {
            anyhow::bail!("S3_BUCKET cannot be empty");
        }

        Ok(config)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            bucket: "bordereau-stage".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_prefers_s3_variables() {
        env::set_var("S3_BUCKET", "claims-stage");
        env::set_var("S3_PATH_STYLE", "true");
        env::set_var("S3_ACCESS_KEY", "bordereau");

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.bucket, "claims-stage");
        assert!(config.path_style);
        assert_eq!(config.access_key, "bordereau");

        env::remove_var("S3_BUCKET");
        env::remove_var("S3_PATH_STYLE");
        env::remove_var("S3_ACCESS_KEY");
    }

    #[test]
    fn test_secret_is_not_serialized() {
        let json = serde_json::to_string(&StorageConfig::default()).unwrap();
        assert!(!json.contains("secret_key"));
    }
}
