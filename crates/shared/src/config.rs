//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::observability::ObservabilityConfig;

/// 规则脚本配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RulesConfig {
    /// 全量构建使用的脚本，按顺序拼接
    pub scripts: Vec<PathBuf>,
    /// 全量构建后依次增量应用的脚本
    pub incremental_scripts: Vec<PathBuf>,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub observability: ObservabilityConfig,
    pub rules: RulesConfig,
}

/// 环境变量覆盖源
///
/// 脚本列表以逗号分隔，如 RULEBASE_RULES__SCRIPTS=rules/a.gr,rules/b.gr
fn env_overrides() -> Environment {
    Environment::with_prefix("RULEBASE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("rules.scripts")
        .with_list_parse_key("rules.incremental_scripts")
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（RULEBASE_ 前缀，如 RULEBASE_OBSERVABILITY__LOG_LEVEL -> observability.log_level）
    ///    脚本列表以逗号分隔，如 RULEBASE_RULES__SCRIPTS=a.gr,b.gr
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("RULEBASE_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), service_name, &env)
    }

    /// 从指定目录加载配置
    pub fn load_from(
        config_dir: &Path,
        service_name: &str,
        env: &str,
    ) -> Result<Self, ConfigError> {
        Self::load_with(config_dir, service_name, env, env_overrides())
    }

    fn load_with(
        config_dir: &Path,
        service_name: &str,
        env: &str,
        overrides: Environment,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(overrides);

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.observability.service_name = config.service_name.clone();
        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
