use candela_core::config::AppConfig;
use config::{Config, ConfigError, Environment, File};

/// 默认配置文件（不含扩展名），可由 `CANDELA_CONFIG` 覆盖。
const DEFAULT_CONFIG_PATH: &str = "config/candela";

/// # Summary
/// 加载应用配置。
///
/// # Logic
/// 1. 读取可选的配置文件，缺失时全部取默认值。
/// 2. 叠加 `CANDELA__SECTION__KEY` 形式的环境变量。
pub fn load() -> Result<AppConfig, ConfigError> {
    let path = std::env::var("CANDELA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    load_from(&path)
}

pub fn load_from(path: &str) -> Result<AppConfig, ConfigError> {
    Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("CANDELA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("series.asset_pairs"),
        )
        .build()?
        .try_deserialize()
}
