//! Configuration: built-in defaults overlaid by `.trellis/config.toml`

mod settings;

pub use settings::{
    config_path, Config, ConfigError, TomlCommitConfig, TomlConfig, TomlStateConfig, CONFIG_FILE,
};
