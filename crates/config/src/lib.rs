//! Configuration loading, validation and env substitution.
//!
//! Config files: `herald.toml`, `herald.yaml`, `herald.yml` or `herald.json`,
//! searched in `./` then `~/.config/herald/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        config_dir, data_dir, discover_and_load, find_config_file, load_config, set_config_dir,
        set_data_dir,
    },
    schema::{
        DatabaseConfig, DispatchConfig, HeraldConfig, MetricsConfig, ServerConfig, SidecarConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
