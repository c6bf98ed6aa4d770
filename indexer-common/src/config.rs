//! Layered configuration loading: a YAML file overridden by `APP__`-prefixed, double
//! underscore-nested environment variables. Every binary in this workspace composes its
//! top-level `Config` from its components' `Config` sub-structs and loads it through
//! [`ConfigExt::load`].

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::DeserializeOwned;

const CONFIG_ENV_PREFIX: &str = "APP__";
const CONFIG_ENV_SPLIT: &str = "__";
const CONFIG_FILE_ENV_VAR: &str = "CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Blanket extension for loading a [`serde::Deserialize`] configuration from the layered
/// YAML-file-then-environment source used throughout this workspace.
pub trait ConfigExt: DeserializeOwned {
    fn load() -> Result<Self, figment::Error> {
        let config_file = std::env::var(CONFIG_FILE_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        Figment::new()
            .merge(Yaml::file(config_file))
            .merge(Env::prefixed(CONFIG_ENV_PREFIX).split(CONFIG_ENV_SPLIT))
            .extract()
    }
}

impl<T> ConfigExt for T where T: DeserializeOwned {}
