pub mod helpers;
pub mod registry;

use async_trait::async_trait;
use fdistdump_error::FdistdumpError;
use registry::Registry;

/// A trait for configuring a struct from a config object, the way chroma's
/// services build themselves from a parsed `config.yaml` plus a registry of
/// already-constructed dependencies.
#[async_trait]
pub trait Configurable<T, E = FdistdumpError> {
    async fn try_from_config(config: &T, registry: &Registry) -> Result<Self, E>
    where
        Self: Sized;
}

/// Load and deserialize a config file with [`figment`], falling back to
/// environment variable overrides prefixed `FDISTDUMP_`.
pub fn load_config<T: serde::de::DeserializeOwned>(
    path: Option<&str>,
) -> Result<T, FdistdumpError> {
    use figment::providers::{Env, Format, Yaml};
    use figment::Figment;

    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    figment = figment.merge(Env::prefixed("FDISTDUMP_").split("__"));
    figment
        .extract()
        .map_err(|e| FdistdumpError::Internal(format!("config error: {e}")))
}
