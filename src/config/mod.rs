//! Configuration loading and validation.

mod settings;

pub use settings::{
    load_config, AppConfig, DebugConfig, EnvoyConfig, HoldoffConfig, IngressConfig,
    ObservabilityConfig, XdsConfig,
};
