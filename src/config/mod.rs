//! Configuration loading and validation.

mod settings;

pub use settings::{
    ApiSettings, CacheSettings, ChainSettings, DatabaseSettings, FactorySettings,
    LoggingSettings, MetricsSettings, Settings, SourceSettings,
};
