mod settings;

pub use settings::{Command, Config, DiscoverySettings, ServerSettings, Settings};
