use std::path::Path;

use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{Config, Result};

/// Prefix of environment overrides, e.g. `DEPTHSTREAM_SYNC__MAX_TIME_OFFSET_USEC`
pub const ENV_PREFIX: &str = "DEPTHSTREAM";

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

/// Defaults, then the TOML file at `path` if given, then environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
    if let Some(path) = path {
        info!("Loading configuration from {}", path.display());
        builder = builder.add_source(config::File::from(path).required(true));
    }
    let config = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    Ok(config)
}

/// Pin the calling thread to `core`; returns false if the core does not exist.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(id) = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core))
    else {
        warn!(core, "No such core, thread left unpinned");
        return false;
    };
    let pinned = core_affinity::set_for_current(id);
    debug!(core, pinned, "Pinned thread");
    pinned
}
