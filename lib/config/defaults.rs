use std::{path::PathBuf, sync::LazyLock};

use crate::utils::{dcsandbox_config_path, dcsandbox_home_path, CONFIG_FILENAME};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default memory limit string for new sandboxes.
pub const DEFAULT_MEMORY: &str = "2G";

/// The default CPU count for new sandboxes.
pub const DEFAULT_CPUS: f64 = 2.0;

/// The default disk budget string for new sandboxes.
pub const DEFAULT_DISK: &str = "10G";

/// The default sandbox timeout in minutes.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 120;

/// The default host the MCP proxy binds to.
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";

/// The default inclusive MCP port range.
pub const DEFAULT_PORT_RANGE: (u16, u16) = (50000, 60000);

/// The default container network mode.
pub const DEFAULT_NETWORK: &str = "bridge";

/// The default git branch cloned when none is given.
pub const DEFAULT_GIT_BRANCH: &str = "main";

/// The default inactive-sandbox cleanup interval string.
pub const DEFAULT_INACTIVE_TIMEOUT: &str = "30m";

/// The default template name when detection finds nothing convincing.
pub const DEFAULT_TEMPLATE: &str = "base";

/// The detection confidence below which the detector's answer is discarded.
pub const DETECTION_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// The path where all dcsandbox state is stored.
pub static DEFAULT_DCSANDBOX_HOME: LazyLock<PathBuf> = LazyLock::new(dcsandbox_home_path);

/// The path of the global configuration file.
pub static DEFAULT_CONFIG_PATH: LazyLock<PathBuf> =
    LazyLock::new(|| dcsandbox_config_path().join(CONFIG_FILENAME));
