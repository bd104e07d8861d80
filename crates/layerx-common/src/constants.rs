//! System-wide constants.

/// Length of a full layer identifier in hex characters.
pub const LAYER_ID_HEX_LENGTH: usize = 64;

/// Length of the abbreviated layer identifier shown to users.
pub const SHORT_ID_LENGTH: usize = 12;

/// Basename prefix marking a deleted path in a layer diff.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Name of a layer's payload inside a saved image export.
pub const LAYER_TAR_NAME: &str = "layer.tar";

/// Name of a layer's metadata document inside a saved image export.
pub const LAYER_JSON_NAME: &str = "json";

/// Name of the repository/tag index inside a saved image export.
pub const REPOSITORIES_NAME: &str = "repositories";

/// Placeholder tag Docker reports for untagged images.
pub const UNTAGGED_REPO_TAG: &str = "<none>:<none>";

/// Tag implied when a repository is named without one.
pub const DEFAULT_TAG: &str = "latest";

/// Target name that writes the archive to standard output.
pub const STDOUT_TARGET: &str = "-";

/// Default compression level for the output archive.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Exit status for a command-line argument error.
pub const EXIT_USAGE: u8 = 1;

/// Exit status for an execution failure.
pub const EXIT_EXEC: u8 = 2;

/// Exit status for a layer specification that fails strict resolution.
pub const EXIT_LAYER_SPEC: u8 = 3;

/// Application name used in CLI output.
pub const APP_NAME: &str = "layerx";

/// Log level used when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_LEVEL: &str = "warn";
