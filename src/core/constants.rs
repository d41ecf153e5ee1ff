pub static VERSION: &str = env!("CARGO_PKG_VERSION");

pub static SSH_DEFAULT_PORT: u16 = 22;
pub static CONNECT_ATTEMPTS: u32 = 3;
pub static CONNECT_RETRY_DELAY_SECS: u64 = 2;
pub static CONNECT_TIMEOUT_SECS: u64 = 10;
pub static MAX_CONCURRENCY: usize = 10;

pub static SERVICE_NAME: &str = "status-updater";
pub static SERVICE_DIR: &str = "/opt/status-updater";
pub static INIT_SCRIPT_PATH: &str = "/etc/init.d/status-updater";
pub static OS_RELEASE_PATH: &str = "/etc/os-release";
pub static EMBEDDED_OS_MARKER: &str = "Buildroot";

pub static REMOTE_STAGING_DIR: &str = "/tmp";
pub static SIDE_BUNDLE_UNPACK_DIR: &str = "/tmp/lldpd-packages";
pub static DEFAULT_SIDE_BUNDLE: &str = "lldpd-packages.zip";

// upper bound (exclusive) of the randomized service start delay
pub static STARTUP_JITTER_MAX_SECS: u64 = 600;
