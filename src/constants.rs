//! Centralized constants for paths, permissions, ports, and limits.

/// Default state directory holding every persisted file.
pub const DEFAULT_STATE_DIR: &str = "/etc/hostforge";

/// Directory where the scheduled backup units are installed.
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// Permission mode for the state directory.
pub const STATE_DIR_MODE: u32 = 0o700;

/// Permission mode for every persisted state file (secrets, backup, inventory, history).
pub const STATE_FILE_MODE: u32 = 0o600;

/// Permission mode for installed systemd units.
pub const UNIT_FILE_MODE: u32 = 0o644;

/// Length of every generated secret.
pub const SECRET_LENGTH: usize = 25;

/// Default total attempts for network-dependent operations.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Docker network every catalogue service joins.
pub const PLATFORM_NETWORK: &str = "hostforge";

/// Secret holding the backup repository passphrase.
pub const BACKUP_PASSPHRASE_SECRET: &str = "backup_passphrase";

/// Default backup repository location.
pub const DEFAULT_BACKUP_REPOSITORY: &str = "/var/backups/hostforge/repo";

/// Container-managed storage; the default snapshot source.
pub const DOCKER_VOLUME_ROOT: &str = "/var/lib/docker/volumes";

/// Subpaths never included in a snapshot.
pub const DEFAULT_BACKUP_EXCLUDES: &[&str] = &["**/cache", "**/.cache", "**/tmp", "**/logs", "**/*.log"];

/// Tag prefix for snapshots created by the scheduled job.
pub const SNAPSHOT_TAG_PREFIX: &str = "hostforge-";

/// Name shared by the backup service and timer units.
pub const BACKUP_UNIT_NAME: &str = "hostforge-backup";

/// Upper bound of the randomized timer start delay.
pub const BACKUP_TIMER_JITTER: &str = "1h";

/// Packages every later step depends on.
pub const BASE_PACKAGES: &[&str] = &["ca-certificates", "curl", "gnupg", "ufw", "restic"];

/// Container runtime packages from the upstream repository.
pub const RUNTIME_PACKAGES: &[&str] = &[
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "docker-buildx-plugin",
    "docker-compose-plugin",
];

/// Directory for third-party apt signing keys.
pub const APT_KEYRING_DIR: &str = "/etc/apt/keyrings";

/// Directory for third-party apt source lists.
pub const APT_SOURCES_DIR: &str = "/etc/apt/sources.list.d";

pub const PORT_SSH: u16 = 22;
pub const PORT_HTTP: u16 = 80;
pub const PORT_HTTPS: u16 = 443;
pub const PORT_PROXY_ADMIN: u16 = 81;
pub const PORT_CONTAINER_CONSOLE: u16 = 9443;
pub const PORT_DEV_ENVIRONMENT: u16 = 8443;
pub const PORT_METRICS_DASHBOARD: u16 = 3000;
pub const PORT_METRICS_COLLECTOR: u16 = 9090;

/// Host-admin panel port. Moved off the panel's default 9090, which the metrics collector owns.
pub const PORT_ADMIN_PANEL: u16 = 9200;
