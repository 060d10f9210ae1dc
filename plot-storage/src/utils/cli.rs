use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listening host
    #[arg(long, env = "PLOT_STORAGE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listening port
    #[arg(short, long, env = "PLOT_STORAGE_PORT", default_value_t = 18080)]
    pub port: u16,

    /// Task database file
    #[arg(
        long,
        env = "PLOT_STORAGE_DB_PATH",
        default_value = "/var/lib/plot-storage/tasks.db"
    )]
    pub db_path: PathBuf,

    /// Cluster label, used as a directory name on every volume
    #[arg(long, env = "PLOT_STORAGE_CLUSTER_NAME", default_value = "default")]
    pub cluster_name: String,

    /// Bytes kept free on every volume
    #[arg(long, env = "PLOT_STORAGE_RESERVED_SPACE", default_value_t = 0)]
    pub reserved_space: u64,

    /// Directory the storage volumes are mounted under
    #[arg(long, env = "PLOT_STORAGE_MOUNT_ROOT", default_value = "/mnt")]
    pub mount_root: PathBuf,

    /// Number of transfer workers
    #[arg(long, env = "PLOT_STORAGE_WORKERS", default_value_t = 8)]
    pub workers: usize,

    /// Tasks waiting for a worker before intake blocks
    #[arg(long, env = "PLOT_STORAGE_QUEUE_SIZE", default_value_t = 1024)]
    pub queue_size: usize,

    /// JSON config file. Values in it take precedence over flags and environment
    #[arg(short, long, env = "PLOT_STORAGE_CONFIG")]
    pub config: Option<PathBuf>,
}
