use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::utils::cli::Args;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub cluster_name: String,
    pub reserved_space: u64,
    pub mount_root: PathBuf,
    pub workers: usize,
    pub queue_size: usize,
}

/// Keys accepted in the `--config` file. Absent keys keep their flag value.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    cluster_name: Option<String>,
    reserved_space: Option<u64>,
    mount_root: Option<PathBuf>,
    workers: Option<usize>,
    queue_size: Option<usize>,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Config {
            host: args.host.clone(),
            port: args.port,
            db_path: args.db_path.clone(),
            cluster_name: args.cluster_name.clone(),
            reserved_space: args.reserved_space,
            mount_root: args.mount_root.clone(),
            workers: args.workers,
            queue_size: args.queue_size,
        }
    }
}

impl Config {
    /// Builds the configuration from flags, environment and the optional
    /// config file, then validates it.
    pub fn load(args: &Args) -> anyhow::Result<Config> {
        let mut config = Config::from(args);
        if let Some(path) = &args.config {
            config.merge_file(path)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn merge_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file `{}`", path.display()))?;
        let file: FileConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file `{}`", path.display()))?;

        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(db_path) = file.db_path {
            self.db_path = db_path;
        }
        if let Some(cluster_name) = file.cluster_name {
            self.cluster_name = cluster_name;
        }
        if let Some(reserved_space) = file.reserved_space {
            self.reserved_space = reserved_space;
        }
        if let Some(mount_root) = file.mount_root {
            self.mount_root = mount_root;
        }
        if let Some(workers) = file.workers {
            self.workers = workers;
        }
        if let Some(queue_size) = file.queue_size {
            self.queue_size = queue_size;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut validation_errors = Vec::new();

        match fs::metadata(&self.mount_root) {
            Ok(meta) if !meta.is_dir() => validation_errors.push(format!(
                "mount root `{}` exists but is not a directory",
                self.mount_root.display()
            )),
            Ok(_) => {}
            Err(_) => validation_errors.push(format!(
                "mount root `{}` does not exist",
                self.mount_root.display()
            )),
        }

        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                validation_errors.push(format!(
                    "the directory for the database `{}` does not exist",
                    parent.display()
                ));
            }
        }

        if self.cluster_name.is_empty() || self.cluster_name.contains('/') {
            validation_errors.push(format!(
                "cluster name `{}` must be a non-empty single path component",
                self.cluster_name
            ));
        }
        if self.workers == 0 {
            validation_errors.push("workers must be at least 1".to_string());
        }
        if self.queue_size == 0 {
            validation_errors.push("queue size must be at least 1".to_string());
        }

        if !validation_errors.is_empty() {
            bail!(validation_errors.join("\n"));
        }
        Ok(())
    }
}
