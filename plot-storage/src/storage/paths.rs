// PathManager maps a plot file onto its place on a volume.
//
// The layout on every volume is as follows, and other tooling reads it, so it
// must not change:
//
//	<mount-root>
//	└── <volume>                       e.g. sdb1
//	    └── gv<volume tag>             e.g. gvb
//	        └── <cluster>
//	            └── <plot dir>         parent directory of the plot url
//	                ├── <plot file>
//	                └── <plot file>.tmp   while the transfer is running
//
// The volume tag is the name of the volume's top directory under the mount
// root with its first two characters (the `sd` of `sdb1`) dropped and trailing
// digits stripped.

use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::storage::registry::TEMP_FILE_EXT;

/// File name and parent directory name taken from a plot url's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotSource {
    /// Parent directory name, empty when the file sits at the url root.
    pub dir: String,
    pub file: String,
}

impl PlotSource {
    /// `http://host/dirA/file1.dat` gives dir `dirA` and file `file1.dat`.
    pub fn parse(plot_url: &str) -> Option<PlotSource> {
        let url = Url::parse(plot_url).ok()?;
        let mut segments: Vec<&str> = url.path_segments()?.collect();
        let file = segments.pop().filter(|file| !file.is_empty())?;
        let dir = segments.pop().unwrap_or_default();
        Some(PlotSource {
            dir: dir.to_string(),
            file: file.to_string(),
        })
    }

    /// Directory name used to keep related plots on the same volume.
    pub fn affinity(&self) -> Option<&str> {
        (!self.dir.is_empty()).then_some(self.dir.as_str())
    }

    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.file)
    }
}

#[derive(Clone, Debug)]
pub struct PathManager {
    mount_root: PathBuf,
}

impl PathManager {
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        PathManager {
            mount_root: mount_root.into(),
        }
    }

    /// Returns the tag of a volume, (e.g. `b` for `<root>/sdb1`).
    pub fn volume_tag(&self, volume: &Path) -> String {
        let name = volume
            .strip_prefix(&self.mount_root)
            .ok()
            .and_then(|relative| relative.components().next())
            .map(|component| component.as_os_str())
            .or_else(|| volume.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tail: String = name.chars().skip(2).collect();
        tail.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
    }

    /// Returns the root of a cluster's plots on a volume,
    /// (e.g. `<root>/sdb1/gvb/<cluster>`).
    pub fn cluster_path(&self, volume: &Path, cluster: &str) -> PathBuf {
        volume
            .join(format!("gv{}", self.volume_tag(volume)))
            .join(cluster)
    }

    /// Returns the final location of a plot,
    /// (e.g. `<root>/sdb1/gvb/<cluster>/<plot dir>/<plot file>`).
    pub fn plot_path(&self, volume: &Path, cluster: &str, source: &PlotSource) -> PathBuf {
        self.cluster_path(volume, cluster)
            .join(source.relative_path())
    }

    /// Returns the location a plot is written to before it is renamed into place,
    /// (e.g. `<root>/sdb1/gvb/<cluster>/<plot dir>/<plot file>.tmp`).
    pub fn temp_path(&self, volume: &Path, cluster: &str, source: &PlotSource) -> PathBuf {
        let mut path = self.plot_path(volume, cluster, source).into_os_string();
        path.push(".");
        path.push(TEMP_FILE_EXT);
        PathBuf::from(path)
    }
}
