//! Where configuration files are looked up.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// File name of the shared project config.
pub const PROJECT_CONFIG_FILE: &str = "tessera.toml";

/// File name of the per-machine project config, kept out of version control.
pub const LOCAL_CONFIG_FILE: &str = "tessera.local.toml";

/// Config file locations for one project directory.
///
/// The user file (`~/.config/tessera/config.toml` on Linux) is only present
/// when discovered through [`Paths::discover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    user_config: Option<PathBuf>,
    project_dir: PathBuf,
}

impl Paths {
    /// Project files plus the platform's user config file, if the platform
    /// has a config directory.
    pub fn discover(project_dir: impl AsRef<Path>) -> Self {
        let user_config = ProjectDirs::from("com", "Tessera", "tessera")
            .map(|dirs| dirs.config_dir().join("config.toml"));
        Self {
            user_config,
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    /// Project files only.
    pub fn project_only(project_dir: impl AsRef<Path>) -> Self {
        Self {
            user_config: None,
            project_dir: project_dir.as_ref().to_path_buf(),
        }
    }

    pub fn project_config_file(&self) -> PathBuf {
        self.project_dir.join(PROJECT_CONFIG_FILE)
    }

    pub fn local_config_file(&self) -> PathBuf {
        self.project_dir.join(LOCAL_CONFIG_FILE)
    }

    /// Existing config files, lowest precedence first.
    pub fn sources(&self) -> Vec<PathBuf> {
        self.user_config
            .iter()
            .cloned()
            .chain([self.project_config_file(), self.local_config_file()])
            .filter(|path| path.exists())
            .collect()
    }
}
