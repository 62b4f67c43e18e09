use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{LaunchFailure, Result};

/// Finds the player binary behind a build path that may lack its platform
/// suffix (`SafeRLAUV` -> `SafeRLAUV.x86_64`, `SafeRLAUV.app/...`).
pub fn resolve_executable(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let raw = path.as_os_str().to_string_lossy().into_owned();

    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        vec![PathBuf::from(format!("{}.exe", raw)), path.to_path_buf()]
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from(format!("{}.app/Contents/MacOS/{}", raw, name)),
            path.join("Contents").join("MacOS").join(&name),
            path.to_path_buf(),
        ]
    } else {
        vec![
            PathBuf::from(format!("{}.x86_64", raw)),
            PathBuf::from(format!("{}.x86", raw)),
            path.to_path_buf(),
        ]
    };

    candidates.into_iter().find(|candidate| candidate.is_file())
}

/// Command-line switches understood by an ML-Agents player build.
#[derive(Debug, Clone, Default)]
pub struct PlayerArgs {
    pub port: u16,
    pub no_graphics: bool,
    pub log_file: Option<PathBuf>,
    pub additional: Vec<String>,
}

impl PlayerArgs {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.no_graphics {
            args.push("-nographics".to_string());
            args.push("-batchmode".to_string());
        }
        args.push("--mlagents-port".to_string());
        args.push(self.port.to_string());
        if let Some(log_file) = &self.log_file {
            args.push("-logFile".to_string());
            args.push(log_file.display().to_string());
        }
        args.extend(self.additional.iter().cloned());
        args
    }
}

/// A running player process. Dropping it kills the process.
pub struct SimulatorProcess {
    child: Child,
    path: PathBuf,
}

impl SimulatorProcess {
    pub fn spawn(path: &Path, args: &PlayerArgs) -> Result<Self> {
        if let Some(log_file) = &args.log_file
            && let Some(parent) = log_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let child = Command::new(path)
            .args(args.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchFailure::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        info!(
            "started simulator {} (pid {:?}) on port {}",
            path.display(),
            child.id(),
            args.port
        );
        Ok(Self {
            child,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves once the process has exited. Cancel safe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Gives the player `grace` to exit on its own, then kills it. Always reaps.
    pub async fn shutdown(&mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!("simulator {} exited ({})", self.path.display(), status),
            Ok(Err(err)) => warn!("could not wait for simulator {}: {}", self.path.display(), err),
            Err(_) => {
                warn!(
                    "simulator {} did not exit within {:.1}s, killing it",
                    self.path.display(),
                    grace.as_secs_f64()
                );
                self.kill().await;
            }
        }
    }

    pub async fn kill(&mut self) {
        if let Err(err) = self.child.kill().await {
            warn!("could not kill simulator {}: {}", self.path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_args() {
        let args = PlayerArgs {
            port: 5012,
            no_graphics: true,
            log_file: Some(PathBuf::from("logs/Player-7.log")),
            additional: vec!["-screen-fullscreen".to_string(), "0".to_string()],
        };
        assert_eq!(
            args.to_args(),
            vec![
                "-nographics",
                "-batchmode",
                "--mlagents-port",
                "5012",
                "-logFile",
                "logs/Player-7.log",
                "-screen-fullscreen",
                "0",
            ]
        );
    }

    #[test]
    fn test_resolve_missing_build() {
        let dir = std::env::temp_dir().join("aquanav-missing-build");
        assert!(resolve_executable(&dir.join("SafeRLAUV")).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_resolve_linux_suffix() {
        let dir = std::env::temp_dir().join(format!("aquanav-build-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let binary = dir.join("SafeRLAUV.x86_64");
        std::fs::write(&binary, b"").unwrap();

        assert_eq!(resolve_executable(&dir.join("SafeRLAUV")), Some(binary));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_stuck_process() {
        let mut process = SimulatorProcess {
            child: Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap(),
            path: PathBuf::from("sleep"),
        };
        process.shutdown(Duration::from_millis(50)).await;
        assert!(process.child.try_wait().unwrap().is_some());
    }
}
