//! Process supervisor
//!
//! Spawns the browser with the automation flag set, watches its stderr for
//! the `DevTools listening on <url>` banner, and tears the child down on
//! close. Launching is optional; `Browser::attach` skips all of this and
//! talks to an endpoint somebody else owns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, trace, warn};

use chromite_transport::Endpoint;

use crate::chrome::find_chrome;
use crate::connection::ConnectOptions;

/// The literal stderr prefix the supervisor depends on
const BANNER_PREFIX: &str = "DevTools listening on ";

/// Flags every automation launch gets unless explicitly disabled
pub const DEFAULT_ARGS: &[&str] = &[
    "--disable-gpu",
    "--no-first-run",
    "--disable-background-networking",
    "--disable-extensions",
    "--disable-sync",
    "--disable-translate",
    "--hide-scrollbars",
    "--mute-audio",
    "--metrics-recording-only",
    "--safebrowsing-disable-auto-update",
];

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("No Chrome or Chromium executable found")]
    ChromeNotFound,

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Could not parse DevTools URL: {0}")]
    WsUrlParseError(String),

    #[error("Browser did not announce a DevTools endpoint within {0:?}")]
    StartupTimeout(Duration),
}

/// Headless flag selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadlessMode {
    /// `--headless=new` (Chrome 112+)
    #[default]
    New,
    /// The pre-112 `--headless`
    Legacy,
    /// No headless flag; a window appears
    Headed,
}

/// Launch configuration
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Browser binary; discovered via `find_chrome` when unset
    pub executable: Option<PathBuf>,

    pub headless: HeadlessMode,

    /// Remote debugging port; 0 lets the OS pick
    pub port: u16,

    /// Talk over `--remote-debugging-pipe` instead of a port (unix only)
    pub pipe: bool,

    /// Profile directory; a disposable temp dir is created when unset and
    /// removed again on close
    pub user_data_dir: Option<PathBuf>,

    pub window_size: Option<(u32, u32)>,

    pub no_sandbox: bool,

    pub ignore_certificate_errors: bool,

    /// Skip the recommended automation flags
    pub disable_default_args: bool,

    /// Extra flags appended after the computed ones
    pub args: Vec<String>,

    /// How long to wait for the stderr banner
    pub startup_timeout: Duration,

    /// Passed through to the connection once the endpoint is known
    pub connect: ConnectOptions,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headless: HeadlessMode::default(),
            port: 0,
            pipe: false,
            user_data_dir: None,
            window_size: None,
            no_sandbox: false,
            ignore_certificate_errors: false,
            disable_default_args: false,
            args: Vec::new(),
            startup_timeout: Duration::from_secs(20),
            connect: ConnectOptions::default(),
        }
    }
}

/// Assemble the argv tail for a launch
pub(crate) fn build_args(options: &LaunchOptions, user_data_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();

    if options.pipe {
        args.push("--remote-debugging-pipe".to_string());
    } else {
        args.push(format!("--remote-debugging-port={}", options.port));
    }

    match options.headless {
        HeadlessMode::New => args.push("--headless=new".to_string()),
        HeadlessMode::Legacy => args.push("--headless".to_string()),
        HeadlessMode::Headed => {}
    }

    if !options.disable_default_args {
        args.extend(DEFAULT_ARGS.iter().map(|s| s.to_string()));
    }
    if options.no_sandbox {
        args.push("--no-sandbox".to_string());
    }
    if options.ignore_certificate_errors {
        args.push("--ignore-certificate-errors".to_string());
    }
    if let Some((width, height)) = options.window_size {
        args.push(format!("--window-size={},{}", width, height));
    }
    args.push(format!("--user-data-dir={}", user_data_dir.display()));
    args.extend(options.args.iter().cloned());

    args
}

/// Extract the WebSocket URL from a stderr banner line
pub(crate) fn parse_banner(line: &str) -> Option<&str> {
    let start = line.find(BANNER_PREFIX)?;
    Some(line[start + BANNER_PREFIX.len()..].trim())
}

/// A supervised browser child process
pub struct BrowserProcess {
    child: Child,
    temp_dir: Option<PathBuf>,
    owned: bool,
}

impl BrowserProcess {
    /// Spawn the browser and wait for its DevTools endpoint
    pub(crate) async fn spawn(options: &LaunchOptions) -> Result<(Self, String), LaunchError> {
        let executable = resolve_executable(options)?;
        let (user_data_dir, temp_dir) = resolve_user_data_dir(options)?;
        let args = build_args(options, &user_data_dir);

        debug!("launching {} {:?}", executable.display(), args);

        let mut child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                LaunchError::LaunchFailed(format!("{}: {}", executable.display(), e))
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LaunchError::LaunchFailed("no stderr handle".to_string()))?;

        let mut process = Self {
            child,
            temp_dir,
            owned: true,
        };

        let scan = tokio::time::timeout(options.startup_timeout, scan_for_ws_url(stderr)).await;
        let ws_url = match scan {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                process.shutdown().await;
                return Err(e);
            }
            Err(_) => {
                process.shutdown().await;
                return Err(LaunchError::StartupTimeout(options.startup_timeout));
            }
        };

        info!("browser pid {:?} listening on {}", process.child.id(), ws_url);
        Ok((process, ws_url))
    }

    /// Spawn in pipe mode; the returned endpoint is the parent side of the
    /// child's fds 3 and 4
    #[cfg(unix)]
    pub(crate) async fn spawn_piped(
        options: &LaunchOptions,
    ) -> Result<(Self, chromite_transport::PipeEndpoint), LaunchError> {
        let executable = resolve_executable(options)?;
        let (user_data_dir, temp_dir) = resolve_user_data_dir(options)?;
        let args = build_args(options, &user_data_dir);

        // Two pipes: we write into the child's fd 3 and read from its fd 4
        let (child_read, parent_write) = os_pipe()?;
        let (parent_read, child_write) = os_pipe()?;

        debug!("launching {} {:?} (pipe mode)", executable.display(), args);

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        unsafe {
            command.pre_exec(move || {
                // The pipe fds may themselves be 3 or 4; move them out of
                // the way before installing the well-known numbers
                let read_dup = libc::fcntl(child_read, libc::F_DUPFD, 10);
                let write_dup = libc::fcntl(child_write, libc::F_DUPFD, 10);
                if read_dup == -1
                    || write_dup == -1
                    || libc::dup2(read_dup, 3) == -1
                    || libc::dup2(write_dup, 4) == -1
                {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            LaunchError::LaunchFailed(format!("{}: {}", executable.display(), e))
        })?;

        // The child holds its own copies now
        unsafe {
            libc::close(child_read);
            libc::close(child_write);
        }

        info!("browser pid {:?} attached over pipe", child.id());
        Ok((
            Self {
                child,
                temp_dir,
                owned: true,
            },
            chromite_transport::PipeEndpoint {
                read_fd: parent_read,
                write_fd: parent_write,
            },
        ))
    }

    /// Kill the child if still alive, reap it, and clean up the temp profile
    pub(crate) async fn shutdown(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => debug!("browser already exited: {}", status),
            _ => {
                // Give a voluntarily-closing browser a moment to go down
                let graceful =
                    tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
                if graceful.is_err() {
                    if let Err(e) = self.child.kill().await {
                        warn!("failed to kill browser: {}", e);
                    }
                }
            }
        }
        self.owned = false;

        if let Some(dir) = self.temp_dir.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                debug!("could not remove {}: {}", dir.display(), e);
            }
        }
    }

    /// Give up ownership; the child keeps running after we disconnect
    pub(crate) fn release(&mut self) {
        self.owned = false;
        self.temp_dir = None;
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        if self.owned {
            // Last resort; normal teardown goes through `shutdown`
            if let Err(e) = self.child.start_kill() {
                debug!("could not kill browser on drop: {}", e);
            }
        }
    }
}

fn resolve_executable(options: &LaunchOptions) -> Result<PathBuf, LaunchError> {
    match &options.executable {
        Some(path) => Ok(path.clone()),
        None => find_chrome(),
    }
}

fn resolve_user_data_dir(
    options: &LaunchOptions,
) -> Result<(PathBuf, Option<PathBuf>), LaunchError> {
    match &options.user_data_dir {
        Some(dir) => Ok((dir.clone(), None)),
        None => {
            let dir = std::env::temp_dir().join(format!(
                "chromite-profile-{}-{:08x}",
                std::process::id(),
                fastrand::u32(..)
            ));
            std::fs::create_dir_all(&dir).map_err(|e| {
                LaunchError::LaunchFailed(format!("cannot create user data dir: {}", e))
            })?;
            Ok((dir.clone(), Some(dir)))
        }
    }
}

/// Scan stderr until the banner appears
///
/// A restarted browser can emit more than one banner; the first wins and
/// the rest of the stream is drained in the background so the child never
/// blocks on a full pipe.
async fn scan_for_ws_url(stderr: ChildStderr) -> Result<String, LaunchError> {
    let mut lines = BufReader::new(stderr).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| LaunchError::LaunchFailed(format!("stderr read failed: {}", e)))?
    {
        trace!("browser stderr: {}", line);

        if let Some(url) = parse_banner(&line) {
            Endpoint::parse(url)
                .map_err(|e| LaunchError::WsUrlParseError(format!("{}: {}", url, e)))?;
            let url = url.to_string();

            tokio::spawn(async move {
                let mut lines = lines;
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!("browser stderr: {}", line);
                }
            });

            return Ok(url);
        }
    }

    Err(LaunchError::LaunchFailed(
        "browser exited before announcing a DevTools endpoint".to_string(),
    ))
}

#[cfg(unix)]
fn os_pipe() -> Result<(i32, i32), LaunchError> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(LaunchError::LaunchFailed(format!(
            "pipe: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok((fds[0], fds[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_banner() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-123";
        assert_eq!(
            parse_banner(line),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123")
        );

        // Prefixed timestamps still match
        let noisy = "[0801/101523.117:INFO] DevTools listening on ws://127.0.0.1:9/devtools/browser/x";
        assert_eq!(parse_banner(noisy), Some("ws://127.0.0.1:9/devtools/browser/x"));

        assert_eq!(parse_banner("something unrelated"), None);
    }

    #[test]
    fn test_build_args_defaults() {
        let options = LaunchOptions::default();
        let args = build_args(&options, Path::new("/tmp/profile"));

        assert_eq!(args[0], "--remote-debugging-port=0");
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&"--mute-audio".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        // Opt-in flags stay off by default
        assert!(!args.contains(&"--no-sandbox".to_string()));
        assert!(!args.contains(&"--ignore-certificate-errors".to_string()));
    }

    #[test]
    fn test_build_args_opt_ins() {
        let options = LaunchOptions {
            headless: HeadlessMode::Headed,
            port: 9222,
            no_sandbox: true,
            ignore_certificate_errors: true,
            window_size: Some((1280, 800)),
            disable_default_args: true,
            args: vec!["--lang=en-US".to_string()],
            ..Default::default()
        };
        let args = build_args(&options, Path::new("/tmp/p"));

        assert_eq!(args[0], "--remote-debugging-port=9222");
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--ignore-certificate-errors".to_string()));
        assert!(args.contains(&"--window-size=1280,800".to_string()));
        assert_eq!(args.last().unwrap(), "--lang=en-US");
    }

    #[test]
    fn test_build_args_pipe_mode() {
        let options = LaunchOptions {
            pipe: true,
            ..Default::default()
        };
        let args = build_args(&options, Path::new("/tmp/p"));

        assert_eq!(args[0], "--remote-debugging-pipe");
        assert!(!args.iter().any(|a| a.starts_with("--remote-debugging-port")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_finds_first_banner() {
        // A shell stands in for the browser; it prints two banners
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo 'noise' >&2; echo 'DevTools listening on ws://127.0.0.1:1111/devtools/browser/first' >&2; echo 'DevTools listening on ws://127.0.0.1:2222/devtools/browser/second' >&2")
            .stderr(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let stderr = child.stderr.take().unwrap();
        let url = scan_for_ws_url(stderr).await.unwrap();
        assert_eq!(url, "ws://127.0.0.1:1111/devtools/browser/first");

        let _ = child.wait().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_fails_on_exit_without_banner() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo 'no banner here' >&2")
            .stderr(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let stderr = child.stderr.take().unwrap();
        assert!(matches!(
            scan_for_ws_url(stderr).await,
            Err(LaunchError::LaunchFailed(_))
        ));

        let _ = child.wait().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_rejects_malformed_banner_url() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo 'DevTools listening on totally-not-a-url' >&2")
            .stderr(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let stderr = child.stderr.take().unwrap();
        assert!(matches!(
            scan_for_ws_url(stderr).await,
            Err(LaunchError::WsUrlParseError(_))
        ));

        let _ = child.wait().await;
    }
}
