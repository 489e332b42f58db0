//! External tool execution: invocation description, environment composition,
//! and output streaming.
//!
//! Every tool runs to completion before the next one starts. Combined
//! stdout/stderr is echoed to our stdout line by line as it arrives and
//! forwarded to the log file under the `tool` target.

use crate::error::BuildError;
use crate::log_collector::TOOL_TARGET;
use std::collections::{BTreeMap, VecDeque};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Lines of output retained for error reporting
const OUTPUT_TAIL_LINES: usize = 400;

/// Ordered environment for one invocation. Later overrides win.
///
/// Keys and values are kept as OS strings so inherited variables that are
/// not valid UTF-8 still reach the child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<OsString, OsString>,
}

impl BuildEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment
    pub fn inherited() -> Self {
        BuildEnvironment {
            vars: std::env::vars_os().collect(),
        }
    }

    pub fn with(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Put `dir` in front of `PATH`
    pub fn prepend_path(self, dir: &Path) -> Self {
        let mut path = dir.as_os_str().to_os_string();
        if let Some(old) = self.get_os("PATH").filter(|old| !old.is_empty()) {
            path.push(":");
            path.push(old);
        }
        self.with("PATH", path)
    }

    /// Value of `key`, if set and valid UTF-8
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_os(key).and_then(OsStr::to_str)
    }

    pub fn get_os(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Log every variable, for diagnosing a failed tool
    pub fn dump(&self) {
        log::error!("[Exec] Environment ({} variables):", self.vars.len());
        for (key, value) in &self.vars {
            log::error!(
                "[Exec]   {}={}",
                key.to_string_lossy(),
                value.to_string_lossy()
            );
        }
    }
}

/// A single external tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Replaces the child's environment entirely when set
    pub env: Option<BuildEnvironment>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: BuildEnvironment) -> Self {
        self.env = Some(env);
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Exit status and retained output of a finished tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the tool was killed by a signal
    pub code: Option<i32>,
    pub output: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Seam between the pipelines and the processes they start.
#[allow(async_fn_in_trait)]
pub trait ToolRunner {
    /// Run to completion and report the status, whatever it is.
    async fn run_unchecked(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError>;

    /// Run to completion; a non-zero exit is an [`BuildError::ExternalToolFailure`].
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        let output = self.run_unchecked(invocation).await?;
        if output.success() {
            return Ok(output);
        }

        log::error!(
            "[Exec] Command failed with exit code {:?}: {}",
            output.code,
            invocation
        );
        if let Some(env) = &invocation.env {
            env.dump();
        }
        Err(BuildError::ExternalToolFailure {
            command: invocation.command_line(),
            code: output.code,
            output: output.output,
        })
    }

    /// Run a step whose failure does not matter. Spawn errors are tolerated too.
    async fn run_best_effort(&self, invocation: &Invocation) -> Option<ToolOutput> {
        match self.run_unchecked(invocation).await {
            Ok(output) => {
                if !output.success() {
                    log::warn!(
                        "[Exec] Ignoring exit code {:?} from: {}",
                        output.code,
                        invocation
                    );
                }
                Some(output)
            }
            Err(e) => {
                log::warn!("[Exec] Ignoring failure of {}: {}", invocation, e);
                None
            }
        }
    }
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    async fn run_unchecked(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        log::info!("[Exec] Executing: {}", invocation);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = &invocation.env {
            command.env_clear().envs(env.iter());
        }

        let mut child = command.spawn().map_err(|source| BuildError::Spawn {
            command: invocation.command_line(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| BuildError::Spawn {
            command: invocation.command_line(),
            source: std::io::Error::other("Failed to capture stdout"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| BuildError::Spawn {
            command: invocation.command_line(),
            source: std::io::Error::other("Failed to capture stderr"),
        })?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let (mut stdout_buf, mut stderr_buf) = (Vec::new(), Vec::new());
        let mut stdout_closed = false;
        let mut stderr_closed = false;
        let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);

        while !(stdout_closed && stderr_closed) {
            let line = tokio::select! {
                line = read_lossy_line(&mut stdout, &mut stdout_buf), if !stdout_closed => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => { stdout_closed = true; continue; }
                    Err(e) => {
                        log::warn!("[Exec] stdout read error: {}", e);
                        stdout_closed = true;
                        continue;
                    }
                },
                line = read_lossy_line(&mut stderr, &mut stderr_buf), if !stderr_closed => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => { stderr_closed = true; continue; }
                    Err(e) => {
                        log::warn!("[Exec] stderr read error: {}", e);
                        stderr_closed = true;
                        continue;
                    }
                },
            };

            println!("{}", line);
            log::info!(target: TOOL_TARGET, "{}", line);
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        // A child still writing to a pipe we stopped reading gets EPIPE instead of blocking
        drop(stdout);
        drop(stderr);

        let status = child.wait().await?;
        log::debug!("[Exec] {} exited with {}", invocation.program, status);

        let output = tail.into_iter().collect::<Vec<_>>().join("\n");
        Ok(ToolOutput {
            code: status.code(),
            output,
        })
    }
}

/// Next line of `reader`, decoded lossily so stray non-UTF-8 bytes never stop
/// the stream from draining.
///
/// Bytes of a partially read line stay in `buf` when the future is dropped,
/// so this can be raced in `select!` and called again.
async fn read_lossy_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    reader.read_until(b'\n', buf).await?;
    if buf.is_empty() {
        return Ok(None);
    }
    let mut raw = std::mem::take(buf);
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_override_wins() {
        let env = BuildEnvironment::new().with("CC", "gcc").with("CC", "clang");
        assert_eq!(env.get("CC"), Some("clang"));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn test_prepend_path() {
        let env = BuildEnvironment::new()
            .with("PATH", "/usr/bin")
            .prepend_path(Path::new("/clang/bin"));
        assert_eq!(env.get("PATH"), Some("/clang/bin:/usr/bin"));

        let bare = BuildEnvironment::new().prepend_path(Path::new("/clang/bin"));
        assert_eq!(bare.get("PATH"), Some("/clang/bin"));
    }

    #[test]
    fn test_command_line() {
        let inv = Invocation::new("make", "/k").args(["-C", "common"]).arg("modules_prepare");
        assert_eq!(inv.to_string(), "make -C common modules_prepare");
    }

    #[tokio::test]
    async fn test_process_runner_captures_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Invocation::new("sh", dir.path()).args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = ProcessRunner.run_unchecked(&inv).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert!(output.output.contains("out"));
        assert!(output.output.contains("err"));

        match ProcessRunner.run(&inv).await {
            Err(BuildError::ExternalToolFailure { code, .. }) => assert_eq!(code, Some(3)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_env_replaces_child_environment() {
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnvironment::new()
            .with("PATH", "/usr/bin:/bin")
            .with("KSU_MARKER", "1");
        let inv = Invocation::new("sh", dir.path())
            .args(["-c", "test \"$KSU_MARKER\" = 1 && test -z \"$HOME\""])
            .env(env);
        assert!(ProcessRunner.run(&inv).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Invocation::new("ksu-definitely-not-a-tool", dir.path());
        assert!(matches!(
            ProcessRunner.run(&inv).await,
            Err(BuildError::Spawn { .. })
        ));
        assert!(ProcessRunner.run_best_effort(&inv).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_and_bulk_output_drain() {
        let dir = tempfile::tempdir().unwrap();
        // One Latin-1 byte, then ~400 KB on stdout and a burst on stderr
        let script = "printf 'caf\\351\\n'; yes abc | head -n 100000; \
                      yes err | head -n 5000 >&2; exit 5";
        let inv = Invocation::new("sh", dir.path()).args(["-c", script]);

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            ProcessRunner.run_unchecked(&inv),
        )
        .await
        .expect("runner stalled on tool output")
        .unwrap();

        assert_eq!(output.code, Some(5));
        assert_eq!(output.output.lines().count(), OUTPUT_TAIL_LINES);

        match ProcessRunner.run(&inv).await {
            Err(BuildError::ExternalToolFailure { code, .. }) => assert_eq!(code, Some(5)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_kept_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Invocation::new("sh", dir.path()).args(["-c", "printf 'caf\\351\\r\\nok'"]);
        let output = ProcessRunner.run_unchecked(&inv).await.unwrap();
        assert_eq!(output.code, Some(0));
        assert_eq!(output.output, "caf\u{FFFD}\nok");
    }

    #[tokio::test]
    async fn test_read_lossy_line_resumes_partial_line() {
        let mut reader = BufReader::new(&b"first\nsecond\r\nthird"[..]);
        let mut buf = b"pre-".to_vec();
        assert_eq!(
            read_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("pre-first")
        );
        assert_eq!(
            read_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(
            read_lossy_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("third")
        );
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_variable_reaches_child() {
        use std::os::unix::ffi::OsStringExt;

        let dir = tempfile::tempdir().unwrap();
        let value = OsString::from_vec(b"caf\xe9".to_vec());
        let env = BuildEnvironment::new()
            .with("PATH", "/usr/bin:/bin")
            .with("KSU_LATIN1", value.clone());
        assert_eq!(env.get_os("KSU_LATIN1"), Some(value.as_os_str()));
        assert_eq!(env.get("KSU_LATIN1"), None);

        let inv = Invocation::new("sh", dir.path())
            .args(["-c", "test \"$KSU_LATIN1\" = \"$(printf 'caf\\351')\""])
            .env(env);
        assert!(ProcessRunner.run(&inv).await.is_ok());
    }
}
