//! Shell resolution: configured shell, then `$SHELL`, then `/bin/sh`.

use tracing::warn;

pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Where the resolved shell came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellSource {
    Config,
    Environment,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShell {
    pub path: String,
    pub source: ShellSource,
}

/// Pick the shell for a run.
///
/// Only emptiness is checked here. A configured shell that does not exist
/// is kept, so the run fails at spawn time and the failure is recorded.
pub fn resolve(configured: Option<&str>, env_shell: Option<&str>) -> ResolvedShell {
    if let Some(path) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        return ResolvedShell {
            path: path.to_string(),
            source: ShellSource::Config,
        };
    }
    if let Some(path) = env_shell.map(str::trim).filter(|s| !s.is_empty()) {
        return ResolvedShell {
            path: path.to_string(),
            source: ShellSource::Environment,
        };
    }
    warn!(fallback = FALLBACK_SHELL, "No shell configured and $SHELL unset");
    ResolvedShell {
        path: FALLBACK_SHELL.to_string(),
        source: ShellSource::Fallback,
    }
}

/// Resolve against the current process environment.
pub fn resolve_from_env(configured: Option<&str>) -> ResolvedShell {
    let env_shell = std::env::var("SHELL").ok();
    resolve(configured, env_shell.as_deref())
}

/// Arguments passed to the shell ahead of the command text.
pub fn shell_flag(interactive: bool) -> &'static str {
    if interactive {
        "-ic"
    } else {
        "-c"
    }
}
