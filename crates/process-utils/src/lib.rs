//! Process helpers for engine stages: command construction, printable
//! command lines and executable lookup.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::debug;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Build an engine command.
///
/// The child is killed when its handle is dropped, so an abandoned stream
/// never leaves an orphan process behind. On Windows no console window is
/// opened for it.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(program);
    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);
    command.kill_on_drop(true);
    command
}

/// Render a program and its arguments as a single human-readable line.
///
/// Arguments containing whitespace or quotes are single-quoted. The result is
/// meant for logs and error messages, not for re-execution by a shell.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut line = quote_arg(program);
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg.as_ref()));
    }
    line
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Locate an executable.
///
/// A name containing a path separator is checked as-is; a bare name is
/// searched for in every `PATH` entry (with `PATHEXT` suffixes on Windows).
pub fn find_executable(name: impl AsRef<Path>) -> Option<PathBuf> {
    let name = name.as_ref();
    if name.components().count() > 1 {
        return is_executable(name).then(|| name.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    let found = std::env::split_paths(&path)
        .flat_map(|dir| candidates(&dir, name))
        .find(|candidate| is_executable(candidate));

    debug!(name = %name.display(), found = ?found, "Executable lookup");
    found
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &Path) -> Vec<PathBuf> {
    let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.CMD;.BAT;.COM".to_string());
    let mut out = vec![dir.join(name)];
    out.extend(
        exts.split(';')
            .filter(|e| !e.is_empty())
            .map(|ext| dir.join(format!("{}{}", name.display(), ext.to_ascii_lowercase()))),
    );
    out
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &Path) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_only_when_needed() {
        let line = command_line("gm", &["convert", "-", "-resize", "10x10", "two words"]);
        assert_eq!(line, "gm convert - -resize 10x10 'two words'");
        assert_eq!(command_line::<&str>("jpegtran", &[]), "jpegtran");
        assert_eq!(command_line("sh", &["-c", "it's"]), r"sh -c 'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executable_by_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fake-tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        // Not executable yet.
        assert!(find_executable(&tool).is_none());

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_executable(&tool), Some(tool.clone()));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_executable_on_path() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("definitely-not-an-impro-engine").is_none());
    }
}
