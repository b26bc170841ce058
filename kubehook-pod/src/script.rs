//! Step script generation
//!
//! Steps run inside the job container through a small POSIX shell script:
//!
//! ```text
//! #!/bin/sh -l
//! set -e
//! export PATH="/opt/tool/bin:$PATH"
//! cd "/__w/repo/repo" && exec env "KEY=value" entrypoint arg1 arg2
//! ```
//!
//! Environment values, `PATH` entries and the working directory are escaped
//! and double-quoted. Keys are validated instead. The entrypoint and its
//! arguments are passed through verbatim.

use indexmap::IndexMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{HookError, Result};

/// Where the runner temp directory is mounted inside the job container
pub const CONTAINER_TEMP_DIR: &str = "/__w/_temp";

/// Characters that may not appear in an environment variable key
const FORBIDDEN_KEY_CHARS: &[char] = &['"', '\'', '=', '$'];

/// Builds the script that runs one step inside the job container
///
/// # Arguments
/// * `entry_point` - Program to exec
/// * `args` - Arguments appended after the entrypoint, verbatim
/// * `env` - Environment for the step, passed through `env`
/// * `prepend_path` - Directories put in front of `PATH`
/// * `working_directory` - Directory to change into before running
///
/// # Returns
/// The script text, or a validation error if an environment key is unsafe
pub fn build_script(
    entry_point: &str,
    args: &[String],
    env: &IndexMap<String, String>,
    prepend_path: &[String],
    working_directory: Option<&str>,
) -> Result<String> {
    let env_prefix = env_command(env)?;

    let mut command_line = String::from(entry_point);
    for arg in args {
        command_line.push(' ');
        command_line.push_str(arg);
    }

    let mut script = String::from("#!/bin/sh -l\nset -e\n");
    if !prepend_path.is_empty() {
        let entries: Vec<String> = prepend_path.iter().map(|p| escape_env_value(p)).collect();
        script.push_str(&format!("export PATH=\"{}:$PATH\"\n", entries.join(":")));
    }
    match working_directory {
        Some(dir) => script.push_str(&format!(
            "cd \"{}\" && exec {} {}\n",
            escape_env_value(dir),
            env_prefix,
            command_line
        )),
        None => script.push_str(&format!("exec {} {}\n", env_prefix, command_line)),
    }

    Ok(script)
}

/// Renders `env "K1=V1" "K2=V2"` for the given environment
pub fn env_command(env: &IndexMap<String, String>) -> Result<String> {
    let mut command = String::from("env");
    for (key, value) in env {
        validate_env_key(key)?;
        command.push_str(&format!(" \"{}={}\"", key, escape_env_value(value)));
    }
    Ok(command)
}

/// Rejects keys that would break out of the `KEY=value` token
pub fn validate_env_key(key: &str) -> Result<()> {
    if key.contains(FORBIDDEN_KEY_CHARS) {
        return Err(HookError::Validation(format!(
            "invalid character [\"'=$] in environment variable key: {}",
            key
        )));
    }
    Ok(())
}

/// Escapes text for use inside double quotes
///
/// Backslashes go first so the escapes added by later passes stay intact.
pub fn escape_env_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`")
}

/// A step script written to the runner temp directory
///
/// The file is removed when this value is dropped or [`StagedScript::remove`]
/// is called.
#[derive(Debug)]
pub struct StagedScript {
    file: NamedTempFile,
    container_path: String,
}

impl StagedScript {
    /// Writes `script` to a fresh `run-script-*.sh` file in `dir`
    pub fn write(dir: &Path, script: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("run-script-")
            .suffix(".sh")
            .tempfile_in(dir)?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644))?;
        }

        let file_name = file
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let container_path = format!("{}/{}", CONTAINER_TEMP_DIR, file_name);

        debug!(
            "Staged step script {} (container path {})",
            file.path().display(),
            container_path
        );

        Ok(Self {
            file,
            container_path,
        })
    }

    /// Local path of the script
    pub fn local_path(&self) -> &Path {
        self.file.path()
    }

    /// Path of the script as seen from inside the job container
    pub fn container_path(&self) -> &str {
        &self.container_path
    }

    /// Deletes the script, logging instead of failing
    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!("Failed to remove temporary run script {}: {}", path.display(), e);
        }
    }
}
