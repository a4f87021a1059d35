//! Environment composition and process replacement.
//!
//! To run a binary from an installed environment the composer derives the
//! runtime prefix from the ruby executable path, assembles `RUBYLIB` from
//! the shim directory, every unpacked gem's require paths (read from the
//! sidecar markers, never the gemspec), the runtime stdlib, and its arch
//! subdirectory, then replaces the current process with the runtime. On
//! success it never returns.

use crate::extract::{EXECUTABLES_MARKER, REQUIRE_PATHS_MARKER};
use crate::gemfile::EnvConstants;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Shim directory name under the runtime prefix
const SHIM_DIR: &str = "seam_shim";

/// Shadow `bundler/setup` so `require "bundler/setup"` is satisfied without
/// Bundler being installed
const BUNDLER_SETUP_SHADOW: &str = "\
module Bundler
  def self.setup(*groups)
    self
  end

  def self.require(*groups)
    self
  end
end
";

/// Preload that no-ops the runtime's `gem` activation
const GEM_PRELOAD_SHADOW: &str = "\
module Kernel
  def gem(*args)
    true
  end
  private :gem
end
";

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("no ruby runtime found (set SEAM_RUBY or put ruby on PATH)")]
    MissingRuntime,

    #[error("binary {name} not found in any installed gem")]
    MissingBinary { name: String },

    #[error("failed preparing environment at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to exec {runtime}: {source}")]
    Exec {
        runtime: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> EnvironmentError + '_ {
    move |source| EnvironmentError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Locate the ruby executable: `SEAM_RUBY` first, then `PATH`.
///
/// # Errors
///
/// Returns `MissingRuntime` when no executable is found.
pub fn find_runtime() -> Result<PathBuf, EnvironmentError> {
    if let Some(explicit) = crate::env_vars::ruby_path() {
        let path = PathBuf::from(explicit);
        if path.is_file() {
            return Ok(path);
        }
        return Err(EnvironmentError::MissingRuntime);
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join("ruby");
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(EnvironmentError::MissingRuntime)
}

/// Ask a runtime for its `RUBY_VERSION`
#[must_use]
pub fn runtime_version(runtime: &Path) -> Option<String> {
    let output = Command::new(runtime)
        .args(["--disable-gems", "-e", "puts RUBY_VERSION"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!version.is_empty()).then_some(version)
}

/// Environment constants for Gemfile evaluation, detected from a runtime
/// when one is available
#[must_use]
pub fn env_constants(runtime: Option<&Path>) -> EnvConstants {
    let mut constants = EnvConstants {
        ruby_platform: host_platform(),
        ..EnvConstants::default()
    };
    if let Some(version) = runtime.and_then(runtime_version) {
        constants.ruby_version = version;
    }
    constants
}

/// The host platform in rubygems terms (e.g. `x86_64-linux`)
#[must_use]
pub fn host_platform() -> String {
    let arch = match std::env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    };
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{arch}-{os}")
}

/// The installation prefix of a runtime executable (strips `/bin/<exe>`)
#[must_use]
pub fn runtime_prefix(runtime: &Path) -> PathBuf {
    let parent = runtime.parent().unwrap_or_else(|| Path::new("/"));
    if parent.file_name().is_some_and(|name| name == "bin") {
        parent
            .parent()
            .map_or_else(|| parent.to_path_buf(), Path::to_path_buf)
    } else {
        parent.to_path_buf()
    }
}

/// Build the colon-joined `RUBYLIB` for an environment.
///
/// Order: shim directory, each unpacked gem's require paths, the runtime
/// stdlib, and the first arch subdirectory holding `rbconfig.rb`.
///
/// # Errors
///
/// Returns an error when the shim cannot be written or the environment
/// directory cannot be read.
pub fn compose_rubylib(prefix: &Path, env_dir: &Path) -> Result<String, EnvironmentError> {
    let mut parts: Vec<PathBuf> = Vec::new();

    parts.push(ensure_shim(prefix)?);

    let gems_dir = env_dir.join("gems");
    let mut gem_dirs: Vec<PathBuf> = match fs::read_dir(&gems_dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    };
    gem_dirs.sort();

    for gem_dir in gem_dirs {
        for require_path in read_require_paths(&gem_dir) {
            parts.push(gem_dir.join(require_path));
        }
    }

    if let Some(stdlib) = find_stdlib_dir(prefix) {
        if let Some(arch) = find_arch_dir(&stdlib) {
            parts.push(stdlib.clone());
            parts.push(arch);
        } else {
            parts.push(stdlib);
        }
    }

    Ok(parts
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(":"))
}

/// Load paths from the sidecar marker, defaulting to `lib`
fn read_require_paths(gem_dir: &Path) -> Vec<String> {
    let marker = gem_dir.join(REQUIRE_PATHS_MARKER);
    let Ok(content) = fs::read_to_string(marker) else {
        return vec!["lib".to_string()];
    };
    let paths: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if paths.is_empty() {
        vec!["lib".to_string()]
    } else {
        paths
    }
}

/// `<prefix>/lib/ruby/<X.Y.Z>`, picking the first version-named directory
fn find_stdlib_dir(prefix: &Path) -> Option<PathBuf> {
    let ruby_lib = prefix.join("lib").join("ruby");
    let mut candidates: Vec<PathBuf> = fs::read_dir(&ruby_lib)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(|c: char| c.is_ascii_digit()))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// The first stdlib subdirectory containing the compiler-config file
fn find_arch_dir(stdlib: &Path) -> Option<PathBuf> {
    let mut subdirs: Vec<PathBuf> = fs::read_dir(stdlib)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    subdirs
        .into_iter()
        .find(|dir| dir.join("rbconfig.rb").is_file())
}

/// Create the shim directory on first use, returning its path
fn ensure_shim(prefix: &Path) -> Result<PathBuf, EnvironmentError> {
    let shim_dir = prefix.join(SHIM_DIR);
    let bundler_dir = shim_dir.join("bundler");
    fs::create_dir_all(&bundler_dir).map_err(io_error(&shim_dir))?;

    let setup = bundler_dir.join("setup.rb");
    if !setup.is_file() {
        fs::write(&setup, BUNDLER_SETUP_SHADOW).map_err(io_error(&setup))?;
    }
    Ok(shim_dir)
}

/// Write the `gem`-shadowing preload on demand and return the `-r` option
fn ensure_preload(prefix: &Path) -> Result<String, EnvironmentError> {
    let shim_dir = ensure_shim(prefix)?;
    let preload = shim_dir.join("seam_preload.rb");
    if !preload.is_file() {
        fs::write(&preload, GEM_PRELOAD_SHADOW).map_err(io_error(&preload))?;
    }
    Ok(format!("-r{}", preload.display()))
}

/// Find the script for a named binary by consulting the executables
/// sidecars of every unpacked gem
fn find_script(env_dir: &Path, binary: &str) -> Result<PathBuf, EnvironmentError> {
    let gems_dir = env_dir.join("gems");
    let mut gem_dirs: Vec<PathBuf> = fs::read_dir(&gems_dir)
        .map_err(io_error(&gems_dir))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    gem_dirs.sort();

    for gem_dir in gem_dirs {
        let Ok(executables) = fs::read_to_string(gem_dir.join(EXECUTABLES_MARKER)) else {
            continue;
        };
        if !executables.lines().any(|line| line.trim() == binary) {
            continue;
        }
        for bindir in ["exe", "bin", "libexec"] {
            let script = gem_dir.join(bindir).join(binary);
            if script.is_file() {
                return Ok(script);
            }
        }
    }

    Err(EnvironmentError::MissingBinary {
        name: binary.to_string(),
    })
}

/// Compose the environment and replace this process with
/// `runtime script args...`. Returns only on error.
///
/// # Errors
///
/// Returns an error when the binary is missing, the environment cannot be
/// prepared, or the exec itself fails.
pub fn exec_binary(
    runtime: &Path,
    env_dir: &Path,
    binary: &str,
    args: &[String],
) -> Result<std::convert::Infallible, EnvironmentError> {
    let script = find_script(env_dir, binary)?;
    let prefix = runtime_prefix(runtime);

    let rubylib = compose_rubylib(&prefix, env_dir)?;
    let rubyopt = ensure_preload(&prefix)?;

    let runtime_lib = prefix.join("lib");
    let ld_library_path = match std::env::var("LD_LIBRARY_PATH") {
        Ok(existing) if !existing.is_empty() => {
            format!("{}:{existing}", runtime_lib.display())
        }
        _ => runtime_lib.display().to_string(),
    };

    crate::debug!("exec {} {}", runtime.display(), script.display());
    crate::debug!("RUBYLIB={rubylib}");

    let mut command = Command::new(runtime);
    command
        .arg(&script)
        .args(args)
        .env("RUBYLIB", rubylib)
        .env("RUBYOPT", rubyopt)
        .env("LD_LIBRARY_PATH", ld_library_path);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let error = command.exec();
        Err(EnvironmentError::Exec {
            runtime: runtime.display().to_string(),
            source: error,
        })
    }

    #[cfg(not(unix))]
    {
        let status = command.status().map_err(|source| EnvironmentError::Exec {
            runtime: runtime.display().to_string(),
            source,
        })?;
        std::process::exit(status.code().unwrap_or(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fake_prefix(temp: &tempfile::TempDir) -> PathBuf {
        let prefix = temp.path().join("ruby-3.3.0");
        let stdlib = prefix.join("lib/ruby/3.3.0");
        let arch = stdlib.join("x86_64-linux");
        fs::create_dir_all(&arch).unwrap();
        fs::write(arch.join("rbconfig.rb"), "module RbConfig; end\n").unwrap();
        prefix
    }

    fn fake_env(temp: &tempfile::TempDir) -> PathBuf {
        let env_dir = temp.path().join("env");
        let gem = env_dir.join("gems/rake-13.0.0");
        fs::create_dir_all(gem.join("lib")).unwrap();
        fs::create_dir_all(gem.join("exe")).unwrap();

        let mut marker = fs::File::create(gem.join(REQUIRE_PATHS_MARKER)).unwrap();
        writeln!(marker, "lib").unwrap();
        let mut executables = fs::File::create(gem.join(EXECUTABLES_MARKER)).unwrap();
        writeln!(executables, "rake").unwrap();
        fs::write(gem.join("exe/rake"), "#!/usr/bin/env ruby\n").unwrap();

        env_dir
    }

    #[test]
    fn prefix_strips_bin() {
        assert_eq!(
            runtime_prefix(Path::new("/opt/ruby/bin/ruby")),
            Path::new("/opt/ruby")
        );
        assert_eq!(
            runtime_prefix(Path::new("/weird/ruby")),
            Path::new("/weird")
        );
    }

    #[test]
    fn rubylib_orders_shim_gems_stdlib_arch() {
        let temp = tempfile::tempdir().unwrap();
        let prefix = fake_prefix(&temp);
        let env_dir = fake_env(&temp);

        let rubylib = compose_rubylib(&prefix, &env_dir).unwrap();
        let parts: Vec<&str> = rubylib.split(':').collect();

        assert!(parts[0].ends_with(SHIM_DIR));
        assert!(parts[1].ends_with("gems/rake-13.0.0/lib"));
        assert!(parts[2].ends_with("lib/ruby/3.3.0"));
        assert!(parts[3].ends_with("lib/ruby/3.3.0/x86_64-linux"));
    }

    #[test]
    fn shim_writes_bundler_setup_once() {
        let temp = tempfile::tempdir().unwrap();
        let prefix = fake_prefix(&temp);

        let shim = ensure_shim(&prefix).unwrap();
        let setup = shim.join("bundler/setup.rb");
        assert!(setup.is_file());
        let content = fs::read_to_string(&setup).unwrap();
        assert!(content.contains("module Bundler"));

        ensure_shim(&prefix).unwrap();
    }

    #[test]
    fn missing_require_paths_marker_defaults_to_lib() {
        let temp = tempfile::tempdir().unwrap();
        let gem = temp.path().join("gems/x-1.0");
        fs::create_dir_all(&gem).unwrap();
        assert_eq!(read_require_paths(&gem), vec!["lib"]);
    }

    #[test]
    fn script_lookup_uses_sidecars() {
        let temp = tempfile::tempdir().unwrap();
        let env_dir = fake_env(&temp);

        let script = find_script(&env_dir, "rake").unwrap();
        assert!(script.ends_with("exe/rake"));

        let error = find_script(&env_dir, "rspec").unwrap_err();
        assert!(matches!(error, EnvironmentError::MissingBinary { .. }));
    }

    #[test]
    fn host_platform_is_arch_dash_os() {
        let platform = host_platform();
        assert!(platform.contains('-'));
    }
}
