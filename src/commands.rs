//! Turns raw command lines into named commands ready to supervise.
//!
//! Names come from the first word of each command line. Commands written as
//! `npm:<script>` are looked up in the `scripts` table of `package.json`,
//! where `<script>` may contain a single `*` wildcard.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Name used when a command line yields no usable name.
pub const PLACEHOLDER_NAME: &str = "cmd";

const NPM_PREFIX: &str = "npm:";

/// Directory of project-local tool binaries, relative to the root.
const LOCAL_BIN_DIR: &str = "node_modules/.bin";

/// A command line paired with its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCommand {
    pub name: String,
    pub cmd: String,
}

impl NamedCommand {
    fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(default)]
    scripts: BTreeMap<String, String>,
}

/// Resolves `cmds` into uniquely named commands.
///
/// `package.json` in `root` is only read when at least one `npm:` alias is
/// present. Any alias that cannot be resolved fails the whole batch.
pub fn resolve(root: &Path, cmds: &[String]) -> Result<Vec<NamedCommand>, ConfigError> {
    if cmds.is_empty() {
        return Err(ConfigError::NoCommands);
    }

    let needs_scripts = cmds.iter().any(|cmd| npm_alias(cmd).is_some());
    let scripts = if needs_scripts {
        let raw = std::fs::read(root.join("package.json")).map_err(ConfigError::ReadPackageJson)?;
        parse_scripts(&raw)?
    } else {
        BTreeMap::new()
    };

    let mut resolved = Vec::with_capacity(cmds.len());
    let mut missing = Vec::new();
    for cmd in cmds {
        let Some(alias) = npm_alias(cmd) else {
            let name = derive_name(cmd);
            let name = if name.is_empty() { PLACEHOLDER_NAME } else { name };
            resolved.push(NamedCommand::new(name, cmd.as_str()));
            continue;
        };
        if let Some(script) = scripts.get(alias) {
            resolved.push(NamedCommand::new(alias, script.as_str()));
            continue;
        }
        if !alias.contains('*') {
            missing.push(alias.to_string());
            continue;
        }
        let before = resolved.len();
        resolved.extend(
            scripts
                .iter()
                .filter(|(name, _)| wildcard_match(alias, name))
                .map(|(name, script)| NamedCommand::new(name.as_str(), script.as_str())),
        );
        if resolved.len() == before {
            return Err(ConfigError::NoMatchingScripts(alias.to_string()));
        }
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingScripts(missing));
    }

    dedupe_names(&mut resolved);
    Ok(resolved)
}

fn parse_scripts(raw: &[u8]) -> Result<BTreeMap<String, String>, ConfigError> {
    let package: PackageJson = serde_json::from_slice(raw).map_err(ConfigError::ParsePackageJson)?;
    Ok(package.scripts)
}

fn npm_alias(cmd: &str) -> Option<&str> {
    cmd.trim().strip_prefix(NPM_PREFIX)
}

/// Returns the base name of the first word of `cmd`, or `""` when there is
/// none (e.g. `.` or `/`).
pub fn derive_name(cmd: &str) -> &str {
    let first = cmd.trim().split(' ').next().unwrap_or_default();
    Path::new(first)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

/// Suffixes repeated names with `.1`, `.2`, … in the order they appear.
pub fn dedupe_names(cmds: &mut [NamedCommand]) {
    let mut totals: HashMap<String, usize> = HashMap::new();
    for cmd in cmds.iter() {
        *totals.entry(cmd.name.clone()).or_default() += 1;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();
    for cmd in cmds.iter_mut() {
        if totals[&cmd.name] < 2 {
            continue;
        }
        let n = seen.entry(cmd.name.clone()).or_default();
        *n += 1;
        cmd.name = format!("{}.{}", cmd.name, n);
    }
}

/// Matches `s` against a pattern with at most one `*`.
///
/// Without a wildcard the comparison ignores ASCII case. Patterns with more
/// than one `*` never match.
pub fn wildcard_match(pattern: &str, s: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    match parts.as_slice() {
        [exact] => exact.eq_ignore_ascii_case(s),
        [prefix, suffix] => {
            s.len() >= prefix.len() + suffix.len() && s.starts_with(prefix) && s.ends_with(suffix)
        }
        _ => false,
    }
}

/// Resolves `dir` to an absolute path of an existing directory.
pub fn resolve_directory(dir: &Path) -> Result<PathBuf, ConfigError> {
    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        env::current_dir()
            .map_err(|source| ConfigError::Directory {
                path: dir.to_path_buf(),
                source,
            })?
            .join(dir)
    };
    let metadata = std::fs::metadata(&absolute).map_err(|source| ConfigError::Directory {
        path: absolute.clone(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(ConfigError::NotADirectory(absolute));
    }
    Ok(absolute)
}

/// Environment overrides for children started in `root`.
///
/// Prepends `root/node_modules/.bin` to the inherited `PATH` when that
/// directory exists.
pub fn child_env(root: &Path) -> HashMap<OsString, OsString> {
    let mut env = HashMap::new();
    let bin = root.join(LOCAL_BIN_DIR);
    if !bin.is_dir() {
        return env;
    }
    let inherited = env::var_os("PATH").unwrap_or_default();
    let paths = std::iter::once(bin).chain(env::split_paths(&inherited));
    match env::join_paths(paths) {
        Ok(path) => {
            env.insert(OsString::from("PATH"), path);
        }
        Err(err) => tracing::warn!("not adding {LOCAL_BIN_DIR} to PATH: {err}"),
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGE: &str = r#"
        {
            "scripts": {
                "dev:css": "echo 'css'",
                "dev:js": "echo 'js'",
                "test": "echo 'test'"
            }
        }
    "#;

    fn cmds(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), PACKAGE).unwrap();
        dir
    }

    fn scripts_for(aliases: &[&str]) -> Result<Vec<String>, ConfigError> {
        let dir = project();
        let mut got: Vec<String> = resolve(dir.path(), &cmds(aliases))?
            .into_iter()
            .map(|c| c.cmd)
            .collect();
        got.sort();
        Ok(got)
    }

    #[test]
    fn resolves_npm_aliases() {
        assert_eq!(
            scripts_for(&["npm:*"]).unwrap(),
            ["echo 'css'", "echo 'js'", "echo 'test'"]
        );
        assert_eq!(
            scripts_for(&["npm:dev:*"]).unwrap(),
            ["echo 'css'", "echo 'js'"]
        );
        assert_eq!(
            scripts_for(&["npm:dev:*", "npm:test"]).unwrap(),
            ["echo 'css'", "echo 'js'", "echo 'test'"]
        );
        assert_eq!(scripts_for(&["npm:*:js"]).unwrap(), ["echo 'js'"]);
    }

    #[test]
    fn unresolved_aliases_fail_the_batch() {
        assert!(matches!(
            scripts_for(&["echo ok", "npm:banana"]),
            Err(ConfigError::MissingScripts(names)) if names == ["banana"]
        ));
        assert!(matches!(
            scripts_for(&["npm:duck:*"]),
            Err(ConfigError::NoMatchingScripts(pattern)) if pattern == "duck:*"
        ));
    }

    #[test]
    fn missing_package_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(dir.path(), &cmds(&["npm:test"])).unwrap_err();
        assert!(matches!(err, ConfigError::ReadPackageJson(_)));
    }

    #[test]
    fn malformed_package_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{ nope").unwrap();
        let err = resolve(dir.path(), &cmds(&["npm:test"])).unwrap_err();
        assert!(matches!(err, ConfigError::ParsePackageJson(_)));
    }

    #[test]
    fn package_json_is_ignored_without_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve(dir.path(), &cmds(&["echo hi"])).unwrap();
        assert_eq!(resolved, vec![NamedCommand::new("echo", "echo hi")]);
    }

    #[test]
    fn npm_scripts_keep_their_position() {
        let dir = project();
        let names: Vec<String> = resolve(dir.path(), &cmds(&["cargo watch", "npm:dev:*", "make"]))
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["cargo", "dev:css", "dev:js", "make"]);
    }

    #[test]
    fn rejects_empty_command_list() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(resolve(dir.path(), &[]), Err(ConfigError::NoCommands)));
    }

    #[test]
    fn derives_names_from_first_word() {
        assert_eq!(derive_name("echo hello"), "echo");
        assert_eq!(derive_name("  ./bin/server --port 80"), "server");
        assert_eq!(derive_name("/usr/local/bin/node app.js"), "node");
        assert_eq!(derive_name("."), "");
        assert_eq!(derive_name("/"), "");
        assert_eq!(derive_name(""), "");
    }

    #[test]
    fn placeholder_for_unnamed_commands() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve(dir.path(), &cmds(&["/", "echo"])).unwrap();
        assert_eq!(resolved[0].name, PLACEHOLDER_NAME);
        assert_eq!(resolved[1].name, "echo");
    }

    #[test]
    fn duplicate_names_are_numbered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = resolve(
            dir.path(),
            &cmds(&["echo hello", "make", "echo world", "echo again"]),
        )
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
        assert_eq!(names, vec!["echo.1", "make", "echo.2", "echo.3"]);
    }

    #[test]
    fn wildcard_matching() {
        let cases = [
            ("a", "a", true),
            ("b", "a", false),
            ("*", "a", true),
            ("*", "abcd", true),
            ("hello:*", "hello:world", true),
            ("hello:*", "helloz:world", false),
            ("*:banana", "hello:banana", true),
            ("*:banana", "hello:bananaz", false),
            ("hello:*:jones", "hello:world:jones", true),
            ("hello:*:jones", "hello:world:steve", false),
            ("a*a", "a", false),
            ("*a*", "a", false),
        ];
        for (pattern, input, want) in cases {
            assert_eq!(wildcard_match(pattern, input), want, "{pattern:?} vs {input:?}");
        }
    }

    #[test]
    fn resolves_relative_and_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_directory(dir.path()).unwrap(), dir.path());

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "").unwrap();
        assert!(matches!(
            resolve_directory(&file),
            Err(ConfigError::NotADirectory(_))
        ));
        assert!(matches!(
            resolve_directory(&dir.path().join("missing")),
            Err(ConfigError::Directory { .. })
        ));
    }

    #[test]
    fn local_bin_goes_first_on_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(child_env(dir.path()).is_empty());

        let bin = dir.path().join(LOCAL_BIN_DIR);
        std::fs::create_dir_all(&bin).unwrap();
        let env = child_env(dir.path());
        let path = env.get(&OsString::from("PATH")).unwrap();
        let first = env::split_paths(path).next().unwrap();
        assert_eq!(first, bin);
    }
}
