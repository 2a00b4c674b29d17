//! Compile-time command name resolution.
//!
//! Names are resolved once, when a statement is compiled. A script that
//! changes the registry, the search path or the current directory after that
//! still runs the commands it was compiled against.

use crate::command::ResolvedCommand;
use crate::env::Environment;
use crate::external::{ExternalCommand, find_command_path};
use crate::registry::CommandRegistry;
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the variable listing executable extensions, e.g. `.COM;.EXE;.BAT`.
pub const PATHEXT: &str = "PATHEXT";

pub trait CommandResolver: Send + Sync {
    fn try_resolve(&self, name: &str) -> Option<ResolvedCommand>;
}

/// Looks the name up in the command registry; a fresh instance per resolution.
pub struct BuiltinResolver {
    commands: Arc<CommandRegistry>,
}

impl BuiltinResolver {
    pub fn new(commands: Arc<CommandRegistry>) -> Self {
        Self { commands }
    }
}

impl CommandResolver for BuiltinResolver {
    fn try_resolve(&self, name: &str) -> Option<ResolvedCommand> {
        self.commands.create(name)
    }
}

/// Finds an executable file on the search path, then in the current directory.
#[derive(Clone)]
pub struct ExternalResolver {
    search_paths: Arc<Vec<PathBuf>>,
    cwd: PathBuf,
}

impl ExternalResolver {
    pub fn new(search_paths: Arc<Vec<PathBuf>>, cwd: PathBuf) -> Self {
        Self { search_paths, cwd }
    }
}

impl CommandResolver for ExternalResolver {
    fn try_resolve(&self, name: &str) -> Option<ResolvedCommand> {
        let path = find_command_path(name, &self.search_paths, &self.cwd)?;
        tracing::debug!(name, path = %path.display(), "resolved external command");
        Some(ResolvedCommand::Plain(Arc::new(ExternalCommand::new(path))))
    }
}

/// Tries `name` with every extension of a `;`-separated list, in order.
pub struct PlatformExtensionResolver {
    external: ExternalResolver,
    extensions: Vec<String>,
}

impl PlatformExtensionResolver {
    pub fn new(external: ExternalResolver, extension_list: Option<&str>) -> Self {
        let extensions = extension_list
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            external,
            extensions,
        }
    }
}

impl CommandResolver for PlatformExtensionResolver {
    fn try_resolve(&self, name: &str) -> Option<ResolvedCommand> {
        self.extensions
            .iter()
            .find_map(|ext| self.external.try_resolve(&format!("{name}{ext}")))
    }
}

/// Asks each resolver in turn; the first hit wins.
pub struct AggregateResolver {
    resolvers: Vec<Box<dyn CommandResolver>>,
}

impl AggregateResolver {
    pub fn new(resolvers: Vec<Box<dyn CommandResolver>>) -> Self {
        Self { resolvers }
    }

    /// Builtins, then programs on disk, then (on Windows) programs with one of
    /// the `PATHEXT` extensions.
    pub fn for_environment(env: &Environment) -> Self {
        let external = ExternalResolver::new(env.path(), env.cwd());
        let mut resolvers: Vec<Box<dyn CommandResolver>> = vec![
            Box::new(BuiltinResolver::new(env.commands().clone())),
            Box::new(external.clone()),
        ];
        if cfg!(windows) {
            let extensions = env.get_var(PATHEXT);
            resolvers.push(Box::new(PlatformExtensionResolver::new(
                external,
                extensions.as_deref(),
            )));
        }
        Self::new(resolvers)
    }
}

impl CommandResolver for AggregateResolver {
    fn try_resolve(&self, name: &str) -> Option<ResolvedCommand> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.try_resolve(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ResolvedCommand;
    use std::fs;
    use std::path::Path;

    #[cfg(unix)]
    fn make_executable(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn external_in(dir: &Path) -> ExternalResolver {
        ExternalResolver::new(Arc::new(vec![dir.to_path_buf()]), PathBuf::from("/"))
    }

    #[test]
    fn test_builtins_win_over_programs() {
        let registry = Arc::new(CommandRegistry::with_builtins());
        let resolver = AggregateResolver::new(vec![
            Box::new(BuiltinResolver::new(registry)),
            Box::new(ExternalResolver::new(
                Arc::new(vec![PathBuf::from("/bin")]),
                PathBuf::from("/"),
            )),
        ]);
        match resolver.try_resolve("echo") {
            Some(ResolvedCommand::Plain(command)) => assert_eq!(command.name(), "echo"),
            _ => panic!("echo should resolve to the builtin"),
        }
    }

    #[test]
    fn test_unknown_name_resolves_to_nothing() {
        let registry = Arc::new(CommandRegistry::with_builtins());
        let resolver = BuiltinResolver::new(registry);
        assert!(resolver.try_resolve("definitely-not-a-command").is_none());
    }

    #[test]
    #[cfg(unix)]
    fn test_extension_list_is_tried_in_order() {
        let dir = tempfile::tempdir().unwrap();
        make_executable(dir.path(), "tool.BAT");
        make_executable(dir.path(), "tool.CMD");

        let resolver =
            PlatformExtensionResolver::new(external_in(dir.path()), Some(".COM;.EXE;.BAT;.CMD"));
        match resolver.try_resolve("tool") {
            Some(ResolvedCommand::Plain(command)) => assert_eq!(command.name(), "tool.BAT"),
            _ => panic!("tool should resolve with the .BAT extension"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_missing_or_empty_extension_list_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        make_executable(dir.path(), "tool");

        let missing = PlatformExtensionResolver::new(external_in(dir.path()), None);
        let empty = PlatformExtensionResolver::new(external_in(dir.path()), Some(""));
        assert!(missing.try_resolve("tool").is_none());
        assert!(empty.try_resolve("tool").is_none());
    }
}
