use crate::registry::CommandRegistry;
use indexmap::IndexMap;
use std::env as stdenv;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Variable bindings, in definition order.
pub type Variables = IndexMap<String, String>;

/// Variable holding the exit status of the last top-level statement.
pub const EXIT_STATUS: &str = "EXIT_STATUS";

/// Shell state shared by the interpreter and the commands it runs.
///
/// The environment contains:
/// - the current directory used to resolve relative paths and to start processes,
/// - variable bindings, visible to expansions and to executed processes,
/// - the builtin command registry,
/// - the search path used to find external programs,
/// - an exit flag that the interpreter and the REPL check after every statement.
///
/// Readers get immutable snapshots (`Arc`s); writers install a whole new
/// mapping instead of mutating the one readers may hold.
pub struct Environment {
    cwd: RwLock<PathBuf>,
    variables: RwLock<Arc<Variables>>,
    path: RwLock<Arc<Vec<PathBuf>>>,
    commands: Arc<CommandRegistry>,
    exit: AtomicBool,
}

impl Environment {
    /// Capture the current process state: variables from `std::env::vars()`,
    /// the search path from `PATH` and the working directory.
    pub fn new(commands: CommandRegistry) -> Self {
        let variables: Variables = stdenv::vars().collect();
        let path = variables
            .get("PATH")
            .map(|paths| stdenv::split_paths(paths).collect())
            .unwrap_or_default();
        let cwd = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_state(commands, cwd, variables, path)
    }

    pub fn with_state(
        commands: CommandRegistry,
        cwd: PathBuf,
        variables: Variables,
        path: Vec<PathBuf>,
    ) -> Self {
        Self {
            cwd: RwLock::new(cwd),
            variables: RwLock::new(Arc::new(variables)),
            path: RwLock::new(Arc::new(path)),
            commands: Arc::new(commands),
            exit: AtomicBool::new(false),
        }
    }

    pub fn cwd(&self) -> PathBuf {
        self.cwd
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_cwd(&self, dir: PathBuf) {
        *self.cwd.write().unwrap_or_else(PoisonError::into_inner) = dir;
    }

    /// Snapshot of the current bindings.
    pub fn variables(&self) -> Arc<Variables> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_variables(&self, variables: impl Into<Arc<Variables>>) {
        *self.variables.write().unwrap_or_else(PoisonError::into_inner) = variables.into();
    }

    pub fn get_var(&self, key: &str) -> Option<String> {
        self.variables().get(key).cloned()
    }

    /// Set or override one variable, installing a new mapping.
    pub fn set_var(&self, key: impl Into<String>, val: impl Into<String>) {
        let mut current = self.variables.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Variables::clone(&current);
        next.insert(key.into(), val.into());
        *current = Arc::new(next);
    }

    /// Binds `key` to `value`, or unbinds it for `None`, in one step.
    /// Returns what `key` was bound to before.
    pub fn replace_var(&self, key: &str, value: Option<String>) -> Option<String> {
        let mut current = self.variables.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Variables::clone(&current);
        let previous = match value {
            Some(value) => next.insert(key.to_string(), value),
            None => next.shift_remove(key),
        };
        *current = Arc::new(next);
        previous
    }

    pub fn remove_var(&self, key: &str) -> Option<String> {
        let mut current = self.variables.write().unwrap_or_else(PoisonError::into_inner);
        if !current.contains_key(key) {
            return None;
        }
        let mut next = Variables::clone(&current);
        let removed = next.shift_remove(key);
        *current = Arc::new(next);
        removed
    }

    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    pub fn path(&self) -> Arc<Vec<PathBuf>> {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_path(&self, path: Vec<PathBuf>) {
        *self.path.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(path);
    }

    pub fn is_exit(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    pub fn set_exit(&self, exit: bool) {
        self.exit.store(exit, Ordering::Release);
    }
}
