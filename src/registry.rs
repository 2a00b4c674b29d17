use crate::command::ResolvedCommand;
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

/// Creates a fresh command instance every time a name is resolved.
pub trait CommandFactory: Send + Sync {
    fn create(&self) -> ResolvedCommand;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command already registered: {0}")]
    Duplicate(String),
}

/// Built-in command names and their factories, in registration order.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    factories: IndexMap<String, Arc<dyn CommandFactory>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the whole builtin catalog.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_all(&mut registry);
        registry
    }

    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        factory: impl CommandFactory + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn create(&self, name: &str) -> Option<ResolvedCommand> {
        self.factories.get(name).map(|factory| factory.create())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
