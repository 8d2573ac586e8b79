//! Command registry — the fixed table of command descriptors.
//!
//! Populated once at startup and read-only afterwards, so lookups need no
//! locking.

use std::collections::BTreeMap;

use edl_protocol::{
    Affinity, BuiltinCommand, CommandDescriptor, Commands, EditorError, HandlerRef, ParamField,
    ParamKind,
};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("command name must not be empty")]
    EmptyName,
    #[error("command '{0}' is already registered")]
    Duplicate(String),
    #[error("command '{name}' is inconsistent: {reason}")]
    Inconsistent { name: String, reason: &'static str },
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandDescriptor>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the server's own commands.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            // Names are distinct constants.
            let name = descriptor.name.clone();
            registry.commands.insert(name, descriptor);
        }
        registry
    }

    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), RegistryError> {
        check_consistent(&descriptor)?;
        if self.commands.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        debug!(
            "Registered {} ({:?}, mutating: {})",
            descriptor.name, descriptor.affinity, descriptor.mutating
        );
        self.commands.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        descriptors: impl IntoIterator<Item = CommandDescriptor>,
    ) -> Result<(), RegistryError> {
        descriptors.into_iter().try_for_each(|d| self.register(d))
    }

    pub fn lookup(&self, name: &str) -> Result<&CommandDescriptor, EditorError> {
        self.commands
            .get(name)
            .ok_or_else(|| EditorError::unknown_command(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Introspection payload for every command, sorted by name.
    pub fn describe_all(&self) -> Vec<Value> {
        self.commands.values().map(CommandDescriptor::describe).collect()
    }
}

fn check_consistent(descriptor: &CommandDescriptor) -> Result<(), RegistryError> {
    if descriptor.name.trim().is_empty() {
        return Err(RegistryError::EmptyName);
    }
    let inconsistent = |reason| RegistryError::Inconsistent {
        name: descriptor.name.clone(),
        reason,
    };
    match (descriptor.handler, descriptor.affinity) {
        (HandlerRef::Editor, Affinity::AnyThread) => {
            Err(inconsistent("editor handlers must run on the editor thread"))
        }
        (HandlerRef::Builtin(_), Affinity::EditorThread) => {
            Err(inconsistent("built-in handlers run off the editor thread"))
        }
        (HandlerRef::Builtin(_), _) if descriptor.mutating => {
            Err(inconsistent("built-in handlers cannot mutate editor state"))
        }
        _ => Ok(()),
    }
}

fn builtin_descriptors() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor::builtin(
            Commands::LIST_COMMANDS,
            "List every registered command with its parameter schema",
            BuiltinCommand::ListCommands,
        ),
        CommandDescriptor::builtin(
            Commands::AUTHENTICATE,
            "Authenticate this connection with the shared token",
            BuiltinCommand::Authenticate,
        )
        .param(ParamField::required("token", ParamKind::String, "Shared secret"))
        .param(ParamField::optional("client", ParamKind::String, "Client name for logs")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use edl_protocol::{ErrorKind, ScopeRule};

    #[test]
    fn builtins_are_registered() {
        let registry = CommandRegistry::with_builtins();
        assert!(registry.contains(Commands::LIST_COMMANDS));
        assert!(registry.contains(Commands::AUTHENTICATE));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::query("getGraph", "Read a graph"))
            .unwrap();
        let err = registry
            .register(CommandDescriptor::mutation("getGraph", "again"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "getGraph"));
    }

    #[test]
    fn builtin_name_cannot_be_reused() {
        let mut registry = CommandRegistry::with_builtins();
        assert!(registry
            .register(CommandDescriptor::query(Commands::LIST_COMMANDS, "shadow"))
            .is_err());
    }

    #[test]
    fn inconsistent_descriptors_are_rejected() {
        let mut registry = CommandRegistry::new();

        let mut editor_any = CommandDescriptor::query("a", "");
        editor_any.affinity = Affinity::AnyThread;
        assert!(matches!(
            registry.register(editor_any),
            Err(RegistryError::Inconsistent { .. })
        ));

        let mut builtin_editor = CommandDescriptor::builtin("b", "", BuiltinCommand::ListCommands);
        builtin_editor.affinity = Affinity::EditorThread;
        assert!(registry.register(builtin_editor).is_err());

        let mut builtin_mutating = CommandDescriptor::builtin("c", "", BuiltinCommand::ListCommands);
        builtin_mutating.mutating = true;
        assert!(registry.register(builtin_mutating).is_err());

        assert!(matches!(
            registry.register(CommandDescriptor::query(" ", "")),
            Err(RegistryError::EmptyName)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_lookup_is_not_found() {
        let registry = CommandRegistry::with_builtins();
        let err = registry.lookup("unknownCmd").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "unknown command: unknownCmd");
    }

    #[test]
    fn describe_all_is_sorted() {
        let mut registry = CommandRegistry::with_builtins();
        registry
            .register_all([
                CommandDescriptor::query("getGraph", "").scope(ScopeRule::asset("graph", "graph")),
                CommandDescriptor::mutation("createGraph", ""),
            ])
            .unwrap();
        let names: Vec<String> = registry
            .describe_all()
            .iter()
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["authenticate", "createGraph", "getGraph", "listCommands"]);
    }
}
