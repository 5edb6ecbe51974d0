//! Routing-name resolution with alias expansion.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use gangway_config::AliasRule;

use super::DISPATCH_TARGET;
use super::command::Command;

/// No binding or alias resolved the routing name.
///
/// Recoverable: the communicator answers with error content and the
/// connection continues.
#[derive(Debug, Error)]
#[error("no command bound for routing name '{name}' (resolved to '{resolved}')")]
pub struct CommandNotFound {
    /// Routing name as sent by the client.
    pub name: String,
    /// Name after alias expansion.
    pub resolved: String,
}

/// Two commands were registered under the same canonical name.
#[derive(Debug, Error)]
#[error("command '{name}' registered twice")]
pub struct DuplicateBinding {
    /// The clashing canonical name.
    pub name: String,
}

/// A registered command with its identity.
///
/// The identity — canonical name plus tags — is what filter matchers test
/// against; the command itself stays behind the binding.
pub struct CommandBinding {
    name: String,
    tags: Vec<String>,
    command: Arc<dyn Command>,
}

impl CommandBinding {
    /// Canonical routing name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classification tags attached at registration.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the binding carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }

    /// The executable command.
    #[must_use]
    pub fn command(&self) -> &Arc<dyn Command> {
        &self.command
    }
}

impl std::fmt::Debug for CommandBinding {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CommandBinding")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Maps routing names to commands, built once at startup.
///
/// Reads are lock-free after bootstrap: the registry is shared immutably
/// across connection workers.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    bindings: HashMap<String, Arc<CommandBinding>>,
    aliases: Vec<AliasRule>,
}

impl CommandRegistry {
    /// Creates a registry with the configured alias rules.
    #[must_use]
    pub fn new(aliases: Vec<AliasRule>) -> Self {
        Self {
            bindings: HashMap::new(),
            aliases,
        }
    }

    /// Registers a command under its canonical name.
    ///
    /// # Errors
    ///
    /// [`DuplicateBinding`] when the name is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        command: Arc<dyn Command>,
    ) -> Result<(), DuplicateBinding> {
        self.register_tagged(name, Vec::new(), command)
    }

    /// Registers a command with classification tags.
    ///
    /// # Errors
    ///
    /// [`DuplicateBinding`] when the name is already taken.
    pub fn register_tagged(
        &mut self,
        name: impl Into<String>,
        tags: Vec<String>,
        command: Arc<dyn Command>,
    ) -> Result<(), DuplicateBinding> {
        let name = name.into();
        if self.bindings.contains_key(&name) {
            return Err(DuplicateBinding { name });
        }
        let binding = Arc::new(CommandBinding {
            name: name.clone(),
            tags,
            command,
        });
        self.bindings.insert(name, binding);
        Ok(())
    }

    /// Expands a routing name through the alias table.
    ///
    /// Rules are tried in declaration order; the first prefix match is
    /// rewritten and no further rule is applied — aliases never chain.
    #[must_use]
    pub fn resolved_name(&self, name: &str) -> String {
        for rule in &self.aliases {
            if let Some(rest) = name.strip_prefix(rule.alias.as_str()) {
                return format!("{}{rest}", rule.target);
            }
        }
        name.to_owned()
    }

    /// Resolves a routing name to its binding.
    ///
    /// # Errors
    ///
    /// [`CommandNotFound`] when neither the name nor its alias expansion is
    /// bound.
    pub fn resolve(&self, name: &str) -> Result<Arc<CommandBinding>, CommandNotFound> {
        let resolved = self.resolved_name(name);
        match self.bindings.get(&resolved) {
            Some(binding) => {
                debug!(target: DISPATCH_TARGET, name, %resolved, "resolved command");
                Ok(Arc::clone(binding))
            }
            None => Err(CommandNotFound {
                name: name.to_owned(),
                resolved,
            }),
        }
    }

    /// Number of registered bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use gangway_protocol::{Call, Content};

    use crate::context::CallContext;
    use crate::dispatch::CommandError;

    use super::*;

    struct NullCommand;

    impl Command for NullCommand {
        fn execute(
            &self,
            _call: &mut Call<'_>,
            _ctx: &mut CallContext<'_>,
        ) -> Result<Content, CommandError> {
            Ok(Content::text("null"))
        }
    }

    fn registry_with(names: &[&str]) -> CommandRegistry {
        let mut registry = CommandRegistry::new(vec![AliasRule::new("@", "gangway.")]);
        for name in names {
            registry
                .register(*name, Arc::new(NullCommand))
                .expect("unique name");
        }
        registry
    }

    #[test]
    fn resolves_canonical_names() {
        let registry = registry_with(&["gangway.echo"]);
        let binding = registry.resolve("gangway.echo").expect("bound");
        assert_eq!(binding.name(), "gangway.echo");
    }

    #[test]
    fn expands_alias_prefix_once() {
        let registry = registry_with(&["gangway.echo"]);
        let binding = registry.resolve("@echo").expect("alias resolves");
        assert_eq!(binding.name(), "gangway.echo");
    }

    #[test]
    fn alias_rewrites_never_chain() {
        let mut registry = CommandRegistry::new(vec![
            AliasRule::new("a.", "b."),
            AliasRule::new("b.", "c."),
        ]);
        registry
            .register("c.cmd", Arc::new(NullCommand))
            .expect("unique name");
        // "a.cmd" rewrites to "b.cmd" and stops; it must not reach "c.cmd".
        let error = registry.resolve("a.cmd").expect_err("no chained rewrite");
        assert_eq!(error.resolved, "b.cmd");
    }

    #[test]
    fn unknown_name_is_command_not_found() {
        let registry = registry_with(&[]);
        let error = registry.resolve("missing").expect_err("unbound");
        assert_eq!(error.name, "missing");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry_with(&["gangway.echo"]);
        let error = registry
            .register("gangway.echo", Arc::new(NullCommand))
            .expect_err("duplicate");
        assert_eq!(error.name, "gangway.echo");
    }

    #[test]
    fn tags_are_queryable() {
        let mut registry = CommandRegistry::new(Vec::new());
        registry
            .register_tagged("gangway.session.get", vec!["session".into()], {
                Arc::new(NullCommand)
            })
            .expect("unique name");
        let binding = registry.resolve("gangway.session.get").expect("bound");
        assert!(binding.has_tag("session"));
        assert!(!binding.has_tag("diagnostic"));
    }
}
