//! Commands shipped with the daemon.
//!
//! Business commands live in external crates and register themselves at
//! bootstrap; the built-ins cover diagnostics and session state so a bare
//! daemon is already exercisable end to end.

use std::sync::Arc;

use serde_json::{Value, json};

use gangway_protocol::{Call, Content};

use crate::context::CallContext;
use crate::session::SessionManager;

use super::command::{Command, CommandError};
use super::registry::{CommandRegistry, DuplicateBinding};

/// Registers every built-in command under the `gangway.` namespace.
///
/// # Errors
///
/// [`DuplicateBinding`] when a name is already taken by an earlier
/// registration.
pub fn register_builtins(
    registry: &mut CommandRegistry,
    sessions: &Arc<SessionManager>,
) -> Result<(), DuplicateBinding> {
    registry.register_tagged(
        "gangway.echo",
        vec!["diagnostic".into()],
        Arc::new(EchoCommand),
    )?;
    registry.register_tagged(
        "gangway.session.get",
        vec!["session".into()],
        Arc::new(SessionGetCommand),
    )?;
    registry.register_tagged(
        "gangway.session.set",
        vec!["session".into()],
        Arc::new(SessionSetCommand),
    )?;
    registry.register_tagged(
        "gangway.session.remove",
        vec!["session".into()],
        Arc::new(SessionRemoveCommand),
    )?;
    registry.register_tagged(
        "gangway.session.dump",
        vec!["session".into()],
        Arc::new(SessionDumpCommand),
    )?;
    registry.register_tagged(
        "gangway.session.destroy",
        vec!["session".into()],
        Arc::new(SessionDestroyCommand {
            sessions: Arc::clone(sessions),
        }),
    )?;
    Ok(())
}

/// Copies the call's text payload into text content.
struct EchoCommand;

impl Command for EchoCommand {
    fn execute(
        &self,
        call: &mut Call<'_>,
        _ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let text = call.text()?.to_owned();
        Ok(Content::text(text))
    }
}

/// Reads one session value: `{"key": K}` → value or null.
struct SessionGetCommand;

impl Command for SessionGetCommand {
    fn execute(
        &self,
        call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let key = string_arg(call.json()?, "key")?;
        let value = ctx.session()?.get(&key).unwrap_or(Value::Null);
        Ok(Content::json(&value))
    }
}

/// Stores one session value: `{"key": K, "value": V}`.
struct SessionSetCommand;

impl Command for SessionSetCommand {
    fn execute(
        &self,
        call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let args = call.json()?;
        let key = string_arg(args, "key")?;
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| CommandError::new("missing argument 'value'"))?;
        ctx.session()?.set(key, value);
        Ok(Content::json(&json!({ "ok": true })))
    }
}

/// Removes one session value: `{"key": K}` → removed value or null.
struct SessionRemoveCommand;

impl Command for SessionRemoveCommand {
    fn execute(
        &self,
        call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let key = string_arg(call.json()?, "key")?;
        let removed = ctx.session()?.remove(&key).unwrap_or(Value::Null);
        Ok(Content::json(&removed))
    }
}

/// Serialises the whole session: id plus key/value state.
struct SessionDumpCommand;

impl Command for SessionDumpCommand {
    fn execute(
        &self,
        _call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let session = ctx.session()?;
        let dump = json!({
            "id": session.id(),
            "data": Value::Object(session.snapshot()),
        });
        Ok(Content::json(&dump))
    }
}

/// Invalidates the session; the connection itself stays open.
struct SessionDestroyCommand {
    sessions: Arc<SessionManager>,
}

impl Command for SessionDestroyCommand {
    fn execute(
        &self,
        _call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, CommandError> {
        let session = ctx.session()?;
        self.sessions.destroy(&session);
        Ok(Content::json(&json!({ "ok": true })))
    }
}

fn string_arg(args: &Value, field: &str) -> Result<String, CommandError> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| CommandError::new(format!("missing string argument '{field}'")))
}
