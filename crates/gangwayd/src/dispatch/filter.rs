//! The interceptor pipeline wrapped around command execution.

use std::error::Error;
use std::sync::Arc;

use gangway_protocol::{Call, Content};

use crate::context::CallContext;

use super::registry::CommandBinding;

/// Failure raised by a filter.
///
/// Recoverable: the communicator converts it to error content and keeps
/// the connection alive.
#[derive(Debug, thiserror::Error)]
#[error("filter failed: {message}")]
pub struct FilterError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl FilterError {
    /// Creates a failure from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Predicate deciding which commands a filter wraps.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Matches every command.
    Any,
    /// Matches commands whose canonical name equals one of the entries.
    Named(Vec<String>),
    /// Matches canonical names against `*`/`?` glob patterns.
    Pattern(Vec<String>),
    /// Matches commands registered with the given tag.
    Tagged(String),
}

impl Matcher {
    /// Tests the predicate against a command's identity.
    #[must_use]
    pub fn matches(&self, binding: &CommandBinding) -> bool {
        match self {
            Self::Any => true,
            Self::Named(names) => names.iter().any(|name| name == binding.name()),
            Self::Pattern(patterns) => patterns
                .iter()
                .any(|pattern| glob_matches(binding.name(), pattern)),
            Self::Tagged(tag) => binding.has_tag(tag),
        }
    }
}

/// Glob match supporting `*` (any run) and `?` (any single character).
fn glob_matches(name: &str, pattern: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let mut n = 0;
    let mut p = 0;
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        let pattern_char = pattern.get(p).copied();
        if pattern_char == Some('*') {
            star = Some((p, n));
            p += 1;
        } else if pattern_char == Some('?') || pattern_char == name.get(n).copied() {
            p += 1;
            n += 1;
        } else if let Some((star_p, star_n)) = star {
            // Backtrack: let the last star absorb one more character.
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    while pattern.get(p).copied() == Some('*') {
        p += 1;
    }
    p == pattern.len()
}

/// An interceptor in the dispatch pipeline.
///
/// Contract: an applied filter must call [`FilterChain::proceed`] exactly
/// once — or zero times to short-circuit with its own content. Calling it
/// more than once is undefined; the engine documents rather than enforces
/// this, matching the cost model of a hot dispatch path.
pub trait CallFilter: Send + Sync {
    /// The predicate gating this filter.
    fn matcher(&self) -> &Matcher;

    /// Intercepts the call.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] to abort the call with error content.
    fn apply(
        &self,
        call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
        chain: &mut FilterChain<'_>,
    ) -> Result<Content, FilterError>;
}

/// One call's walk through the filter list towards its command.
///
/// The list itself is immutable and shared; the chain only tracks the
/// position of this call. Filters whose matcher rejects the command are
/// skipped in place, so list order — not predicates — decides execution
/// order.
pub struct FilterChain<'a> {
    filters: &'a [Arc<dyn CallFilter>],
    binding: &'a CommandBinding,
    position: usize,
}

impl<'a> FilterChain<'a> {
    /// Starts a chain for one resolved command.
    #[must_use]
    pub fn new(filters: &'a [Arc<dyn CallFilter>], binding: &'a CommandBinding) -> Self {
        Self {
            filters,
            binding,
            position: 0,
        }
    }

    /// The command this chain terminates in.
    #[must_use]
    pub fn binding(&self) -> &CommandBinding {
        self.binding
    }

    /// Advances to the next matching filter or, past the end of the list,
    /// executes the command.
    ///
    /// A [`super::CommandError`] from the command is converted to error
    /// content here, at the innermost link, so outer filters observe the
    /// content the client will see.
    ///
    /// # Errors
    ///
    /// Propagates the first [`FilterError`] raised by a filter.
    pub fn proceed(
        &mut self,
        call: &mut Call<'_>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Content, FilterError> {
        while let Some(filter) = self.filters.get(self.position) {
            let filter = Arc::clone(filter);
            self.position += 1;
            if filter.matcher().matches(self.binding) {
                return filter.apply(call, ctx, self);
            }
        }
        match self.binding.command().execute(call, ctx) {
            Ok(content) => Ok(content),
            Err(error) => Ok(Content::error(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use gangway_protocol::{CallType, Header};

    use crate::context::CallContext;
    use crate::dispatch::{Command, CommandError, CommandRegistry};
    use crate::scope::ScopeContext;

    use super::*;

    struct RecordingFilter {
        label: &'static str,
        matcher: Matcher,
        log: Arc<Mutex<Vec<&'static str>>>,
        short_circuit: bool,
    }

    impl CallFilter for RecordingFilter {
        fn matcher(&self) -> &Matcher {
            &self.matcher
        }

        fn apply(
            &self,
            call: &mut Call<'_>,
            ctx: &mut CallContext<'_>,
            chain: &mut FilterChain<'_>,
        ) -> Result<Content, FilterError> {
            self.log
                .lock()
                .expect("filter log lock")
                .push(self.label);
            if self.short_circuit {
                return Ok(Content::text("short-circuited"));
            }
            chain.proceed(call, ctx)
        }
    }

    struct TerminalCommand {
        outcome: Result<&'static str, &'static str>,
    }

    impl Command for TerminalCommand {
        fn execute(
            &self,
            _call: &mut Call<'_>,
            _ctx: &mut CallContext<'_>,
        ) -> Result<Content, CommandError> {
            match self.outcome {
                Ok(text) => Ok(Content::text(text)),
                Err(message) => Err(CommandError::new(message)),
            }
        }
    }

    fn run_chain(
        filters: &[Arc<dyn CallFilter>],
        outcome: Result<&'static str, &'static str>,
    ) -> Content {
        let mut registry = CommandRegistry::new(Vec::new());
        registry
            .register_tagged(
                "gangway.probe",
                vec!["diagnostic".into()],
                Arc::new(TerminalCommand { outcome }),
            )
            .expect("unique name");
        let binding = registry.resolve("gangway.probe").expect("bound");

        let mut cursor = Cursor::new(Vec::new());
        let header = Header::new(CallType::Text, "gangway.probe", "1", 0);
        let mut call = Call::bind(header, &mut cursor).expect("bind call");

        let mut request = ScopeContext::new("request");
        let mut call_scope = ScopeContext::new("call");
        request.enter().expect("enter request");
        call_scope.enter().expect("enter call");
        let mut ctx = CallContext {
            request: &mut request,
            call: &mut call_scope,
        };

        let mut chain = FilterChain::new(filters, &binding);
        chain.proceed(&mut call, &mut ctx).expect("chain runs")
    }

    fn filter(
        label: &'static str,
        matcher: Matcher,
        log: &Arc<Mutex<Vec<&'static str>>>,
        short_circuit: bool,
    ) -> Arc<dyn CallFilter> {
        Arc::new(RecordingFilter {
            label,
            matcher,
            log: Arc::clone(log),
            short_circuit,
        })
    }

    #[test]
    fn filters_run_in_list_order_and_skip_non_matching() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filters = vec![
            filter("first", Matcher::Any, &log, false),
            filter("skipped", Matcher::Named(vec!["other".into()]), &log, false),
            filter("tagged", Matcher::Tagged("diagnostic".into()), &log, false),
        ];
        let content = run_chain(&filters, Ok("done"));
        assert_eq!(content.body(), b"done");
        assert_eq!(*log.lock().expect("log"), vec!["first", "tagged"]);
    }

    #[test]
    fn short_circuit_skips_the_command() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filters = vec![
            filter("gate", Matcher::Pattern(vec!["gangway.*".into()]), &log, true),
            filter("after", Matcher::Any, &log, false),
        ];
        let content = run_chain(&filters, Ok("never"));
        assert_eq!(content.body(), b"short-circuited");
        assert_eq!(*log.lock().expect("log"), vec!["gate"]);
    }

    #[test]
    fn command_error_becomes_error_content_inside_the_chain() {
        let content = run_chain(&[], Err("boom"));
        assert!(content.is_error());
        assert!(String::from_utf8_lossy(content.body()).contains("boom"));
    }

    #[test]
    fn glob_patterns_cover_star_and_question_mark() {
        assert!(glob_matches("gangway.echo", "gangway.*"));
        assert!(glob_matches("gangway.session.get", "*.session.*"));
        assert!(glob_matches("job", "j?b"));
        assert!(!glob_matches("gangway.echo", "session.*"));
        assert!(!glob_matches("gangway", "gangway.*"));
        assert!(glob_matches("anything", "*"));
    }
}
