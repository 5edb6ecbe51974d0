//! Command-line client for the gangway bridge daemon.
//!
//! The client opens a connection, issues a single call, prints the
//! response body, and closes the conversation. It exists for operational
//! smoke tests; production frontends hold their connection open and issue
//! many calls per session.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

use gangway_config::{SocketEndpoint, default_listen_endpoint};
use gangway_protocol::{CallType, ContentKind};

mod client;

pub use client::{BridgeClient, ClientError};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "gangway", about = "Issue one call against a gangway bridge daemon")]
struct Cli {
    /// Daemon endpoint, e.g. `tcp://127.0.0.1:7411` or `unix:///run/gangway.sock`.
    #[arg(long)]
    endpoint: Option<String>,

    /// Session id from a previous conversation; omitted for a new session.
    #[arg(long)]
    session_id: Option<String>,

    /// Call type: `text`, `json`, `data` or `binary`.
    #[arg(long, default_value = "text")]
    call_type: String,

    /// Routing name of the command to invoke.
    name: String,

    /// Call payload; empty when omitted.
    payload: Option<String>,
}

/// Runs the client with explicit IO streams.
///
/// Returns the process exit code: success for normal content, failure for
/// error content or a transport problem.
pub fn run<W, E>(args: impl IntoIterator<Item = String>, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            return ExitCode::FAILURE;
        }
    };
    match execute(&cli, stdout) {
        Ok(code) => code,
        Err(error) => {
            let _ = writeln!(stderr, "gangway: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: &Cli, stdout: &mut impl Write) -> Result<ExitCode, ClientError> {
    let endpoint = resolve_endpoint(cli.endpoint.as_deref())?;
    let call_type = parse_call_type(&cli.call_type)?;

    let mut client = BridgeClient::connect(&endpoint)?;
    client.open(cli.session_id.as_deref().unwrap_or(""))?;

    let payload = cli.payload.as_deref().unwrap_or("");
    let (kind, body) = client.call(call_type, &cli.name, payload.as_bytes())?;
    client.close()?;

    stdout.write_all(&body).map_err(ClientError::from)?;
    if !body.ends_with(b"\n") {
        let _ = stdout.write_all(b"\n");
    }
    if kind == Some(ContentKind::Error) {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_endpoint(raw: Option<&str>) -> Result<SocketEndpoint, ClientError> {
    match raw {
        None => Ok(default_listen_endpoint()),
        Some(text) => text.parse().map_err(|source| ClientError::Endpoint {
            input: text.to_owned(),
            source,
        }),
    }
}

fn parse_call_type(token: &str) -> Result<CallType, ClientError> {
    match CallType::from_token(token) {
        Some(CallType::Open | CallType::Close) | None => Err(ClientError::CallType {
            token: token.to_owned(),
        }),
        Some(call_type) => Ok(call_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_call_types() {
        assert!(parse_call_type("open").is_err());
        assert!(parse_call_type("close").is_err());
        assert!(parse_call_type("bogus").is_err());
    }

    #[test]
    fn accepts_dispatchable_call_types() {
        assert_eq!(parse_call_type("text").ok(), Some(CallType::Text));
        assert_eq!(parse_call_type("JSON").ok(), Some(CallType::Json));
    }

    #[test]
    fn falls_back_to_the_default_endpoint() {
        let endpoint = resolve_endpoint(None).expect("default endpoint");
        assert_eq!(endpoint, default_listen_endpoint());
    }

    #[test]
    fn rejects_a_malformed_endpoint() {
        assert!(resolve_endpoint(Some("not-a-url")).is_err());
    }
}
