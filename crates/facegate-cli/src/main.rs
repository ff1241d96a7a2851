//! `facegate`: command-line client for the FaceGate daemon.
//!
//! Request bodies are read from JSON files (or `-` for stdin) and forwarded
//! unchanged; responses are pretty-printed.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[zbus::proxy(
    interface = "org.freedesktop.FaceGate1",
    default_service = "org.freedesktop.FaceGate1",
    default_path = "/org/freedesktop/FaceGate1"
)]
trait FaceGate {
    async fn observe_frame(&self, request: &str) -> zbus::Result<String>;
    async fn recognize(&self, request: &str) -> zbus::Result<String>;
    async fn check_duplicate(&self, request: &str) -> zbus::Result<String>;
    async fn new_session(&self) -> zbus::Result<String>;
    async fn reset_session(&self, session: &str) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", version, about = "FaceGate liveness and face matching client")]
struct Cli {
    /// Talk to a daemon on the session bus (development mode).
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show daemon status.
    Status,
    /// Allocate a liveness session and print its key.
    NewSession,
    /// Reset a liveness session to waiting for open eyes.
    ResetSession { session: String },
    /// Feed one liveness frame (JSON request file).
    Observe { request: PathBuf },
    /// Recognize probe embeddings against a gallery (JSON request file).
    Recognize { request: PathBuf },
    /// Check an enrollment embedding for duplicates (JSON request file).
    CheckDuplicate { request: PathBuf },
}

fn read_request(path: &Path) -> Result<String> {
    let body = if path == Path::new("-") {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("failed to read request from stdin")?;
        body
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str::<serde_json::Value>(&body)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(body)
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let conn = if cli.session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    };
    let conn = conn.context("failed to connect to D-Bus")?;
    let proxy = FaceGateProxy::new(&conn)
        .await
        .context("failed to create FaceGate proxy")?;
    tracing::debug!(session_bus = cli.session_bus, "connected to facegated");

    match cli.command {
        Command::Status => print_json(&proxy.status().await?)?,
        Command::NewSession => println!("{}", proxy.new_session().await?),
        Command::ResetSession { session } => {
            if proxy.reset_session(&session).await? {
                println!("session {session} reset");
            } else {
                anyhow::bail!("unknown session '{session}'");
            }
        }
        Command::Observe { request } => {
            print_json(&proxy.observe_frame(&read_request(&request)?).await?)?
        }
        Command::Recognize { request } => {
            print_json(&proxy.recognize(&read_request(&request)?).await?)?
        }
        Command::CheckDuplicate { request } => {
            print_json(&proxy.check_duplicate(&read_request(&request)?).await?)?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "facegate-cli-{name}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_read_request_accepts_json() {
        let path = temp_file("ok", r#"{"session": "s1", "landmarks": null}"#);
        let body = read_request(&path).unwrap();
        assert!(body.contains("s1"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_request_rejects_invalid_json() {
        let path = temp_file("bad", "session=s1");
        assert!(read_request(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_request_reports_missing_file() {
        let path = std::env::temp_dir().join("facegate-cli-does-not-exist.json");
        let err = read_request(&path).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = ["facegate", "--session-bus", "reset-session", "abc"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.session_bus);
        assert!(matches!(cli.command, Command::ResetSession { ref session } if session == "abc"));

        let cli = Cli::try_parse_from(["facegate", "check-duplicate", "req.json"]).unwrap();
        assert!(matches!(cli.command, Command::CheckDuplicate { .. }));
    }
}
