use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use session_client::{Client, ClientConfig, OperationDefinition};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "session-cli",
    version,
    about = "Small async CLI for querying the API through a scoped session"
)]
struct Cli {
    /// Base URL for the API.
    #[arg(long, env = "SESSION_CLIENT_BASE_URL")]
    base_url: Option<String>,

    /// API key sent with every request.
    #[arg(long, env = "SESSION_CLIENT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Header the API key is sent in.
    #[arg(long, default_value = session_client::DEFAULT_API_KEY_HEADER)]
    api_key_header: String,

    /// Extra attempts when a connection cannot be established.
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Skip TLS certificate validation.
    #[arg(long)]
    insecure: bool,

    /// PEM file with an additional trusted CA certificate.
    #[arg(long, value_name = "PATH")]
    ca_cert: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout_secs: Option<u64>,

    /// Emit compact JSON instead of pretty-printed output.
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List operation ids callable with `call`.
    Operations {
        /// Filter operations by substring match on operation id (case-insensitive).
        #[arg(long)]
        filter: Option<String>,

        /// Print the catalog as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Query the server-info endpoint.
    Info,
    /// Call an endpoint by operation id.
    Call(CallArgs),
    /// Send a raw HTTP request using method + path.
    Request(RequestArgs),
}

#[derive(Debug, Args)]
struct CallArgs {
    /// Operation id (for example: getServerInfo).
    operation_id: String,

    /// Path parameter as KEY=VALUE. Repeat as needed.
    #[arg(long = "path-param", value_name = "KEY=VALUE", value_parser = key_value)]
    path_params: Vec<(String, String)>,

    #[command(flatten)]
    payload: Payload,
}

impl CallArgs {
    async fn send(&self, client: &Client) -> Result<Value> {
        let body = self.payload.body()?;
        client
            .call_operation(
                &self.operation_id,
                &str_pairs(&self.path_params),
                &str_pairs(&self.payload.query),
                body,
            )
            .await
            .with_context(|| format!("operation '{}' failed", self.operation_id))
    }
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// HTTP method (GET, POST, PUT, DELETE, ...).
    #[arg(value_parser = http_method)]
    method: Method,

    /// Request path below the base URL.
    path: String,

    #[command(flatten)]
    payload: Payload,
}

impl RequestArgs {
    async fn send(&self, client: &Client) -> Result<Value> {
        let body = self.payload.body()?;
        client
            .request_json_with_query(
                self.method.clone(),
                &self.path,
                &str_pairs(&self.payload.query),
                body,
            )
            .await
            .with_context(|| format!("{} {} failed", self.method, self.path))
    }
}

// Query string and JSON body shared by `call` and `request`.
#[derive(Debug, Args)]
struct Payload {
    /// Query parameter as KEY=VALUE. Repeat as needed.
    #[arg(long = "query", value_name = "KEY=VALUE", value_parser = key_value)]
    query: Vec<(String, String)>,

    /// Inline JSON request body.
    #[arg(long, value_name = "JSON", value_parser = json_value, conflicts_with = "body_file")]
    body_json: Option<Value>,

    /// File holding the JSON request body.
    #[arg(long, value_name = "PATH")]
    body_file: Option<PathBuf>,
}

impl Payload {
    fn body(&self) -> Result<Option<Value>> {
        if let Some(path) = &self.body_file {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let value = json_value(&raw).with_context(|| format!("in {}", path.display()))?;
            return Ok(Some(value));
        }
        Ok(self.body_json.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Command::Operations { filter, json } => {
            list_operations(filter.as_deref(), *json, cli.compact)
        }
        Command::Info => {
            run_scoped(&cli, |client| async move {
                client.server_info().await.context("server-info query failed")
            })
            .await
        }
        Command::Call(args) => {
            run_scoped(&cli, |client| async move { args.send(&client).await }).await
        }
        Command::Request(args) => {
            run_scoped(&cli, |client| async move { args.send(&client).await }).await
        }
    }
}

/// Builds a client from the global flags, runs `command` inside its scope and
/// prints the result. The session is closed before anything is printed.
async fn run_scoped<F, Fut>(cli: &Cli, command: F) -> Result<()>
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let client = Client::from_config(build_config(cli)?);
    let value = client.scope(command).await?;
    write_json(&value, cli.compact)
}

/// Logs go to stderr so stdout stays valid JSON. `RUST_LOG` overrides the default `warn`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Translates global flags into a [`ClientConfig`].
fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let Some(base_url) = &cli.base_url else {
        bail!("no base URL given; pass --base-url or set SESSION_CLIENT_BASE_URL");
    };

    let mut builder = ClientConfig::builder(base_url.as_str())
        .api_key_header(cli.api_key_header.as_str())
        .retries(cli.retries)
        .tls_verify(!cli.insecure);

    if let Some(key) = &cli.api_key {
        builder = builder.api_key(key.as_str());
    }
    if let Some(path) = &cli.ca_cert {
        builder = builder.tls_ca_cert(path);
    }
    if let Some(seconds) = cli.timeout_secs {
        builder = builder.timeout(Duration::from_secs(seconds));
    }

    builder
        .build()
        .with_context(|| format!("invalid client configuration for '{base_url}'"))
}

/// Prints the catalog, optionally narrowed to ids containing `filter`
/// (case-insensitive).
fn list_operations(filter: Option<&str>, json: bool, compact: bool) -> Result<()> {
    let needle = filter.map(str::to_ascii_lowercase);
    let matching: Vec<&OperationDefinition> = Client::operations()
        .iter()
        .filter(|op| {
            needle
                .as_deref()
                .is_none_or(|needle| op.operation_id.to_ascii_lowercase().contains(needle))
        })
        .collect();

    if json {
        return write_json(&serde_json::to_value(&matching)?, compact);
    }

    let id_width = matching.iter().map(|op| op.operation_id.len()).max().unwrap_or(0);
    let mut out = io::stdout().lock();
    for op in matching {
        writeln!(
            out,
            "{:<id_width$}  {:<6}  {}",
            op.operation_id, op.method, op.path_template
        )?;
    }
    Ok(())
}

fn write_json(value: &Value, compact: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    if compact {
        serde_json::to_writer(&mut out, value)?;
    } else {
        serde_json::to_writer_pretty(&mut out, value)?;
    }
    writeln!(out)?;
    Ok(())
}

fn str_pairs(pairs: &[(String, String)]) -> Vec<(&str, &str)> {
    pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

fn key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some(("", _)) => Err(format!("'{raw}' has an empty key")),
        Some((key, value)) => Ok((key.to_owned(), value.to_owned())),
        None => Err(format!("'{raw}' is not KEY=VALUE")),
    }
}

fn json_value(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw)
}

fn http_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("'{raw}' is not an HTTP method"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, http_method, key_value};

    #[test]
    fn key_value_splits_on_first_equals() {
        assert_eq!(
            key_value("filter=a=b").expect("pair"),
            ("filter".to_owned(), "a=b".to_owned())
        );
        assert_eq!(key_value("empty=").expect("pair").1, "");
        assert!(key_value("=value").is_err());
        assert!(key_value("novalue").is_err());
    }

    #[test]
    fn http_method_is_case_insensitive() {
        assert_eq!(http_method("delete").expect("method"), reqwest::Method::DELETE);
        assert!(http_method("NOT A METHOD").is_err());
    }

    #[test]
    fn request_arguments_are_parsed_up_front() {
        let cli = Cli::try_parse_from([
            "session-cli",
            "--base-url",
            "https://example.com",
            "request",
            "post",
            "items",
            "--query",
            "dry_run=true",
            "--body-json",
            r#"{"name":"widget"}"#,
        ])
        .expect("valid arguments");

        let Command::Request(args) = cli.command else {
            panic!("expected request command");
        };
        assert_eq!(args.method, reqwest::Method::POST);
        assert_eq!(args.payload.query, [("dry_run".to_owned(), "true".to_owned())]);
        assert_eq!(
            args.payload.body().expect("body"),
            Some(serde_json::json!({ "name": "widget" }))
        );
    }

    #[test]
    fn malformed_body_json_is_rejected_by_the_parser() {
        let result = Cli::try_parse_from([
            "session-cli",
            "request",
            "GET",
            "items",
            "--body-json",
            "{ not json",
        ]);
        assert!(result.is_err());
    }
}
