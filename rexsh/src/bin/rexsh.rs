//! rexsh: serve remote shell tools to MCP clients over stdin/stdout.
//!
//! Speaks JSON-RPC 2.0, one message per line, as the Model Context Protocol
//! stdio transport expects. Logs go to stderr.
//!
//! ```text
//! {"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2024-11-05"}}
//! {"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "execute_command", "arguments": {"command": "id"}}}
//! ```
//!
//! # Usage
//!
//! ```bash
//! rexsh --host 192.168.56.101 --user kali --key ~/.ssh/id_ed25519
//! REXSH_HOST=localhost REXSH_PORT=2222 REXSH_USER=root REXSH_PASSWORD=toor rexsh
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::BufReader;

use rexsh::broadcast::{
    Broadcaster, BufferedSink, DEFAULT_FLUSH_DELAY, HttpViewerSink, OutputSink,
};
use rexsh::mcp::McpServer;
use rexsh::tools::ToolServer;
use rexsh::{ConnectOptions, ConnectionManager, ExecOptions};

/// Exit status for bad command-line usage.
const USAGE_EXIT: i32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries protocol messages; logs go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = match Args::parse(env::args().skip(1), |name| env::var(name).ok()) {
        Ok(Parsed::Run(args)) => args,
        Ok(Parsed::Help) => {
            print!("{}", HELP);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run `rexsh --help` for usage.");
            std::process::exit(USAGE_EXIT);
        }
    };

    let mut builder = ConnectOptions::builder(&args.host)
        .port(args.port)
        .username(&args.user)
        .timeout(Duration::from_secs(args.timeout));
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    if let Some(key) = &args.key {
        builder = builder.private_key(key);
    }
    let options = match builder.build() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Provide exactly one of --password or --key (see --help)");
            std::process::exit(USAGE_EXIT);
        }
    };

    let mut manager = ConnectionManager::new();
    if let Some(url) = &args.viewer_url {
        let viewer = Arc::new(HttpViewerSink::new(url.as_str()));
        if viewer.check_health().await {
            info!("live viewer available at {}", viewer.base_url());
        } else {
            warn!("live viewer at {} is not responding", viewer.base_url());
        }
        let sink: Arc<dyn OutputSink> = Arc::new(BufferedSink::new(viewer, DEFAULT_FLUSH_DELAY));
        manager = manager.with_broadcaster(Broadcaster::spawn(sink));
    }
    let manager = Arc::new(manager);

    if !args.skip_self_test {
        self_test(&manager, &options).await;
    }

    let tools = Arc::new(ToolServer::new(Arc::clone(&manager), options));
    let server = McpServer::new(tools);
    info!("serving MCP on stdio");
    tokio::select! {
        result = server.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => match result {
            Ok(()) => info!("stdin closed, shutting down"),
            Err(e) => error!("stdio failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    if let Err(e) = manager.disconnect().await {
        warn!("disconnect failed: {}", e);
    }
    Ok(())
}

/// Connect and run a trivial command, logging troubleshooting hints on failure.
async fn self_test(manager: &ConnectionManager, options: &ConnectOptions) {
    info!(
        "testing SSH connection to {}:{}",
        options.host(),
        options.port()
    );
    let result = async {
        manager.connect(options).await?;
        manager
            .execute_command(
                "echo 'connection test ok'",
                &ExecOptions::default().timeout(Duration::from_secs(10)),
            )
            .await
    }
    .await;

    match result {
        Ok(output) if output.is_success() => {
            info!("SSH connection test passed: {}", output.stdout.trim());
        }
        Ok(output) => {
            warn!(
                "SSH connection test command failed (status {:?}): {}",
                output.exit_status,
                output.stderr.trim()
            );
        }
        Err(e) => {
            error!("SSH connection test failed: {}", e);
            error!("1. Make sure sshd is running on the target (sudo service ssh start)");
            error!("2. Check the host, port, username and key or password");
            error!(
                "3. Try connecting by hand: ssh {}@{} -p {}",
                options.username(),
                options.host(),
                options.port()
            );
            error!("Continuing; tool calls will retry the connection");
        }
    }
}

const HELP: &str = r#"rexsh - remote shell tools for MCP clients over stdio

USAGE:
    rexsh [OPTIONS]

OPTIONS:
    -H, --host <HOST>        Target host [env: REXSH_HOST] [default: localhost]
    -p, --port <PORT>        SSH port [env: REXSH_PORT] [default: 22]
    -u, --user <USER>        Username [env: REXSH_USER] [default: $USER]
    -P, --password <PASS>    Password for authentication [env: REXSH_PASSWORD]
    -k, --key <PATH>         Path to SSH private key [env: REXSH_KEY]
    -t, --timeout <SECS>     Connection timeout [default: 30]
    --viewer-url <URL>       Push session output to a live viewer [env: REXSH_VIEWER_URL]
    --no-self-test           Skip the startup connection test
    -h, --help               Print this help message

The server speaks the Model Context Protocol (JSON-RPC 2.0, one message
per line) on stdin/stdout. Bad options exit with status 2.
"#;

/// A command line that cannot be used.
#[derive(Debug, PartialEq, Eq)]
enum ArgError {
    Unknown(String),
    MissingValue(&'static str),
    InvalidValue { flag: &'static str, value: String },
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgError::Unknown(arg) => write!(f, "unknown argument '{}'", arg),
            ArgError::MissingValue(flag) => write!(f, "{} needs a value", flag),
            ArgError::InvalidValue { flag, value } => {
                write!(f, "invalid value '{}' for {}", value, flag)
            }
        }
    }
}

enum Parsed {
    Run(Args),
    Help,
}

/// Command-line options with environment fallbacks.
#[derive(Debug)]
struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    timeout: u64,
    viewer_url: Option<String>,
    skip_self_test: bool,
}

impl Args {
    /// Parse `args` (without the program name), reading defaults through `var`.
    fn parse(
        args: impl IntoIterator<Item = String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Parsed, ArgError> {
        let mut parsed = Args {
            host: var("REXSH_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: match var("REXSH_PORT") {
                Some(port) => number("REXSH_PORT", port)?,
                None => 22,
            },
            user: var("REXSH_USER")
                .or_else(|| var("USER"))
                .unwrap_or_else(|| "root".to_string()),
            password: var("REXSH_PASSWORD"),
            key: var("REXSH_KEY").map(PathBuf::from),
            timeout: 30,
            viewer_url: var("REXSH_VIEWER_URL"),
            skip_self_test: false,
        };

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &'static str| args.next().ok_or(ArgError::MissingValue(flag));
            match arg.as_str() {
                "--host" | "-H" => parsed.host = value("--host")?,
                "--port" | "-p" => parsed.port = number("--port", value("--port")?)?,
                "--user" | "-u" => parsed.user = value("--user")?,
                "--password" | "-P" => {
                    parsed.password = Some(value("--password")?);
                    parsed.key = None;
                }
                "--key" | "-k" => {
                    parsed.key = Some(PathBuf::from(value("--key")?));
                    parsed.password = None;
                }
                "--timeout" | "-t" => parsed.timeout = number("--timeout", value("--timeout")?)?,
                "--viewer-url" => parsed.viewer_url = Some(value("--viewer-url")?),
                "--no-self-test" => parsed.skip_self_test = true,
                "--help" | "-h" => return Ok(Parsed::Help),
                other => return Err(ArgError::Unknown(other.to_string())),
            }
        }
        Ok(Parsed::Run(parsed))
    }
}

fn number<T: std::str::FromStr>(flag: &'static str, value: String) -> Result<T, ArgError> {
    value
        .parse()
        .map_err(|_| ArgError::InvalidValue { flag, value })
}
