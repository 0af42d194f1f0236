//! One-shot example: run a few commands to completion.
//!
//! # Usage
//!
//! With password authentication:
//! ```bash
//! cargo run --example one_shot -- --host localhost --user your_username --password your_password
//! ```
//!
//! With SSH key authentication:
//! ```bash
//! cargo run --example one_shot -- --host localhost --user your_username --key ~/.ssh/id_ed25519
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use rexsh::{ConnectOptions, ConnectionManager, ExecOptions, HostKeyVerification};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut builder = ConnectOptions::builder(&args.host)
        .port(args.port)
        .username(&args.user)
        .timeout(Duration::from_secs(args.timeout))
        .host_key_verification(HostKeyVerification::AcceptNew);

    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key_path) = &args.key {
        builder = builder.private_key(key_path);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }
    let options = builder.build()?;

    println!("Connecting to {}:{}...", args.host, args.port);
    let manager = ConnectionManager::new();
    manager.connect(&options).await?;
    println!("Connected!");

    println!("\nExecuting: ls -la");
    println!("{}", "-".repeat(50));
    let output = manager
        .execute_command("ls -la", &ExecOptions::default())
        .await?;
    print!("{}", output.stdout);
    println!("{}", "-".repeat(50));
    println!("Exit status: {:?}", output.exit_status);

    // Working directory and environment are applied on the remote side
    let options = ExecOptions::default()
        .cwd("/tmp")
        .env("GREETING", "hello from rexsh");
    let output = manager.execute_command("pwd && echo $GREETING", &options).await?;
    println!("\n{}", output.stdout.trim());

    // A command that outlives its time limit is reported, not raised
    println!("\nExecuting: sleep 10 (2s limit)");
    let options = ExecOptions::default().timeout(Duration::from_secs(2));
    let output = manager.execute_command("sleep 10", &options).await?;
    println!("timed_out={} stdout={:?}", output.timed_out, output.stdout);

    let output = manager
        .execute_command("ls /nonexistent", &ExecOptions::default())
        .await?;
    println!("\nstderr: {}", output.stderr.trim());

    println!("\nClosing connection...");
    manager.disconnect().await?;
    println!("Done!");

    Ok(())
}

/// Simple argument parser
struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut host = "localhost".to_string();
        let mut port = 22u16;
        let mut user = env::var("USER").unwrap_or_else(|_| "root".to_string());
        let mut password = None;
        let mut key = None;
        let mut timeout = 30u64;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    i += 1;
                    if i < args.len() {
                        host = args[i].clone();
                    }
                }
                "--port" | "-p" => {
                    i += 1;
                    if i < args.len() {
                        port = args[i].parse().unwrap_or(22);
                    }
                }
                "--user" | "-u" => {
                    i += 1;
                    if i < args.len() {
                        user = args[i].clone();
                    }
                }
                "--password" | "-P" => {
                    i += 1;
                    if i < args.len() {
                        password = Some(args[i].clone());
                    }
                }
                "--key" | "-k" => {
                    i += 1;
                    if i < args.len() {
                        key = Some(PathBuf::from(&args[i]));
                    }
                }
                "--timeout" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        timeout = args[i].parse().unwrap_or(30);
                    }
                }
                "--help" => {
                    println!(
                        "Usage: cargo run --example one_shot -- --host <HOST> --user <USER> \
                         (--password <PASS> | --key <PATH>) [--port <PORT>] [--timeout <SECS>]"
                    );
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self {
            host,
            port,
            user,
            password,
            key,
            timeout,
        }
    }
}
