//! Interactive session example.
//!
//! Starts a login shell and a Python REPL, drives them with input, and
//! shows how the waiting-for-input state tracks each prompt.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example interactive -- --host localhost --user your_username --password your_password
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use rexsh::{ConnectOptions, ConnectionManager, SessionOptions};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    println!("=== rexsh Interactive Session Example ===\n");

    let mut builder = ConnectOptions::builder(&args.host)
        .port(args.port)
        .username(&args.user);
    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key_path) = &args.key {
        builder = builder.private_key(key_path);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }
    let options = builder.build()?;

    let manager = ConnectionManager::new();
    println!("Connecting to {}:{}...", args.host, args.port);
    manager.connect(&options).await?;
    println!("Connected!\n");

    // Example 1: login shell
    println!("--- Example 1: Login shell ---");
    let shell = manager.create_session("", SessionOptions::default()).await?;
    let outcome = shell.wait_until_ready(WAIT).await?;
    println!("Shell ready: {:?}", outcome);
    shell.take_new_output();

    let outcome = shell.write_and_wait("echo hi\n", WAIT).await?;
    println!("After 'echo hi' ({:?}):", outcome.state);
    print!("{}", shell.take_new_output().stdout);
    println!();

    // Example 2: a confirmation prompt
    println!("\n--- Example 2: Confirmation prompt ---");
    shell
        .write_and_wait(
            "read -p 'Continue? [y/N] ' answer && echo \"You said: $answer\"\n",
            WAIT,
        )
        .await?;
    println!("Prompted: {:?}", shell.snapshot().prompt_rule);
    shell.write_and_wait("y\n", WAIT).await?;
    print!("{}", shell.take_new_output().stdout);
    println!();

    // Example 3: Python REPL, classified with the python profile
    println!("\n--- Example 3: Python REPL (strict mode) ---");
    let python = manager.create_session("python3", SessionOptions::default()).await?;
    println!("Profile: {:?}", python.program());
    python.wait_until_ready(WAIT).await?;
    python.take_new_output();

    // Stream output while the REPL works
    let mut stream = Box::pin(python.output_stream());
    let printer = tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            print!("{}", event.text);
        }
    });

    python.send_line("for i in range(3): print(i)").await?;
    python.write_and_wait("\n", WAIT).await?;
    python.write_and_wait("exit()\n", WAIT).await?;
    let _ = printer.await;
    println!("\nPython session state: {}", python.state());

    println!("\nOpen sessions: {:?}", manager.sessions().ids());
    let snapshot = shell.close().await?;
    println!("Shell closed after {} bytes of output", snapshot.stdout_len);

    println!("Closing connection...");
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
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut host = "localhost".to_string();
        let mut port = 22u16;
        let mut user = env::var("USER").unwrap_or_else(|_| "root".to_string());
        let mut password = None;
        let mut key = None;

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
        }
    }
}
