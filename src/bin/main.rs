//! Beeinbox CLI - drive an inbox client against in-memory collaborators
//!
//!   beeinbox account <address>   → Validate and print the CAIP-10 account
//!   beeinbox demo <address>      → Register, subscribe, notify, poll blocks, print state
//!   beeinbox watch <address>     → Subscribe and poll blocks until Ctrl+C
//!
//! Configuration comes from BEEINBOX_* variables (a local .env is loaded first).
//!
//! Output format:
//!   --json     Output raw JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use anyhow::{anyhow, bail, Context, Result};
use beeinbox::logging::init_logging;
use beeinbox::memory::{InMemoryChain, InMemoryService, LocalSigner};
use beeinbox::{install_signal_handlers, Account, ClientConfig, Collaborators, InboxClient};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::info;

fn main() {
    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);
    init_logging();

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("beeinbox {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("account") => cmd_account(&opts),
        Some("demo") => cmd_demo(&opts),
        Some("watch") => cmd_watch(&opts),
        Some(cmd) => Err(anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = !opts.json && (opts.pretty || std::io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{:#}", e)}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    address: Option<String>,
    // Demo options
    scopes: Vec<String>,
    reject_signature: bool,
    ticks: Option<u32>,
    start_height: Option<u64>,
    // Output options
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        load_dotenv(".env");

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--reject-signature" => opts.reject_signature = true,
                "--scope" | "-s" => {
                    if i + 1 < args.len() {
                        opts.scopes.push(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--ticks" | "-t" => {
                    if i + 1 < args.len() {
                        opts.ticks = args[i + 1].parse().ok();
                        i += 1;
                    }
                }
                "--height" => {
                    if i + 1 < args.len() {
                        opts.start_height = args[i + 1].parse().ok();
                        i += 1;
                    }
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        // First positional is command, second the wallet address
        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        if !positional.is_empty() {
            opts.address = Some(positional.remove(0));
        }

        // Environment (lower priority than CLI args)
        if opts.address.is_none() {
            opts.address = env::var("BEEINBOX_ADDRESS").ok().filter(|s| !s.is_empty());
        }
        if opts.scopes.is_empty() {
            if let Ok(scopes) = env::var("BEEINBOX_SCOPES") {
                opts.scopes = scopes.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            }
        }

        opts
    }

    fn address(&self) -> Result<&str> {
        self.address
            .as_deref()
            .ok_or_else(|| anyhow!("wallet address required (argument or BEEINBOX_ADDRESS)"))
    }
}

fn load_dotenv(path: &str) {
    let Ok(contents) = std::fs::read_to_string(path) else { return };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() && env::var(key.trim()).is_err() {
                env::set_var(key.trim(), value);
            }
        }
    }
}

fn print_usage() {
    println!(
        r#"beeinbox - wallet-bound notification inbox

USAGE:
    beeinbox <command> <address> [options]

COMMANDS:
    account <address>       Validate address, print CAIP-10 account id
    demo <address>          Register, subscribe, send a test notification,
                            poll blocks and print the resulting state
    watch <address>         Subscribe and poll blocks until Ctrl+C

DEMO OPTIONS:
    --scope, -s <key>       Keep only these scopes enabled (can repeat,
                            env: BEEINBOX_SCOPES=a,b)
    --reject-signature      Simulate the user declining the wallet prompt
    --ticks, -t <n>         Block polls to run (default: 3)
    --height <n>            First simulated block height (default: 19000000)

OUTPUT OPTIONS:
    --json                  Raw JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

ENVIRONMENT:
    BEEINBOX_DOMAIN                 App domain for the identity challenge
    BEEINBOX_ORIGIN                 Origin used in notification links
    BEEINBOX_EXPLORER               Block explorer URL prefix
    BEEINBOX_CHAIN_ID               eip155 chain id (default: 1)
    BEEINBOX_WATCH_INTERVAL_MS      Block poll interval (default: 12000)
    BEEINBOX_SUBSCRIBE_TIMEOUT_MS   Subscribe/unsubscribe timeout, 0 = none
    BEEINBOX_LOG_JSON=1             JSON log lines on stderr
    RUST_LOG                        Log filter (default: info)

EXAMPLES:
    beeinbox account 0x52908400098527886E0F7030069857D2E4169EE7
    beeinbox demo 0x52908400098527886E0F7030069857D2E4169EE7 --scope transactional
    beeinbox demo 0x52908400098527886E0F7030069857D2E4169EE7 --json | jq .messages
"#
    );
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to create runtime")
}

fn in_memory(config: &ClientConfig, start_height: u64) -> (Collaborators, Arc<LocalSigner>) {
    let signer = Arc::new(LocalSigner::new("beeinbox-demo"));
    let service = InMemoryService::new().with_domain(config.app_domain.clone());
    let collaborators = Collaborators::new(
        Arc::new(service),
        Arc::new(InMemoryChain::advancing(start_height)),
        signer.clone(),
    );
    (collaborators, signer)
}

fn cmd_account(opts: &ParsedArgs) -> Result<Value> {
    let config = ClientConfig::from_env();
    let account = Account::new(&config.chain, opts.address()?)?;
    Ok(json!({
        "account": account.id(),
        "namespace": account.namespace(),
        "chain_id": account.chain_id(),
        "address": account.address(),
    }))
}

fn cmd_demo(opts: &ParsedArgs) -> Result<Value> {
    let config = ClientConfig::from_env();
    let (collaborators, signer) = in_memory(&config, opts.start_height.unwrap_or(19_000_000));
    signer.set_approve(!opts.reject_signature);
    let ticks = opts.ticks.unwrap_or(3);

    runtime()?.block_on(async {
        let client = InboxClient::new(config, collaborators);
        let account = client.bind(opts.address()?)?;
        info!(account = %account, "bound");

        if client.subscribe().await?.is_none() {
            bail!("subscription dropped");
        }

        if !opts.scopes.is_empty() {
            client.update_scopes(opts.scopes.iter().cloned()).await?;
        }

        let test_sent = client.send_test_notification().await?;

        let mut watcher = client.block_watcher();
        let mut outcomes = Vec::new();
        for _ in 0..ticks {
            outcomes.push(watcher.tick().await?);
        }

        client.refresh().await?;
        let output = json!({
            "test_notification_sent": test_sent,
            "ticks": outcomes,
            "state": client.snapshot(),
            "messages": client.messages()?,
            "wallet_prompts": signer.prompts(),
        });
        client.close().await?;
        Ok(output)
    })
}

fn cmd_watch(opts: &ParsedArgs) -> Result<Value> {
    let config = ClientConfig::from_env();
    let (collaborators, _signer) = in_memory(&config, opts.start_height.unwrap_or(19_000_000));

    runtime()?.block_on(async {
        let shutdown = install_signal_handlers();
        let client = InboxClient::new(config, collaborators);
        let account = client.bind(opts.address()?)?;
        if client.subscribe().await?.is_none() {
            bail!("subscription dropped");
        }
        client.start_block_watcher()?;
        info!(
            account = %account,
            interval_ms = client.config().watcher.interval_ms,
            "watching blocks; Ctrl+C to stop"
        );

        shutdown.subscribe().recv().await;
        info!("Shutdown signal received, stopping watcher...");
        client.stop_block_watcher().await?;

        client.refresh().await?;
        let output = json!({
            "status": "stopped",
            "messages": client.messages()?,
        });
        client.close().await?;
        Ok(output)
    })
}
