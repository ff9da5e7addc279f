//! pagedsm node daemon
//!
//! Runs one side of a two-node shared region and an interactive console for
//! reading, writing and inspecting its pages.
//!
//! # Usage
//!
//! ```bash
//! # host A
//! pagedsmd 9000 9001
//! # host B (or the same host)
//! pagedsmd 9001 9000 --peer-host 10.0.0.1
//! ```

use std::io::{self, BufRead, Write};

use clap::Parser;
use tracing::{error, info};

use pagedsm::config::{DsmConfig, FaultMode};
use pagedsm::error::{DsmError, DsmResult};
use pagedsm::logging::init_with_node_label;
use pagedsm::memory::format_states;
use pagedsm::node::{view_states, DsmNode, PageSelection};

/// pagedsm node
#[derive(Parser, Debug)]
#[command(name = "pagedsmd")]
#[command(about = "Two-node distributed shared memory node")]
struct Args {
    /// Port to accept the peer's request stream on
    listen_port: u16,

    /// Peer's listen port
    send_port: u16,

    /// Host the peer listens on
    #[arg(long)]
    peer_host: Option<String>,

    /// Page count to allocate if this node becomes the initiator
    #[arg(long)]
    pages: Option<usize>,

    /// Do not register the region with userfaultfd; console reads fill
    /// invalid pages themselves
    #[arg(long)]
    explicit_faults: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    init_with_node_label(&config.node.log_level, config.network.listen_port);

    info!("pagedsm node starting");
    info!("  Listen: {}", config.network.listen_endpoint());
    info!("  Peer: {}", config.network.peer_endpoint());

    if let Err(e) = run(config) {
        error!("Node failed: {}", e);
        std::process::exit(1);
    }
}

/// Config file (if any) with command-line values layered on top
fn load_config(args: &Args) -> DsmResult<DsmConfig> {
    let mut config = match &args.config {
        Some(path) => DsmConfig::from_file(path)?,
        None => DsmConfig::default(),
    };

    config.network.listen_port = args.listen_port;
    config.network.send_port = args.send_port;
    if let Some(host) = &args.peer_host {
        config.network.peer_host = host.clone();
    }
    if let Some(pages) = args.pages {
        config.region.pages = Some(pages);
    }
    if args.explicit_faults {
        config.region.fault_mode = FaultMode::Explicit;
    }
    if let Some(level) = &args.log_level {
        config.node.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn run(config: DsmConfig) -> DsmResult<()> {
    let node = DsmNode::create_or_join(config, prompt_page_count)?;

    let region = node.region();
    println!(
        "Node is the {}: {} pages of {} bytes mapped at {:#x}",
        node.role(),
        node.num_pages(),
        region.page_size,
        region.address
    );

    // A failed worker leaves the node unusable
    let watcher = node.clone();
    std::thread::Builder::new()
        .name("pagedsm-watch".to_string())
        .spawn(move || {
            let reason = watcher.wait_fatal();
            error!("Fatal node error: {}", reason);
            std::process::exit(1);
        })?;

    console(&node)
}

fn prompt_page_count() -> DsmResult<usize> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("How many pages should the shared region have? ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Err(DsmError::Io(io::ErrorKind::UnexpectedEof.into()));
        };
        match line?.trim().parse::<usize>() {
            Ok(pages) if pages > 0 => return Ok(pages),
            _ => println!("Please enter a positive number"),
        }
    }
}

/// Read/write/view console. Returns when stdin closes.
fn console(node: &DsmNode) -> DsmResult<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut ask = |prompt: &str| -> DsmResult<Option<String>> {
        print!("{}", prompt);
        io::stdout().flush()?;
        match lines.next() {
            Some(line) => Ok(Some(line?)),
            None => Ok(None),
        }
    };

    loop {
        let Some(command) = ask("\nCommand (r = read, w = write, v = view states): ")? else {
            return Ok(());
        };

        let command = command.trim();
        if !matches!(command, "r" | "w" | "v") {
            println!("Unknown command {:?}", command);
            continue;
        }

        let prompt = format!("Page (0-{}, or -1 for all): ", node.num_pages() - 1);
        let Some(page) = ask(&prompt)? else {
            return Ok(());
        };
        let selection = match page.trim().parse::<i64>().ok().and_then(PageSelection::from_index) {
            Some(PageSelection::One(p)) if p >= node.num_pages() => {
                println!("Page {} is outside the region", p);
                continue;
            }
            Some(selection) => selection,
            None => {
                println!("Invalid page {:?}", page.trim());
                continue;
            }
        };

        match command {
            "r" => {
                for (page, data) in node.read_range(selection)? {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    println!("Page {}:\n{}", page, String::from_utf8_lossy(&data[..end]));
                }
            }
            "w" => {
                let Some(payload) = ask("Data to write: ")? else {
                    return Ok(());
                };
                node.write_range(selection, payload.as_bytes())?;
                println!("{}", format_states(&node.dump_state()));
            }
            _ => {
                if let Some(view) = view_states(&node.dump_state(), selection) {
                    println!("{}", view);
                }
            }
        }
    }
}
