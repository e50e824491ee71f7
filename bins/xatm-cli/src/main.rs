// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! xatm admin CLI
//!
//! Inspects and steers a running transaction manager over its Unix socket.
//!
//! # Usage
//! ```text
//! xatm-cli [--socket <path>] <state|resources|transactions|lookup|scale|shutdown>
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use xatm_client::XatmClient;
use xatm_proto::{default_socket_path, InstanceState, ProxyView, ResourceId, StateReply};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator socket
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full admin snapshot
    State {
        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Resource proxies and their instances
    Resources,
    /// Open transactions and queued requests
    Transactions,
    /// Configured resources by name (all when none given)
    Lookup { names: Vec<String> },
    /// Change the number of instances of a resource
    Scale {
        /// Resource id, `rm:<n>` or `<n>`
        resource: String,
        /// New instance count
        instances: usize,
    },
    /// Stop the transaction manager
    Shutdown,
}

fn parse_resource(text: &str) -> Result<ResourceId> {
    let digits = text.strip_prefix("rm:").unwrap_or(text);
    match digits.parse::<u32>() {
        Ok(id) if id > 0 => Ok(ResourceId::Local(id)),
        _ => bail!("'{text}' is not a resource id (expected rm:<n>)"),
    }
}

fn idle(view: &ProxyView) -> usize {
    view.instances
        .iter()
        .filter(|i| i.state == InstanceState::Idle)
        .count()
}

fn write_resources(out: &mut impl Write, views: &[ProxyView]) -> io::Result<()> {
    writeln!(
        out,
        "{:<8} {:<16} {:<16} {:>5} {:>5} {:>5}  status",
        "id", "name", "key", "want", "live", "idle"
    )?;
    for view in views {
        let status = if view.available { "ok" } else { "unavailable" };
        writeln!(
            out,
            "{:<8} {:<16} {:<16} {:>5} {:>5} {:>5}  {status}",
            view.id.to_string(),
            view.name,
            view.key,
            view.concurrency,
            view.instances.len(),
            idle(view),
        )?;
    }
    Ok(())
}

fn write_transactions(out: &mut impl Write, state: &StateReply) -> io::Result<()> {
    if state.transactions.is_empty() {
        writeln!(out, "no open transactions")?;
    }
    for tx in &state.transactions {
        let role = if tx.remote { "remote" } else { "owner" };
        writeln!(
            out,
            "{} {role}={} phase={:?} age={:?}",
            tx.trid, tx.owner, tx.phase, tx.age
        )?;
        for p in &tx.participants {
            writeln!(out, "  {} {:?} {}", p.resource, p.stage, p.result)?;
        }
    }
    for pending in &state.pending {
        writeln!(out, "queued {} {} {}", pending.kind, pending.resource, pending.trid)?;
    }
    Ok(())
}

fn write_state(out: &mut impl Write, state: &StateReply) -> io::Result<()> {
    write_resources(out, &state.resources)?;
    writeln!(out)?;
    write_transactions(out, state)?;
    for external in &state.externals {
        writeln!(out, "gateway {} process={}", external.id, external.process)?;
    }
    writeln!(
        out,
        "log writes={} prepare={} remove={} hazard={}",
        state.log.writes, state.log.prepare, state.log.remove, state.log.hazard
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let socket = args.socket.unwrap_or_else(default_socket_path);
    let mut client = XatmClient::connect(&socket).await?;
    let mut out = io::stdout().lock();

    match args.cmd {
        Command::State { json: true } => {
            let state = client.state().await?;
            serde_json::to_writer_pretty(&mut out, &state)?;
            writeln!(out)?;
        }
        Command::State { json: false } => write_state(&mut out, &client.state().await?)?,
        Command::Resources => write_resources(&mut out, &client.state().await?.resources)?,
        Command::Transactions => write_transactions(&mut out, &client.state().await?)?,
        Command::Lookup { names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            for info in client.lookup(&names).await? {
                writeln!(
                    out,
                    "{} {} key={} open={:?}",
                    info.id, info.name, info.key, info.openinfo
                )?;
            }
        }
        Command::Scale {
            resource,
            instances,
        } => {
            let resource = parse_resource(&resource)?;
            let views = client.scale(resource, instances).await?;
            write_resources(&mut out, &views)?;
        }
        Command::Shutdown => {
            client.shutdown().await?;
            writeln!(out, "shutdown requested")?;
        }
    }
    Ok(())
}
