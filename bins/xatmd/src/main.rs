// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! xatm transaction manager daemon.
//!
//! Loads the domain configuration, recovers the transaction log, starts one
//! worker per configured resource instance and serves applications, gateways
//! and admin tools on a Unix socket until shut down.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use xatm_config::{ConfigService, DomainConfig, ResolvedResource, ResourceProblem};
use xatm_config_fs::{default_log_path, FsConfigStore};
use xatm_core::{Coordinator, Inbound, JsonLog};
use xatm_proto::{default_socket_path, Message, Pid};
use xatm_resource::SwitchRegistry;

mod domain;
mod hub;

use domain::Domain;
use hub::{handle_client, Hub};

const PREFS_KEY: &str = "xatmd";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Domain configuration file (JSON); defaults to the user config store
    #[arg(long)]
    config: Option<PathBuf>,

    /// Socket to listen on; overrides the stored host preference
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HostPrefs {
    socket_path: String,
}

impl Default for HostPrefs {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path().display().to_string(),
        }
    }
}

/// Marks resources whose property names a switch this host does not have.
fn check_switches(resources: &mut [ResolvedResource], switches: &SwitchRegistry) {
    for resource in resources.iter_mut().filter(|r| r.available()) {
        let Some(property) = &resource.property else {
            continue;
        };
        if !switches.contains(&property.switch) {
            resource.problem = Some(ResourceProblem::UnknownSwitch(property.switch.clone()));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("XATM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Config (best-effort)
    let config: Option<ConfigService<FsConfigStore>> =
        FsConfigStore::new().map(ConfigService::new).ok();

    let prefs: HostPrefs = config
        .as_ref()
        .and_then(|c| c.load::<HostPrefs>(PREFS_KEY).ok().flatten())
        .unwrap_or_default();
    if let Some(cfg) = &config {
        if let Err(err) = cfg.save(PREFS_KEY, &prefs) {
            warn!(%err, "could not persist host preferences");
        }
    }
    let socket_path = args
        .socket
        .unwrap_or_else(|| PathBuf::from(&prefs.socket_path));

    let domain_config = match (&args.config, &config) {
        (Some(path), _) => DomainConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, Some(cfg)) => cfg.load_domain()?,
        (None, None) => {
            warn!("no config store; starting with an empty domain");
            DomainConfig::default()
        }
    };
    let switches = SwitchRegistry::builtin();
    let mut resources = domain_config.resolve()?;
    check_switches(&mut resources, &switches);
    for resource in &resources {
        match &resource.problem {
            Some(problem) => warn!(
                resource = %resource.id,
                name = %resource.config.name,
                %problem,
                "resource unavailable"
            ),
            None => info!(
                resource = %resource.id,
                name = %resource.config.name,
                instances = resource.config.instances,
                "resource configured"
            ),
        }
    }

    let log_path = if domain_config.transaction.log.as_os_str().is_empty() {
        default_log_path()?
    } else {
        domain_config.transaction.log.clone()
    };
    for pending in JsonLog::pending(&log_path)? {
        warn!(?pending, "transaction log holds an unresolved decision");
    }
    let log = JsonLog::open(&log_path)?;
    info!(log = %log_path.display(), "transaction log open");

    let tm = Pid(std::process::id());
    let coordinator = Coordinator::new(tm, &resources, log);
    let hub = Hub::default();
    let (inbox_tx, inbox) = mpsc::channel::<Inbound>(1024);
    let domain = Domain::new(coordinator, &resources, switches, hub.clone(), inbox_tx.clone());
    let mut coordinator_task = tokio::spawn(domain.run(inbox));

    // Remove stale socket if present
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), process = %tm, "transaction manager listening");

    let result = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let hub = hub.clone();
                let inbox_tx = inbox_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, hub, inbox_tx).await {
                        warn!(?err, "client handler error");
                    }
                });
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("interrupt; shutting down");
                inbox_tx
                    .send(Inbound::new(tm, Uuid::nil(), Message::Shutdown))
                    .await
                    .context("coordinator stopped")?;
            }
            finished = &mut coordinator_task => {
                break finished?;
            }
        }
    };

    if let Err(err) = std::fs::remove_file(&socket_path) {
        warn!(%err, "could not remove socket");
    }
    info!("transaction manager stopped");
    result
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use xatm_dry_tests::fixtures;

    #[test]
    fn unknown_switches_make_resources_unavailable() {
        let mut resources = fixtures::resolved(&[("a", 1), ("b", 1)]);
        if let Some(property) = resources[1].property.as_mut() {
            property.switch = "db2".into();
        }
        check_switches(&mut resources, &SwitchRegistry::builtin());
        assert!(resources[0].available());
        assert_eq!(
            resources[1].problem,
            Some(ResourceProblem::UnknownSwitch("db2".into()))
        );
    }

    #[test]
    fn args_accept_config_and_socket() {
        let argv = ["xatmd", "--config", "/etc/xatm.json", "--socket", "/tmp/x.sock"];
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/xatm.json")));
        assert_eq!(args.socket, Some(PathBuf::from("/tmp/x.sock")));
    }
}
