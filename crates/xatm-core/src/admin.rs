// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lookup, introspection and control requests.

use tracing::{info, warn};
use uuid::Uuid;
use xatm_proto::{LookupReply, LookupRequest, Message, Pid, ScaleRequest};

use crate::{Coordinator, Outbound, StateError, TransactionLog};

impl<L: TransactionLog> Coordinator<L> {
    /// Resources by name, or every available one when no name is given.
    /// Naming an unavailable resource fails the lookup.
    pub(crate) fn lookup(&mut self, from: Pid, correlation: Uuid, request: &LookupRequest) {
        let mut resources = Vec::new();
        for proxy in self.pool.proxies() {
            let named = request.names.contains(&proxy.name);
            if !named && !request.names.is_empty() {
                continue;
            }
            match proxy.unavailable() {
                None => resources.push(proxy.info()),
                Some(reason) if named => {
                    let err = StateError::ResourceUnavailable {
                        resource: proxy.id,
                        reason,
                    };
                    warn!(name = %proxy.name, %err, "lookup refused");
                    self.out.push(Outbound {
                        to: from,
                        correlation,
                        message: Message::error(err.name(), err.to_string()),
                    });
                    return;
                }
                Some(_) => {}
            }
        }
        self.send(from, correlation, Message::LookupReply(LookupReply { resources }));
    }

    pub(crate) fn scale(&mut self, from: Pid, correlation: Uuid, request: &ScaleRequest) {
        if self.stopping {
            let err = StateError::ShuttingDown;
            self.send(from, correlation, Message::error(err.name(), err.to_string()));
            return;
        }
        let scaling = self
            .pool
            .check_configured(request.resource)
            .and_then(|()| self.pool.scale(request.resource, request.instances));
        match scaling {
            Ok(scaling) => {
                info!(
                    resource = %request.resource,
                    instances = request.instances,
                    start = scaling.start,
                    stop = scaling.stop.len(),
                    "scaled"
                );
                self.queue_spawns(request.resource, scaling.start);
                self.out.extend(scaling.stop);
                let views = self.pool.proxies().map(|p| p.view()).collect();
                self.send(from, correlation, Message::ScaleReply(views));
            }
            Err(err) => {
                warn!(resource = %request.resource, %err, "scale refused");
                self.send(from, correlation, Message::error(err.name(), err.to_string()));
            }
        }
    }

    pub(crate) fn shutdown(&mut self) {
        if self.stopping {
            return;
        }
        info!(open = self.registry.len(), "shutdown requested");
        self.stopping = true;
        let stop = self.pool.shutdown();
        self.out.extend(stop);
    }
}
