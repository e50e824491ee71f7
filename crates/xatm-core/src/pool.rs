// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource proxy pool.
//!
//! Each configured resource owns a set of instances. An instance serves one
//! request at a time; requests that find no idle instance wait in a FIFO
//! queue per resource and are handed to the next instance that becomes idle.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;
use xatm_config::ResolvedResource;
use xatm_proto::{
    InstanceState, InstanceView, Message, Metrics, PendingView, Pid, ProxyView, RequestKind,
    ResourceConnect, ResourceId, ResourceInfo, ResourceRequest, XaCode, XaFlags, Xid,
};

use crate::{Outbound, StateError};

/// A participant request addressed to a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request kind.
    pub kind: RequestKind,
    /// Participant branch.
    pub trid: Xid,
    /// XA flags.
    pub flags: XaFlags,
    /// Correlation of the transaction the request belongs to.
    pub correlation: Uuid,
}

#[derive(Debug, Clone)]
struct InFlight {
    request: Request,
    sent: Instant,
}

/// One resource-manager session.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Process serving the session.
    pub process: Pid,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Timing for requests served by this instance.
    pub metrics: Metrics,
    in_flight: Option<InFlight>,
}

impl Instance {
    fn live(&self) -> bool {
        !matches!(self.state, InstanceState::Error | InstanceState::Shutdown)
    }
}

/// One configured resource and its instances.
#[derive(Debug, Clone)]
pub struct ResourceProxy {
    /// Resource id.
    pub id: ResourceId,
    /// Configured name.
    pub name: String,
    /// Resource-manager key.
    pub key: String,
    /// Expanded `xa_open` info.
    pub openinfo: String,
    /// Expanded `xa_close` info.
    pub closeinfo: String,
    /// Wanted number of instances.
    pub concurrency: usize,
    /// Why the resource takes no work, if it doesn't.
    pub problem: Option<String>,
    /// Totals folded in from instances that are gone.
    pub metrics: Metrics,
    instances: Vec<Instance>,
    pending: VecDeque<Request>,
}

impl ResourceProxy {
    /// Builds a proxy from a resolved configuration entry.
    pub fn new(resource: &ResolvedResource) -> Self {
        Self {
            id: resource.id,
            name: resource.config.name.clone(),
            key: resource.config.key.clone(),
            openinfo: resource.config.openinfo.clone(),
            closeinfo: resource.config.closeinfo.clone(),
            concurrency: resource.config.instances,
            problem: resource.problem.as_ref().map(ToString::to_string),
            metrics: Metrics::default(),
            instances: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Instances in start order.
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Requests waiting for an idle instance.
    pub fn pending(&self) -> impl Iterator<Item = &Request> {
        self.pending.iter()
    }

    /// Instances that are, or will become, able to serve.
    pub fn live(&self) -> usize {
        self.instances.iter().filter(|i| i.live()).count()
    }

    /// Why the resource takes no work: its configuration problem, or every
    /// instance it started failed `xa_open`.
    pub fn unavailable(&self) -> Option<String> {
        if let Some(problem) = &self.problem {
            return Some(problem.clone());
        }
        let failed = self
            .instances
            .iter()
            .any(|i| i.state == InstanceState::Error);
        (failed && self.live() == 0).then(|| "xa_open failed on every instance".to_owned())
    }

    /// Static description for lookups.
    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            key: self.key.clone(),
            openinfo: self.openinfo.clone(),
            closeinfo: self.closeinfo.clone(),
        }
    }

    /// Admin snapshot.
    pub fn view(&self) -> ProxyView {
        ProxyView {
            id: self.id,
            name: self.name.clone(),
            key: self.key.clone(),
            openinfo: self.openinfo.clone(),
            closeinfo: self.closeinfo.clone(),
            concurrency: self.concurrency,
            available: self.unavailable().is_none(),
            metrics: self.metrics,
            instances: self
                .instances
                .iter()
                .map(|i| InstanceView {
                    process: i.process,
                    state: i.state,
                    metrics: i.metrics,
                })
                .collect(),
        }
    }

    fn send(&mut self, coordinator: Pid, index: usize, request: Request) -> Outbound {
        let instance = &mut self.instances[index];
        instance.state = InstanceState::Busy;
        let message = Message::resource_request(
            request.kind,
            ResourceRequest {
                trid: request.trid.clone(),
                process: coordinator,
                resource: self.id,
                flags: request.flags,
            },
        );
        let out = Outbound {
            to: instance.process,
            correlation: request.correlation,
            message,
        };
        instance.in_flight = Some(InFlight {
            request,
            sent: Instant::now(),
        });
        out
    }

    fn idle(&self) -> Option<usize> {
        self.instances
            .iter()
            .position(|i| i.state == InstanceState::Idle)
    }

    /// Takes an idle instance out of the idle set, unless requests are
    /// already waiting for one.
    fn reserve(&mut self) -> Option<usize> {
        if !self.pending.is_empty() {
            return None;
        }
        let index = self.idle()?;
        self.instances[index].state = InstanceState::Busy;
        Some(index)
    }

    /// Hands queued requests to idle instances, oldest first.
    fn drain(&mut self, coordinator: Pid) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Some(index) = self.idle() {
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            out.push(self.send(coordinator, index, request));
        }
        out
    }
}

/// What an instance's `xa_open` result set in motion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Opened {
    /// Queued requests handed to the connected instance.
    pub sent: Vec<Outbound>,
    /// Queued requests no instance is left to serve.
    pub failed: Vec<Request>,
}

/// What a resize asks the host to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Scaling {
    /// Instances to start.
    pub start: usize,
    /// Shutdown messages for instances to stop.
    pub stop: Vec<Outbound>,
}

/// All resource proxies of the domain.
#[derive(Debug)]
pub struct Pool {
    coordinator: Pid,
    proxies: BTreeMap<ResourceId, ResourceProxy>,
}

impl Pool {
    /// Builds the pool from resolved configuration. Requests to instances
    /// name `coordinator` as the reply address.
    pub fn new(coordinator: Pid, resources: &[ResolvedResource]) -> Self {
        let proxies = resources
            .iter()
            .map(|r| (r.id, ResourceProxy::new(r)))
            .collect();
        Self {
            coordinator,
            proxies,
        }
    }

    /// The proxy for `id`.
    pub fn proxy(&self, id: ResourceId) -> Option<&ResourceProxy> {
        self.proxies.get(&id)
    }

    /// All proxies in id order.
    pub fn proxies(&self) -> impl Iterator<Item = &ResourceProxy> {
        self.proxies.values()
    }

    /// Fails unless `id` is configured and available.
    pub fn check(&self, id: ResourceId) -> Result<(), StateError> {
        let proxy = self
            .proxies
            .get(&id)
            .ok_or(StateError::UnknownResource(id))?;
        unavailable(id, proxy.unavailable())
    }

    /// Fails unless `id` is configured without problems. A resource whose
    /// instances all failed to open still passes.
    pub fn check_configured(&self, id: ResourceId) -> Result<(), StateError> {
        let proxy = self
            .proxies
            .get(&id)
            .ok_or(StateError::UnknownResource(id))?;
        unavailable(id, proxy.problem.clone())
    }

    fn proxy_mut(&mut self, id: ResourceId) -> Result<&mut ResourceProxy, StateError> {
        self.proxies
            .get_mut(&id)
            .ok_or(StateError::UnknownResource(id))
    }

    fn locate(&self, pid: Pid) -> Option<(ResourceId, usize)> {
        self.proxies.values().find_map(|proxy| {
            proxy
                .instances
                .iter()
                .position(|i| i.process == pid)
                .map(|index| (proxy.id, index))
        })
    }

    /// True when `pid` is a resource-proxy instance.
    pub fn is_instance(&self, pid: Pid) -> bool {
        self.locate(pid).is_some()
    }

    /// Records a started (not yet connected) instance.
    pub fn started(&mut self, id: ResourceId, pid: Pid) -> Result<(), StateError> {
        let proxy = self.proxy_mut(id)?;
        proxy.instances.push(Instance {
            process: pid,
            state: InstanceState::Started,
            metrics: Metrics::default(),
            in_flight: None,
        });
        debug!(resource = %id, instance = %pid, "instance started");
        Ok(())
    }

    /// Applies an instance's `xa_open` result.
    ///
    /// A connected instance picks up queued work immediately. When the last
    /// instance that could have served fails to open, the queue is handed
    /// back as failed.
    pub fn connect(&mut self, connect: &ResourceConnect) -> Result<Opened, StateError> {
        let coordinator = self.coordinator;
        let proxy = self.proxy_mut(connect.resource)?;
        let instance = proxy
            .instances
            .iter_mut()
            .find(|i| i.process == connect.process)
            .ok_or(StateError::UnknownInstance(connect.process))?;
        if instance.state == InstanceState::Shutdown {
            return Ok(Opened::default());
        }
        if connect.state == XaCode::Ok {
            instance.state = InstanceState::Idle;
            info!(resource = %connect.resource, instance = %connect.process, "instance connected");
            Ok(Opened {
                sent: proxy.drain(coordinator),
                failed: Vec::new(),
            })
        } else {
            instance.state = InstanceState::Error;
            warn!(
                resource = %connect.resource,
                instance = %connect.process,
                state = %connect.state,
                "xa_open failed; instance will not take work"
            );
            let mut opened = Opened::default();
            if let Some(reason) = proxy.unavailable() {
                error!(
                    resource = %connect.resource,
                    %reason,
                    queued = proxy.pending.len(),
                    "resource unavailable"
                );
                opened.failed = proxy.pending.drain(..).collect();
            }
            Ok(opened)
        }
    }

    /// Reserves an idle instance of `id`.
    ///
    /// The instance is busy until [`Pool::release`] (or [`Pool::reply`])
    /// returns it. `None` when no instance is idle or requests are already
    /// waiting for one.
    pub fn reserve(&mut self, id: ResourceId) -> Result<Option<Pid>, StateError> {
        let proxy = self.proxy_mut(id)?;
        unavailable(id, proxy.unavailable())?;
        Ok(proxy.reserve().map(|index| proxy.instances[index].process))
    }

    /// Sends `request` to a reserved instance of `id`, or queues it for the
    /// next release.
    pub fn dispatch(
        &mut self,
        id: ResourceId,
        request: Request,
    ) -> Result<Option<Outbound>, StateError> {
        let coordinator = self.coordinator;
        let proxy = self.proxy_mut(id)?;
        unavailable(id, proxy.unavailable())?;
        if let Some(index) = proxy.reserve() {
            return Ok(Some(proxy.send(coordinator, index, request)));
        }
        debug!(resource = %id, trid = %request.trid, kind = %request.kind, "queued; no idle instance");
        proxy.pending.push_back(request);
        Ok(None)
    }

    /// Returns an instance to the idle set and hands it the next queued
    /// request, if any. Instances in `shutdown` or `error` stay out.
    pub fn release(&mut self, pid: Pid) -> Result<Option<Outbound>, StateError> {
        let coordinator = self.coordinator;
        let (id, index) = self.locate(pid).ok_or(StateError::UnknownInstance(pid))?;
        let proxy = self.proxy_mut(id)?;
        let instance = &mut proxy.instances[index];
        instance.in_flight = None;
        if instance.state != InstanceState::Busy {
            return Ok(None);
        }
        instance.state = InstanceState::Idle;
        Ok(proxy
            .pending
            .pop_front()
            .map(|request| proxy.send(coordinator, index, request)))
    }

    /// Books a reply from an instance: records timing and releases it.
    pub fn reply(&mut self, pid: Pid, elapsed: Duration) -> Result<Option<Outbound>, StateError> {
        let (id, index) = self.locate(pid).ok_or(StateError::UnknownInstance(pid))?;
        let instance = &mut self.proxy_mut(id)?.instances[index];
        instance.metrics.resource.add(elapsed);
        if let Some(in_flight) = &instance.in_flight {
            instance.metrics.roundtrip.add(in_flight.sent.elapsed());
        }
        self.release(pid)
    }

    /// Forgets an instance that exited.
    ///
    /// Its metrics are folded into the proxy and its in-flight request goes
    /// back to the front of the queue. Returns `None` when `pid` is not an
    /// instance, otherwise the resource and any requests handed to other
    /// idle instances.
    pub fn exit(&mut self, pid: Pid) -> Option<(ResourceId, Vec<Outbound>)> {
        let coordinator = self.coordinator;
        let (id, index) = self.locate(pid)?;
        let proxy = self.proxies.get_mut(&id)?;
        let instance = proxy.instances.remove(index);
        proxy.metrics.merge(&instance.metrics);
        if let Some(in_flight) = instance.in_flight {
            warn!(
                resource = %id,
                instance = %pid,
                trid = %in_flight.request.trid,
                "instance died with a request in flight; requeued"
            );
            proxy.pending.push_front(in_flight.request);
        } else {
            info!(resource = %id, instance = %pid, "instance exited");
        }
        Some((id, proxy.drain(coordinator)))
    }

    /// Changes the wanted instance count of `id`.
    ///
    /// Growing asks the host to start instances. Shrinking stops idle
    /// instances first, then ones not yet connected, then busy ones (which
    /// finish their current request before they see the shutdown).
    pub fn scale(&mut self, id: ResourceId, instances: usize) -> Result<Scaling, StateError> {
        let proxy = self.proxy_mut(id)?;
        proxy.concurrency = instances;
        let live = proxy.live();
        let mut scaling = Scaling::default();
        if instances > live {
            scaling.start = instances - live;
            return Ok(scaling);
        }
        let mut surplus = live - instances;
        for wanted in [
            InstanceState::Idle,
            InstanceState::Started,
            InstanceState::Absent,
            InstanceState::Busy,
        ] {
            for instance in proxy
                .instances
                .iter_mut()
                .filter(|i| i.state == wanted)
            {
                if surplus == 0 {
                    break;
                }
                instance.state = InstanceState::Shutdown;
                scaling.stop.push(Outbound {
                    to: instance.process,
                    correlation: Uuid::nil(),
                    message: Message::Shutdown,
                });
                surplus -= 1;
            }
        }
        Ok(scaling)
    }

    /// Stops every instance still running, including ones whose open failed.
    pub fn shutdown(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        for proxy in self.proxies.values_mut() {
            for instance in proxy
                .instances
                .iter_mut()
                .filter(|i| i.state != InstanceState::Shutdown)
            {
                instance.state = InstanceState::Shutdown;
                out.push(Outbound {
                    to: instance.process,
                    correlation: Uuid::nil(),
                    message: Message::Shutdown,
                });
            }
        }
        out
    }

    /// Queued requests across all proxies.
    pub fn pending_views(&self) -> Vec<PendingView> {
        self.proxies
            .values()
            .flat_map(|proxy| {
                proxy.pending.iter().map(|r| PendingView {
                    resource: proxy.id,
                    trid: r.trid.clone(),
                    kind: r.kind,
                })
            })
            .collect()
    }

    /// Resources that need more instances to reach their concurrency.
    pub fn deficits(&self) -> Vec<(ResourceId, usize)> {
        self.proxies
            .values()
            .filter(|p| p.problem.is_none())
            .filter_map(|p| {
                let live = p.live();
                (p.concurrency > live).then(|| (p.id, p.concurrency - live))
            })
            .collect()
    }
}

fn unavailable(resource: ResourceId, reason: Option<String>) -> Result<(), StateError> {
    match reason {
        Some(reason) => Err(StateError::ResourceUnavailable { resource, reason }),
        None => Ok(()),
    }
}
