//! NetworkServer: the listening endpoint and per-connection lifecycle.
//!
//! Each accepted connection runs as its own task and walks the state
//! machine `Connecting -> Negotiating -> Registered -> Active ->
//! Disconnected`, with `Rejected` as an alternate terminal reachable from
//! `Negotiating` (protocol/auth/capacity failure) or from `Active`
//! (operator eviction). Entering `Active` hands the connection to the
//! router for its remaining lifetime.

use crate::discovery::DiscoveryService;
use crate::policy::PolicyEnforcer;
use crate::registry::{AgentRecord, AgentRegistry, Outbound};
use crate::router::MessageRouter;
use agentmesh_protocols::registry::{AdapterContext, ProtocolRegistry};
use agentmesh_protocols::ProtocolAdapter;
use agentmesh_types::agent::{AgentId, AgentIdentity, ServiceSpec};
use agentmesh_types::config::NetworkConfig;
use agentmesh_types::envelope::Envelope;
use agentmesh_types::error::{MeshError, MeshResult};
use agentmesh_wire::frame::{
    read_frame, write_frame, AdapterRequest, Frame, FrameKind, Notification, Request, Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How long a new connection may take to send its register frame.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for active connections to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle states, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Negotiating,
    Registered,
    Active,
    Disconnected,
    Rejected,
}

/// The network server: owns the listening endpoint and wires the runtime
/// components together.
pub struct NetworkServer {
    config: NetworkConfig,
    protocols: ProtocolRegistry,
    adapter_ctx: AdapterContext,
    policy: Arc<PolicyEnforcer>,
    discovery: Arc<DiscoveryService>,
    registry: Arc<AgentRegistry>,
    router: Arc<MessageRouter>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Connections currently being served (any state before Disconnected).
    active: AtomicUsize,
}

impl NetworkServer {
    /// Validate the configuration, bind the listening endpoint, and start
    /// accepting connections.
    ///
    /// Configuration errors are fatal here: the endpoint is never opened.
    pub async fn start(config: NetworkConfig) -> MeshResult<(Arc<Self>, tokio::task::JoinHandle<()>)> {
        let protocols =
            ProtocolRegistry::load(ProtocolRegistry::builtin_definitions(), &config.enabled_protocols())?;

        // Service agents are hosted by the operator, but their adapter
        // references must still resolve against the enabled set.
        for service_agent in &config.service_agents {
            for adapter in service_agent.adapters.iter().filter(|a| a.enabled) {
                if !protocols.is_enabled(&adapter.name) {
                    return Err(MeshError::Config(format!(
                        "service agent '{}' references disabled or unknown protocol '{}'",
                        service_agent.name, adapter.name
                    )));
                }
            }
        }

        let policy = Arc::new(PolicyEnforcer::from_profile(&config.profile)?);
        let discovery = Arc::new(DiscoveryService::new(
            config.profile.clone(),
            Arc::clone(&policy),
        ));
        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&policy),
            Arc::clone(&discovery),
        ));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            Duration::from_millis(config.service_call_timeout_ms),
        ));
        let directory: Arc<dyn agentmesh_protocols::NetworkDirectory> = discovery.clone();
        let adapter_ctx = AdapterContext { directory };

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        info!(
            %local_addr,
            network = %config.profile.network_id,
            capacity = policy.capacity(),
            "Network listening"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = Arc::new(Self {
            config,
            protocols,
            adapter_ctx,
            policy,
            discovery,
            registry,
            router,
            local_addr,
            shutdown_tx,
            shutdown_rx: shutdown_rx.clone(),
            active: AtomicUsize::new(0),
        });

        let accept_server = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            accept_server.accept_loop(listener, shutdown_rx).await;
        });

        Ok((server, handle))
    }

    /// The actual bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The message router.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// The policy enforcer (hot-reload surface for the operator).
    pub fn policy(&self) -> &Arc<PolicyEnforcer> {
        &self.policy
    }

    /// The discovery service.
    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    /// Gracefully stop: stop accepting, notify agents, and wait for
    /// active connections to drain before the listener is released.
    pub async fn shutdown(&self) {
        info!("Shutting down network server");
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.active.load(Ordering::Acquire) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let remaining = self.active.load(Ordering::Acquire);
        if remaining > 0 {
            warn!(remaining, "Drain timeout expired with connections active");
        }
    }

    /// Disconnect an agent for policy reasons (Active -> Rejected).
    pub fn evict(&self, id: &AgentId, reason: &str) -> bool {
        match self.registry.unregister(id) {
            Some(record) => {
                self.router.cancel_calls_for(id);
                let _ = record.outbox.send(Outbound::Goodbye);
                warn!(agent = %id, reason, "Evicted agent");
                true
            }
            None => false,
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Accepted connection");
                        self.active.fetch_add(1, Ordering::AcqRel);
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, &server).await {
                                debug!(%addr, error = %e, "Connection ended with error");
                            }
                            server.active.fetch_sub(1, Ordering::AcqRel);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        // Hold the listener until active connections finish their
        // in-flight work, so shutdown never cuts a delivery mid-frame.
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.active.load(Ordering::Acquire) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!("Listener released");
    }

    /// Negotiate a registration: bind adapters (all-or-nothing), apply the
    /// authentication scheme, and insert the registry record.
    fn negotiate(
        &self,
        identity: AgentIdentity,
        adapter_requests: &[AdapterRequest],
        services: Vec<ServiceSpec>,
        subscriptions: Vec<String>,
        credential: Option<&str>,
        outbox: mpsc::UnboundedSender<Outbound>,
    ) -> MeshResult<()> {
        if adapter_requests.is_empty() {
            return Err(MeshError::ProtocolMismatch(
                "registration requested no protocol adapters".to_string(),
            ));
        }
        let mut adapters: HashMap<String, Arc<dyn ProtocolAdapter>> = HashMap::new();
        for request in adapter_requests {
            let adapter =
                self.protocols
                    .instantiate(&request.protocol, &request.config, &self.adapter_ctx)?;
            adapters.insert(request.protocol.clone(), adapter);
        }
        self.policy.authorize(credential)?;
        self.registry.register(AgentRecord::new(
            identity,
            adapters,
            services,
            subscriptions,
            outbox,
        ))
    }

    /// Handle one steady-state request. `Call` is handled by the reader
    /// loop so a slow service never blocks this connection's dispatch.
    async fn handle_request(&self, agent_id: &AgentId, request: Request) -> Response {
        let result: MeshResult<Response> = match request {
            Request::Register { .. } => Err(MeshError::DuplicateAgent(agent_id.to_string())),
            Request::Send { envelope } => {
                if envelope.sender != *agent_id {
                    Err(MeshError::Auth(format!(
                        "envelope sender '{}' does not match connection agent '{agent_id}'",
                        envelope.sender
                    )))
                } else {
                    self.router.route(envelope).map(|_| Response::Ok)
                }
            }
            Request::Subscribe { topic } => {
                self.registry.subscribe(agent_id, &topic).map(|_| Response::Ok)
            }
            Request::Unsubscribe { topic } => {
                self.registry.unsubscribe(agent_id, &topic).map(|_| Response::Ok)
            }
            Request::Protocol {
                protocol,
                action,
                payload,
                credential,
            } => {
                self.protocol_call(agent_id, &protocol, &action, &payload, credential.as_deref())
                    .await
                    .map(|payload| Response::ProtocolResult { payload })
            }
            Request::Call { .. } => Err(MeshError::Internal(
                "call requests are dispatched by the connection loop".to_string(),
            )),
        };
        match result {
            Ok(response) => response,
            Err(e) => {
                debug!(agent = %agent_id, error = %e, "Request failed");
                Response::Error {
                    code: e.code(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Dispatch a protocol-specific call to the agent's bound adapter.
    async fn protocol_call(
        &self,
        agent_id: &AgentId,
        protocol: &str,
        action: &str,
        payload: &[u8],
        credential: Option<&str>,
    ) -> MeshResult<Vec<u8>> {
        let adapter = self.registry.adapter(agent_id, protocol).ok_or_else(|| {
            MeshError::ProtocolMismatch(format!(
                "agent '{agent_id}' has no adapter for protocol '{protocol}'"
            ))
        })?;
        match adapter.handle(action, payload, credential).await? {
            Some(body) => Ok(body),
            None => Err(MeshError::ProtocolMismatch(format!(
                "protocol '{protocol}' does not handle action '{action}'"
            ))),
        }
    }

    /// Encode an envelope for delivery through the recipient's adapter.
    ///
    /// Agents without an adapter for the protocol receive the payload as
    /// routed; encode failures drop the delivery rather than the
    /// connection.
    fn encode_outbound(&self, agent_id: &AgentId, mut envelope: Envelope) -> Option<Envelope> {
        if let Some(adapter) = self.registry.adapter(agent_id, &envelope.protocol) {
            match adapter.encode(&envelope.payload) {
                Ok(payload) => envelope.payload = payload,
                Err(e) => {
                    warn!(agent = %agent_id, error = %e, "Dropping undeliverable envelope");
                    return None;
                }
            }
        }
        Some(envelope)
    }
}

/// Serve a single connection from accept to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server: &Arc<NetworkServer>,
) -> MeshResult<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut state = ConnectionState::Connecting;
    debug!(%addr, state = ?state, "Connection opened");

    // Registration must be the first frame; anything else is rejected
    // before it can touch the runtime.
    let first = match tokio::time::timeout(REGISTER_TIMEOUT, read_frame(&mut reader)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            let e = MeshError::ConnectionClosed("registration timed out".to_string());
            let _ = write_error(&mut writer, "", &e).await;
            return Err(e);
        }
    };
    state = ConnectionState::Negotiating;
    debug!(%addr, state = ?state, "Negotiating registration");

    let (agent_id, outbox_tx, outbox_rx) = match first.kind {
        FrameKind::Request(Request::Register {
            agent_id,
            name,
            adapters,
            services,
            subscriptions,
            credential,
        }) => {
            let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
            let identity = AgentIdentity {
                id: agent_id.clone(),
                name,
            };
            match server.negotiate(
                identity,
                &adapters,
                services,
                subscriptions,
                credential.as_deref(),
                outbox_tx.clone(),
            ) {
                Ok(()) => {
                    state = ConnectionState::Registered;
                    debug!(%addr, agent = %agent_id, state = ?state, "Registration accepted");
                    let ack = Frame::reply(
                        first.id,
                        Response::RegisterAck {
                            network_id: server.config.profile.network_id.clone(),
                            network_name: server.config.name.clone(),
                        },
                    );
                    write_frame(&mut writer, &ack).await?;
                    (agent_id, outbox_tx, outbox_rx)
                }
                Err(e) => {
                    state = ConnectionState::Rejected;
                    warn!(%addr, agent = %agent_id, state = ?state, error = %e, "Registration rejected");
                    let _ = write_error(&mut writer, &first.id, &e).await;
                    return Err(e);
                }
            }
        }
        _ => {
            state = ConnectionState::Rejected;
            let e = MeshError::ProtocolMismatch(
                "registration required before any other frame".to_string(),
            );
            warn!(%addr, state = ?state, "Rejected unregistered frame");
            let _ = write_error(&mut writer, &first.id, &e).await;
            return Err(e);
        }
    };

    state = ConnectionState::Active;
    info!(agent = %agent_id, %addr, state = ?state, "Agent active");

    let writer_server = Arc::clone(server);
    let writer_agent = agent_id.clone();
    let writer_shutdown = server.shutdown_rx.clone();
    let writer_task = tokio::spawn(async move {
        writer_loop(writer, outbox_rx, writer_server, writer_agent, writer_shutdown).await;
    });

    let result = reader_loop(&mut reader, &agent_id, server, &outbox_tx).await;

    state = ConnectionState::Disconnected;
    server.registry.unregister(&agent_id);
    server.router.cancel_calls_for(&agent_id);
    let _ = outbox_tx.send(Outbound::Goodbye);
    drop(outbox_tx);
    let _ = writer_task.await;
    info!(agent = %agent_id, state = ?state, "Agent disconnected");
    result
}

/// Read and dispatch frames until the connection closes.
async fn reader_loop(
    reader: &mut OwnedReadHalf,
    agent_id: &AgentId,
    server: &Arc<NetworkServer>,
    outbox: &mpsc::UnboundedSender<Outbound>,
) -> MeshResult<()> {
    loop {
        let frame = match read_frame(reader).await {
            Ok(frame) => frame,
            Err(MeshError::ConnectionClosed(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        match frame.kind {
            FrameKind::Request(Request::Call { service, envelope }) => {
                let frame_id = frame.id;
                if envelope.sender != *agent_id {
                    let e = MeshError::Auth(format!(
                        "envelope sender '{}' does not match connection agent '{agent_id}'",
                        envelope.sender
                    ));
                    let _ = outbox.send(Outbound::Reply {
                        frame_id,
                        response: Response::Error {
                            code: e.code(),
                            message: e.to_string(),
                        },
                    });
                    continue;
                }
                // Answered from a task so a slow handler never stalls this
                // connection's other traffic.
                let call_server = Arc::clone(server);
                let call_outbox = outbox.clone();
                tokio::spawn(async move {
                    let response = match call_server.router.call(&service, envelope).await {
                        Ok(reply) => Response::CallResult { envelope: reply },
                        Err(e) => Response::Error {
                            code: e.code(),
                            message: e.to_string(),
                        },
                    };
                    let _ = call_outbox.send(Outbound::Reply { frame_id, response });
                });
            }
            FrameKind::Request(request) => {
                let response = server.handle_request(agent_id, request).await;
                let _ = outbox.send(Outbound::Reply {
                    frame_id: frame.id,
                    response,
                });
            }
            FrameKind::Notification(Notification::CallReply {
                correlation_id,
                payload,
            }) => {
                server.router.complete_call(&correlation_id, agent_id, payload);
            }
            FrameKind::Notification(Notification::Goodbye) => return Ok(()),
            FrameKind::Notification(_) | FrameKind::Response(_) => {
                warn!(agent = %agent_id, "Unexpected frame from agent");
            }
        }
    }
}

/// Drain the agent's outbound queue onto the wire.
async fn writer_loop(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
    server: Arc<NetworkServer>,
    agent_id: AgentId,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            item = outbox.recv() => {
                let frame = match item {
                    Some(Outbound::Deliver(envelope)) => {
                        match server.encode_outbound(&agent_id, envelope) {
                            Some(envelope) => Frame::new(FrameKind::Notification(Notification::Deliver { envelope })),
                            None => continue,
                        }
                    }
                    Some(Outbound::CallRequest { correlation_id, service, envelope }) => {
                        match server.encode_outbound(&agent_id, envelope) {
                            Some(envelope) => Frame::new(FrameKind::Notification(Notification::CallRequest {
                                correlation_id,
                                service,
                                envelope,
                            })),
                            None => continue,
                        }
                    }
                    Some(Outbound::Reply { frame_id, response }) => Frame::reply(frame_id, response),
                    Some(Outbound::Goodbye) => {
                        let goodbye = Frame::new(FrameKind::Notification(Notification::Goodbye));
                        let _ = write_frame(&mut writer, &goodbye).await;
                        return;
                    }
                    None => return,
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!(agent = %agent_id, error = %e, "Write failed, closing writer");
                    return;
                }
            }
            _ = shutdown_rx.changed() => {
                let goodbye = Frame::new(FrameKind::Notification(Notification::Goodbye));
                let _ = write_frame(&mut writer, &goodbye).await;
                return;
            }
        }
    }
}

/// Write an error response frame; used on the rejection paths before the
/// writer task exists.
async fn write_error(writer: &mut OwnedWriteHalf, frame_id: &str, e: &MeshError) -> MeshResult<()> {
    let frame = Frame::reply(
        frame_id.to_string(),
        Response::Error {
            code: e.code(),
            message: e.to_string(),
        },
    );
    write_frame(writer, &frame).await
}
