use std::collections::{BTreeSet, BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use accord_core::serialize::to_json_bytes;
use accord_core::{
    now_millis, AgentId, EventBroadcaster, Message, MessageId, MessagePriority, Recipient, HEARTBEAT,
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionStatus, Transport};
use crate::error::CommError;
use crate::events::CommEvent;
use crate::metrics::CommMetrics;
use crate::queue::OutboundQueue;
use crate::routing::{Middleware, Route, RoutePattern, Router};
use crate::tcp::{self, DEFAULT_MAX_FRAME_SIZE};

/// Configuration for the communication manager
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Identity of the local agent
    pub agent_id: AgentId,
    /// Bound on connection establishment
    pub handshake_timeout: Duration,
    /// Retry attempts allowed per message
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    /// Envelopes kept per unreachable agent before the oldest is evicted
    pub queue_bound: usize,
    /// Follow-up messages a single send may produce through routing
    pub max_routing_depth: usize,
    pub max_frame_size: usize,
    pub event_capacity: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        CommConfig {
            agent_id: "agent".to_string(),
            handshake_timeout: Duration::from_secs(10),
            max_retries: 3,
            heartbeat_interval: Duration::from_secs(30),
            queue_bound: 1000,
            max_routing_depth: 16,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_capacity: 1024,
        }
    }
}

/// Envelope options for `send_message` and friends
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub priority: MessagePriority,
    pub encrypted: bool,
    pub metadata: BTreeMap<String, String>,
}

impl SendOptions {
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn apply(self, mut message: Message) -> Message {
        message.priority = self.priority;
        message.encrypted = self.encrypted;
        message.metadata = self.metadata;
        message
    }
}

/// Per-recipient outcome of one delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub delivered: Vec<AgentId>,
    pub queued: Vec<AgentId>,
    pub failed: Vec<FailedDelivery>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDelivery {
    pub agent_id: AgentId,
    pub reason: String,
}

impl DeliveryReport {
    fn new(message_id: &str) -> Self {
        DeliveryReport {
            message_id: message_id.to_string(),
            ..Default::default()
        }
    }

    fn merge(&mut self, other: DeliveryReport) {
        self.delivered.extend(other.delivered);
        self.queued.extend(other.queued);
        self.failed.extend(other.failed);
    }
}

/// Result of `retry_failed_message`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOutcome {
    /// Delivered to every recipient still holding it
    Delivered,
    /// At least one recipient is still unreachable
    StillQueued,
    /// Attempt limit reached; nothing was done
    Exhausted,
}

/// Inbound message callback
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<(), CommError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> Result<(), CommError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<(), CommError> {
        self(message)
    }
}

struct Connection {
    id: u64,
    transport: Arc<dyn Transport>,
    connected_at: u64,
    last_activity: u64,
}

#[derive(Default)]
struct ConnectionTable {
    connections: HashMap<AgentId, Connection>,
    queues: HashMap<AgentId, OutboundQueue>,
    retries: HashMap<MessageId, u32>,
}

impl ConnectionTable {
    fn known_agents(&self) -> BTreeSet<AgentId> {
        self.connections
            .keys()
            .chain(self.queues.keys())
            .cloned()
            .collect()
    }

    fn queued_anywhere(&self, message_id: &str) -> bool {
        self.queues.values().any(|q| q.contains(message_id))
    }

    fn prune_retries(&mut self) {
        let queues = &self.queues;
        self.retries
            .retain(|id, _| queues.values().any(|q| q.contains(id)));
    }
}

/// Owns agent connections, outbound queues and the routing table.
///
/// Lock order is connection table, then metrics.
pub struct CommunicationManager {
    config: CommConfig,
    table: RwLock<ConnectionTable>,
    router: RwLock<Router>,
    handlers: RwLock<Vec<(RoutePattern, Arc<dyn MessageHandler>)>>,
    metrics: RwLock<CommMetrics>,
    events: EventBroadcaster<CommEvent>,
    next_connection_id: AtomicU64,
}

impl CommunicationManager {
    pub fn new(config: CommConfig) -> Self {
        let events = EventBroadcaster::new(config.event_capacity);
        CommunicationManager {
            config,
            table: RwLock::new(ConnectionTable::default()),
            router: RwLock::new(Router::new()),
            handlers: RwLock::new(Vec::new()),
            metrics: RwLock::new(CommMetrics::default()),
            events,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommEvent> {
        self.events.subscribe()
    }

    /// Build an envelope, route it, and deliver whatever routing leaves
    pub async fn send_message(
        &self,
        to: Recipient,
        message_type: impl Into<String>,
        payload: Value,
        options: SendOptions,
    ) -> Result<MessageId, CommError> {
        let message = options.apply(Message::new(self.config.agent_id.clone(), to, message_type, payload));
        let report = self.dispatch(message).await?;
        Ok(report.message_id)
    }

    /// Route and deliver a prepared envelope
    pub async fn dispatch(&self, message: Message) -> Result<DeliveryReport, CommError> {
        validate_recipients(&message)?;
        self.record_sent(&message).await;

        let mut report = DeliveryReport::new(&message.id);
        let mut current = message;
        let mut depth = 0;

        loop {
            let route = {
                let router = self.router.read().await;
                router.find(&current.message_type).cloned()
            };

            let Some(route) = route else {
                report.merge(self.deliver(&current).await?);
                return Ok(report);
            };

            debug!("Message {} ({}) matched route {}", current.id, current.message_type, route.pattern);
            let follow_up = route.process(&current).map_err(|e| {
                error!("Route {} failed on {}: {}", route.pattern, current.id, e);
                e
            })?;

            match follow_up {
                Some(next) => {
                    depth += 1;
                    if depth > self.config.max_routing_depth {
                        warn!("Routing of {} produced too many follow-ups", report.message_id);
                        return Err(CommError::RoutingDepthExceeded(self.config.max_routing_depth));
                    }
                    validate_recipients(&next)?;
                    current = next;
                }
                None => return Ok(report),
            }
        }
    }

    /// Send one envelope to every known agent except ourselves.
    /// Skips routing.
    pub async fn broadcast_message(
        &self,
        message_type: impl Into<String>,
        payload: Value,
        options: SendOptions,
    ) -> Result<DeliveryReport, CommError> {
        let recipients: Vec<AgentId> = {
            let table = self.table.read().await;
            table
                .known_agents()
                .into_iter()
                .filter(|a| *a != self.config.agent_id)
                .collect()
        };

        let message = options.apply(Message::new(
            self.config.agent_id.clone(),
            Recipient::Many(recipients.clone()),
            message_type,
            payload,
        ));
        self.record_sent(&message).await;

        let report = self.deliver(&message).await?;
        info!(
            "Broadcast {} ({}) to {} agents: {} delivered, {} queued, {} failed",
            message.id,
            message.message_type,
            recipients.len(),
            report.delivered.len(),
            report.queued.len(),
            report.failed.len()
        );
        self.events.emit(CommEvent::BroadcastSent {
            message_id: message.id.clone(),
            recipients: recipients.len(),
        });

        Ok(report)
    }

    /// Send one envelope to an explicit set of agents. Skips routing.
    pub async fn multicast_message(
        &self,
        recipients: Vec<AgentId>,
        message_type: impl Into<String>,
        payload: Value,
        options: SendOptions,
    ) -> Result<DeliveryReport, CommError> {
        let message = options.apply(Message::new(
            self.config.agent_id.clone(),
            Recipient::Many(recipients.clone()),
            message_type,
            payload,
        ));
        validate_recipients(&message)?;
        self.record_sent(&message).await;

        let report = self.deliver(&message).await?;
        debug!("Multicast {} to {:?}", message.id, recipients);
        self.events.emit(CommEvent::MulticastSent {
            message_id: message.id.clone(),
            recipients,
        });

        Ok(report)
    }

    /// Deliver to each recipient independently. A live connection gets the
    /// envelope now; otherwise it waits in the recipient's queue.
    async fn deliver(&self, message: &Message) -> Result<DeliveryReport, CommError> {
        let bytes = to_json_bytes(message)?.len();
        let mut report = DeliveryReport::new(&message.id);

        let mut table = self.table.write().await;
        let mut metrics = self.metrics.write().await;

        for recipient in message.to.agents() {
            let now = now_millis();
            let attempt = table
                .connections
                .get(recipient)
                .map(|conn| conn.transport.send(message).map_err(|e| (e, conn.transport.is_open())));

            match attempt {
                Some(Ok(())) => {
                    if let Some(conn) = table.connections.get_mut(recipient) {
                        conn.last_activity = now;
                    }
                    metrics.record_delivered(bytes, now.saturating_sub(message.timestamp), now);
                    debug!("Delivered {} to {}", message.id, recipient);
                    report.delivered.push(recipient.to_string());
                    self.events.emit(CommEvent::MessageDelivered {
                        message_id: message.id.clone(),
                        recipient: recipient.to_string(),
                    });
                }
                Some(Err((e, still_open))) => {
                    warn!("Delivery of {} to {} failed: {}", message.id, recipient, e);
                    metrics.record_failed();
                    report.failed.push(FailedDelivery {
                        agent_id: recipient.to_string(),
                        reason: e.to_string(),
                    });
                    self.events.emit(CommEvent::MessageFailed {
                        message_id: message.id.clone(),
                        recipient: recipient.to_string(),
                        reason: e.to_string(),
                    });

                    if !still_open {
                        if let Some(conn) = table.connections.remove(recipient) {
                            conn.transport.close();
                            metrics.active_connections = table.connections.len();
                            self.events.emit(CommEvent::ConnectionLost {
                                agent_id: recipient.to_string(),
                                reason: e.to_string(),
                            });
                        }
                    }
                    self.enqueue(&mut table, &mut metrics, recipient, message.clone());
                }
                None => {
                    self.enqueue(&mut table, &mut metrics, recipient, message.clone());
                    report.queued.push(recipient.to_string());
                }
            }
        }

        Ok(report)
    }

    fn enqueue(&self, table: &mut ConnectionTable, metrics: &mut CommMetrics, recipient: &str, message: Message) {
        let bound = self.config.queue_bound;
        let queue = table
            .queues
            .entry(recipient.to_string())
            .or_insert_with(|| OutboundQueue::new(bound));

        let message_id = message.id.clone();
        let evicted = queue.push(message);
        let queue_len = queue.len();

        debug!("Queued {} for {} ({} pending)", message_id, recipient, queue_len);
        self.events.emit(CommEvent::MessageQueued {
            message_id,
            recipient: recipient.to_string(),
            queue_len,
        });

        if let Some(old) = evicted {
            warn!("Queue for {} full, dropping oldest message {}", recipient, old.id);
            metrics.record_failed();
            if !table.queued_anywhere(&old.id) {
                table.retries.remove(&old.id);
            }
            self.events.emit(CommEvent::MessageFailed {
                message_id: old.id,
                recipient: recipient.to_string(),
                reason: "outbound queue full".to_string(),
            });
        }
    }

    /// Open a TCP connection to an agent and complete the handshake within
    /// the configured timeout, then flush its queue.
    pub async fn connect_to_agent(self: &Arc<Self>, agent_id: &str, address: &str) -> Result<usize, CommError> {
        if agent_id == self.config.agent_id {
            return Err(CommError::InvalidMessage("cannot connect to self".to_string()));
        }

        info!("Connecting to {} at {}", agent_id, address);
        let timeout = self.config.handshake_timeout;
        let (connection_id, transport) = tokio::time::timeout(timeout, tcp::dial(self, agent_id, address))
            .await
            .map_err(|_| {
                warn!("Handshake with {} at {} timed out", agent_id, address);
                CommError::HandshakeTimeout {
                    agent: agent_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            })??;

        Ok(self.install_connection(agent_id, connection_id, transport).await)
    }

    /// Adopt an already-established transport, such as an in-process
    /// channel. Returns the number of queued messages flushed.
    pub async fn attach_connection(&self, agent_id: &str, transport: Arc<dyn Transport>) -> usize {
        let connection_id = self.next_connection_id();
        self.install_connection(agent_id, connection_id, transport).await
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn install_connection(
        &self,
        agent_id: &str,
        connection_id: u64,
        transport: Arc<dyn Transport>,
    ) -> usize {
        let now = now_millis();
        let mut table = self.table.write().await;

        if let Some(previous) = table.connections.remove(agent_id) {
            debug!("Replacing existing connection to {}", agent_id);
            previous.transport.close();
        }

        let pending = table
            .queues
            .get_mut(agent_id)
            .map(OutboundQueue::drain)
            .unwrap_or_default();

        let mut metrics = self.metrics.write().await;
        let mut flushed = 0;
        let mut remaining = pending.into_iter();
        let mut alive = true;

        while let Some(message) = remaining.next() {
            match transport.send(&message) {
                Ok(()) => {
                    flushed += 1;
                    let bytes = to_json_bytes(&message).map(|b| b.len()).unwrap_or(0);
                    metrics.record_delivered(bytes, now.saturating_sub(message.timestamp), now);
                    self.events.emit(CommEvent::MessageDelivered {
                        message_id: message.id.clone(),
                        recipient: agent_id.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Flush to {} stopped at {}: {}", agent_id, message.id, e);
                    alive = transport.is_open();
                    let mut unsent = vec![message];
                    unsent.extend(remaining.by_ref());
                    if let Some(queue) = table.queues.get_mut(agent_id) {
                        queue.requeue_front(unsent);
                    }
                    break;
                }
            }
        }

        table.prune_retries();

        if alive {
            table.connections.insert(
                agent_id.to_string(),
                Connection {
                    id: connection_id,
                    transport,
                    connected_at: now,
                    last_activity: now,
                },
            );
            info!("Connected to {} ({} queued messages flushed)", agent_id, flushed);
            self.events.emit(CommEvent::ConnectionEstablished {
                agent_id: agent_id.to_string(),
                flushed,
            });
        } else {
            transport.close();
        }
        metrics.active_connections = table.connections.len();

        flushed
    }

    /// Close an agent's connection and discard its pending queue
    pub async fn disconnect_from_agent(&self, agent_id: &str) -> Result<(), CommError> {
        let mut table = self.table.write().await;
        let connection = table.connections.remove(agent_id);
        let queue = table.queues.remove(agent_id);

        if connection.is_none() && queue.is_none() {
            return Err(CommError::AgentNotFound(agent_id.to_string()));
        }

        if let Some(connection) = connection {
            connection.transport.close();
        }
        let dropped = queue.map_or(0, |q| q.len());
        table.prune_retries();
        self.metrics.write().await.active_connections = table.connections.len();
        drop(table);

        info!("Disconnected from {} ({} queued messages dropped)", agent_id, dropped);
        self.events.emit(CommEvent::ConnectionLost {
            agent_id: agent_id.to_string(),
            reason: "disconnected".to_string(),
        });

        Ok(())
    }

    /// Transport closed underneath us. Only the handle goes; the queue
    /// stays for when the agent comes back.
    pub(crate) async fn connection_lost(&self, agent_id: &str, connection_id: u64, reason: &str) {
        let removed = {
            let mut table = self.table.write().await;
            let current = table.connections.get(agent_id).map(|c| c.id);
            if current != Some(connection_id) {
                return;
            }
            let removed = table.connections.remove(agent_id);
            self.metrics.write().await.active_connections = table.connections.len();
            removed
        };

        warn!("Connection to {} lost: {}", agent_id, reason);
        self.events.emit(CommEvent::ConnectionLost {
            agent_id: agent_id.to_string(),
            reason: reason.to_string(),
        });

        // May be running on the connection's own reader task, so this goes last
        if let Some(connection) = removed {
            connection.transport.close();
        }
    }

    /// Process an envelope that arrived from a remote agent
    pub async fn handle_incoming(&self, message: Message) {
        let now = now_millis();
        let bytes = to_json_bytes(&message).map(|b| b.len()).unwrap_or(0);

        {
            let mut table = self.table.write().await;
            if let Some(conn) = table.connections.get_mut(&message.from) {
                conn.last_activity = now;
            }
            self.metrics.write().await.record_received(bytes, now);
        }

        debug!("Received {} ({}) from {}", message.id, message.message_type, message.from);
        self.events.emit(CommEvent::MessageReceived {
            message: message.clone(),
        });

        if message.is_heartbeat() {
            let reply = message.heartbeat_reply(self.config.agent_id.clone());
            self.record_sent(&reply).await;
            if let Err(e) = self.deliver(&reply).await {
                warn!("Heartbeat reply to {} failed: {}", message.from, e);
            }
        }

        let handlers: Vec<_> = {
            let handlers = self.handlers.read().await;
            handlers
                .iter()
                .filter(|(pattern, _)| pattern.matches(&message.message_type))
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        for handler in handlers {
            if let Err(e) = handler.handle(&message) {
                error!("Handler for {} failed on {}: {}", message.message_type, message.id, e);
            }
        }
    }

    pub async fn add_route(&self, route: Route) {
        info!("Adding route {} (priority {})", route.pattern, route.priority);
        self.router.write().await.add(route);
    }

    /// Attach middleware to every route registered under `pattern`
    pub async fn add_middleware(&self, pattern: &str, middleware: Arc<dyn Middleware>) -> Result<usize, CommError> {
        self.router.write().await.add_middleware(pattern, middleware)
    }

    /// Register a callback for inbound messages whose type matches `pattern`
    pub async fn register_message_handler(&self, pattern: &str, handler: Arc<dyn MessageHandler>) {
        debug!("Registering inbound handler for {}", pattern);
        self.handlers
            .write()
            .await
            .push((RoutePattern::parse(pattern), handler));
    }

    /// Re-attempt delivery of a queued message.
    ///
    /// Each message gets `max_retries` attempts; later calls do nothing.
    pub async fn retry_failed_message(&self, message_id: &str) -> Result<RetryOutcome, CommError> {
        let mut table = self.table.write().await;

        let holders: Vec<AgentId> = table
            .queues
            .iter()
            .filter(|(_, q)| q.contains(message_id))
            .map(|(agent, _)| agent.clone())
            .collect();
        if holders.is_empty() {
            return Err(CommError::MessageNotFound(message_id.to_string()));
        }

        let attempts = table.retries.get(message_id).copied().unwrap_or(0);
        if attempts >= self.config.max_retries {
            warn!(
                "Retry limit ({}) reached for {}; leaving it queued",
                self.config.max_retries, message_id
            );
            return Ok(RetryOutcome::Exhausted);
        }
        table.retries.insert(message_id.to_string(), attempts + 1);
        debug!("Retrying {} (attempt {})", message_id, attempts + 1);

        let mut metrics = self.metrics.write().await;
        let mut outcome = RetryOutcome::Delivered;

        for agent in holders {
            let now = now_millis();
            let Some(transport) = table.connections.get(&agent).map(|c| c.transport.clone()) else {
                outcome = RetryOutcome::StillQueued;
                continue;
            };
            // left in place until sent so a failure keeps its queue position
            let Some(message) = table.queues.get(&agent).and_then(|q| q.get(message_id)).cloned() else {
                continue;
            };

            match transport.send(&message) {
                Ok(()) => {
                    if let Some(queue) = table.queues.get_mut(&agent) {
                        queue.remove(message_id);
                    }
                    let bytes = to_json_bytes(&message).map(|b| b.len()).unwrap_or(0);
                    metrics.record_delivered(bytes, now.saturating_sub(message.timestamp), now);
                    info!("Retry delivered {} to {}", message_id, agent);
                    self.events.emit(CommEvent::MessageDelivered {
                        message_id: message_id.to_string(),
                        recipient: agent.clone(),
                    });
                }
                Err(e) => {
                    warn!("Retry of {} to {} failed: {}", message_id, agent, e);
                    metrics.record_failed();
                    outcome = RetryOutcome::StillQueued;
                    self.events.emit(CommEvent::MessageFailed {
                        message_id: message_id.to_string(),
                        recipient: agent.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !table.queued_anywhere(message_id) {
            table.retries.remove(message_id);
        }

        Ok(outcome)
    }

    /// Send one heartbeat to every connected agent
    pub async fn send_heartbeats(&self) -> Result<DeliveryReport, CommError> {
        let connected = self.get_connected_agents().await;
        if connected.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let message = Message::new(
            self.config.agent_id.clone(),
            Recipient::Many(connected),
            HEARTBEAT,
            serde_json::json!({}),
        );
        self.record_sent(&message).await;
        self.deliver(&message).await
    }

    /// Heartbeat every connected agent on the configured interval. Runs
    /// until the task is dropped.
    pub async fn run_heartbeat(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.tick().await;

        loop {
            interval.tick().await;
            match self.send_heartbeats().await {
                Ok(report) => debug!("Heartbeat sent to {} agents", report.delivered.len()),
                Err(e) => warn!("Heartbeat failed: {}", e),
            }
        }
    }

    /// Bind a TCP listener and accept agent connections in the background
    pub async fn listen(self: &Arc<Self>, address: &str) -> Result<SocketAddr, CommError> {
        let listener = TcpListener::bind(address).await?;
        let local = listener.local_addr()?;
        info!("Listening for agent connections on {}", local);

        tokio::spawn(tcp::accept_loop(Arc::downgrade(self), listener));
        Ok(local)
    }

    pub async fn get_connected_agents(&self) -> Vec<AgentId> {
        let table = self.table.read().await;
        let mut agents: Vec<_> = table.connections.keys().cloned().collect();
        agents.sort();
        agents
    }

    pub async fn is_agent_connected(&self, agent_id: &str) -> bool {
        self.table.read().await.connections.contains_key(agent_id)
    }

    pub async fn get_connection_status(&self, agent_id: &str) -> Option<ConnectionStatus> {
        let table = self.table.read().await;
        status_of(&table, agent_id)
    }

    /// Status of every agent with a connection or a pending queue
    pub async fn get_all_connection_status(&self) -> Vec<ConnectionStatus> {
        let table = self.table.read().await;
        table
            .known_agents()
            .iter()
            .filter_map(|agent| status_of(&table, agent))
            .collect()
    }

    pub async fn pending_messages(&self, agent_id: &str) -> Vec<Message> {
        let table = self.table.read().await;
        table
            .queues
            .get(agent_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get_metrics(&self) -> CommMetrics {
        let active = self.table.read().await.connections.len();
        let mut metrics = self.metrics.read().await.clone();
        metrics.active_connections = active;
        metrics
    }

    async fn record_sent(&self, message: &Message) {
        self.metrics.write().await.record_sent(now_millis());
        self.events.emit(CommEvent::MessageSent {
            message: message.clone(),
        });
    }
}

fn validate_recipients(message: &Message) -> Result<(), CommError> {
    let agents = message.to.agents();
    if agents.is_empty() || agents.iter().any(|a| a.is_empty()) {
        return Err(CommError::InvalidMessage(format!(
            "message {} has no valid recipients",
            message.id
        )));
    }
    Ok(())
}

fn status_of(table: &ConnectionTable, agent_id: &str) -> Option<ConnectionStatus> {
    let connection = table.connections.get(agent_id);
    let queued = table.queues.get(agent_id).map(OutboundQueue::len);
    if connection.is_none() && queued.is_none() {
        return None;
    }

    Some(ConnectionStatus {
        agent_id: agent_id.to_string(),
        connected: connection.is_some(),
        connected_at: connection.map(|c| c.connected_at),
        last_activity: connection.map(|c| c.last_activity),
        queued_messages: queued.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelTransport;
    use serde_json::json;

    fn manager(agent_id: &str) -> CommunicationManager {
        CommunicationManager::new(CommConfig {
            agent_id: agent_id.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_send_to_connected_agent() {
        let manager = manager("a");
        let (transport, mut rx) = ChannelTransport::pair();
        manager.attach_connection("b", Arc::new(transport)).await;

        let id = manager
            .send_message(Recipient::one("b"), "task", json!({ "n": 1 }), SendOptions::default())
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, id);
        assert_eq!(received.from, "a");

        let metrics = manager.get_metrics().await;
        assert_eq!(metrics.messages_sent, 1);
        assert_eq!(metrics.messages_delivered, 1);
        assert_eq!(metrics.active_connections, 1);
        assert!(metrics.bytes_transferred > 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_agent_queues() {
        let manager = manager("a");
        let mut events = manager.subscribe();

        manager
            .send_message(Recipient::one("b"), "task", json!(null), SendOptions::default())
            .await
            .unwrap();

        assert_eq!(manager.pending_messages("b").await.len(), 1);
        let status = manager.get_connection_status("b").await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.queued_messages, 1);

        let mut saw_queued = false;
        while let Ok(event) = events.try_recv() {
            saw_queued |= matches!(event, CommEvent::MessageQueued { queue_len: 1, .. });
        }
        assert!(saw_queued);
    }

    #[tokio::test]
    async fn test_empty_recipient_rejected() {
        let manager = manager("a");
        let result = manager
            .send_message(Recipient::Many(vec![]), "task", json!(null), SendOptions::default())
            .await;
        assert!(matches!(result, Err(CommError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_queue_bound_evicts_oldest() {
        let manager = CommunicationManager::new(CommConfig {
            agent_id: "a".to_string(),
            queue_bound: 2,
            ..Default::default()
        });

        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(
                manager
                    .send_message(Recipient::one("b"), "task", json!(n), SendOptions::default())
                    .await
                    .unwrap(),
            );
        }

        let pending: Vec<_> = manager.pending_messages("b").await.into_iter().map(|m| m.id).collect();
        assert_eq!(pending, ids[1..].to_vec());
        assert_eq!(manager.get_metrics().await.messages_failed, 1);
    }

    #[tokio::test]
    async fn test_route_consumes_and_forwards() {
        let manager = manager("a");
        let (transport, mut rx) = ChannelTransport::pair();
        manager.attach_connection("auditor", Arc::new(transport)).await;

        manager
            .add_route(Route::new(
                "task",
                Arc::new(|m: &Message| -> Result<Option<Message>, CommError> {
                    Ok(Some(Message::new(
                        m.from.clone(),
                        Recipient::one("auditor"),
                        "audit",
                        json!({ "original": m.id }),
                    )))
                }),
            ))
            .await;

        manager
            .send_message(Recipient::one("b"), "task", json!(null), SendOptions::default())
            .await
            .unwrap();

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.message_type, "audit");
        assert!(manager.pending_messages("b").await.is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let manager = manager("a");
        manager
            .add_route(Route::new(
                "task",
                Arc::new(|_: &Message| -> Result<Option<Message>, CommError> {
                    Err(CommError::Handler("boom".to_string()))
                }),
            ))
            .await;

        let result = manager
            .send_message(Recipient::one("b"), "task", json!(null), SendOptions::default())
            .await;
        assert!(matches!(result, Err(CommError::Handler(_))));

        // routing table still intact
        let ok = manager
            .send_message(Recipient::one("b"), "other", json!(null), SendOptions::default())
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_routing_loop_is_bounded() {
        let manager = CommunicationManager::new(CommConfig {
            agent_id: "a".to_string(),
            max_routing_depth: 4,
            ..Default::default()
        });
        manager
            .add_route(Route::new(
                "echo",
                Arc::new(|m: &Message| -> Result<Option<Message>, CommError> { Ok(Some(m.clone())) }),
            ))
            .await;

        let result = manager
            .send_message(Recipient::one("b"), "echo", json!(null), SendOptions::default())
            .await;
        assert!(matches!(result, Err(CommError::RoutingDepthExceeded(4))));
    }

    #[tokio::test]
    async fn test_disconnect_drops_queue() {
        let manager = manager("a");
        manager
            .send_message(Recipient::one("b"), "task", json!(null), SendOptions::default())
            .await
            .unwrap();

        manager.disconnect_from_agent("b").await.unwrap();
        assert!(manager.get_connection_status("b").await.is_none());
        assert!(matches!(
            manager.disconnect_from_agent("b").await,
            Err(CommError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_passive_loss_keeps_queue() {
        let manager = manager("a");
        let (transport, rx) = ChannelTransport::pair();
        manager.attach_connection("b", Arc::new(transport)).await;
        drop(rx);

        let report = manager
            .dispatch(Message::new("a", Recipient::one("b"), "task", json!(null)))
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(!manager.is_agent_connected("b").await);
        assert_eq!(manager.pending_messages("b").await.len(), 1);
    }

    #[tokio::test]
    async fn test_incoming_handlers_by_pattern() {
        let manager = manager("a");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager
            .register_message_handler(
                "consensus.*",
                Arc::new(move |m: &Message| -> Result<(), CommError> {
                    tx.send(m.message_type.clone())
                        .map_err(|e| CommError::Handler(e.to_string()))
                }),
            )
            .await;

        manager
            .handle_incoming(Message::new("b", Recipient::one("a"), "consensus.vote", json!(null)))
            .await;
        manager
            .handle_incoming(Message::new("b", Recipient::one("a"), "chat", json!(null)))
            .await;

        assert_eq!(rx.recv().await.unwrap(), "consensus.vote");
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.get_metrics().await.messages_received, 2);
    }
}
