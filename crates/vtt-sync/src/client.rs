//! The sync facade.
//!
//! [`SyncClient`] owns confirmed state, predictions, the event queue and the
//! network monitor, and is driven by one task. Actions predict first and
//! transmit second; server messages update confirmed state and then notify
//! subscribers, so a handler always observes the already-updated view.

use std::time::{Duration, Instant};

use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use vtt_config::Config;
use vtt_net::{
    Category, ClientMessage, CreateRoom, EntityId, GameEvent, GameState, JoinRoom, Ping,
    PlayerInfo, Position, ReconnectConfig, ReconnectError, Record, RoomInfo, Sequence,
    ServerMessage, TcpTransport, Timestamp, Transport, TransportEvent, reconnect_with_backoff,
    unix_millis,
};

use crate::error::SyncError;
use crate::events::{EventBus, SubscriptionId, SyncEvent};
use crate::intent::{Intent, InventoryChange};
use crate::monitor::{NetworkMetrics, NetworkMonitor, NetworkQuality};
use crate::prediction::PredictionStore;
use crate::processor::{AppliedEvent, BatchProcessor, TickReport};
use crate::reconciliation::{reconcile, resync};
use crate::state::{ConfirmedState, WriteOutcome};

/// Local player's role in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Game master.
    Gm,
    /// Regular player.
    Player,
}

/// The room this client is in.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Room descriptor, kept current with joins and leaves.
    pub room: RoomInfo,
    /// The local player.
    pub player: PlayerInfo,
    /// Derived role.
    pub role: Role,
}

#[derive(Debug, Clone, Copy)]
struct Cadence {
    frame: Duration,
    probe: Duration,
    report: Duration,
    expiry: Duration,
}

/// Client-side synchronization over an injected transport.
pub struct SyncClient<T: Transport> {
    transport: T,
    confirmed: ConfirmedState,
    predictions: PredictionStore,
    processor: BatchProcessor,
    monitor: NetworkMonitor,
    bus: EventBus,
    session: Option<Session>,
    last_room: Option<String>,
    stale: bool,
    cadence: Cadence,
    traffic_since: Instant,
}

impl<T: Transport> SyncClient<T> {
    /// Facade over `transport`, configured from `config`.
    pub fn new(transport: T, config: &Config) -> Self {
        let probe_timeout = config.monitor.probe_timeout();
        Self {
            transport,
            confirmed: ConfirmedState::new(),
            predictions: PredictionStore::new(config.sync.max_pending_inputs),
            processor: BatchProcessor::new(config.sync.chunk_size),
            monitor: NetworkMonitor::new(&config.monitor),
            bus: EventBus::default(),
            session: None,
            last_room: None,
            stale: true,
            cadence: Cadence {
                frame: config.sync.frame_interval(),
                probe: config.monitor.probe_interval(),
                report: config.monitor.report_interval(),
                expiry: (probe_timeout / 2).max(Duration::from_millis(100)),
            },
            traffic_since: Instant::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Confirmed state with predictions overlaid.
    pub fn current_state(&self) -> GameState {
        self.predictions.view(self.confirmed.snapshot())
    }

    /// Server-confirmed state only.
    pub fn confirmed(&self) -> &ConfirmedState {
        &self.confirmed
    }

    /// Outstanding predictions.
    pub fn predictions(&self) -> &PredictionStore {
        &self.predictions
    }

    /// Current link metrics.
    pub fn metrics(&self) -> &NetworkMetrics {
        self.monitor.metrics()
    }

    /// Current quality tier.
    pub fn quality(&self) -> NetworkQuality {
        self.monitor.quality()
    }

    /// Room session, once created or joined.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Local role, if in a room.
    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role)
    }

    /// Whether confirmed state may be outdated (after a disconnect, until the
    /// next full sync).
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Events waiting to be applied.
    pub fn queued_events(&self) -> usize {
        self.processor.queued()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, for reconnecting.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Id of the most recent room, kept across disconnects.
    pub fn last_room_id(&self) -> Option<&str> {
        self.last_room.as_deref()
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Receive every notification.
    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SyncEvent) + Send + 'static,
    {
        self.bus.all.subscribe(handler)
    }

    /// Stop a handler registered with [`SyncClient::subscribe`].
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.all.unsubscribe(id)
    }

    /// The typed topics.
    pub fn events(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// Ask the server for a new room with the local player as game master.
    pub fn create_room(&mut self, room_name: &str, gm_name: &str, password: &str) -> Result<(), SyncError> {
        self.send(ClientMessage::CreateRoom(CreateRoom {
            room_name: room_name.to_string(),
            gm_name: gm_name.to_string(),
            password: password.to_string(),
            player_color: None,
        }))
    }

    /// Ask to join an existing room.
    pub fn join_room(&mut self, room_id: &str, player_name: &str, password: &str) -> Result<(), SyncError> {
        self.send(ClientMessage::JoinRoom(JoinRoom {
            room_id: room_id.to_string(),
            player_name: player_name.to_string(),
            password: password.to_string(),
            player_color: None,
        }))
    }

    /// Join the most recent room again after a reconnect. Returns `false`
    /// when there is no room to go back to.
    pub fn rejoin(&mut self, player_name: &str, password: &str) -> Result<bool, SyncError> {
        let Some(room_id) = self.last_room.clone() else {
            return Ok(false);
        };
        info!(room = %room_id, "rejoining room");
        self.join_room(&room_id, player_name, password)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Move a token.
    pub fn move_entity(
        &mut self,
        token_id: impl Into<EntityId>,
        position: Position,
        is_dragging: bool,
    ) -> Result<Sequence, SyncError> {
        self.act(Intent::MoveToken {
            token_id: token_id.into(),
            position,
            is_dragging,
            velocity: None,
        })
    }

    /// Change character sheet fields.
    pub fn update_character(
        &mut self,
        character_id: impl Into<EntityId>,
        updates: Record,
    ) -> Result<Sequence, SyncError> {
        self.act(Intent::UpdateCharacter {
            character_id: character_id.into(),
            updates,
        })
    }

    /// Edit a player's inventory.
    pub fn update_inventory(
        &mut self,
        player_id: impl Into<String>,
        change: InventoryChange,
    ) -> Result<Sequence, SyncError> {
        self.act(Intent::UpdateInventory {
            player_id: player_id.into(),
            change,
        })
    }

    /// Edit the encounter. Game master only.
    pub fn update_combat(&mut self, updates: Record) -> Result<Sequence, SyncError> {
        self.act(Intent::UpdateCombat { updates })
    }

    /// Post a chat message.
    pub fn send_message(&mut self, message: impl Into<String>) -> Result<Sequence, SyncError> {
        let (player_id, player_name) = self
            .session
            .as_ref()
            .map(|s| (s.player.id.clone(), s.player.name.clone()))
            .unwrap_or_default();
        self.act(Intent::Chat {
            message: message.into(),
            player_id,
            player_name,
        })
    }

    /// Overlay fields locally without telling the server. Works offline.
    /// The patch is dropped by the next full sync, or by a correction that
    /// reports a later sequence as processed.
    pub fn patch_local(
        &mut self,
        category: Category,
        entity_id: impl Into<EntityId>,
        fields: Record,
    ) -> Result<Sequence, SyncError> {
        self.act(Intent::Patch {
            category,
            entity_id: entity_id.into(),
            fields,
        })
    }

    fn act(&mut self, intent: Intent) -> Result<Sequence, SyncError> {
        if intent.requires_gm() && self.role() != Some(Role::Gm) {
            return Err(SyncError::Unauthorized {
                action: intent.action(),
            });
        }
        if !intent.is_local() && !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let now = unix_millis();
        let sequence = self
            .predictions
            .predict_intent(intent.clone(), self.confirmed.snapshot(), now);
        let (category, entity_id) = intent.target(sequence);

        if let Some(message) = intent.to_message(sequence, now)
            && let Err(e) = self.transport.send(message)
        {
            self.predictions.confirm(sequence);
            warn!(sequence, error = %e, "send failed, prediction withdrawn");
            return Err(e.into());
        }

        debug!(sequence, action = intent.action(), "predicted");
        self.bus.publish(SyncEvent::Predicted {
            sequence,
            category,
            entity_id,
        });
        Ok(sequence)
    }

    fn send(&mut self, message: ClientMessage) -> Result<(), SyncError> {
        if !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.transport.send(message)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Route one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { addr } => {
                info!(%addr, "connected");
                self.traffic_since = Instant::now();
                self.bus.publish(SyncEvent::Connected { addr });
            }
            TransportEvent::Message(message) => self.handle_server_message(message),
            TransportEvent::Error(e) => {
                warn!(error = %e, "transport error");
                self.bus.publish(SyncEvent::TransportError(e));
            }
            TransportEvent::ConnectFailed(e) => {
                warn!(error = %e, "connect failed");
                self.bus.publish(SyncEvent::TransportError(e));
            }
            TransportEvent::Disconnected { reason } => self.on_disconnect(reason),
        }
    }

    fn on_disconnect(&mut self, reason: String) {
        info!(%reason, "disconnected");
        self.session = None;
        self.predictions.clear();
        self.processor.clear();
        self.monitor.reset_probes();
        self.stale = true;
        self.bus.publish(SyncEvent::Disconnected { reason });
    }

    /// Apply one server message.
    pub fn handle_server_message(&mut self, message: ServerMessage) {
        let now = unix_millis();
        let event = match message {
            ServerMessage::RoomCreated(created) => {
                info!(room = %created.room.id, "room created");
                self.last_room = Some(created.room.id.clone());
                self.session = Some(Session {
                    player: created.room.gm.clone(),
                    room: created.room.clone(),
                    role: Role::Gm,
                });
                self.bus.publish(SyncEvent::RoomCreated(created.room));
                return;
            }
            ServerMessage::RoomJoined(joined) => {
                let role = if joined.player.is_gm { Role::Gm } else { Role::Player };
                info!(room = %joined.room.id, player = %joined.player.id, ?role, "room joined");
                self.last_room = Some(joined.room.id.clone());
                self.session = Some(Session {
                    room: joined.room.clone(),
                    player: joined.player.clone(),
                    role,
                });
                for entry in joined.chat_history {
                    let event = GameEvent::ChatMessage(vtt_net::ChatBroadcast { message: entry });
                    self.processor.apply_direct(&mut self.confirmed, event, now);
                }
                self.bus.publish(SyncEvent::RoomJoined {
                    room: joined.room,
                    player: joined.player,
                });
                return;
            }
            ServerMessage::PlayerJoined(presence) => {
                if let Some(session) = self.session.as_mut() {
                    session.room.players.retain(|p| p.id != presence.player.id);
                    session.room.players.push(presence.player.clone());
                }
                self.bus.publish(SyncEvent::PlayerJoined(presence.player));
                return;
            }
            ServerMessage::PlayerLeft(presence) => {
                if let Some(session) = self.session.as_mut() {
                    session.room.players.retain(|p| p.id != presence.player.id);
                }
                self.bus.publish(SyncEvent::PlayerLeft(presence.player));
                return;
            }
            ServerMessage::TokenMoved(e) => GameEvent::TokenMoved(e),
            ServerMessage::TokenCreated(e) => GameEvent::TokenCreated(e),
            ServerMessage::CharacterUpdated(e) => GameEvent::CharacterUpdated(e),
            ServerMessage::CharacterMoved(e) => GameEvent::CharacterMoved(e),
            ServerMessage::InventoryChanged(e) => GameEvent::InventoryChanged(e),
            ServerMessage::CombatUpdated(e) => GameEvent::CombatUpdated(e),
            ServerMessage::ChatMessage(e) => GameEvent::ChatMessage(e),
            ServerMessage::ItemDropped(e) => GameEvent::ItemDropped(e),
            ServerMessage::ItemLooted(e) => GameEvent::ItemLooted(e),
            ServerMessage::BatchUpdate(batch) => {
                if let Err(e) = self.processor.enqueue_batch(batch) {
                    warn!(error = %e, "batch dropped");
                }
                return;
            }
            ServerMessage::DeltaUpdate(delta) => {
                match self.processor.apply_delta(&mut self.confirmed, delta) {
                    Ok(()) => self.bus.publish(SyncEvent::DeltaApplied),
                    Err(e) => warn!(error = %e, "delta rejected"),
                }
                return;
            }
            ServerMessage::FullStateSync(sync) => {
                resync(sync.state, &mut self.confirmed, &mut self.predictions);
                self.processor.clear();
                self.stale = false;
                self.bus.publish(SyncEvent::FullSync);
                return;
            }
            ServerMessage::StateCorrection(correction) => {
                let local = self.session.as_ref().map(|s| &s.player);
                let report = reconcile(correction, &mut self.confirmed, &mut self.predictions, local, now);
                self.bus.publish(SyncEvent::StateCorrected(report));
                return;
            }
            ServerMessage::NetworkMetrics(report) => {
                self.monitor.merge_remote(&report, now);
                self.publish_metrics();
                return;
            }
            ServerMessage::Pong(pong) => {
                if self.monitor.on_pong(pong.timestamp, now) {
                    self.publish_metrics();
                }
                return;
            }
            ServerMessage::Error(error) => {
                warn!(message = %error.message, "server error");
                self.bus.publish(SyncEvent::ServerError(error.message));
                return;
            }
        };

        if let Some(applied) = self.processor.apply_direct(&mut self.confirmed, event, now) {
            self.settle(applied);
        }
    }

    /// Clear predictions answered by `applied` and notify.
    fn settle(&mut self, applied: AppliedEvent) {
        let local = self.session.as_ref().map(|s| s.player.id.as_str());
        if local.is_some() && applied.origin() == local {
            match applied.sequence() {
                Some(sequence) => {
                    if self.predictions.confirm(sequence) {
                        self.bus.publish(SyncEvent::Confirmed { sequence });
                    }
                }
                None => {
                    self.predictions
                        .confirm_implicit(applied.category, Some(&applied.entity_id), applied.timestamp);
                }
            }
        }
        if applied.outcome == WriteOutcome::Applied {
            self.bus.publish(SyncEvent::RemoteEvent(applied.event));
        }
    }

    fn publish_metrics(&mut self) {
        self.bus
            .publish(SyncEvent::NetworkMetricsUpdated(self.monitor.metrics().clone()));
        if let Some(change) = self.monitor.refresh_quality() {
            info!(from = %change.from, to = %change.to, "network quality changed");
            self.bus.publish(SyncEvent::QualityChanged(change));
        }
    }

    // -----------------------------------------------------------------------
    // Periodic work
    // -----------------------------------------------------------------------

    /// Apply one chunk of queued events.
    pub fn on_frame(&mut self) -> TickReport {
        let report = self.processor.tick(&mut self.confirmed);
        for applied in report.applied.iter().cloned() {
            self.settle(applied);
        }
        report
    }

    /// Send a latency probe. Returns its timestamp, or `None` when offline.
    pub fn probe(&mut self) -> Option<Timestamp> {
        if !self.transport.is_connected() {
            return None;
        }
        let stamp = self.monitor.begin_probe(unix_millis());
        if let Err(e) = self.transport.send(ClientMessage::Ping(Ping { timestamp: stamp })) {
            debug!(error = %e, "probe not sent");
        }
        Some(stamp)
    }

    /// Count overdue probes as lost.
    pub fn expire_probes(&mut self) -> usize {
        let expired = self.monitor.expire_probes(unix_millis());
        if expired > 0 {
            self.publish_metrics();
        }
        expired
    }

    /// Fold traffic into the bandwidth estimate and report metrics upstream.
    pub fn report_metrics(&mut self) {
        let elapsed = self.traffic_since.elapsed();
        self.traffic_since = Instant::now();
        if let Some(traffic) = self.transport.take_traffic()
            && self.monitor.record_bandwidth(&traffic, elapsed)
        {
            self.publish_metrics();
        }
        if self.transport.is_connected()
            && let Err(e) = self.transport.send(ClientMessage::NetworkMetrics(self.monitor.report()))
        {
            debug!(error = %e, "metrics report not sent");
        }
    }

    /// Drive the client until the link drops or `events` closes.
    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) {
        let ticker = |period: Duration| {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        };
        let mut frame = ticker(self.cadence.frame);
        let mut probe = ticker(self.cadence.probe);
        let mut report = ticker(self.cadence.report);
        let mut expiry = ticker(self.cadence.expiry);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("transport event channel closed");
                        break;
                    };
                    let down = matches!(event, TransportEvent::Disconnected { .. });
                    self.handle_transport_event(event);
                    if down {
                        break;
                    }
                }
                _ = frame.tick() => {
                    self.on_frame();
                }
                _ = probe.tick() => {
                    self.probe();
                }
                _ = report.tick() => {
                    self.report_metrics();
                }
                _ = expiry.tick() => {
                    self.expire_probes();
                }
            }
        }
    }

    /// Close the transport.
    pub fn close(&mut self) {
        self.transport.close();
    }
}

impl SyncClient<TcpTransport> {
    /// Re-establish a dropped link, backing off between attempts. Returns
    /// the attempts it took.
    ///
    /// Confirmed state stays stale until the server sends a full sync, which
    /// it does once the room is joined again (see [`SyncClient::rejoin`]).
    pub async fn reconnect<A>(&mut self, addr: A, config: ReconnectConfig) -> Result<u32, ReconnectError>
    where
        A: ToSocketAddrs + Clone,
    {
        reconnect_with_backoff(&mut self.transport, addr, config).await
    }
}
