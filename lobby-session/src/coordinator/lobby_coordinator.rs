/// Lobby session coordinator
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::time::{Instant, Sleep};

use super::builder::CoordinatorBuilder;
use super::state::{SessionState, StepResult};
use crate::avatar::{Avatar, AvatarCache};
use crate::config::CoordinatorConfig;
use crate::error::{LobbyError, Result};
use crate::frontend::MenuFrontend;
use crate::matchmaking::{LobbyEvent, MatchmakingClient};
use crate::metadata::{
    self, LobbyFlags, GAME_STARTED_KEY, HOST_ADDRESS_KEY, LOBBY_CLOSING_KEY, LOBBY_NAME_KEY,
    RETURN_TO_MENU_KEY,
};
use crate::roster::{AvatarRequest, Roster, SlotView};
use crate::transport::{SessionTransport, TransportEvent, TransportStats};
use crate::types::{LobbyId, MemberId, Role, SceneRef, Visibility};

/// Commands that can be sent to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyCommand {
    /// Create a lobby (configured visibility when None)
    CreateLobby(Option<Visibility>),
    /// Join a lobby by id
    JoinLobby(LobbyId),
    /// Start (or enter) the game session; lobby owner only
    StartGame,
    /// Send everyone back to the menu; lobby owner only
    ExitToMenu,
    /// Announce the lobby is closing, then tear it down; lobby owner only
    HostCloseLobby,
    /// Leave for good, handing the lobby over when owning it
    ExitGame,
    /// Open the backend invite dialog
    InviteFriend,
    /// Stop the coordinator's run loop
    Stop,
}

impl LobbyCommand {
    fn name(&self) -> &'static str {
        match self {
            LobbyCommand::CreateLobby(_) => "CreateLobby",
            LobbyCommand::JoinLobby(_) => "JoinLobby",
            LobbyCommand::StartGame => "StartGame",
            LobbyCommand::ExitToMenu => "ExitToMenu",
            LobbyCommand::HostCloseLobby => "HostCloseLobby",
            LobbyCommand::ExitGame => "ExitGame",
            LobbyCommand::InviteFriend => "InviteFriend",
            LobbyCommand::Stop => "Stop",
        }
    }
}

type AvatarFetch = BoxFuture<'static, (AvatarRequest, Option<Avatar>)>;

async fn recv_or_pending<T>(
    rx: Option<&flume::Receiver<T>>,
) -> std::result::Result<T, flume::RecvError> {
    match rx {
        Some(rx) => rx.recv_async().await,
        None => futures::future::pending().await,
    }
}

/// Stop whichever transport role is active
async fn stop_transport(transport: &dyn SessionTransport) {
    if transport.is_host_active() {
        transport.stop_host().await;
    }
    if transport.is_client_active() {
        transport.stop_client().await;
    }
}

async fn timer_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => futures::future::pending().await,
    }
}

/// Translates matchmaking and transport events into the session state machine
///
/// The coordinator is the only component issuing transport commands. Every
/// decision re-reads lobby ownership and metadata from the backend instead of
/// trusting values cached from an earlier notification.
///
/// Drive it with [`step`](Self::step) in a loop, or with
/// [`process_pending`](Self::process_pending) to handle what is already queued.
pub struct LobbyCoordinator {
    /// Local member identity
    local: MemberId,

    config: CoordinatorConfig,

    matchmaking: Arc<dyn MatchmakingClient>,
    transport: Arc<dyn SessionTransport>,
    frontend: Arc<dyn MenuFrontend>,

    state: SessionState,

    /// Lobby this member is affiliated with
    lobby: Option<LobbyId>,

    current_scene: Option<SceneRef>,

    roster: Roster,
    avatars: AvatarCache,
    pending_avatars: FuturesUnordered<AvatarFetch>,

    /// Set whenever the roster changes; consumed when computing a step result
    roster_dirty: bool,

    /// HostCloseLobby grace period
    close_timer: Option<Pin<Box<Sleep>>>,

    lobby_rx: Option<flume::Receiver<LobbyEvent>>,
    transport_rx: Option<flume::Receiver<TransportEvent>>,

    command_tx: flume::Sender<LobbyCommand>,
    command_rx: flume::Receiver<LobbyCommand>,
}

impl std::fmt::Debug for LobbyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyCoordinator")
            .field("local", &self.local)
            .field("state", &self.state)
            .field("lobby", &self.lobby)
            .field("current_scene", &self.current_scene)
            .finish()
    }
}

impl LobbyCoordinator {
    /// Start building a coordinator over its three collaborators
    pub fn builder(
        matchmaking: Arc<dyn MatchmakingClient>,
        transport: Arc<dyn SessionTransport>,
        frontend: Arc<dyn MenuFrontend>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(matchmaking, transport, frontend)
    }

    pub(crate) fn new_internal(
        config: CoordinatorConfig,
        matchmaking: Arc<dyn MatchmakingClient>,
        transport: Arc<dyn SessionTransport>,
        frontend: Arc<dyn MenuFrontend>,
    ) -> Self {
        let local = matchmaking.local_member();
        let lobby_rx = matchmaking.subscribe();
        let transport_rx = transport.subscribe();
        let (command_tx, command_rx) = flume::unbounded();
        let roster = Roster::new(config.max_players, config.invite_label.clone());

        tracing::info!("Coordinator '{}' initialized", local);

        let mut coordinator = Self {
            local,
            config,
            matchmaking,
            transport,
            frontend,
            state: SessionState::Idle,
            lobby: None,
            current_scene: None,
            roster,
            avatars: AvatarCache::new(),
            pending_avatars: FuturesUnordered::new(),
            roster_dirty: false,
            close_timer: None,
            lobby_rx: Some(lobby_rx),
            transport_rx: Some(transport_rx),
            command_tx,
            command_rx,
        };
        coordinator.refresh_roster();
        coordinator
    }

    /// Local member id
    pub fn local_member(&self) -> &MemberId {
        &self.local
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get a sender for sending commands to this coordinator
    pub fn sender(&self) -> flume::Sender<LobbyCommand> {
        self.command_tx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Lobby this member is affiliated with
    pub fn lobby_id(&self) -> Option<&LobbyId> {
        self.lobby.as_ref()
    }

    /// Last scene loaded through the frontend
    pub fn current_scene(&self) -> Option<&SceneRef> {
        self.current_scene.as_ref()
    }

    /// Roster slots as shown to the UI
    pub fn roster(&self) -> Vec<SlotView> {
        self.roster.views()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Whether the backend currently reports this member as lobby owner
    pub fn is_lobby_host(&self) -> bool {
        self.lobby.as_ref().is_some_and(|lobby| self.owns(lobby))
    }

    /// Current role, derived from transport state and lobby ownership
    pub fn role(&self) -> Role {
        if self.transport.is_host_active() || self.is_lobby_host() {
            Role::Host
        } else if self.transport.is_client_active() || self.lobby.is_some() {
            Role::Client
        } else {
            Role::Unaffiliated
        }
    }

    /// Load the offline scene (shows the menu and the roster)
    pub fn open_menu(&mut self) {
        let scene = self.config.offline_scene.clone();
        self.enter_scene(scene);
    }

    pub async fn create_lobby(&mut self, visibility: Option<Visibility>) -> Option<StepResult> {
        self.handle_command(LobbyCommand::CreateLobby(visibility)).await
    }

    pub async fn join_lobby(&mut self, lobby: LobbyId) -> Option<StepResult> {
        self.handle_command(LobbyCommand::JoinLobby(lobby)).await
    }

    pub async fn start_game(&mut self) -> Option<StepResult> {
        self.handle_command(LobbyCommand::StartGame).await
    }

    pub async fn exit_to_menu(&mut self) -> Option<StepResult> {
        self.handle_command(LobbyCommand::ExitToMenu).await
    }

    pub async fn host_close_lobby(&mut self) -> Option<StepResult> {
        self.handle_command(LobbyCommand::HostCloseLobby).await
    }

    pub async fn exit_game(&mut self) -> Option<StepResult> {
        self.handle_command(LobbyCommand::ExitGame).await
    }

    pub async fn invite_friend(&mut self) -> Option<StepResult> {
        self.handle_command(LobbyCommand::InviteFriend).await
    }

    /// Release subscriptions, leave the lobby and stop the transport
    pub async fn close(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        if let Some(lobby) = self.lobby.take() {
            self.matchmaking.leave_lobby(&lobby);
        }
        self.shutdown().await;
    }

    /// Execute one step of the coordinator
    ///
    /// Waits for the next command, lobby notification, transport event, avatar
    /// completion or close timer and handles it. Returns when the state or the
    /// roster changed, when the step timeout elapses, or on stop.
    pub async fn step(&mut self) -> StepResult {
        if self.state == SessionState::Stopped {
            return StepResult::Stop;
        }

        let timeout = tokio::time::sleep(Duration::from_millis(self.config.step_timeout_ms));
        tokio::pin!(timeout);

        loop {
            let fetching = !self.pending_avatars.is_empty();
            let outcome = tokio::select! {
                () = &mut timeout => return StepResult::Timeout,
                () = timer_elapsed(&mut self.close_timer) => {
                    self.close_timer = None;
                    self.on_close_timer().await
                }
                command = self.command_rx.recv_async() => match command {
                    Ok(command) => self.handle_command(command).await,
                    Err(_) => None,
                },
                event = recv_or_pending(self.lobby_rx.as_ref()) => match event {
                    Ok(event) => self.handle_lobby_event(event).await,
                    Err(_) => {
                        tracing::warn!("Coordinator '{}' lobby notifications closed", self.local);
                        self.lobby_rx = None;
                        None
                    }
                },
                event = recv_or_pending(self.transport_rx.as_ref()) => match event {
                    Ok(event) => self.handle_transport_event(event).await,
                    Err(_) => {
                        tracing::warn!("Coordinator '{}' transport events closed", self.local);
                        self.transport_rx = None;
                        None
                    }
                },
                Some((request, avatar)) = self.pending_avatars.next(), if fetching => {
                    self.on_avatar(request, avatar)
                }
            };
            if let Some(result) = outcome {
                return result;
            }
        }
    }

    /// Handle everything that is already queued without waiting
    pub async fn process_pending(&mut self) -> Vec<StepResult> {
        let mut results = Vec::new();
        loop {
            if self.state == SessionState::Stopped {
                break;
            }
            let mut progressed = false;

            while let Ok(command) = self.command_rx.try_recv() {
                progressed = true;
                results.extend(self.handle_command(command).await);
            }
            if let Some(rx) = self.lobby_rx.clone() {
                while let Ok(event) = rx.try_recv() {
                    progressed = true;
                    results.extend(self.handle_lobby_event(event).await);
                }
            }
            if let Some(rx) = self.transport_rx.clone() {
                while let Ok(event) = rx.try_recv() {
                    progressed = true;
                    results.extend(self.handle_transport_event(event).await);
                }
            }
            while let Some(Some((request, avatar))) = self.pending_avatars.next().now_or_never() {
                progressed = true;
                results.extend(self.on_avatar(request, avatar));
            }
            let timer_due = self
                .close_timer
                .as_ref()
                .is_some_and(|sleep| sleep.deadline() <= Instant::now());
            if timer_due {
                progressed = true;
                self.close_timer = None;
                results.extend(self.on_close_timer().await);
            }

            if !progressed {
                break;
            }
        }
        results
    }

    fn begin(&mut self) -> SessionState {
        self.roster_dirty = false;
        self.state
    }

    fn outcome(&mut self, before: SessionState) -> Option<StepResult> {
        let roster_changed = std::mem::take(&mut self.roster_dirty);
        if self.state != before {
            Some(StepResult::StateChanged {
                from: before,
                to: self.state,
            })
        } else if roster_changed {
            Some(StepResult::RosterUpdated)
        } else {
            None
        }
    }

    fn report(&self, action: &str, error: LobbyError) {
        if error.is_benign() {
            tracing::warn!("Coordinator '{}' {} skipped: {}", self.local, action, error);
        } else {
            tracing::error!("Coordinator '{}' {} failed: {}", self.local, action, error);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::info!("Coordinator '{}' {} -> {}", self.local, self.state, state);
            self.state = state;
        }
    }

    fn owns(&self, lobby: &LobbyId) -> bool {
        self.matchmaking.lobby_owner(lobby).as_ref() == Some(&self.local)
    }

    async fn handle_command(&mut self, command: LobbyCommand) -> Option<StepResult> {
        if self.state == SessionState::Stopped {
            return Some(StepResult::Stop);
        }
        let before = self.begin();
        tracing::info!("Coordinator '{}' received {}", self.local, command.name());

        if self.state == SessionState::Closing
            && !matches!(command, LobbyCommand::ExitGame | LobbyCommand::Stop)
        {
            tracing::warn!(
                "Coordinator '{}' ignoring {} while closing the lobby",
                self.local,
                command.name()
            );
            return None;
        }

        let name = command.name();
        let result = match command {
            LobbyCommand::CreateLobby(visibility) => self.request_lobby(visibility),
            LobbyCommand::JoinLobby(lobby) => self.join(lobby).await,
            LobbyCommand::StartGame => self.start().await,
            LobbyCommand::ExitToMenu => self.return_to_menu().await,
            LobbyCommand::HostCloseLobby => self.begin_close().await,
            LobbyCommand::ExitGame => {
                self.exit().await;
                Ok(())
            }
            LobbyCommand::InviteFriend => self.open_invite(),
            LobbyCommand::Stop => {
                self.close().await;
                return Some(StepResult::Stop);
            }
        };
        if let Err(e) = result {
            self.report(name, e);
        }
        self.outcome(before)
    }

    async fn handle_lobby_event(&mut self, event: LobbyEvent) -> Option<StepResult> {
        if self.state == SessionState::Stopped {
            return None;
        }
        let before = self.begin();
        tracing::debug!("Coordinator '{}' lobby event {:?}", self.local, event);

        let result = match &event {
            LobbyEvent::LobbyCreated(lobby) => self.on_lobby_created(lobby),
            LobbyEvent::LobbyCreateFailed(reason) => {
                tracing::warn!("Coordinator '{}' lobby creation failed: {}", self.local, reason);
                Ok(())
            }
            LobbyEvent::JoinRequested(lobby) => self.join(lobby.clone()).await,
            LobbyEvent::LobbyEntered(lobby) => self.on_lobby_entered(lobby).await,
            LobbyEvent::MembersChanged(lobby) => self.on_lobby_update(lobby, true).await,
            LobbyEvent::MetadataChanged(lobby) => self.on_lobby_update(lobby, false).await,
        };
        if let Err(e) = result {
            self.report(&format!("handling {:?}", event), e);
        }
        self.outcome(before)
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Option<StepResult> {
        if self.state == SessionState::Stopped {
            return None;
        }
        let before = self.begin();
        tracing::debug!("Coordinator '{}' transport event {:?}", self.local, event);

        match event {
            TransportEvent::SceneChanged(scene) => {
                if self.transport.is_client_active() {
                    self.enter_scene(scene);
                } else {
                    tracing::debug!(
                        "Coordinator '{}' ignoring scene change '{}' without a client session",
                        self.local,
                        scene
                    );
                }
            }
            TransportEvent::HostLost => self.on_host_lost().await,
        }
        self.outcome(before)
    }

    fn on_avatar(&mut self, request: AvatarRequest, avatar: Option<Avatar>) -> Option<StepResult> {
        if self.state == SessionState::Stopped {
            return None;
        }
        let before = self.begin();
        if avatar.is_none() {
            tracing::debug!("Coordinator '{}' got no avatar for '{}'", self.local, request.member);
        }
        self.avatars.finish_fetch(&request.member, avatar);
        if self.roster.apply_avatar(&request, &self.avatars) {
            self.roster_changed();
        }
        self.outcome(before)
    }

    async fn on_close_timer(&mut self) -> Option<StepResult> {
        let before = self.begin();
        self.finish_close().await;
        self.outcome(before)
    }

    fn request_lobby(&mut self, visibility: Option<Visibility>) -> Result<()> {
        if let Some(lobby) = &self.lobby {
            return Err(LobbyError::AlreadyInLobby(lobby.clone()));
        }
        if !self.matchmaking.is_ready() {
            return Err(LobbyError::BackendUnavailable);
        }
        let visibility = visibility.unwrap_or(self.config.visibility);
        self.matchmaking
            .create_lobby(visibility, self.config.max_players)?;
        tracing::info!(
            "Coordinator '{}' requested a {:?} lobby for {} players",
            self.local,
            visibility,
            self.config.max_players
        );
        Ok(())
    }

    /// Join `lobby`, leaving the current one first
    async fn join(&mut self, lobby: LobbyId) -> Result<()> {
        if self.state == SessionState::Closing {
            tracing::warn!(
                "Coordinator '{}' ignoring join of lobby '{}' while closing the lobby",
                self.local,
                lobby
            );
            return Ok(());
        }
        if self.lobby.as_ref() == Some(&lobby) {
            return Err(LobbyError::AlreadyInLobby(lobby));
        }
        if !self.matchmaking.is_ready() {
            return Err(LobbyError::BackendUnavailable);
        }
        if let Some(current) = self.lobby.take() {
            tracing::info!(
                "Coordinator '{}' leaving lobby '{}' to join '{}'",
                self.local,
                current,
                lobby
            );
            self.matchmaking.leave_lobby(&current);
            stop_transport(self.transport.as_ref()).await;
            self.set_state(SessionState::Idle);
            self.refresh_roster();
        } else if self.transport.is_host_active() || self.transport.is_client_active() {
            stop_transport(self.transport.as_ref()).await;
            self.set_state(SessionState::Idle);
        }
        self.matchmaking.join_lobby(&lobby)?;
        tracing::info!("Coordinator '{}' requested to join lobby '{}'", self.local, lobby);
        Ok(())
    }

    fn on_lobby_created(&mut self, lobby: &LobbyId) -> Result<()> {
        tracing::info!("Coordinator '{}' created lobby '{}'", self.local, lobby);
        self.lobby = Some(lobby.clone());

        let hosting = self.transport.is_host_active();
        let persona = self.matchmaking.member_name(&self.local);
        // Joiners find the host through this key, so it goes first
        self.matchmaking
            .set_metadata(lobby, HOST_ADDRESS_KEY, self.local.as_str())?;
        self.matchmaking
            .set_metadata(lobby, LOBBY_NAME_KEY, &format!("{}'s lobby", persona))?;
        self.matchmaking
            .set_metadata(lobby, GAME_STARTED_KEY, metadata::flag(hosting))?;
        self.matchmaking
            .set_metadata(lobby, RETURN_TO_MENU_KEY, metadata::flag(false))?;

        self.set_state(if hosting {
            SessionState::HostActive
        } else {
            SessionState::LobbyOwner
        });
        self.refresh_roster();
        Ok(())
    }

    async fn on_lobby_entered(&mut self, lobby: &LobbyId) -> Result<()> {
        self.lobby = Some(lobby.clone());
        self.refresh_roster();

        if self.owns(lobby) {
            if !self.transport.is_host_active() {
                self.set_state(SessionState::LobbyOwner);
            }
            return Ok(());
        }
        tracing::info!("Coordinator '{}' entered lobby '{}'", self.local, lobby);
        if !self.transport.is_client_active() {
            self.set_state(SessionState::LobbyMember);
        }
        self.sync_with_lobby(lobby).await
    }

    async fn on_lobby_update(&mut self, lobby: &LobbyId, members_changed: bool) -> Result<()> {
        if self.lobby.as_ref() != Some(lobby) {
            tracing::debug!(
                "Coordinator '{}' ignoring update of lobby '{}'",
                self.local,
                lobby
            );
            return Ok(());
        }
        if members_changed {
            self.refresh_roster();
        }
        self.sync_with_lobby(lobby).await
    }

    /// Act on the lobby's current metadata and ownership
    async fn sync_with_lobby(&mut self, lobby: &LobbyId) -> Result<()> {
        if self.state == SessionState::Closing {
            return Ok(());
        }
        let flags = LobbyFlags::read(self.matchmaking.as_ref(), lobby);

        if flags.closing {
            tracing::info!("Coordinator '{}' lobby '{}' is closing", self.local, lobby);
            let scene = self.config.bootstrap_scene.clone();
            self.leave_to(scene).await;
            return Ok(());
        }
        if flags.return_to_menu {
            tracing::info!("Coordinator '{}' lobby '{}' returns to menu", self.local, lobby);
            let scene = self.config.offline_scene.clone();
            self.leave_to(scene).await;
            return Ok(());
        }

        if self.owns(lobby) {
            if self.state == SessionState::LobbyMember {
                tracing::info!(
                    "Coordinator '{}' promoted to owner of lobby '{}'",
                    self.local,
                    lobby
                );
                self.set_state(SessionState::LobbyOwner);
            }
            return Ok(());
        }
        if flags.host_address == self.local.as_str() {
            // Never connect to ourselves
            return Ok(());
        }
        if flags.game_started && self.state == SessionState::LobbyMember {
            self.connect_to_host(&flags.host_address).await?;
        }
        Ok(())
    }

    async fn connect_to_host(&mut self, address: &str) -> Result<()> {
        if self.transport.is_client_active() {
            tracing::debug!("Coordinator '{}' already connected", self.local);
            return Ok(());
        }
        let host =
            MemberId::parse(address).map_err(|_| LobbyError::StaleAddress(address.to_string()))?;
        if host == self.local {
            return Ok(());
        }
        if self.transport.is_host_active() {
            tracing::info!("Coordinator '{}' stopping host before connecting", self.local);
            self.transport.stop_host().await;
        }

        self.transport.start_client(host.as_str()).await?;
        tracing::info!("Coordinator '{}' connected to host '{}'", self.local, host);
        self.set_state(SessionState::ClientActive);
        let scene = self.config.online_scene.clone();
        self.enter_scene(scene);
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let online = self.config.online_scene.clone();
        let lobby = self.lobby.clone();

        if let Some(lobby) = &lobby {
            if !self.owns(lobby) {
                return Err(LobbyError::AuthorizationDenied("StartGame".to_string()));
            }
        }

        if self.transport.is_host_active() {
            if self.current_scene.as_ref() == Some(&online) {
                tracing::info!("Coordinator '{}' is already hosting the game", self.local);
                return Ok(());
            }
            self.transport.change_scene(&online).await?;
            self.enter_scene(online);
            return Ok(());
        }

        if self.transport.is_client_active() {
            tracing::info!("Coordinator '{}' stopping client before hosting", self.local);
            self.transport.stop_client().await;
        }

        match &lobby {
            Some(lobby) => {
                // A migrated owner must not advertise the previous host
                self.matchmaking
                    .set_metadata(lobby, HOST_ADDRESS_KEY, self.local.as_str())?;
                self.matchmaking
                    .set_metadata(lobby, RETURN_TO_MENU_KEY, metadata::flag(false))?;
                // GameStarted makes members connect at once, so the host must be up first
                self.transport.start_host().await?;
                self.matchmaking
                    .set_metadata(lobby, GAME_STARTED_KEY, metadata::flag(true))?;
                tracing::info!("Coordinator '{}' started game in lobby '{}'", self.local, lobby);
            }
            None => {
                self.transport.start_host().await?;
                tracing::info!("Coordinator '{}' started an offline session", self.local);
            }
        }
        self.set_state(SessionState::HostActive);

        self.transport.change_scene(&online).await?;
        self.enter_scene(online);
        Ok(())
    }

    async fn return_to_menu(&mut self) -> Result<()> {
        match self.lobby.clone() {
            Some(lobby) => {
                if !self.owns(&lobby) {
                    return Err(LobbyError::AuthorizationDenied("ExitToMenu".to_string()));
                }
                self.matchmaking
                    .set_metadata(&lobby, RETURN_TO_MENU_KEY, metadata::flag(true))?;
                self.matchmaking.leave_lobby(&lobby);
                self.lobby = None;
            }
            None if self.transport.is_host_active() => {}
            None => return Err(LobbyError::NotInLobby("ExitToMenu".to_string())),
        }
        stop_transport(self.transport.as_ref()).await;
        self.set_state(SessionState::Idle);
        self.refresh_roster();
        let scene = self.config.offline_scene.clone();
        self.enter_scene(scene);
        Ok(())
    }

    async fn begin_close(&mut self) -> Result<()> {
        let Some(lobby) = self.lobby.clone() else {
            self.finish_close().await;
            return Ok(());
        };
        if !self.owns(&lobby) {
            return Err(LobbyError::AuthorizationDenied("HostCloseLobby".to_string()));
        }
        self.matchmaking
            .set_metadata(&lobby, LOBBY_CLOSING_KEY, "true")?;
        tracing::info!(
            "Coordinator '{}' closing lobby '{}' in {} ms",
            self.local,
            lobby,
            self.config.close_grace_ms
        );
        self.set_state(SessionState::Closing);
        self.close_timer = Some(Box::pin(tokio::time::sleep(Duration::from_millis(
            self.config.close_grace_ms,
        ))));
        Ok(())
    }

    async fn finish_close(&mut self) {
        self.close_timer = None;
        if let Some(lobby) = self.lobby.take() {
            self.matchmaking.leave_lobby(&lobby);
        }
        stop_transport(self.transport.as_ref()).await;
        self.set_state(SessionState::Idle);
        self.refresh_roster();
        let scene = self.config.bootstrap_scene.clone();
        self.enter_scene(scene);
    }

    async fn exit(&mut self) {
        if let Some(lobby) = self.lobby.take() {
            if self.owns(&lobby) {
                self.hand_over(&lobby);
            }
            self.matchmaking.leave_lobby(&lobby);
        }
        self.shutdown().await;
        self.frontend.quit();
    }

    /// Pass ownership to the first remaining member that the backend accepts
    fn hand_over(&self, lobby: &LobbyId) {
        let candidates: Vec<MemberId> = self
            .matchmaking
            .members(lobby)
            .into_iter()
            .filter(|member| member != &self.local)
            .collect();
        if candidates.is_empty() {
            tracing::info!(
                "Coordinator '{}' is alone in lobby '{}', closing it",
                self.local,
                lobby
            );
            return;
        }
        for candidate in &candidates {
            match self.matchmaking.set_lobby_owner(lobby, candidate) {
                Ok(()) => {
                    tracing::info!(
                        "Coordinator '{}' handed lobby '{}' over to '{}'",
                        self.local,
                        lobby,
                        candidate
                    );
                    return;
                }
                Err(e) => tracing::warn!(
                    "Coordinator '{}' could not hand lobby '{}' to '{}': {}",
                    self.local,
                    lobby,
                    candidate,
                    e
                ),
            }
        }
        tracing::warn!(
            "Coordinator '{}' found no successor for lobby '{}', leaving anyway",
            self.local,
            lobby
        );
    }

    fn open_invite(&self) -> Result<()> {
        let lobby = self
            .lobby
            .as_ref()
            .ok_or_else(|| LobbyError::NotInLobby("InviteFriend".to_string()))?;
        self.matchmaking.open_invite_dialog(lobby);
        Ok(())
    }

    async fn on_host_lost(&mut self) {
        if !self.transport.is_client_active() {
            tracing::debug!("Coordinator '{}' ignoring host loss without a client", self.local);
            return;
        }
        tracing::warn!("Coordinator '{}' lost its host", self.local);
        self.transport.stop_client().await;

        let next = match &self.lobby {
            Some(lobby) if self.owns(lobby) => SessionState::LobbyOwner,
            Some(_) => SessionState::LobbyMember,
            None => SessionState::Idle,
        };
        self.set_state(next);
        let scene = self.config.offline_scene.clone();
        self.enter_scene(scene);
    }

    /// Stop transport, leave the lobby and load `scene`
    async fn leave_to(&mut self, scene: SceneRef) {
        stop_transport(self.transport.as_ref()).await;
        if let Some(lobby) = self.lobby.take() {
            self.matchmaking.leave_lobby(&lobby);
        }
        self.set_state(SessionState::Idle);
        self.refresh_roster();
        self.enter_scene(scene);
    }

    async fn shutdown(&mut self) {
        stop_transport(self.transport.as_ref()).await;
        self.close_timer = None;
        self.pending_avatars = FuturesUnordered::new();
        self.avatars.cancel_fetches();
        self.lobby_rx = None;
        self.transport_rx = None;
        self.set_state(SessionState::Stopped);
    }

    fn enter_scene(&mut self, scene: SceneRef) {
        tracing::debug!("Coordinator '{}' loading scene '{}'", self.local, scene);
        self.frontend.load_scene(&scene);
        if scene == self.config.offline_scene {
            self.frontend.show_menu();
            self.frontend.roster_changed(&self.roster.views());
        } else if scene == self.config.online_scene {
            self.frontend.hide_menu();
        }
        self.current_scene = Some(scene);
    }

    fn refresh_roster(&mut self) {
        let matchmaking = self.matchmaking.clone();
        let name_of = |member: &MemberId| matchmaking.member_name(member);
        let requests = match &self.lobby {
            Some(lobby) => {
                let members = self.matchmaking.members(lobby);
                self.roster
                    .refresh(&self.local, &members, name_of, &mut self.avatars)
            }
            None => self.roster.reset(&self.local, name_of, &mut self.avatars),
        };
        for request in requests {
            tracing::debug!(
                "Coordinator '{}' fetching avatar of '{}'",
                self.local,
                request.member
            );
            let fetch = self.matchmaking.fetch_avatar(&request.member);
            self.pending_avatars
                .push(async move { (request, fetch.await) }.boxed());
        }
        self.roster_changed();
    }

    fn roster_changed(&mut self) {
        self.roster_dirty = true;
        self.frontend.roster_changed(&self.roster.views());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::matchmaking::{LocalLobbyService, LocalMatchmaking};
    use crate::roster::SlotAvatar;
    use crate::transport::{LocalNetwork, LocalTransport};

    /// Records every frontend call; optionally samples `GameStarted` on scene loads
    #[derive(Default)]
    struct RecordingFrontend {
        calls: Mutex<Vec<String>>,
        slots: Mutex<Vec<SlotView>>,
        watch_lobby: Mutex<Option<(LocalMatchmaking, LobbyId)>>,
        game_started_at_load: Mutex<Vec<String>>,
    }

    impl RecordingFrontend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn scenes(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| call.strip_prefix("load ").map(str::to_string))
                .collect()
        }

        fn last_scene(&self) -> Option<String> {
            self.scenes().pop()
        }
    }

    impl MenuFrontend for RecordingFrontend {
        fn show_menu(&self) {
            self.calls.lock().unwrap().push("show_menu".to_string());
        }

        fn hide_menu(&self) {
            self.calls.lock().unwrap().push("hide_menu".to_string());
        }

        fn load_scene(&self, scene: &SceneRef) {
            if let Some((matchmaking, lobby)) = &*self.watch_lobby.lock().unwrap() {
                self.game_started_at_load
                    .lock()
                    .unwrap()
                    .push(matchmaking.metadata(lobby, GAME_STARTED_KEY));
            }
            self.calls.lock().unwrap().push(format!("load {}", scene));
        }

        fn roster_changed(&self, slots: &[SlotView]) {
            *self.slots.lock().unwrap() = slots.to_vec();
        }

        fn quit(&self) {
            self.calls.lock().unwrap().push("quit".to_string());
        }
    }

    struct Member {
        coordinator: LobbyCoordinator,
        matchmaking: LocalMatchmaking,
        transport: Arc<LocalTransport>,
        frontend: Arc<RecordingFrontend>,
    }

    impl Member {
        fn id(&self) -> MemberId {
            self.matchmaking.local_member()
        }
    }

    /// Backend client whose ownership transfers to some members are refused
    struct PickyMatchmaking {
        inner: LocalMatchmaking,
        refused: Arc<Mutex<Vec<MemberId>>>,
    }

    impl MatchmakingClient for PickyMatchmaking {
        fn is_ready(&self) -> bool {
            self.inner.is_ready()
        }

        fn local_member(&self) -> MemberId {
            self.inner.local_member()
        }

        fn create_lobby(&self, visibility: Visibility, max_members: usize) -> Result<()> {
            self.inner.create_lobby(visibility, max_members)
        }

        fn join_lobby(&self, lobby: &LobbyId) -> Result<()> {
            self.inner.join_lobby(lobby)
        }

        fn leave_lobby(&self, lobby: &LobbyId) {
            self.inner.leave_lobby(lobby)
        }

        fn lobby_owner(&self, lobby: &LobbyId) -> Option<MemberId> {
            self.inner.lobby_owner(lobby)
        }

        fn set_lobby_owner(&self, lobby: &LobbyId, member: &MemberId) -> Result<()> {
            if self.refused.lock().unwrap().contains(member) {
                return Err(LobbyError::MemberNotInLobby(member.clone()));
            }
            self.inner.set_lobby_owner(lobby, member)
        }

        fn set_metadata(&self, lobby: &LobbyId, key: &str, value: &str) -> Result<()> {
            self.inner.set_metadata(lobby, key, value)
        }

        fn metadata(&self, lobby: &LobbyId, key: &str) -> String {
            self.inner.metadata(lobby, key)
        }

        fn members(&self, lobby: &LobbyId) -> Vec<MemberId> {
            self.inner.members(lobby)
        }

        fn member_name(&self, member: &MemberId) -> String {
            self.inner.member_name(member)
        }

        fn fetch_avatar(&self, member: &MemberId) -> BoxFuture<'static, Option<Avatar>> {
            self.inner.fetch_avatar(member)
        }

        fn open_invite_dialog(&self, lobby: &LobbyId) {
            self.inner.open_invite_dialog(lobby)
        }

        fn subscribe(&self) -> flume::Receiver<LobbyEvent> {
            self.inner.subscribe()
        }
    }

    fn member_with(
        service: &LocalLobbyService,
        network: &LocalNetwork,
        name: &str,
        configure: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder,
    ) -> Member {
        member_over(service, network, name, |matchmaking| Arc::new(matchmaking), configure)
    }

    fn member_over(
        service: &LocalLobbyService,
        network: &LocalNetwork,
        name: &str,
        client: impl FnOnce(LocalMatchmaking) -> Arc<dyn MatchmakingClient>,
        configure: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder,
    ) -> Member {
        let matchmaking = service.connect(Some(name.to_string()));
        let transport = Arc::new(network.transport(matchmaking.local_member().as_str()));
        let frontend = Arc::new(RecordingFrontend::default());
        let builder = LobbyCoordinator::builder(
            client(matchmaking.clone()),
            transport.clone(),
            frontend.clone(),
        );
        let coordinator = configure(builder).build().unwrap();
        Member {
            coordinator,
            matchmaking,
            transport,
            frontend,
        }
    }

    fn member(service: &LocalLobbyService, network: &LocalNetwork, name: &str) -> Member {
        member_with(service, network, name, |builder| builder)
    }

    /// Owner creates a lobby and each guest joins it by invite
    async fn lobby_with(owner: &mut Member, guests: &mut [&mut Member]) -> LobbyId {
        owner.coordinator.create_lobby(None).await;
        owner.coordinator.process_pending().await;
        let lobby = owner.coordinator.lobby_id().cloned().unwrap();
        for guest in guests.iter_mut() {
            owner
                .matchmaking
                .service()
                .invite(&guest.id(), &lobby)
                .unwrap();
            guest.coordinator.process_pending().await;
        }
        owner.coordinator.process_pending().await;
        lobby
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_create_lobby_publishes_host_address() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");

        alice.coordinator.create_lobby(None).await;
        let results = alice.coordinator.process_pending().await;
        assert!(results.contains(&StepResult::StateChanged {
            from: SessionState::Idle,
            to: SessionState::LobbyOwner,
        }));

        let lobby = alice.coordinator.lobby_id().cloned().unwrap();
        let mm = &alice.matchmaking;
        assert_eq!(mm.metadata(&lobby, HOST_ADDRESS_KEY), alice.id().as_str());
        assert_eq!(mm.metadata(&lobby, LOBBY_NAME_KEY), "alice's lobby");
        assert_eq!(mm.metadata(&lobby, GAME_STARTED_KEY), "0");
        assert_eq!(mm.metadata(&lobby, RETURN_TO_MENU_KEY), "0");
        assert!(alice.coordinator.is_lobby_host());
        assert_eq!(alice.coordinator.role(), Role::Host);
        assert!(!alice.transport.is_host_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_backend_unavailable_stays_idle() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        service.set_ready(false);

        assert_eq!(alice.coordinator.create_lobby(None).await, None);
        alice.coordinator.process_pending().await;
        assert_eq!(alice.coordinator.state(), SessionState::Idle);
        assert!(alice.coordinator.lobby_id().is_none());
        assert_eq!(alice.coordinator.role(), Role::Unaffiliated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_member_connects_when_owner_starts_game() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");

        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;
        assert_eq!(bob.coordinator.state(), SessionState::LobbyMember);
        assert_eq!(
            bob.matchmaking.metadata(&lobby, HOST_ADDRESS_KEY),
            alice.id().as_str()
        );
        assert!(!bob.transport.is_client_active());
        assert_eq!(bob.coordinator.role(), Role::Client);

        *alice.frontend.watch_lobby.lock().unwrap() = Some((alice.matchmaking.clone(), lobby.clone()));
        let result = alice.coordinator.start_game().await;
        assert_eq!(
            result,
            Some(StepResult::StateChanged {
                from: SessionState::LobbyOwner,
                to: SessionState::HostActive,
            })
        );
        assert_eq!(bob.matchmaking.metadata(&lobby, GAME_STARTED_KEY), "1");
        // GameStarted was visible before the local scene transition
        assert_eq!(
            *alice.frontend.game_started_at_load.lock().unwrap(),
            vec!["1".to_string()]
        );
        assert_eq!(alice.frontend.last_scene().as_deref(), Some("Game"));

        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::ClientActive);
        assert!(bob.transport.is_client_active());
        assert_eq!(network.client_count(alice.id().as_str()), 1);
        assert_eq!(bob.frontend.last_scene().as_deref(), Some("Game"));
        assert!(bob.frontend.calls().contains(&"hide_menu".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_late_join_connects_immediately() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");

        let lobby = lobby_with(&mut alice, &mut []).await;
        alice.coordinator.start_game().await;

        bob.coordinator.join_lobby(lobby).await;
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::ClientActive);
        assert_eq!(bob.transport.stats().client_starts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_start_game_twice_is_idempotent() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        lobby_with(&mut alice, &mut []).await;

        alice.coordinator.start_game().await;
        assert_eq!(alice.coordinator.start_game().await, None);

        let stats = alice.coordinator.transport_stats();
        assert_eq!(stats.host_starts, 1);
        assert_eq!(stats.scene_changes, 1);
        assert_eq!(alice.frontend.scenes(), vec!["Game".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_non_owner_cannot_start_or_return_to_menu() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;

        assert_eq!(bob.coordinator.start_game().await, None);
        assert_eq!(bob.coordinator.exit_to_menu().await, None);
        assert_eq!(bob.coordinator.host_close_lobby().await, None);
        assert!(!bob.transport.is_host_active());
        assert_eq!(bob.coordinator.state(), SessionState::LobbyMember);
        assert_eq!(bob.matchmaking.metadata(&lobby, GAME_STARTED_KEY), "0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_exit_game_hands_ownership_over() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;

        alice.coordinator.exit_game().await;
        assert_eq!(alice.coordinator.state(), SessionState::Stopped);
        assert!(alice.frontend.calls().contains(&"quit".to_string()));
        assert_eq!(alice.coordinator.step().await, StepResult::Stop);

        bob.coordinator.process_pending().await;
        assert!(bob.coordinator.is_lobby_host());
        assert_eq!(bob.coordinator.state(), SessionState::LobbyOwner);
        assert_eq!(bob.matchmaking.members(&lobby), vec![bob.id()]);
        // At most one owner
        assert!(!alice.coordinator.is_lobby_host());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_hosting_owner_exit_promotes_client() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        lobby_with(&mut alice, &mut [&mut bob]).await;
        alice.coordinator.start_game().await;
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::ClientActive);

        alice.coordinator.exit_game().await;
        assert!(!alice.transport.is_host_active());

        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::LobbyOwner);
        assert!(!bob.transport.is_client_active());
        assert_eq!(bob.frontend.last_scene().as_deref(), Some("MainMenu"));

        // The new owner republishes its own address when starting
        bob.coordinator.start_game().await;
        assert_eq!(bob.coordinator.state(), SessionState::HostActive);
        let lobby = bob.coordinator.lobby_id().cloned().unwrap();
        assert_eq!(
            bob.matchmaking.metadata(&lobby, HOST_ADDRESS_KEY),
            bob.id().as_str()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_owner_alone_exit_deletes_lobby() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let lobby = lobby_with(&mut alice, &mut []).await;

        alice.coordinator.exit_game().await;
        assert!(!service.lobby_exists(&lobby));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_exit_to_menu_returns_everyone() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        lobby_with(&mut alice, &mut [&mut bob]).await;
        alice.coordinator.start_game().await;
        bob.coordinator.process_pending().await;

        alice.coordinator.exit_to_menu().await;
        assert_eq!(alice.coordinator.state(), SessionState::Idle);
        assert!(alice.coordinator.lobby_id().is_none());
        assert!(!alice.transport.is_host_active());
        assert_eq!(alice.frontend.last_scene().as_deref(), Some("MainMenu"));
        assert_eq!(alice.frontend.calls().last().map(String::as_str), Some("show_menu"));
        let slots = alice.coordinator.roster();
        assert!(slots[0].is_local);
        assert_eq!(slots.iter().filter(|slot| slot.occupied).count(), 1);

        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::Idle);
        assert!(bob.coordinator.lobby_id().is_none());
        assert!(!bob.transport.is_client_active());
        assert_eq!(bob.frontend.last_scene().as_deref(), Some("MainMenu"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_host_close_lobby_sends_everyone_to_bootstrap() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member_with(&service, &network, "alice", |b| b.close_grace_ms(20));
        let mut bob = member(&service, &network, "bob");
        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;

        alice.coordinator.host_close_lobby().await;
        assert_eq!(alice.coordinator.state(), SessionState::Closing);
        // Commands other than ExitGame/Stop wait for the close to finish
        assert_eq!(alice.coordinator.start_game().await, None);

        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::Idle);
        assert_eq!(bob.frontend.last_scene().as_deref(), Some("Bootstrap"));

        let mut result = alice.coordinator.step().await;
        while result != StepResult::Timeout
            && !matches!(result, StepResult::StateChanged { .. })
        {
            result = alice.coordinator.step().await;
        }
        assert_eq!(
            result,
            StepResult::StateChanged {
                from: SessionState::Closing,
                to: SessionState::Idle,
            }
        );
        assert_eq!(alice.frontend.last_scene().as_deref(), Some("Bootstrap"));
        assert!(!service.lobby_exists(&lobby));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_roster_three_of_four() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let mut carol = member(&service, &network, "carol");
        lobby_with(&mut alice, &mut [&mut bob, &mut carol]).await;

        let slots = alice.coordinator.roster();
        assert_eq!(slots.len(), 4);
        assert!(slots[..3].iter().all(|slot| slot.occupied));
        assert_eq!(slots[0].display_name, "alice");
        assert!(slots[0].is_local);
        assert!(!slots[3].occupied);
        assert!(slots[3].interactable);
        assert_eq!(slots[3].display_name, "Invite Friend");
        assert_eq!(slots[3].avatar, SlotAvatar::Placeholder);
        assert_eq!(*alice.frontend.slots.lock().unwrap(), slots);

        // Every member sees itself in slot 0
        for guest in [&bob, &carol] {
            let slots = guest.coordinator.roster();
            assert!(slots[0].is_local);
            assert_eq!(slots[0].display_name, guest.matchmaking.member_name(&guest.id()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_slot_zero_stays_local_through_membership_changes() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let mut carol = member(&service, &network, "carol");
        let lobby = lobby_with(&mut alice, &mut [&mut bob, &mut carol]).await;

        alice.matchmaking.leave_lobby(&lobby);
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.roster()[0].display_name, "bob");
        assert_eq!(bob.coordinator.roster()[1].display_name, "carol");
        assert!(!bob.coordinator.roster()[2].occupied);

        carol.matchmaking.leave_lobby(&lobby);
        bob.coordinator.process_pending().await;
        let slots = bob.coordinator.roster();
        assert_eq!(slots[0].display_name, "bob");
        assert_eq!(slots.iter().filter(|slot| slot.occupied).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_avatars_load_asynchronously() {
        let service = LocalLobbyService::new();
        service.set_avatar_delay(Duration::from_millis(20));
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");

        assert_eq!(alice.coordinator.roster()[0].avatar, SlotAvatar::Placeholder);
        let mut loaded = false;
        for _ in 0..10 {
            alice.coordinator.step().await;
            if matches!(alice.coordinator.roster()[0].avatar, SlotAvatar::Loaded(_)) {
                loaded = true;
                break;
            }
        }
        assert!(loaded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_promoted_member_becomes_owner() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;

        // Backend migrates ownership when the owner drops out
        alice.matchmaking.leave_lobby(&lobby);
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::LobbyOwner);
        assert!(bob.coordinator.is_lobby_host());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_disconnected_owner_promotes_member() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;

        service.disconnect(&alice.id());
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::LobbyOwner);
        assert_eq!(bob.matchmaking.members(&lobby), vec![bob.id()]);
        let slots = bob.coordinator.roster();
        assert_eq!(slots.iter().filter(|slot| slot.occupied).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_exit_game_skips_refused_successor() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let refused = Arc::new(Mutex::new(Vec::new()));
        let picky = refused.clone();
        let mut alice = member_over(
            &service,
            &network,
            "alice",
            move |inner| Arc::new(PickyMatchmaking { inner, refused: picky }),
            |builder| builder,
        );
        let mut bob = member(&service, &network, "bob");
        let mut carol = member(&service, &network, "carol");
        let lobby = lobby_with(&mut alice, &mut [&mut bob, &mut carol]).await;
        assert_eq!(
            alice.matchmaking.members(&lobby),
            vec![alice.id(), bob.id(), carol.id()]
        );

        refused.lock().unwrap().push(bob.id());
        alice.coordinator.exit_game().await;
        assert_eq!(alice.coordinator.state(), SessionState::Stopped);
        assert_eq!(carol.matchmaking.lobby_owner(&lobby), Some(carol.id()));

        bob.coordinator.process_pending().await;
        carol.coordinator.process_pending().await;
        assert!(carol.coordinator.is_lobby_host());
        assert_eq!(carol.coordinator.state(), SessionState::LobbyOwner);
        assert!(!bob.coordinator.is_lobby_host());
        assert_eq!(bob.coordinator.state(), SessionState::LobbyMember);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_exit_game_leaves_when_every_successor_is_refused() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let refused = Arc::new(Mutex::new(Vec::new()));
        let picky = refused.clone();
        let mut alice = member_over(
            &service,
            &network,
            "alice",
            move |inner| Arc::new(PickyMatchmaking { inner, refused: picky }),
            |builder| builder,
        );
        let mut bob = member(&service, &network, "bob");
        let mut carol = member(&service, &network, "carol");
        let lobby = lobby_with(&mut alice, &mut [&mut bob, &mut carol]).await;

        refused.lock().unwrap().extend([bob.id(), carol.id()]);
        alice.coordinator.exit_game().await;
        assert!(alice.frontend.calls().contains(&"quit".to_string()));
        assert_eq!(bob.matchmaking.members(&lobby), vec![bob.id(), carol.id()]);
        // The backend's own migration picks the first remaining member
        assert_eq!(bob.matchmaking.lobby_owner(&lobby), Some(bob.id()));

        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::LobbyOwner);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_join_request_while_closing_is_ignored() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member_with(&service, &network, "alice", |b| b.close_grace_ms(20));
        let mut carol = member(&service, &network, "carol");
        let first = lobby_with(&mut alice, &mut []).await;
        let second = lobby_with(&mut carol, &mut []).await;

        alice.coordinator.host_close_lobby().await;
        service.invite(&alice.id(), &second).unwrap();
        alice.coordinator.process_pending().await;
        assert_eq!(alice.coordinator.state(), SessionState::Closing);
        assert_eq!(alice.coordinator.lobby_id(), Some(&first));
        assert_eq!(carol.matchmaking.members(&second), vec![carol.id()]);

        let mut result = alice.coordinator.step().await;
        while !matches!(result, StepResult::StateChanged { .. } | StepResult::Timeout) {
            result = alice.coordinator.step().await;
        }
        assert_eq!(
            result,
            StepResult::StateChanged {
                from: SessionState::Closing,
                to: SessionState::Idle,
            }
        );
        assert!(!service.lobby_exists(&first));
        assert!(service.lobby_exists(&second));
        assert_eq!(alice.frontend.last_scene().as_deref(), Some("Bootstrap"));

        // Once the close finished, joining works again
        service.invite(&alice.id(), &second).unwrap();
        alice.coordinator.process_pending().await;
        assert_eq!(alice.coordinator.lobby_id(), Some(&second));
        assert_eq!(alice.coordinator.state(), SessionState::LobbyMember);
        assert!(carol.matchmaking.members(&second).contains(&alice.id()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_rejected_lobby_creation_stays_idle() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        alice.coordinator.process_pending().await;
        service.set_create_failure(Some("too many lobbies".to_string()));

        alice.coordinator.create_lobby(None).await;
        assert!(alice.coordinator.process_pending().await.is_empty());
        assert_eq!(alice.coordinator.state(), SessionState::Idle);
        assert!(alice.coordinator.lobby_id().is_none());

        service.set_create_failure(None);
        alice.coordinator.create_lobby(None).await;
        alice.coordinator.process_pending().await;
        assert_eq!(alice.coordinator.state(), SessionState::LobbyOwner);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_host_lost_returns_member_to_menu() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        lobby_with(&mut alice, &mut [&mut bob]).await;
        alice.coordinator.start_game().await;
        bob.coordinator.process_pending().await;

        alice.transport.stop_host().await;
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::LobbyMember);
        assert!(!bob.transport.is_client_active());
        assert_eq!(bob.frontend.last_scene().as_deref(), Some("MainMenu"));
        assert_eq!(bob.frontend.calls().last().map(String::as_str), Some("show_menu"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_stale_host_address_is_not_connected() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;

        alice
            .matchmaking
            .set_metadata(&lobby, HOST_ADDRESS_KEY, "")
            .unwrap();
        alice
            .matchmaking
            .set_metadata(&lobby, GAME_STARTED_KEY, "1")
            .unwrap();
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.state(), SessionState::LobbyMember);
        assert_eq!(bob.transport.stats().client_starts, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_join_request_leaves_current_lobby() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let mut carol = member(&service, &network, "carol");
        let first = lobby_with(&mut alice, &mut [&mut bob]).await;
        let second = lobby_with(&mut carol, &mut []).await;

        service.invite(&bob.id(), &second).unwrap();
        bob.coordinator.process_pending().await;
        assert_eq!(bob.coordinator.lobby_id(), Some(&second));
        assert_eq!(bob.coordinator.state(), SessionState::LobbyMember);
        assert_eq!(alice.matchmaking.members(&first), vec![alice.id()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_invite_friend_opens_dialog() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");

        // No lobby yet
        alice.coordinator.invite_friend().await;
        assert!(service.invite_dialogs().is_empty());

        let lobby = lobby_with(&mut alice, &mut []).await;
        alice.coordinator.invite_friend().await;
        assert_eq!(service.invite_dialogs(), vec![(alice.id(), lobby)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_offline_session() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");

        alice.coordinator.start_game().await;
        assert_eq!(alice.coordinator.state(), SessionState::HostActive);
        assert_eq!(alice.coordinator.current_scene(), Some(&SceneRef::new("Game")));

        alice.coordinator.exit_to_menu().await;
        assert_eq!(alice.coordinator.state(), SessionState::Idle);
        assert!(!alice.transport.is_host_active());
        assert_eq!(alice.coordinator.current_scene(), Some(&SceneRef::new("MainMenu")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_commands_through_sender() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member_with(&service, &network, "alice", |b| b.step_timeout_ms(50));
        let sender = alice.coordinator.sender();

        sender.send(LobbyCommand::CreateLobby(None)).unwrap();
        let mut changed = false;
        for _ in 0..10 {
            if let StepResult::StateChanged { to, .. } = alice.coordinator.step().await {
                assert_eq!(to, SessionState::LobbyOwner);
                changed = true;
                break;
            }
        }
        assert!(changed);

        sender.send(LobbyCommand::Stop).unwrap();
        let mut result = alice.coordinator.step().await;
        while result != StepResult::Stop {
            result = alice.coordinator.step().await;
        }
        assert_eq!(alice.coordinator.state(), SessionState::Stopped);
        assert_eq!(alice.coordinator.step().await, StepResult::Stop);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_step_times_out_when_idle() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member_with(&service, &network, "alice", |b| b.step_timeout_ms(10));
        alice.coordinator.process_pending().await;

        assert_eq!(alice.coordinator.step().await, StepResult::Timeout);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_builder_rejects_invalid_config() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let matchmaking = service.connect(None);
        let transport = network.transport(matchmaking.local_member().as_str());
        let result = LobbyCoordinator::builder(
            Arc::new(matchmaking),
            Arc::new(transport),
            Arc::new(RecordingFrontend::default()),
        )
        .max_players(0)
        .build();
        assert!(matches!(result, Err(LobbyError::InvalidConfig(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_close_leaves_lobby() {
        let service = LocalLobbyService::new();
        let network = LocalNetwork::new();
        let mut alice = member(&service, &network, "alice");
        let mut bob = member(&service, &network, "bob");
        let lobby = lobby_with(&mut alice, &mut [&mut bob]).await;

        bob.coordinator.close().await;
        assert_eq!(bob.coordinator.state(), SessionState::Stopped);
        assert_eq!(alice.matchmaking.members(&lobby), vec![alice.id()]);
    }
}
