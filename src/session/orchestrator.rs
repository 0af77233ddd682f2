//! Top-level session coordinator.
//!
//! The orchestrator waits for user intent while idle, connects to the
//! perception service for the requested mode, and for each connection runs
//! five tasks sharing one cancellation token:
//!
//! - microphone capture (bounded channel, frames dropped when full)
//! - audio sender
//! - perception ticks (monitored work) or the silence watch (casual chat)
//! - the response receiver (speech gate, tool calls, resumption)
//! - playback
//!
//! A transport failure cancels them all and reconnects with backoff.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::ReconnectPolicy;
use super::directive::chat_greeting;
use super::events::{LinkStatus, SessionCommand, SessionEvent, SessionSnapshot};
use super::gate::SpeechGate;
use super::shared::{Collaborators, LinkContext, SessionCore};
use crate::audio::{MicCapture, spawn_playback};
use crate::config::CoachConfig;
use crate::error::{CoachError, Result};
use crate::link::{ClientEvent, LinkMode, LiveConnection, ServiceEvent, TranscriptSource};
use crate::overlay::{Animation, OverlayEvent};
use crate::vad::EnergyVad;

/// Capacity of the session event broadcast.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Why a mode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeExit {
    /// Back to idle.
    Stopped,
    /// Straight into another mode.
    Switch(LinkMode),
    /// The orchestrator is shutting down.
    Shutdown,
}

/// Why a connection ended on its own.
#[derive(Debug)]
enum ConnectionEnd {
    /// The service announced a disconnect; resume right away.
    GoAway,
    /// Casual chat fell silent.
    ChatFinished,
    Failed(CoachError),
}

enum ConnectionExit {
    Mode(ModeExit),
    Ended(ConnectionEnd),
}

/// Host-side handle: send commands, watch events, read the state.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    core: Arc<SessionCore>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Send a command.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Channel`] once the orchestrator has stopped.
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CoachError::Channel("session orchestrator has stopped".into()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.core.snapshot()
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Runs coaching sessions until shut down.
pub struct SessionOrchestrator {
    core: Arc<SessionCore>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(config: CoachConfig, collab: Collaborators) -> (Self, SessionHandle) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let core = Arc::new(SessionCore::new(config, collab, events));
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            commands: tx,
            core: Arc::clone(&core),
            cancel: cancel.clone(),
        };
        (
            Self {
                core,
                commands: rx,
                cancel,
            },
            handle,
        )
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until shutdown or until every handle is dropped.
    ///
    /// # Errors
    ///
    /// Recoverable failures are retried; this currently always returns `Ok`.
    pub async fn run(mut self) -> Result<()> {
        info!("session orchestrator started");
        let mut next: Option<LinkMode> = None;

        loop {
            let mode = match next.take() {
                Some(mode) => mode,
                None => match self.wait_for_intent().await {
                    Some(mode) => mode,
                    None => break,
                },
            };

            self.core.enter(mode);
            let exit = self.run_mode(mode).await;
            self.core.leave();

            match exit {
                ModeExit::Stopped => {}
                ModeExit::Switch(mode) => next = Some(mode),
                ModeExit::Shutdown => break,
            }
        }

        self.core.emit(SessionEvent::Link(LinkStatus::Closed));
        info!("session orchestrator stopped");
        Ok(())
    }

    /// Idle: wait for a start command.
    async fn wait_for_intent(&mut self) -> Option<LinkMode> {
        loop {
            let command = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                command = self.commands.recv() => command?,
            };
            match command {
                SessionCommand::StartWork => return Some(LinkMode::MonitoredWork),
                SessionCommand::StartChat => return Some(LinkMode::CasualChat),
                SessionCommand::Stop => debug!("already idle"),
                other => self.side_command(other),
            }
        }
    }

    /// Interpret a command received while a mode is active.
    fn on_command(&self, command: Option<SessionCommand>, mode: LinkMode) -> Option<ModeExit> {
        match command {
            None => Some(ModeExit::Shutdown),
            Some(SessionCommand::Stop) => Some(ModeExit::Stopped),
            Some(SessionCommand::StartWork) if mode != LinkMode::MonitoredWork => {
                Some(ModeExit::Switch(LinkMode::MonitoredWork))
            }
            Some(SessionCommand::StartChat) if mode != LinkMode::CasualChat => {
                Some(ModeExit::Switch(LinkMode::CasualChat))
            }
            Some(SessionCommand::StartWork | SessionCommand::StartChat) => {
                debug!(?mode, "mode already active");
                None
            }
            Some(other) => {
                self.side_command(other);
                None
            }
        }
    }

    /// Commands that never change the mode.
    fn side_command(&self, command: SessionCommand) {
        match command {
            SessionCommand::SelectMic(index) => {
                info!(index = ?index, "microphone selected");
                self.core.mic_selection.send_replace(index);
            }
            SessionCommand::RefreshMics => {
                let core = Arc::clone(&self.core);
                tokio::spawn(async move {
                    let mics = Arc::clone(&core.collab.mics);
                    match tokio::task::spawn_blocking(move || mics.refresh()).await {
                        Ok(Ok(list)) => core.emit(SessionEvent::Microphones(list)),
                        Ok(Err(e)) => warn!("microphone refresh failed: {e}"),
                        Err(e) => warn!("microphone refresh task failed: {e}"),
                    }
                });
            }
            SessionCommand::AcceptBreak => self.core.accept_break(),
            SessionCommand::RefuseBreak => self.core.refuse_break(),
            SessionCommand::StartWork | SessionCommand::StartChat | SessionCommand::Stop => {}
        }
    }

    /// Connect, run, reconnect until the mode ends.
    async fn run_mode(&mut self, mode: LinkMode) -> ModeExit {
        let mut policy = ReconnectPolicy::new(&self.core.config.link);

        loop {
            self.core.emit(SessionEvent::Link(LinkStatus::Connecting));
            let setup = self.core.setup(mode);
            let resuming = setup.resume_handle.is_some();
            let service = Arc::clone(&self.core.collab.service);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return ModeExit::Shutdown,
                result = service.connect(&setup) => result,
            };

            let failure = match connected {
                Ok(connection) => {
                    info!(?mode, resuming, "perception link connected");
                    policy.on_connected();
                    self.core.emit(SessionEvent::Link(LinkStatus::Connected));
                    match self.run_connection(mode, connection).await {
                        ConnectionExit::Mode(exit) => return exit,
                        ConnectionExit::Ended(ConnectionEnd::ChatFinished) => {
                            return ModeExit::Stopped;
                        }
                        ConnectionExit::Ended(ConnectionEnd::GoAway) => {
                            info!("service going away, resuming");
                            continue;
                        }
                        ConnectionExit::Ended(ConnectionEnd::Failed(e)) => e,
                    }
                }
                Err(e) => e,
            };

            if failure.is_stale_resumption() {
                warn!("resumption handle rejected, starting a fresh session");
                self.core.clear_resume_handle();
            } else {
                warn!("perception link unavailable: {failure}");
            }
            let delay = policy.on_failure(&failure);
            self.core.emit(SessionEvent::Link(LinkStatus::Retrying {
                attempt: policy.attempt(),
                delay,
            }));

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return ModeExit::Shutdown,
                    () = &mut sleep => break,
                    command = self.commands.recv() => {
                        if let Some(exit) = self.on_command(command, mode) {
                            return exit;
                        }
                    }
                }
            }
        }
    }

    /// Run one connection's tasks until it ends or a command ends the mode.
    async fn run_connection(&mut self, mode: LinkMode, connection: LiveConnection) -> ConnectionExit {
        let LiveConnection { outbound, inbound } = connection;
        let cancel = self.cancel.child_token();
        let (playback, playback_task) =
            spawn_playback(Arc::clone(&self.core.collab.speaker), cancel.clone());
        let link = LinkContext {
            outbound,
            playback,
            cancel: cancel.clone(),
        };
        let (end_tx, mut end_rx) = mpsc::channel::<ConnectionEnd>(4);

        let (audio_tx, audio_rx) =
            mpsc::channel::<Vec<u8>>(self.core.config.audio.capture_channel_capacity.max(1));
        let capture_task = spawn_capture(Arc::clone(&self.core), audio_tx, cancel.clone());
        let sender_task = tokio::spawn(forward_audio(audio_rx, link.clone()));

        let pulse_task = match mode {
            LinkMode::MonitoredWork => {
                tokio::spawn(perception_loop(Arc::clone(&self.core), link.clone(), end_tx.clone()))
            }
            LinkMode::CasualChat => {
                tokio::spawn(chat_loop(Arc::clone(&self.core), link.clone(), end_tx.clone()))
            }
        };
        let receive_task = tokio::spawn(receive_loop(
            Arc::clone(&self.core),
            inbound,
            link.clone(),
            end_tx,
        ));
        drop(link);

        let exit = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break ConnectionExit::Mode(ModeExit::Shutdown),
                end = end_rx.recv() => {
                    let end = end.unwrap_or_else(|| {
                        ConnectionEnd::Failed(CoachError::Transport("connection tasks ended".into()))
                    });
                    break ConnectionExit::Ended(end);
                }
                command = self.commands.recv() => {
                    if let Some(exit) = self.on_command(command, mode) {
                        break ConnectionExit::Mode(exit);
                    }
                }
            }
        };

        cancel.cancel();
        self.core.cancel_pending_close();
        join_all([capture_task, sender_task, pulse_task, receive_task, playback_task]).await;
        debug!("connection tasks stopped");
        exit
    }
}

async fn join_all<const N: usize>(tasks: [JoinHandle<()>; N]) {
    for task in tasks {
        if let Err(e) = task.await {
            error!("connection task failed: {e}");
        }
    }
}

fn spawn_capture(
    core: Arc<SessionCore>,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (active_tx, mut active_rx) = tokio::sync::watch::channel(None);
        let capture = MicCapture::new(
            Arc::clone(&core.collab.mics),
            EnergyVad::new(core.config.audio.vad_threshold),
            core.speech.clone(),
            core.mic_selection.subscribe(),
            active_tx,
        );

        let watcher = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                while active_rx.changed().await.is_ok() {
                    let active = *active_rx.borrow_and_update();
                    core.emit(SessionEvent::Microphone { active });
                }
            })
        };

        if let Err(e) = capture.run(tx, cancel).await {
            error!("microphone capture ended: {e}");
            if e.is_device_failure() {
                core.emit(SessionEvent::MicrophoneUnavailable);
            }
        }
        let _ = watcher.await;
    })
}

async fn forward_audio(mut rx: mpsc::Receiver<Vec<u8>>, link: LinkContext) {
    loop {
        let frame = tokio::select! {
            _ = link.cancel.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break };
        if LiveConnection::send(&link.outbound, ClientEvent::Audio(frame))
            .await
            .is_err()
        {
            debug!("audio sender stopped: connection closed");
            break;
        }
    }
}

async fn perception_loop(core: Arc<SessionCore>, link: LinkContext, end: mpsc::Sender<ConnectionEnd>) {
    loop {
        let tick = tokio::select! {
            _ = link.cancel.cancelled() => return,
            tick = core.perception_tick(&link) => tick,
        };
        let interval = match tick {
            Ok(interval) => interval,
            Err(e) => {
                let _ = end.send(ConnectionEnd::Failed(e)).await;
                return;
            }
        };
        tokio::select! {
            _ = link.cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn chat_loop(core: Arc<SessionCore>, link: LinkContext, end: mpsc::Sender<ConnectionEnd>) {
    let greet_after = core.config.speech.chat_greeting_delay();
    let check_every = std::time::Duration::from_millis(core.config.polling.chat_check_ms.max(1));
    let greeted = core.state().chat_started.is_some_and(|t| t.elapsed() > greet_after);

    if !greeted {
        tokio::select! {
            _ = link.cancel.cancelled() => return,
            _ = tokio::time::sleep(greet_after) => {}
        }
        let greeting = chat_greeting(core.config.speech.language).to_owned();
        if let Err(e) = LiveConnection::send(&link.outbound, ClientEvent::Text(greeting)).await {
            let _ = end.send(ConnectionEnd::Failed(e)).await;
            return;
        }
    }

    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => return,
            _ = tokio::time::sleep(check_every) => {}
        }
        if core.chat_silence_expired(Instant::now()) {
            info!("chat fell silent, ending conversation");
            core.collab
                .overlay
                .send(OverlayEvent::animation(Animation::Bye));
            let _ = end.send(ConnectionEnd::ChatFinished).await;
            return;
        }
    }
}

async fn receive_loop(
    core: Arc<SessionCore>,
    mut inbound: mpsc::Receiver<Result<ServiceEvent>>,
    link: LinkContext,
    end: mpsc::Sender<ConnectionEnd>,
) {
    let mut gate = SpeechGate::new();

    let ended = loop {
        let event = tokio::select! {
            _ = link.cancel.cancelled() => return,
            event = inbound.recv() => event,
        };
        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => break ConnectionEnd::Failed(e),
            None => {
                break ConnectionEnd::Failed(CoachError::Transport(
                    "connection closed by service".into(),
                ));
            }
        };

        match event {
            ServiceEvent::Audio(pcm) => {
                let permitted = gate.is_granted() || core.speech_permitted();
                for chunk in gate.offer(pcm, permitted) {
                    link.playback.play(chunk);
                }
            }
            ServiceEvent::TurnComplete => {
                let dropped = gate.turn_complete();
                if dropped > 0 {
                    debug!(bytes = dropped, "muzzled turn discarded");
                }
            }
            ServiceEvent::Interrupted => {
                gate.interrupt();
                link.playback.interrupt();
            }
            ServiceEvent::Transcript { source, text } => {
                match source {
                    TranscriptSource::User => debug!(text = %text, "user said"),
                    TranscriptSource::Coach => debug!(text = %text, "coach said"),
                }
                core.emit(SessionEvent::Transcript { source, text });
            }
            ServiceEvent::ToolCall(call) => {
                if let Err(e) = core.handle_tool_call(call, &link).await {
                    break ConnectionEnd::Failed(e);
                }
            }
            ServiceEvent::ResumptionUpdate { handle, resumable } => {
                core.store_resume_handle(handle, resumable);
            }
            ServiceEvent::GoAway { time_left } => {
                info!(time_left = ?time_left, "service going away");
                break ConnectionEnd::GoAway;
            }
        }
    };

    let _ = end.send(ended).await;
}
