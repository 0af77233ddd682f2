//! Shared session core: the state record behind one lock, plus everything
//! the per-connection tasks do to it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Local;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::breaks::BreakEvent;
use super::directive::{DirectiveContext, build_directive, close_cancelled_notice, poll_interval};
use super::events::{CloseCancelReason, SessionEvent, SessionSnapshot};
use super::grace::{CloseOrigin, GraceOutcome, PendingClose, wait_for_grace};
use super::state::{SessionMode, SessionState};
use crate::audio::{AudioSink, MicResolver, PlaybackHandle};
use crate::config::CoachConfig;
use crate::error::{CoachError, Result};
use crate::link::messages::{CLOSE_DISTRACTING_TAB, ClientEvent, ToolCall, ToolInvocation, ToolResponse};
use crate::link::{LinkMode, LiveConnection, PerceptionService, SessionSetup};
use crate::mood::describe_mood;
use crate::overlay::{Animation, OverlayEvent, OverlaySink, mood_events};
use crate::personality;
use crate::platform::{
    CloseMode, ScreenSample, ScreenSampler, WindowInfo, WindowManager, close_mode_for, find_window,
    sample_screen,
};
use crate::scoring::{Category, ScoringPolicy, is_protected};
use crate::vad::SpeechClock;

/// External collaborators of a session.
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn PerceptionService>,
    pub windows: Arc<dyn WindowManager>,
    pub screen: Arc<dyn ScreenSampler>,
    pub mics: Arc<MicResolver>,
    pub speaker: Arc<dyn AudioSink>,
    pub overlay: Arc<dyn OverlaySink>,
}

/// Per-connection handles shared by the connection's tasks.
#[derive(Clone)]
pub(crate) struct LinkContext {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub playback: PlaybackHandle,
    pub cancel: CancellationToken,
}

impl LinkContext {
    async fn send(&self, event: ClientEvent) -> Result<()> {
        LiveConnection::send(&self.outbound, event).await
    }

    async fn respond(&self, id: &str, name: &str, response: Value) -> Result<()> {
        self.send(ClientEvent::ToolResponse(ToolResponse {
            id: id.to_owned(),
            name: name.to_owned(),
            response,
        }))
        .await
    }
}

fn error_response(message: impl Into<String>) -> Value {
    json!({"status": "error", "message": message.into()})
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Everything the session's tasks share.
pub(crate) struct SessionCore {
    pub config: CoachConfig,
    pub policy: ScoringPolicy,
    pub collab: Collaborators,
    pub speech: SpeechClock,
    pub mic_selection: watch::Sender<Option<usize>>,
    state: Mutex<SessionState>,
    pending_close: Mutex<Option<PendingClose>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCore {
    pub fn new(
        config: CoachConfig,
        collab: Collaborators,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (mic_selection, _) = watch::channel(config.audio.input_device);
        Self {
            policy: ScoringPolicy::from(&config.scoring),
            state: Mutex::new(SessionState::new(&config)),
            config,
            collab,
            speech: SpeechClock::new(),
            mic_selection,
            pending_close: Mutex::new(None),
            events,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingClose>> {
        self.pending_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn close_pending(&self) -> bool {
        self.pending().as_ref().is_some_and(|p| !p.is_finished())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let close_pending = self.close_pending();
        let state = self.state();
        SessionSnapshot {
            mode: state.mode,
            score: state.score.value(),
            alignment: state.alignment,
            category: state.category,
            task: state.task.clone(),
            engagement: state.engagement,
            mood_bias: state.mood.bias,
            break_reminder: state.breaks.reminder_active(),
            on_break: state.breaks.on_break(),
            close_pending,
            resumable: state.resume_handle.is_some(),
        }
    }

    // -- Mode transitions --

    pub fn enter(&self, mode: LinkMode) {
        let now = Instant::now();
        let entered = {
            let mut state = self.state();
            match mode {
                LinkMode::MonitoredWork => state.start_work(now, Local::now()),
                LinkMode::CasualChat => state.start_chat(now),
            }
            state.mode
        };
        info!(mode = entered.as_str(), "session started");
        self.collab
            .overlay
            .send(OverlayEvent::animation(Animation::Hello));
        self.emit(SessionEvent::ModeChanged(entered));
    }

    pub fn leave(&self) {
        self.cancel_pending_close();
        let previous = {
            let mut state = self.state();
            let previous = state.mode;
            state.end();
            previous
        };
        if previous == SessionMode::Idle {
            return;
        }
        info!(mode = previous.as_str(), "session ended");
        self.collab.overlay.send(OverlayEvent::animation(Animation::Bye));
        self.emit(SessionEvent::ModeChanged(SessionMode::Idle));
    }

    pub fn setup(&self, mode: LinkMode) -> SessionSetup {
        let language = self.config.speech.language;
        SessionSetup {
            mode,
            system_instruction: personality::system_instruction(mode, language),
            tools: personality::tool_declarations(mode),
            resume_handle: self.state().resume_handle.clone(),
            send_sample_rate: self.config.audio.send_sample_rate,
            receive_sample_rate: self.config.audio.receive_sample_rate,
        }
    }

    pub fn clear_resume_handle(&self) {
        self.state().resume_handle = None;
    }

    pub fn store_resume_handle(&self, handle: Option<String>, resumable: bool) {
        if resumable && let Some(handle) = handle {
            debug!("resumption handle updated");
            self.state().resume_handle = Some(handle);
        }
    }

    // -- Breaks --

    pub fn accept_break(&self) {
        let length = self.state().breaks.accept(Instant::now());
        match length {
            Some(length) => {
                info!(minutes = length.as_secs() / 60, "break started");
                self.emit(SessionEvent::BreakStarted { length });
            }
            None => debug!("no break reminder to accept"),
        }
    }

    pub fn refuse_break(&self) {
        let skipped = {
            let mut state = self.state();
            let tier = state.breaks.tier();
            state.breaks.refuse().then_some(tier)
        };
        if let Some(tier) = skipped {
            info!(tier, "break refused");
            self.emit(SessionEvent::BreakSkipped { tier });
        }
    }

    // -- Speech --

    fn user_spoke_recently(&self, now: Instant) -> bool {
        self.speech
            .spoke_within(self.config.speech.user_speech_timeout(), now)
    }

    /// Derive the engagement right now. Used to decide a turn's speech.
    pub fn speech_permitted(&self) -> bool {
        let now = Instant::now();
        let spoke = self.user_spoke_recently(now);
        self.state().derive(&self.config, spoke, now).permits_speech()
    }

    /// Casual chat is over: no speech for the silence timeout, after the
    /// minimum chat length.
    pub fn chat_silence_expired(&self, now: Instant) -> bool {
        let Some(started) = self.state().chat_started else {
            return false;
        };
        if now.saturating_duration_since(started) < self.config.speech.chat_min_elapsed() {
            return false;
        }
        let last = self.speech.last().map_or(started, |at| at.max(started));
        now.saturating_duration_since(last) >= self.config.speech.chat_silence_timeout()
    }

    // -- Perception tick --

    /// One monitored-work tick. Returns the delay until the next one.
    ///
    /// # Errors
    ///
    /// Returns an error only when the connection is gone.
    pub async fn perception_tick(self: &Arc<Self>, link: &LinkContext) -> Result<Duration> {
        let now = Instant::now();
        let break_event = {
            let mut state = self.state();
            let elapsed = state.work_elapsed(now);
            state.breaks.tick(elapsed, now)
        };
        match break_event {
            Some(BreakEvent::ReminderRaised {
                tier,
                session_minutes,
            }) => {
                info!(tier, session_minutes, "break reminder");
                self.emit(SessionEvent::BreakReminder {
                    tier,
                    session_minutes,
                });
            }
            Some(BreakEvent::BreakEnded { tier }) => {
                info!(tier, "break over");
                self.emit(SessionEvent::BreakEnded { tier });
            }
            None => {}
        }
        let on_break = self.state().breaks.on_break();
        if on_break {
            return Ok(self.poll_interval());
        }

        let Some((sample, active, windows)) = self.observe().await else {
            return Ok(self.poll_interval());
        };
        if let Some(sample) = sample {
            link.send(ClientEvent::Image {
                mime_type: sample.mime_type.to_owned(),
                data: sample.data,
            })
            .await?;
        }

        let now = Instant::now();
        let wall = Local::now();
        let titles: Vec<String> = windows
            .iter()
            .map(|w| w.title.clone())
            .filter(|t| !t.trim().is_empty())
            .collect();
        let spoke = self.user_spoke_recently(now);

        let (directive, engagement, changed, greet, strike_on_banned) = {
            let mut state = self.state();
            let active_title = active.as_ref().map(|w| w.title.as_str());
            let dwell = state.focus.observe(active_title, now);
            state.refresh_timers(&self.config, now);
            let previous = state.engagement;
            let engagement = state.derive(&self.config, spoke, now);
            let bias = state.mood.compute_bias(wall, state.work_started_at);
            state.mood.bias = bias;
            let greet = !state.greeted && state.in_greeting_window(&self.config, now);
            let directive = build_directive(&DirectiveContext {
                active_window: active_title,
                open_windows: &titles,
                dwell,
                score: state.score,
                alignment: state.alignment,
                task: state.task.as_deref(),
                mood: describe_mood(bias, self.config.speech.language),
                engagement,
                greet,
                session_minutes: state.work_elapsed(now).as_secs() / 60,
            });
            let strike_on_banned =
                engagement.requires_close() && state.category == Some(Category::Banned);
            (directive, engagement, previous != engagement, greet, strike_on_banned)
        };

        if changed {
            debug!(?engagement, "engagement changed");
            self.emit(SessionEvent::Engagement(engagement));
        }

        if link.playback.is_speaking() {
            debug!("coach is speaking, directive skipped");
        } else {
            link.send(ClientEvent::Text(directive)).await?;
            if greet {
                self.state().greeted = true;
            }
        }

        if strike_on_banned && !self.close_pending() {
            self.auto_strike(&windows, link).await;
        }

        Ok(self.poll_interval())
    }

    fn poll_interval(&self) -> Duration {
        poll_interval(self.state().score, &self.config.polling)
    }

    /// Screen sample, focused window and visible windows, from the blocking pool.
    async fn observe(&self) -> Option<(Option<ScreenSample>, Option<WindowInfo>, Vec<WindowInfo>)> {
        let screen = Arc::clone(&self.collab.screen);
        let windows = Arc::clone(&self.collab.windows);
        let screen_config = self.config.screen.clone();
        let observed = tokio::task::spawn_blocking(move || {
            let sample = sample_screen(screen.as_ref(), &screen_config)
                .map_err(|e| warn!("screen sample failed: {e}"))
                .ok();
            let active = windows
                .active_window()
                .map_err(|e| warn!("active window query failed: {e}"))
                .ok()
                .flatten();
            let visible = windows
                .list_visible_windows()
                .map_err(|e| warn!("window listing failed: {e}"))
                .unwrap_or_default();
            (sample, active, visible)
        })
        .await;
        match observed {
            Ok(observed) => Some(observed),
            Err(e) => {
                warn!("perception task failed: {e}");
                None
            }
        }
    }

    // -- Tool calls --

    /// Answer one tool call.
    ///
    /// # Errors
    ///
    /// Returns an error only when the connection is gone.
    pub async fn handle_tool_call(self: &Arc<Self>, call: ToolCall, link: &LinkContext) -> Result<()> {
        let invocation = match call.invocation {
            Ok(invocation) => invocation,
            Err(message) => {
                warn!(tool = %call.name, "rejected tool call: {message}");
                return link.respond(&call.id, &call.name, error_response(message)).await;
            }
        };

        match invocation {
            ToolInvocation::Classify {
                category,
                alignment,
                reason,
            } => {
                let classified = {
                    let mut state = self.state();
                    if state.mode != SessionMode::MonitoredWork {
                        None
                    } else {
                        Some(state.apply_classification(
                            category,
                            alignment,
                            &self.policy,
                            &self.config,
                            Instant::now(),
                            Local::now(),
                        ))
                    }
                };
                let Some(classified) = classified else {
                    return link
                        .respond(
                            &call.id,
                            &call.name,
                            error_response("classification is only accepted during monitored work"),
                        )
                        .await;
                };
                info!(
                    score = %classified.score,
                    delta = classified.delta,
                    %category,
                    %alignment,
                    reason = %reason,
                    "screen classified"
                );
                self.emit(SessionEvent::Classified {
                    category,
                    alignment,
                    delta: classified.delta,
                    score: classified.score.value(),
                });
                link.respond(
                    &call.id,
                    &call.name,
                    json!({
                        "status": "updated",
                        "S": round1(classified.score.value()),
                        "A": alignment.value(),
                        "cat": category.as_str(),
                    }),
                )
                .await
            }
            ToolInvocation::SetTask { task } => {
                {
                    let mut state = self.state();
                    state.task = Some(task.clone());
                    state.force_speak_until = None;
                }
                info!(task = %task, "task declared");
                self.emit(SessionEvent::TaskSet(task.clone()));
                link.respond(
                    &call.id,
                    &call.name,
                    json!({"status": "task_set", "current_task": task}),
                )
                .await
            }
            ToolInvocation::RequestClose {
                reason,
                target_window,
            } => {
                self.request_close(
                    CloseOrigin::ToolCall { id: call.id },
                    reason,
                    target_window,
                    link,
                )
                .await
            }
            ToolInvocation::ReportMood { mood, intensity } => {
                debug!(mood = %mood, intensity, "mood reported");
                for event in mood_events(&mood, intensity) {
                    self.collab.overlay.send(event);
                }
                self.emit(SessionEvent::Mood {
                    mood: mood.clone(),
                    intensity,
                });
                link.respond(
                    &call.id,
                    &call.name,
                    json!({"status": "mood_reported", "mood": mood, "intensity": intensity}),
                )
                .await
            }
        }
    }

    // -- Corrective close --

    async fn list_windows(&self) -> Vec<WindowInfo> {
        let windows = Arc::clone(&self.collab.windows);
        match tokio::task::spawn_blocking(move || windows.list_visible_windows()).await {
            Ok(Ok(list)) => list,
            Ok(Err(e)) => {
                warn!("window listing failed: {e}");
                Vec::new()
            }
            Err(e) => {
                warn!("window listing task failed: {e}");
                Vec::new()
            }
        }
    }

    /// Validate a close request and schedule it. Protected or unknown
    /// targets are refused immediately without touching the score.
    async fn request_close(
        self: &Arc<Self>,
        origin: CloseOrigin,
        reason: String,
        target: Option<String>,
        link: &LinkContext,
    ) -> Result<()> {
        let monitoring = self.state().mode == SessionMode::MonitoredWork;
        let checked = if !monitoring {
            Err("closing windows is only allowed during monitored work".to_owned())
        } else {
            let windows = self.list_windows().await;
            let requested = target.as_deref().unwrap_or_default();
            match find_window(&windows, requested) {
                None => Err(format!(
                    "Could not find window matching '{requested}'. Provide the exact title from open_windows list."
                )),
                Some(window) if is_protected(&window.title, &self.config.windows.protected) => {
                    Err(format!("Did not close. '{}' is a protected app.", window.title))
                }
                Some(window) => Ok(window.clone()),
            }
        };

        match checked {
            Ok(window) => {
                self.schedule_close(origin, window, reason, link);
                Ok(())
            }
            Err(message) => {
                warn!(window = ?target, "close refused: {message}");
                self.emit(SessionEvent::CloseRejected {
                    target,
                    message: message.clone(),
                });
                match origin.tool_call_id() {
                    Some(id) => link.respond(id, CLOSE_DISTRACTING_TAB, error_response(message)).await,
                    None => Ok(()),
                }
            }
        }
    }

    /// Strike stage on a banned category: close the first visible,
    /// unprotected window matching a banned keyword.
    async fn auto_strike(self: &Arc<Self>, windows: &[WindowInfo], link: &LinkContext) {
        let banned = &self.config.windows.banned_keywords;
        let target = windows.iter().find(|w| {
            let title = w.title.to_lowercase();
            !title.trim().is_empty()
                && !is_protected(&w.title, &self.config.windows.protected)
                && banned.iter().any(|kw| title.contains(&kw.to_lowercase()))
        });
        match target {
            Some(window) => {
                info!(window = %window.title, "strike: closing distraction");
                self.schedule_close(
                    CloseOrigin::AutoStrike,
                    window.clone(),
                    "Auto-close at maximum suspicion".to_owned(),
                    link,
                );
            }
            None => debug!("strike: no banned window to close"),
        }
    }

    fn schedule_close(
        self: &Arc<Self>,
        origin: CloseOrigin,
        window: WindowInfo,
        reason: String,
        link: &LinkContext,
    ) {
        let cancel = link.cancel.child_token();
        let task = tokio::spawn(Arc::clone(self).run_close(
            origin.clone(),
            window.clone(),
            reason,
            link.clone(),
            cancel.clone(),
        ));
        let pending = PendingClose::new(origin, window.title.clone(), cancel, task);
        let replaced = self.pending().replace(pending);
        if let Some(old) = replaced {
            debug!(window = %old.target, "replacing scheduled close");
            drop(old.cancel());
        }

        info!(window = %window.title, "close scheduled");
        self.collab
            .overlay
            .send(OverlayEvent::animation(Animation::Angry));
        self.emit(SessionEvent::CloseScheduled {
            target: window.title,
        });
    }

    pub fn cancel_pending_close(&self) {
        if let Some(pending) = self.pending().take() {
            drop(pending.cancel());
        }
    }

    async fn run_close(
        self: Arc<Self>,
        origin: CloseOrigin,
        window: WindowInfo,
        reason: String,
        link: LinkContext,
        cancel: CancellationToken,
    ) {
        let outcome = wait_for_grace(
            &self.config.grace,
            link.playback.speaking(),
            self.speech.subscribe(),
            &cancel,
        )
        .await;

        let response = match outcome {
            GraceOutcome::Proceed => self.perform_close(&window, &reason).await,
            GraceOutcome::CancelledBySpeech => {
                info!(window = %window.title, "close cancelled: the user spoke");
                self.emit(SessionEvent::CloseCancelled {
                    target: window.title.clone(),
                    reason: CloseCancelReason::UserSpoke,
                });
                if origin.tool_call_id().is_none()
                    && let Err(e) = link
                        .send(ClientEvent::Text(close_cancelled_notice(&window.title)))
                        .await
                {
                    debug!("could not send cancellation notice: {e}");
                }
                json!({
                    "status": "cancelled",
                    "message": format!(
                        "The user spoke up; '{}' was not closed. Listen to them and re-evaluate.",
                        window.title
                    ),
                })
            }
            GraceOutcome::Aborted => {
                debug!(window = %window.title, "close aborted");
                self.emit(SessionEvent::CloseCancelled {
                    target: window.title.clone(),
                    reason: CloseCancelReason::Superseded,
                });
                json!({"status": "cancelled", "message": "superseded"})
            }
        };

        if let Some(id) = origin.tool_call_id()
            && let Err(e) = link.respond(id, CLOSE_DISTRACTING_TAB, response).await
        {
            debug!("could not answer close request: {e}");
        }
    }

    /// The grace period passed: re-check the target and close it.
    async fn perform_close(&self, window: &WindowInfo, reason: &str) -> Value {
        let current = self.list_windows().await;
        let Some(target) = current.iter().find(|w| w.handle == window.handle) else {
            return error_response(format!("'{}' is no longer open.", window.title));
        };
        if is_protected(&target.title, &self.config.windows.protected) {
            return error_response(format!("Did not close. '{}' is a protected app.", target.title));
        }

        let mode = close_mode_for(&target.title, &self.config.windows.browser_keywords);
        let windows = Arc::clone(&self.collab.windows);
        let handle = target.handle;
        let closed = tokio::task::spawn_blocking(move || windows.close_window(handle, mode))
            .await
            .map_err(|e| CoachError::Platform(format!("close task failed: {e}")))
            .and_then(|r| r);

        match closed {
            Ok(()) => {
                let action = match mode {
                    CloseMode::CloseTab => "tab close",
                    CloseMode::CloseWindow => "window close",
                };
                info!(window = %target.title, action, "window closed");
                self.state()
                    .hold_force_speak(Instant::now(), self.config.grace.force_speak_hold());
                self.collab
                    .overlay
                    .send(OverlayEvent::animation(Animation::Strike));
                self.emit(SessionEvent::ClosePerformed {
                    target: target.title.clone(),
                });
                json!({
                    "status": "success",
                    "message": format!("Closing '{}' via {action}: {reason}", target.title),
                })
            }
            Err(e) => {
                warn!(window = %target.title, "close failed: {e}");
                self.emit(SessionEvent::CloseRejected {
                    target: Some(target.title.clone()),
                    message: e.to_string(),
                });
                error_response(e.to_string())
            }
        }
    }
}
