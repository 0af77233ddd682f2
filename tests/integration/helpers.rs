//! Fakes for the session's collaborators and a harness that runs a real
//! orchestrator against them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use serde_json::{Value, json};
use tama::audio::{
    AudioBackend, DeviceInfo, InputStream, MicResolver, NullSink, StreamFormat,
};
use tama::link::{
    ClientEvent, LiveConnection, PerceptionService, ServiceEvent, SessionSetup, ToolCall,
    ToolResponse,
};
use tama::overlay::BroadcastOverlay;
use tama::platform::{CloseMode, ScreenSampler, WindowInfo, WindowManager};
use tama::{
    CoachConfig, CoachError, Collaborators, Result, SessionCommand, SessionEvent, SessionHandle,
    SessionOrchestrator,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// How long helpers wait for something before failing the test.
pub const WAIT: Duration = Duration::from_secs(120);

// -- Desktop --

/// Window manager and screen with a fixed window list; records closes.
#[derive(Default)]
pub struct FakeDesktop {
    windows: Mutex<Vec<WindowInfo>>,
    active: Mutex<Option<WindowInfo>>,
    closed: Mutex<Vec<(u64, CloseMode)>>,
}

impl FakeDesktop {
    pub fn with_windows(titles: &[(&str, u64)]) -> Arc<Self> {
        let windows: Vec<WindowInfo> = titles
            .iter()
            .map(|(title, handle)| WindowInfo {
                title: (*title).to_owned(),
                handle: *handle,
            })
            .collect();
        let desktop = Self::default();
        *desktop.active.lock().unwrap() = windows.first().cloned();
        *desktop.windows.lock().unwrap() = windows;
        Arc::new(desktop)
    }

    pub fn closed(&self) -> Vec<(u64, CloseMode)> {
        self.closed.lock().unwrap().clone()
    }
}

impl WindowManager for FakeDesktop {
    fn list_visible_windows(&self) -> Result<Vec<WindowInfo>> {
        Ok(self.windows.lock().unwrap().clone())
    }

    fn active_window(&self) -> Result<Option<WindowInfo>> {
        Ok(self.active.lock().unwrap().clone())
    }

    fn close_window(&self, handle: u64, mode: CloseMode) -> Result<()> {
        self.closed.lock().unwrap().push((handle, mode));
        self.windows.lock().unwrap().retain(|w| w.handle != handle);
        Ok(())
    }
}

impl ScreenSampler for FakeDesktop {
    fn capture(&self) -> Result<DynamicImage> {
        Ok(DynamicImage::new_rgb8(64, 32))
    }
}

// -- Microphones --

/// Stream that yields silence, or a loud tone while the shared flag is set.
struct VoiceStream {
    talking: Arc<AtomicBool>,
}

impl InputStream for VoiceStream {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        std::thread::sleep(Duration::from_millis(10));
        let amplitude: i16 = if self.talking.load(Ordering::SeqCst) {
            8_000
        } else {
            0
        };
        Ok(std::iter::repeat_n(amplitude, 160)
            .flat_map(i16::to_le_bytes)
            .collect())
    }
}

/// Audio backend with a scripted device list.
#[derive(Default)]
pub struct FakeMics {
    pub devices: Vec<DeviceInfo>,
    pub broken: Vec<usize>,
    pub default: Option<usize>,
    pub talking: Arc<AtomicBool>,
}

impl FakeMics {
    /// No devices at all: capture ends at once.
    pub fn none() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// One working microphone whose speech is driven by [`FakeMics::talk`].
    pub fn single() -> Arc<Self> {
        Arc::new(Self {
            devices: vec![device(0, "Desk Microphone", "test")],
            default: Some(0),
            ..Self::default()
        })
    }

    pub fn talk(&self, talking: bool) {
        self.talking.store(talking, Ordering::SeqCst);
    }
}

pub fn device(index: usize, name: &str, host: &str) -> DeviceInfo {
    DeviceInfo {
        index,
        name: name.to_owned(),
        max_input_channels: 1,
        host: host.to_owned(),
    }
}

impl AudioBackend for FakeMics {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn default_input_name(&self) -> Option<String> {
        let index = self.default?;
        self.devices
            .iter()
            .find(|d| d.index == index)
            .map(|d| d.name.clone())
    }

    fn default_input_index(&self) -> Option<usize> {
        self.default
    }

    fn probe(&self, _index: usize, _format: &StreamFormat) -> bool {
        true
    }

    fn open_input(
        &self,
        index: Option<usize>,
        _format: &StreamFormat,
    ) -> Result<Box<dyn InputStream>> {
        let opens = match index {
            Some(i) => self.devices.iter().any(|d| d.index == i) && !self.broken.contains(&i),
            None => self.default.is_some_and(|i| !self.broken.contains(&i)),
        };
        if !opens {
            return Err(CoachError::Audio(format!("cannot open {index:?}")));
        }
        Ok(Box::new(VoiceStream {
            talking: Arc::clone(&self.talking),
        }))
    }
}

// -- Perception service --

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Accept,
    RejectHandle,
    Unreachable,
}

/// The service end of one accepted connection.
pub struct ServiceSide {
    pub to_client: mpsc::Sender<Result<ServiceEvent>>,
    pub from_client: mpsc::Receiver<ClientEvent>,
}

impl ServiceSide {
    pub async fn push(&self, event: ServiceEvent) {
        self.to_client.send(Ok(event)).await.unwrap();
    }

    pub async fn call(&self, id: &str, name: &str, args: Value) {
        self.push(ServiceEvent::ToolCall(ToolCall::new(id, name, &args)))
            .await;
    }

    /// Read client events until the answer to `id` arrives.
    pub async fn response(&mut self, id: &str) -> ToolResponse {
        let wait = async {
            loop {
                match self.from_client.recv().await {
                    Some(ClientEvent::ToolResponse(response)) if response.id == id => {
                        return response;
                    }
                    Some(_) => {}
                    None => panic!("connection closed before response to {id}"),
                }
            }
        };
        tokio::time::timeout(WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("no response to {id}"))
    }

    /// Read client events until a directive text arrives.
    pub async fn directive(&mut self) -> String {
        let wait = async {
            loop {
                match self.from_client.recv().await {
                    Some(ClientEvent::Text(text)) if text.starts_with("[SYSTEM]") => return text,
                    Some(_) => {}
                    None => panic!("connection closed before a directive"),
                }
            }
        };
        tokio::time::timeout(WAIT, wait).await.expect("no directive")
    }

    /// Keep reading client events in the background so sends never block.
    pub fn drain(self) -> mpsc::Sender<Result<ServiceEvent>> {
        let Self {
            to_client,
            mut from_client,
        } = self;
        tokio::spawn(async move { while from_client.recv().await.is_some() {} });
        to_client
    }
}

/// Channel-backed service: each accepted connection hands its far end to the test.
pub struct ScriptedService {
    script: Mutex<VecDeque<Attempt>>,
    setups: Mutex<Vec<SessionSetup>>,
    sides: mpsc::UnboundedSender<ServiceSide>,
}

impl ScriptedService {
    pub fn new(script: &[Attempt]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServiceSide>) {
        let (sides, rx) = mpsc::unbounded_channel();
        let service = Self {
            script: Mutex::new(script.iter().copied().collect()),
            setups: Mutex::new(Vec::new()),
            sides,
        };
        (Arc::new(service), rx)
    }

    /// Every setup seen so far, in order.
    pub fn setups(&self) -> Vec<SessionSetup> {
        self.setups.lock().unwrap().clone()
    }
}

#[async_trait]
impl PerceptionService for ScriptedService {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveConnection> {
        self.setups.lock().unwrap().push(setup.clone());
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Accept);
        match attempt {
            Attempt::RejectHandle => return Err(CoachError::StaleResumption),
            Attempt::Unreachable => {
                return Err(CoachError::Transport("connection refused".into()));
            }
            Attempt::Accept => {}
        }

        let (outbound, from_client) = mpsc::channel(1024);
        let (to_client, inbound) = mpsc::channel(64);
        let _ = self.sides.send(ServiceSide {
            to_client,
            from_client,
        });
        Ok(LiveConnection { outbound, inbound })
    }
}

// -- Harness --

/// A running orchestrator wired to fakes.
pub struct Harness {
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<SessionEvent>,
    pub desktop: Arc<FakeDesktop>,
    pub mics: Arc<FakeMics>,
    pub service: Arc<ScriptedService>,
    pub sides: mpsc::UnboundedReceiver<ServiceSide>,
    task: JoinHandle<Result<()>>,
}

impl Harness {
    pub fn start(
        config: CoachConfig,
        desktop: Arc<FakeDesktop>,
        mics: Arc<FakeMics>,
        script: &[Attempt],
    ) -> Self {
        let (service, sides) = ScriptedService::new(script);
        let collab = Collaborators {
            service: service.clone(),
            windows: desktop.clone(),
            screen: desktop.clone(),
            mics: Arc::new(MicResolver::new(mics.clone(), &config.audio)),
            speaker: Arc::new(NullSink),
            overlay: Arc::new(BroadcastOverlay::new(64)),
        };
        let (orchestrator, handle) = SessionOrchestrator::new(config, collab);
        let events = handle.subscribe();
        let task = tokio::spawn(orchestrator.run());
        Self {
            handle,
            events,
            desktop,
            mics,
            service,
            sides,
            task,
        }
    }

    pub fn send(&self, command: SessionCommand) {
        self.handle.send(command).unwrap();
    }

    /// The next accepted connection.
    pub async fn accepted(&mut self) -> ServiceSide {
        tokio::time::timeout(WAIT, self.sides.recv())
            .await
            .expect("no connection accepted")
            .expect("service dropped")
    }

    /// Wait for the first event matching `pred`, skipping others.
    pub async fn expect_event(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        let events = &mut self.events;
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        };
        tokio::time::timeout(WAIT, wait).await.expect("event not seen")
    }

    pub async fn shutdown(self) {
        self.handle.shutdown();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("orchestrator did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Defaults with no greeting window.
pub fn quiet_config() -> CoachConfig {
    let mut config = CoachConfig::default();
    config.escalation.greeting_window_secs = 0;
    config
}

pub fn classify(category: &str, alignment: f64) -> Value {
    json!({"category": category, "alignment": alignment, "reason": "test"})
}
