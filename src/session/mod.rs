//! # Session Module
//!
//! One session per vehicle: the connection state machine, the setpoint
//! watchdog, and the glue between link events and the bus.
//!
//! This module handles:
//! - The watchdog loop, the session's only long-lived task
//! - Lifecycle transitions driven by link events
//! - Device session setup (log blocks, parameter sweep) on connect
//! - Command ingest, the emergency latch, and the shutdown drain
//!
//! The device free-falls if no command arrives for about half a second, so
//! the watchdog never pauses longer than the configured send period while
//! Connected and sends the zero setpoint whenever nobody is commanding the
//! vehicle.

pub mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::bus::{CommandSource, ParamStore, TelemetrySink, VelocityCommand};
use crate::config::VehicleConfig;
use crate::link::{DriverGuard, LinkEvent, LinkEventReceiver, RadioLink, Setpoint};
use crate::params::ParamSync;
use crate::telemetry::{environmental_block, inertial_block, TelemetryPublisher};

pub use state::{ConnectionState, SessionState};

use state::transition;

/// Timing and threshold knobs for one session, lifted out of the
/// configuration so tests can tighten them.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Pause between watchdog sends while Connected. Must stay well under
    /// the device's ~500 ms command-timeout failsafe.
    pub send_period: Duration,
    /// Pause between lifecycle checks while a connection attempt is pending.
    pub connecting_poll: Duration,
    /// Number of zero-setpoints sent by the shutdown drain.
    pub shutdown_setpoint_count: u32,
    /// Pause between shutdown zero-setpoints.
    pub shutdown_setpoint_interval: Duration,
    /// Extra wait for the last packet to leave the transport before the
    /// link closes.
    pub settle: Duration,
    /// Requested period of the inertial log block.
    pub inertial_period: Duration,
    /// Requested period of the environmental log block.
    pub environmental_period: Duration,
    /// Link quality (percent) below which a warning is logged.
    pub quality_warn_threshold: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            send_period: Duration::from_millis(200),
            connecting_poll: Duration::from_millis(500),
            shutdown_setpoint_count: 100,
            shutdown_setpoint_interval: Duration::from_millis(10),
            settle: Duration::from_millis(100),
            inertial_period: Duration::from_millis(10),
            environmental_period: Duration::from_millis(100),
            quality_warn_threshold: 80.0,
        }
    }
}

/// The bus endpoints a session reads from and publishes to.
#[derive(Clone)]
pub struct BusEndpoints {
    pub commands: Arc<dyn CommandSource>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub params: Arc<dyn ParamStore>,
}

/// One vehicle's bridge session.
///
/// Owns the event receiver and all lifecycle decisions. Runs as a single
/// tokio task; everything the link reports is handled between sends,
/// inside that task.
pub struct Session {
    vehicle: VehicleConfig,
    settings: SessionSettings,
    shared: Arc<Mutex<SessionState>>,
    link: Arc<dyn RadioLink>,
    events: LinkEventReceiver,
    events_closed: bool,
    commands: Arc<dyn CommandSource>,
    publisher: TelemetryPublisher,
    params: Arc<ParamSync>,
}

impl Session {
    /// Create a session and start its watchdog task.
    ///
    /// The guard witnesses that [`crate::link::init_drivers`] has run;
    /// sessions must not outlive it.
    pub fn spawn(
        _drivers: &DriverGuard,
        vehicle: VehicleConfig,
        settings: SessionSettings,
        link: Arc<dyn RadioLink>,
        events: LinkEventReceiver,
        bus: BusEndpoints,
    ) -> SessionHandle {
        info!(
            "Adding {} as {} with trim({}, {}). Logging: {}",
            vehicle.uri, vehicle.prefix, vehicle.roll_trim, vehicle.pitch_trim, vehicle.enable_logging
        );

        let shared = Arc::new(Mutex::new(SessionState::new()));
        let params = Arc::new(ParamSync::new(
            link.clone(),
            bus.params,
            vehicle.prefix.clone(),
        ));
        let prefix = vehicle.prefix.clone();
        let (roll_trim, pitch_trim) = (vehicle.roll_trim, vehicle.pitch_trim);

        let session = Session {
            vehicle,
            settings,
            shared: shared.clone(),
            link: link.clone(),
            events,
            events_closed: false,
            commands: bus.commands,
            publisher: TelemetryPublisher::new(bus.telemetry),
            params: params.clone(),
        };
        let task = tokio::spawn(session.run());

        SessionHandle {
            prefix,
            roll_trim,
            pitch_trim,
            shared,
            link,
            params,
            task: Some(task),
        }
    }

    /// The watchdog loop. Runs until shutdown is requested or the
    /// emergency latch trips, then performs the shutdown drain
    /// unconditionally.
    async fn run(mut self) {
        loop {
            let (connection, stop) = {
                let state = self.lock();
                (state.connection, state.emergency || state.shutdown)
            };
            if stop {
                break;
            }

            match connection {
                ConnectionState::Disconnected => self.start_connecting().await,
                ConnectionState::Connected => {
                    self.send_cycle().await;
                    self.idle(self.settings.send_period).await;
                }
                ConnectionState::Connecting => {
                    self.idle(self.settings.connecting_poll).await;
                }
            }
        }
        self.shutdown_sequence().await;
    }

    /// Issue a link-open request. The outcome arrives later as a link
    /// event; an immediately rejected request costs one connecting-poll
    /// interval so a broken driver cannot spin the loop hot.
    async fn start_connecting(&mut self) {
        info!("Connecting to {}", self.vehicle.uri);
        self.lock().connection = ConnectionState::Connecting;
        if let Err(err) = self.link.connect(&self.vehicle.uri).await {
            error!("Connection to {} failed: {err}", self.vehicle.uri);
            self.lock().connection = ConnectionState::Disconnected;
            self.idle(self.settings.connecting_poll).await;
        }
    }

    /// One Connected-phase send: the latest external setpoint while a
    /// commander is attached, the zero setpoint otherwise.
    async fn send_cycle(&mut self) {
        let setpoint = {
            let mut state = self.lock();
            if self.commands.publisher_count() == 0 {
                state.setpoint = Setpoint::zero();
            }
            state.setpoint
        };
        if let Err(err) = self.link.send_setpoint(setpoint).await {
            warn!("Setpoint send to {} failed: {err}", self.vehicle.uri);
        }
    }

    /// Wait out `period`, handling link events as they arrive. A lifecycle
    /// transition cuts the wait short so the loop can react immediately.
    async fn idle(&mut self, period: Duration) {
        let deadline = Instant::now() + period;
        loop {
            let event = tokio::select! {
                _ = sleep_until(deadline) => return,
                event = self.events.recv(), if !self.events_closed => event,
            };
            match event {
                Some(event) => {
                    if self.handle_event(event).await {
                        return;
                    }
                }
                None => self.events_closed = true,
            }
        }
    }

    /// Apply one link event. Returns `true` when the lifecycle moved, so
    /// the watchdog re-evaluates without waiting out its idle period.
    async fn handle_event(&mut self, event: LinkEvent) -> bool {
        match &event {
            LinkEvent::Connected { uri } => info!("Connected to {uri}"),
            LinkEvent::ConnectionFailed { uri, reason } => {
                error!("Connection to {uri} failed: {reason}");
            }
            LinkEvent::ConnectionLost { uri, reason } => {
                error!("Connection to {uri} lost: {reason}");
            }
            LinkEvent::Disconnected { uri } => error!("Disconnected from {uri}"),
            LinkEvent::LinkQuality { percent } => {
                if *percent < self.settings.quality_warn_threshold {
                    warn!(
                        "Link quality of {} is {percent:.0}%",
                        self.vehicle.prefix
                    );
                }
                return false;
            }
            LinkEvent::LogData(sample) => {
                self.publisher.handle_sample(sample);
                return false;
            }
            LinkEvent::LogError { block, reason } => {
                error!("Error when logging {block}: {reason}");
                return false;
            }
            LinkEvent::ParamUpdated { name, value } => {
                self.params.on_device_update(name, value.clone());
                return false;
            }
        }

        let next = {
            let mut state = self.lock();
            let next = transition(state.connection, &event);
            if let Some(next) = next {
                state.connection = next;
            } else {
                debug!(
                    "Ignoring {event:?} in state {:?} for {}",
                    state.connection, self.vehicle.prefix
                );
            }
            next
        };
        match next {
            Some(ConnectionState::Connected) => {
                self.session_setup().await;
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Device session setup, run once on entering Connected: start the two
    /// standard log blocks (when logging is enabled), then sweep the
    /// parameter catalog. A block the device rejects stays off for the
    /// rest of the session; a failed sweep leaves parameters out of sync
    /// but does not drop the connection.
    async fn session_setup(&mut self) {
        if self.vehicle.enable_logging {
            for spec in [
                inertial_block(self.settings.inertial_period),
                environmental_block(self.settings.environmental_period),
            ] {
                if let Err(err) = self.link.start_log_block(&spec).await {
                    error!("Could not start log block '{}': {err}", spec.name);
                }
            }
        }
        if let Err(err) = self.params.seed().await {
            error!(
                "Parameter sync for {} failed: {err}",
                self.vehicle.prefix
            );
        }
    }

    /// Unconditional teardown: drain the link queue with a fixed burst of
    /// zero-setpoints to force the device into a safe idle, give the last
    /// packet time to physically leave the transport, then close the link.
    /// Bounded by iteration count, never by the device acknowledging.
    async fn shutdown_sequence(&mut self) {
        debug!("Session {} shutting down", self.vehicle.prefix);
        for _ in 0..self.settings.shutdown_setpoint_count {
            if let Err(err) = self.link.send_setpoint(Setpoint::zero()).await {
                debug!("Shutdown setpoint send failed: {err}");
            }
            sleep(self.settings.shutdown_setpoint_interval).await;
        }
        sleep(self.settings.settle).await;
        if let Err(err) = self.link.disconnect().await {
            warn!("Closing link to {} failed: {err}", self.vehicle.uri);
        }
        self.lock().connection = ConnectionState::Disconnected;
        info!("Session {} closed", self.vehicle.prefix);
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// External handle to a running session.
///
/// Mirrors the per-vehicle control surface the bus exposes: command
/// ingest, parameter pushes, the emergency stop, and shutdown.
pub struct SessionHandle {
    prefix: String,
    roll_trim: f32,
    pitch_trim: f32,
    shared: Arc<Mutex<SessionState>>,
    link: Arc<dyn RadioLink>,
    params: Arc<ParamSync>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// The vehicle's name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Latest-wins command ingest.
    ///
    /// Applies trim and thrust clamping, stores the result for the
    /// watchdog, and mirrors it to the device immediately for
    /// responsiveness (the watchdog remains the liveness guarantee).
    /// Once the emergency latch is set the call is suppressed entirely:
    /// no setpoint write, no send.
    pub async fn submit_command(&self, command: &VelocityCommand) {
        let setpoint = Setpoint::from_command(command, self.roll_trim, self.pitch_trim);
        let connection = {
            let mut state = self.lock();
            if state.emergency {
                return;
            }
            state.setpoint = setpoint;
            state.connection
        };
        if connection == ConnectionState::Connected {
            if let Err(err) = self.link.send_setpoint(setpoint).await {
                warn!("Setpoint send to {} failed: {err}", self.prefix);
            }
        }
    }

    /// Push the stored parameter values at the given store-relative paths
    /// (`group/name`) down to the device. Returns the number of
    /// parameters pushed.
    pub async fn update_params(&self, paths: &[String]) -> usize {
        self.params.push_params(paths).await
    }

    /// Trip the emergency latch. Returns as soon as the latch is set; the
    /// watchdog performs the shutdown drain in the background. The latch
    /// is terminal.
    pub fn emergency(&self) {
        error!("Emergency requested for {}!", self.prefix);
        self.lock().emergency = true;
    }

    /// Request a graceful stop. The watchdog runs the same shutdown drain
    /// as an emergency, without tripping the latch.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
    }

    /// Current lifecycle state.
    pub fn connection(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Whether the emergency latch has been tripped.
    pub fn is_emergency(&self) -> bool {
        self.lock().emergency
    }

    /// Last setpoint written by command ingest (or the zero default).
    pub fn current_setpoint(&self) -> Setpoint {
        self.lock().setpoint
    }

    /// Wait for the watchdog task to finish its shutdown sequence.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("Session {} task failed: {err}", self.prefix);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
