//! Simulated radio link with a built-in virtual device.
//!
//! Lets the bridge run end-to-end without a radio dongle: connections
//! always succeed, started log blocks stream synthetic samples at their
//! requested period, and a small parameter catalog behaves like a real
//! device's (capability validation, pull/push, group watch echoes).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::link::{
    LinkEvent, LinkEventSender, LogBlockSpec, ParamId, RadioLink, Setpoint, TelemetrySample,
};
use crate::params::ParamValue;

/// The virtual device's loggable variables and their steady-state values:
/// a motionless vehicle in hover attitude at sea level.
const DEVICE_VARIABLES: &[(&str, f32)] = &[
    ("acc.x", 0.0),
    ("acc.y", 0.0),
    ("acc.z", 1000.0),
    ("gyro.x", 0.0),
    ("gyro.y", 0.0),
    ("gyro.z", 0.0),
    ("mag.x", 0.0),
    ("mag.y", 0.0),
    ("mag.z", 0.0),
    ("baro.temp", 21.0),
    ("baro.pressure", 1013.25),
    ("pm.vbat", 3.9),
];

fn default_params() -> HashMap<String, ParamValue> {
    HashMap::from([
        ("flightmode.posSet".to_string(), ParamValue::from(0.0)),
        ("flightmode.yawMode".to_string(), ParamValue::from(0.0)),
        ("pm.lowVoltage".to_string(), ParamValue::from(3.2)),
        ("system.version".to_string(), ParamValue::from("sim-1.0")),
    ])
}

struct SimState {
    uri: Option<String>,
    params: HashMap<String, ParamValue>,
    watched_groups: Vec<String>,
    sent: u64,
    last_setpoint: Option<Setpoint>,
}

/// In-process [`RadioLink`] backed by a virtual device.
pub struct SimLink {
    events: LinkEventSender,
    connected: Arc<AtomicBool>,
    /// Bumped on every connect; running sample tickers stop when their
    /// generation falls behind.
    generation: Arc<AtomicU64>,
    state: Mutex<SimState>,
}

impl SimLink {
    pub fn new(events: LinkEventSender) -> Self {
        Self {
            events,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(SimState {
                uri: None,
                params: default_params(),
                watched_groups: Vec::new(),
                sent: 0,
                last_setpoint: None,
            }),
        }
    }

    /// Number of setpoints the virtual device has received.
    pub fn sent_count(&self) -> u64 {
        self.lock().sent
    }

    /// The most recent setpoint the virtual device has received.
    pub fn last_setpoint(&self) -> Option<Setpoint> {
        self.lock().last_setpoint
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::Link("link is not open".to_string()))
        }
    }
}

#[async_trait]
impl RadioLink for SimLink {
    async fn connect(&self, uri: &str) -> Result<()> {
        self.lock().uri = Some(uri.to_string());
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        debug!("Simulated device at {uri} is up");

        let _ = self.events.send(LinkEvent::Connected {
            uri: uri.to_string(),
        });
        let _ = self.events.send(LinkEvent::LinkQuality { percent: 100.0 });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let uri = self.lock().uri.clone().unwrap_or_default();
        let _ = self.events.send(LinkEvent::Disconnected { uri });
        Ok(())
    }

    async fn send_setpoint(&self, setpoint: Setpoint) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.lock();
        state.sent += 1;
        state.last_setpoint = Some(setpoint);
        Ok(())
    }

    async fn start_log_block(&self, spec: &LogBlockSpec) -> Result<()> {
        self.ensure_open()?;
        for variable in &spec.variables {
            if !DEVICE_VARIABLES.iter().any(|(name, _)| name == variable) {
                return Err(BridgeError::LogBlock {
                    block: spec.name.clone(),
                    reason: format!("variable {variable} is not in the device table"),
                });
            }
        }

        let events = self.events.clone();
        let connected = self.connected.clone();
        let generation = self.generation.clone();
        let target = generation.load(Ordering::SeqCst);
        let spec = spec.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(spec.period);
            loop {
                ticker.tick().await;
                if !connected.load(Ordering::SeqCst)
                    || generation.load(Ordering::SeqCst) != target
                {
                    break;
                }
                let mut sample = TelemetrySample::new(spec.name.clone());
                for variable in &spec.variables {
                    if let Some((_, value)) =
                        DEVICE_VARIABLES.iter().find(|(name, _)| name == variable)
                    {
                        sample = sample.with_value(variable.clone(), *value);
                    }
                }
                if events.send(LinkEvent::LogData(sample)).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn param_toc(&self) -> Result<Vec<ParamId>> {
        self.ensure_open()?;
        let mut toc: Vec<ParamId> = self
            .lock()
            .params
            .keys()
            .filter_map(|key| {
                key.split_once('.')
                    .map(|(group, name)| ParamId::new(group, name))
            })
            .collect();
        toc.sort_by(|a, b| a.device_name().cmp(&b.device_name()));
        Ok(toc)
    }

    async fn request_param(&self, name: &str) -> Result<ParamValue> {
        self.ensure_open()?;
        self.lock()
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::Param(format!("no such parameter: {name}")))
    }

    async fn set_param(&self, name: &str, value: &ParamValue) -> Result<()> {
        self.ensure_open()?;
        let echo = {
            let mut state = self.lock();
            if !state.params.contains_key(name) {
                return Err(BridgeError::Param(format!("no such parameter: {name}")));
            }
            state.params.insert(name.to_string(), value.clone());
            let group = name.split('.').next().unwrap_or_default().to_string();
            state.watched_groups.contains(&group)
        };
        // A real device confirms the write with a change notification.
        if echo {
            let _ = self.events.send(LinkEvent::ParamUpdated {
                name: name.to_string(),
                value: value.clone(),
            });
        }
        Ok(())
    }

    async fn watch_param_group(&self, group: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.lock();
        if !state
            .params
            .keys()
            .any(|key| key.split('.').next() == Some(group))
        {
            return Err(BridgeError::Param(format!(
                "no such parameter group: {group}"
            )));
        }
        if !state.watched_groups.iter().any(|g| g == group) {
            state.watched_groups.push(group.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::event_channel;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_reports_up_with_full_quality() {
        let (tx, mut rx) = event_channel();
        let link = SimLink::new(tx);

        link.connect("sim://1").await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            LinkEvent::Connected { uri } if uri == "sim://1"
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            LinkEvent::LinkQuality { percent } if percent == 100.0
        ));
    }

    #[tokio::test]
    async fn test_operations_require_open_link() {
        let (tx, _rx) = event_channel();
        let link = SimLink::new(tx);

        let err = link.send_setpoint(Setpoint::zero()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Link(_)));
        assert!(link.param_toc().await.is_err());
    }

    #[tokio::test]
    async fn test_long_run_keeps_count_and_latest_only() {
        let (tx, _rx) = event_channel();
        let link = SimLink::new(tx);
        link.connect("sim://1").await.unwrap();

        for thrust in 1..=10_000 {
            let setpoint = Setpoint {
                thrust,
                ..Setpoint::zero()
            };
            link.send_setpoint(setpoint).await.unwrap();
        }

        // The device journals nothing; only the tally and the newest survive.
        assert_eq!(link.sent_count(), 10_000);
        assert_eq!(
            link.last_setpoint(),
            Some(Setpoint {
                thrust: 10_000,
                ..Setpoint::zero()
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_variable_is_rejected() {
        let (tx, _rx) = event_channel();
        let link = SimLink::new(tx);
        link.connect("sim://1").await.unwrap();

        let spec = LogBlockSpec::new("imu", Duration::from_millis(10))
            .with_variable("acc.x")
            .with_variable("acc.w");
        let err = link.start_log_block(&spec).await.unwrap_err();

        assert!(matches!(err, BridgeError::LogBlock { block, .. } if block == "imu"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_block_streams_samples() {
        let (tx, mut rx) = event_channel();
        let link = SimLink::new(tx);
        link.connect("sim://1").await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let spec = LogBlockSpec::new("imu", Duration::from_millis(10))
            .with_variable("acc.z")
            .with_variable("gyro.x");
        link.start_log_block(&spec).await.unwrap();

        let event = rx.recv().await.unwrap();
        let LinkEvent::LogData(sample) = event else {
            panic!("expected a sample");
        };
        assert_eq!(sample.block, "imu");
        assert_eq!(sample.value("acc.z"), Some(1000.0));
        assert_eq!(sample.value("gyro.x"), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_streaming() {
        let (tx, mut rx) = event_channel();
        let link = SimLink::new(tx);
        link.connect("sim://1").await.unwrap();

        let spec = LogBlockSpec::new("imu", Duration::from_millis(10)).with_variable("acc.z");
        link.start_log_block(&spec).await.unwrap();
        link.disconnect().await.unwrap();

        // Give a stale ticker every chance to misbehave.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut saw_disconnected = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                LinkEvent::Disconnected { .. } => saw_disconnected = true,
                LinkEvent::LogData(_) => {
                    assert!(!saw_disconnected, "sample arrived after disconnect")
                }
                _ => {}
            }
        }
        assert!(saw_disconnected);
    }

    #[tokio::test]
    async fn test_catalog_pull_push_and_echo() {
        let (tx, mut rx) = event_channel();
        let link = SimLink::new(tx);
        link.connect("sim://1").await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let toc = link.param_toc().await.unwrap();
        assert!(toc
            .iter()
            .any(|id| id.device_name() == "flightmode.posSet"));

        assert_eq!(
            link.request_param("pm.lowVoltage").await.unwrap(),
            ParamValue::Number(3.2)
        );

        // Writes to a watched group come back as change notifications.
        link.watch_param_group("flightmode").await.unwrap();
        link.set_param("flightmode.posSet", &ParamValue::Number(1.0))
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            LinkEvent::ParamUpdated { name, value }
                if name == "flightmode.posSet" && value == ParamValue::Number(1.0)
        ));

        // Writes outside the catalog are rejected.
        assert!(link
            .set_param("nonsense.param", &ParamValue::Number(1.0))
            .await
            .is_err());
    }
}
