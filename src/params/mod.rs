//! # Parameter Module
//!
//! Two-way synchronization between the device's parameter catalog and the
//! shared parameter store on the control plane.
//!
//! The device addresses parameters as `group.name`; the store keys them as
//! `<prefix>/<group>/<name>` so several vehicles can share one store. The
//! mapping functions here are the only place that translation happens.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::ParamStore;
use crate::error::Result;
use crate::link::RadioLink;

/// A device parameter value.
///
/// The device catalog only distinguishes numeric and textual entries, so
/// numbers are carried uniformly as `f64` regardless of their on-device
/// width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

/// Map a device identifier (`group.name`) to a store path fragment
/// (`group/name`).
pub fn device_to_path(device_name: &str) -> String {
    device_name.replace('.', "/")
}

/// Map a store path fragment (`group/name`) back to the device identifier
/// (`group.name`).
pub fn path_to_device(path: &str) -> String {
    path.replace('/', ".")
}

/// Full store path for a device parameter under a vehicle prefix.
pub fn prefixed_path(prefix: &str, device_name: &str) -> String {
    format!("{}/{}", prefix, device_to_path(device_name))
}

/// Keeps one vehicle's parameters aligned between device and store.
pub struct ParamSync {
    link: Arc<dyn RadioLink>,
    store: Arc<dyn ParamStore>,
    prefix: String,
}

impl ParamSync {
    pub fn new(link: Arc<dyn RadioLink>, store: Arc<dyn ParamStore>, prefix: impl Into<String>) -> Self {
        Self {
            link,
            store,
            prefix: prefix.into(),
        }
    }

    /// Initial sweep over the device catalog, run once per connection.
    ///
    /// For every catalog entry: a value already present in the store is an
    /// operator override and gets pushed to the device; otherwise the
    /// device's value is pulled into the store. Afterwards every group in
    /// the catalog is watched for device-originated changes.
    ///
    /// Individual entry failures are logged and skipped so one bad
    /// parameter cannot abort the sweep.
    ///
    /// # Errors
    ///
    /// Returns an error only when the catalog itself cannot be fetched.
    pub async fn seed(&self) -> Result<()> {
        let toc = self.link.param_toc().await?;
        info!(
            "Synchronizing {} parameters for {}",
            toc.len(),
            self.prefix
        );

        let mut groups: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for id in toc {
            groups.entry(id.group.clone()).or_default().push(id);
        }

        for (group, entries) in groups {
            if let Err(err) = self.link.watch_param_group(&group).await {
                warn!("Failed to watch parameter group {group}: {err}");
            }

            for id in entries {
                let device_name = id.device_name();
                let path = prefixed_path(&self.prefix, &device_name);

                if let Some(value) = self.store.get(&path) {
                    debug!("Pushing override {path} = {value}");
                    if let Err(err) = self.link.set_param(&device_name, &value).await {
                        warn!("Failed to push {device_name}: {err}");
                    }
                } else {
                    match self.link.request_param(&device_name).await {
                        Ok(value) => self.store.set(&path, value),
                        Err(err) => warn!("Failed to pull {device_name}: {err}"),
                    }
                }
            }
        }
        Ok(())
    }

    /// Record a device-originated parameter change in the store.
    pub fn on_device_update(&self, device_name: &str, value: ParamValue) {
        let path = prefixed_path(&self.prefix, device_name);
        debug!("Device updated {path} = {value}");
        self.store.set(&path, value);
    }

    /// Push the stored values at the given paths down to the device.
    ///
    /// Paths are store-relative (`group/name`, no vehicle prefix). There is
    /// no transactionality: each path is pushed independently, failures are
    /// logged, and the number of successful pushes is returned.
    pub async fn push_params(&self, paths: &[String]) -> usize {
        info!("Updating parameters {paths:?} for {}", self.prefix);
        let mut pushed = 0;
        for path in paths {
            let full = format!("{}/{}", self.prefix, path);
            let Some(value) = self.store.get(&full) else {
                warn!("No stored value at {full}, skipping");
                continue;
            };
            let device_name = path_to_device(path);
            match self.link.set_param(&device_name, &value).await {
                Ok(()) => pushed += 1,
                Err(err) => warn!("Failed to push {device_name}: {err}"),
            }
        }
        pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryParamStore;
    use crate::error::BridgeError;
    use crate::link::{LogBlockSpec, ParamId, Setpoint};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records parameter traffic and serves a fixed catalog.
    struct FakeLink {
        toc: Vec<ParamId>,
        device_values: Mutex<std::collections::HashMap<String, ParamValue>>,
        sets: Mutex<Vec<(String, ParamValue)>>,
        watches: Mutex<Vec<String>>,
        fail_pull: Option<String>,
    }

    impl FakeLink {
        fn new(toc: Vec<ParamId>) -> Self {
            Self {
                toc,
                device_values: Mutex::new(std::collections::HashMap::new()),
                sets: Mutex::new(Vec::new()),
                watches: Mutex::new(Vec::new()),
                fail_pull: None,
            }
        }

        fn with_device_value(self, name: &str, value: ParamValue) -> Self {
            self.device_values
                .lock()
                .unwrap()
                .insert(name.to_string(), value);
            self
        }

        fn failing_pull(mut self, name: &str) -> Self {
            self.fail_pull = Some(name.to_string());
            self
        }
    }

    #[async_trait]
    impl RadioLink for FakeLink {
        async fn connect(&self, _uri: &str) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn send_setpoint(&self, _setpoint: Setpoint) -> Result<()> {
            Ok(())
        }

        async fn start_log_block(&self, _spec: &LogBlockSpec) -> Result<()> {
            Ok(())
        }

        async fn param_toc(&self) -> Result<Vec<ParamId>> {
            Ok(self.toc.clone())
        }

        async fn request_param(&self, name: &str) -> Result<ParamValue> {
            if self.fail_pull.as_deref() == Some(name) {
                return Err(BridgeError::Param(format!("{name} unreadable")));
            }
            self.device_values
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| BridgeError::Param(format!("{name} not on device")))
        }

        async fn set_param(&self, name: &str, value: &ParamValue) -> Result<()> {
            self.sets
                .lock()
                .unwrap()
                .push((name.to_string(), value.clone()));
            Ok(())
        }

        async fn watch_param_group(&self, group: &str) -> Result<()> {
            self.watches.lock().unwrap().push(group.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_name_mapping() {
        assert_eq!(device_to_path("flightmode.posSet"), "flightmode/posSet");
        assert_eq!(path_to_device("flightmode/posSet"), "flightmode.posSet");
        assert_eq!(
            prefixed_path("cf1", "flightmode.posSet"),
            "cf1/flightmode/posSet"
        );
    }

    #[test]
    fn test_mapping_is_invertible() {
        let device = "ring.effect";
        assert_eq!(path_to_device(&device_to_path(device)), device);
    }

    #[tokio::test]
    async fn test_seed_pushes_overrides_and_pulls_the_rest() {
        let link = Arc::new(
            FakeLink::new(vec![
                ParamId::new("flightmode", "posSet"),
                ParamId::new("ring", "effect"),
            ])
            .with_device_value("flightmode.posSet", ParamValue::Number(0.0))
            .with_device_value("ring.effect", ParamValue::Number(6.0)),
        );
        let store = Arc::new(MemoryParamStore::new());
        // Operator override present before the session connects.
        store.set("cf1/flightmode/posSet", ParamValue::Number(1.0));

        let sync = ParamSync::new(link.clone(), store.clone(), "cf1");
        sync.seed().await.unwrap();

        // The override went down to the device.
        assert_eq!(
            link.sets.lock().unwrap().as_slice(),
            &[("flightmode.posSet".to_string(), ParamValue::Number(1.0))]
        );
        // The unknown entry came up from the device.
        assert_eq!(
            store.get("cf1/ring/effect"),
            Some(ParamValue::Number(6.0))
        );
        // The override in the store was not clobbered.
        assert_eq!(
            store.get("cf1/flightmode/posSet"),
            Some(ParamValue::Number(1.0))
        );
        // Both groups are watched.
        assert_eq!(
            link.watches.lock().unwrap().as_slice(),
            &["flightmode".to_string(), "ring".to_string()]
        );
    }

    #[tokio::test]
    async fn test_seed_survives_entry_failures() {
        let link = Arc::new(
            FakeLink::new(vec![
                ParamId::new("bad", "entry"),
                ParamId::new("pm", "lowVoltage"),
            ])
            .with_device_value("pm.lowVoltage", ParamValue::Number(3.2))
            .failing_pull("bad.entry"),
        );
        let store = Arc::new(MemoryParamStore::new());

        let sync = ParamSync::new(link, store.clone(), "cf1");
        sync.seed().await.unwrap();

        assert!(!store.contains("cf1/bad/entry"));
        assert_eq!(store.get("cf1/pm/lowVoltage"), Some(ParamValue::Number(3.2)));
    }

    #[tokio::test]
    async fn test_device_update_lands_under_prefix() {
        let link = Arc::new(FakeLink::new(Vec::new()));
        let store = Arc::new(MemoryParamStore::new());

        let sync = ParamSync::new(link, store.clone(), "cf2");
        sync.on_device_update("pm.vbat", ParamValue::from(3.9));
        sync.on_device_update("system.version", String::from("fw-2024.10").into());

        assert_eq!(store.get("cf2/pm/vbat"), Some(ParamValue::Number(3.9)));
        assert_eq!(
            store.get("cf2/system/version"),
            Some(ParamValue::Text("fw-2024.10".into()))
        );
    }

    #[tokio::test]
    async fn test_push_params_skips_missing_paths() {
        let link = Arc::new(FakeLink::new(Vec::new()));
        let store = Arc::new(MemoryParamStore::new());
        store.set("cf1/flightmode/posSet", ParamValue::Number(1.0));

        let sync = ParamSync::new(link.clone(), store, "cf1");
        let pushed = sync
            .push_params(&[
                "flightmode/posSet".to_string(),
                "flightmode/missing".to_string(),
            ])
            .await;

        assert_eq!(pushed, 1);
        assert_eq!(
            link.sets.lock().unwrap().as_slice(),
            &[("flightmode.posSet".to_string(), ParamValue::Number(1.0))]
        );
    }
}
