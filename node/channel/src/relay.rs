//! Network log fan-out.
//!
//! The relay publishes a logging target under a unique `auto-<id>` name
//! so peers can ship their entries here, and discovers peer logging
//! targets so local entries can ship there. Discovery reruns whenever a
//! network-modified notification is broadcast, which is how newly
//! connected peers show up.
//!
//! Entries received from the network are logged locally with a `[NET]`
//! marker, and marked entries are never relayed again, so two relays
//! facing each other do not ping-pong. A `[LOCAL]` marker keeps an
//! entry off the network entirely.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;
use weft_registry::{Handler, Node};
use weft_wire::Rmt;

use crate::error::ChannelError;
use crate::log::{LogLevel, LogTarget, TracingLogTarget};
use crate::publisher::{publish_log, subscribe_log};

/// Marker on entries that already crossed the network once.
pub const NET_MARKER: &str = "[NET] ";
/// Marker on entries that must stay local.
pub const LOCAL_MARKER: &str = "[LOCAL] ";

const RESCAN_PROBE_WINDOW: Duration = Duration::from_millis(500);

/// Fans local log entries out to every discovered peer logging target.
pub struct NetworkLogRelay {
    node: Weak<Node>,
    local_name: String,
    targets: Mutex<Vec<String>>,
    min_level: LogLevel,
}

/// Receives remote entries and relogs them locally with the net marker.
struct RelayTarget;

impl LogTarget for RelayTarget {
    fn log(&self, level: LogLevel, message: &str, extra: Option<&str>) {
        TracingLogTarget.log(level, &format!("{NET_MARKER}{message}"), extra);
    }
}

/// Triggers a rescan whenever a network-modified broadcast arrives.
struct RescanTrigger {
    rescan: Arc<Notify>,
}

impl Handler for RescanTrigger {
    fn receive(&self, _source: Option<&str>, _payload: &[u8]) {}

    fn receive_broadcast(&self, _source: Option<&str>, payload: &[u8]) {
        if payload == [Rmt::Notify as u8] {
            self.rescan.notify_one();
        }
    }
}

impl NetworkLogRelay {
    /// Register the relay on a node and start its discovery task.
    ///
    /// Must run inside a tokio runtime. Entries below `min_level` stay
    /// local.
    pub fn start(node: &Arc<Node>, min_level: LogLevel) -> Result<Arc<Self>, ChannelError> {
        let local_name = format!("auto-{}", Uuid::new_v4().simple());
        publish_log(node, &local_name, Arc::new(RelayTarget))?;

        let rescan = Arc::new(Notify::new());
        node.publish(
            &format!("{local_name}-rescan"),
            Arc::new(RescanTrigger {
                rescan: rescan.clone(),
            }),
        )?;

        let relay = Arc::new(NetworkLogRelay {
            node: Arc::downgrade(node),
            local_name,
            targets: Mutex::new(Vec::new()),
            min_level,
        });

        let scanner = Arc::downgrade(&relay);
        tokio::spawn(async move {
            // One scan up front, then one per notification.
            loop {
                let Some(relay) = scanner.upgrade() else {
                    break;
                };
                relay.rescan().await;
                drop(relay);
                rescan.notified().await;
            }
        });

        Ok(relay)
    }

    /// Discover peer logging targets and replace the fan-out list.
    async fn rescan(&self) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let mut found = node
            .search_remotes(Rmt::LogEntry, RESCAN_PROBE_WINDOW)
            .await;
        // Our own published target answers the probe too.
        found.retain(|path| !path.ends_with(&self.local_name));
        debug!(targets = found.len(), "peer logging targets discovered");
        *self.targets.lock().unwrap_or_else(|e| e.into_inner()) = found;
    }

    fn targets(&self) -> Vec<String> {
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LogTarget for NetworkLogRelay {
    fn log(&self, level: LogLevel, message: &str, extra: Option<&str>) {
        if level < self.min_level
            || message.starts_with(NET_MARKER)
            || message.starts_with(LOCAL_MARKER)
        {
            return;
        }
        let Some(node) = self.node.upgrade() else {
            return;
        };
        for path in self.targets() {
            subscribe_log(&node, &path, self.min_level).log(level, message, extra);
        }
    }
}
