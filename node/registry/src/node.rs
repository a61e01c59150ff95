//! The routing core: named handlers, named links, and dispatch.

use crate::error::RegistryError;
use crate::link::LinkRef;
use crate::path::split_first;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;
use weft_wire::Rmt;

/// Dispatch slower than this logs a warning but is not aborted;
/// correctness over latency.
const SLOW_DISPATCH_WARN: Duration = Duration::from_secs(1);

/// A local receiver registered under a path.
///
/// Direct deliveries and broadcasts arrive through distinct entry points;
/// most handlers only care about direct traffic and leave the broadcast
/// default in place.
pub trait Handler: Send + Sync {
    /// A message addressed exactly to this handler's path.
    fn receive(&self, source: Option<&str>, payload: &[u8]);

    /// A broadcast message (no destination).
    fn receive_broadcast(&self, source: Option<&str>, payload: &[u8]) {
        let _ = (source, payload);
    }
}

/// Adapter turning a closure into a direct-delivery [`Handler`].
pub struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(Option<&str>, &[u8]) + Send + Sync,
{
    fn receive(&self, source: Option<&str>, payload: &[u8]) {
        (self.0)(source, payload);
    }
}

/// The local routing registry.
///
/// Handler and link names share one namespace: at most one registration
/// per name. Registries are read-heavy with occasional structural
/// mutation; dispatch snapshots the relevant map before invoking anything.
#[derive(Default)]
pub struct Node {
    handlers: DashMap<String, Arc<dyn Handler>>,
    links: DashMap<String, LinkRef>,
}

impl Node {
    /// Create an empty node.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(name: &str) -> Result<(), RegistryError> {
        if name.is_empty() || name.contains('/') {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Register a local handler under `name`.
    ///
    /// Fails if the name is already taken by a handler or link; use
    /// [`Node::publish_replace`] for explicit replace semantics.
    pub fn publish(&self, name: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        Self::check_name(name)?;
        if self.links.contains_key(name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        match self.handlers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::NameTaken(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Register a local handler, displacing any existing registration.
    pub fn publish_replace(
        &self,
        name: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        Self::check_name(name)?;
        self.links.remove(name);
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    /// Remove a handler registration. Returns whether one existed.
    pub fn unpublish(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Register a link, displacing any existing registration.
    ///
    /// Reconnecting transports re-register under the same name, so
    /// replacement is the norm here rather than an error.
    pub fn add_or_replace_link(&self, name: &str, link: LinkRef) -> Result<(), RegistryError> {
        Self::check_name(name)?;
        self.handlers.remove(name);
        if self.links.insert(name.to_string(), link).is_some() {
            debug!(link = name, "replaced existing link");
        }
        Ok(())
    }

    /// Remove a link. Returns the removed link, if any.
    pub fn remove_link(&self, name: &str) -> Option<LinkRef> {
        self.links.remove(name).map(|(_, link)| link)
    }

    /// Whether a link is registered under `name`.
    pub fn has_link(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    /// Look up a link by name.
    pub fn link(&self, name: &str) -> Option<LinkRef> {
        self.links.get(name).map(|entry| entry.value().clone())
    }

    /// Core dispatch.
    ///
    /// An absent or empty destination broadcasts to every handler and
    /// every link except `deny` (the link the message arrived from, so it
    /// never receives its own traffic back). An exact handler match
    /// delivers directly. Otherwise the leading path segment selects a
    /// link and the remainder becomes the forwarded destination.
    pub fn transmit(
        &self,
        dest: Option<&str>,
        source: Option<&str>,
        payload: &[u8],
        deny: Option<&LinkRef>,
    ) {
        let dest = dest.filter(|d| !d.is_empty());
        let Some(dest) = dest else {
            self.broadcast_all(source, payload, deny);
            return;
        };

        if let Some(handler) = self.handlers.get(dest).map(|e| e.value().clone()) {
            dispatch(dest, || handler.receive(source, payload));
            return;
        }

        let (head, rest) = split_first(dest);
        if let Some(link) = self.links.get(head).map(|e| e.value().clone()) {
            if !link.try_send(rest, source, payload) {
                debug!(link = head, dest, "link unable to carry message");
            }
        } else {
            warn!(dest, ?source, "could not find destination");
        }
    }

    fn broadcast_all(&self, source: Option<&str>, payload: &[u8], deny: Option<&LinkRef>) {
        let handlers: Vec<(String, Arc<dyn Handler>)> = self
            .handlers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (name, handler) in handlers {
            dispatch(&name, || handler.receive_broadcast(source, payload));
        }

        let links: Vec<LinkRef> = self
            .links
            .iter()
            .filter(|e| deny.map_or(true, |d| !Arc::ptr_eq(d, e.value())))
            .map(|e| e.value().clone())
            .collect();
        for link in links {
            link.try_send(None, source, payload);
        }
    }

    /// Broadcast `payload` from an optional source path.
    pub fn broadcast(&self, source: Option<&str>, payload: &[u8]) {
        self.transmit(None, source, payload, None);
    }

    /// Announce that the network layout changed, prompting subscribers to
    /// re-announce and discovery-driven components to re-scan.
    pub fn notify_network_modified(&self) {
        self.broadcast(None, &[Rmt::Notify as u8]);
    }

    /// Collect the paths of all publishers of the given channel kind.
    ///
    /// Broadcasts a discovery probe and gathers responses for the timeout
    /// window; returns as soon as it elapses.
    pub async fn search_remotes(self: &Arc<Self>, tag: Rmt, timeout: Duration) -> Vec<String> {
        let collector = format!("rsch-{}", Uuid::new_v4().simple());
        let found: Arc<Mutex<Vec<String>>> = Arc::default();

        let sink = found.clone();
        let want = tag as u8;
        let handler = FnHandler(move |source: Option<&str>, payload: &[u8]| {
            if payload.len() == 2 && payload[0] == Rmt::Ping as u8 && payload[1] == want {
                if let Some(source) = source {
                    if let Ok(mut sink) = sink.lock() {
                        sink.push(source.to_string());
                    }
                }
            }
        });
        if let Err(err) = self.publish(&collector, Arc::new(handler)) {
            error!(%err, "failed to register discovery collector");
            return Vec::new();
        }

        self.broadcast(Some(&collector), &[Rmt::Ping as u8]);
        tokio::time::sleep(timeout).await;
        self.unpublish(&collector);

        let mut found = found.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *found)
    }
}

/// Run one handler invocation, containing panics and flagging slow dispatch.
///
/// One bad subscriber must never break delivery to others, and a slow one
/// is a diagnostic, not a failure.
fn dispatch(name: &str, f: impl FnOnce()) {
    let start = Instant::now();
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(handler = name, "handler panicked during dispatch");
    }
    let took = start.elapsed();
    if took > SLOW_DISPATCH_WARN {
        warn!(handler = name, ?took, "handler took a long time to process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingLink {
        sent: Mutex<Vec<(Option<String>, Option<String>, Vec<u8>)>>,
        alive: bool,
    }

    impl RecordingLink {
        fn new(alive: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                alive,
            })
        }
    }

    impl Link for RecordingLink {
        fn try_send(&self, dest: Option<&str>, source: Option<&str>, payload: &[u8]) -> bool {
            self.sent.lock().unwrap().push((
                dest.map(String::from),
                source.map(String::from),
                payload.to_vec(),
            ));
            self.alive
        }
    }

    fn counting_handler(count: Arc<AtomicUsize>) -> Arc<dyn Handler> {
        Arc::new(FnHandler(move |_: Option<&str>, _: &[u8]| {
            count.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_direct_dispatch() {
        let node = Node::new();
        let count = Arc::new(AtomicUsize::new(0));
        node.publish("sensor", counting_handler(count.clone())).unwrap();

        node.transmit(Some("sensor"), None, &[1], None);
        node.transmit(Some("other"), None, &[1], None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prefix_forwarding_strips_head() {
        let node = Node::new();
        let link = RecordingLink::new(true);
        node.add_or_replace_link("tcp_1", link.clone()).unwrap();

        node.transmit(Some("tcp_1/robot/drive"), Some("gui"), &[5], None);
        node.transmit(Some("tcp_1"), None, &[6], None);

        let sent = link.sent.lock().unwrap();
        assert_eq!(sent[0].0.as_deref(), Some("robot/drive"));
        assert_eq!(sent[0].1.as_deref(), Some("gui"));
        // A bare link name forwards with no remainder: remote broadcast.
        assert_eq!(sent[1].0, None);
    }

    #[test]
    fn test_duplicate_publish_rejected() {
        let node = Node::new();
        node.publish("x", counting_handler(Arc::default())).unwrap();
        assert!(matches!(
            node.publish("x", counting_handler(Arc::default())),
            Err(RegistryError::NameTaken(_))
        ));

        node.add_or_replace_link("lnk", RecordingLink::new(true)).unwrap();
        assert!(node.publish("lnk", counting_handler(Arc::default())).is_err());

        // Explicit replace takes the name over.
        node.publish_replace("lnk", counting_handler(Arc::default())).unwrap();
        assert!(!node.has_link("lnk"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let node = Node::new();
        assert!(node.publish("", counting_handler(Arc::default())).is_err());
        assert!(node.publish("a/b", counting_handler(Arc::default())).is_err());
    }

    #[test]
    fn test_broadcast_skips_deny_link() {
        let node = Node::new();
        let keep = RecordingLink::new(true);
        let deny = RecordingLink::new(true);
        node.add_or_replace_link("keep", keep.clone()).unwrap();
        node.add_or_replace_link("deny", deny.clone()).unwrap();

        let deny_ref: LinkRef = deny.clone();
        node.transmit(None, Some("origin"), &[9], Some(&deny_ref));

        assert_eq!(keep.sent.lock().unwrap().len(), 1);
        assert!(deny.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_handler_does_not_stop_broadcast() {
        struct Panicker;
        impl Handler for Panicker {
            fn receive(&self, _: Option<&str>, _: &[u8]) {}
            fn receive_broadcast(&self, _: Option<&str>, _: &[u8]) {
                panic!("bad subscriber");
            }
        }

        struct BroadcastCounter(Arc<AtomicUsize>);
        impl Handler for BroadcastCounter {
            fn receive(&self, _: Option<&str>, _: &[u8]) {}
            fn receive_broadcast(&self, _: Option<&str>, _: &[u8]) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let node = Node::new();
        let count = Arc::new(AtomicUsize::new(0));
        node.publish("bad", Arc::new(Panicker)).unwrap();
        node.publish("good", Arc::new(BroadcastCounter(count.clone()))).unwrap();

        node.broadcast(None, &[1]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_link_send_reports_failure_quietly() {
        let node = Node::new();
        let dead = RecordingLink::new(false);
        node.add_or_replace_link("gone", dead.clone()).unwrap();

        // Must not panic; failure is a log line, not an error.
        node.transmit(Some("gone/x"), None, &[1], None);
        assert_eq!(dead.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_remotes_collects_matching_tag() {
        let node = Arc::new(Node::new());

        // A publisher that answers discovery probes with its kind.
        struct Probe {
            node: std::sync::Weak<Node>,
            name: &'static str,
            tag: Rmt,
        }
        impl Handler for Probe {
            fn receive(&self, _: Option<&str>, _: &[u8]) {}
            fn receive_broadcast(&self, source: Option<&str>, payload: &[u8]) {
                if payload == [Rmt::Ping as u8] {
                    if let (Some(node), Some(source)) = (self.node.upgrade(), source) {
                        node.transmit(
                            Some(source),
                            Some(self.name),
                            &[Rmt::Ping as u8, self.tag as u8],
                            None,
                        );
                    }
                }
            }
        }

        node.publish(
            "logger",
            Arc::new(Probe {
                node: Arc::downgrade(&node),
                name: "logger",
                tag: Rmt::LogEntry,
            }),
        )
        .unwrap();
        node.publish(
            "dial",
            Arc::new(Probe {
                node: Arc::downgrade(&node),
                name: "dial",
                tag: Rmt::FloatValue,
            }),
        )
        .unwrap();

        let found = node
            .search_remotes(Rmt::LogEntry, Duration::from_millis(50))
            .await;
        assert_eq!(found, ["logger"]);
    }
}
