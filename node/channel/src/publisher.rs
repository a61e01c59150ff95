//! Publish/subscribe wrappers tying typed endpoints to the routing
//! registry.
//!
//! Every channel kind shares one payload grammar built on its RMT tag:
//! a bare `[tag]` payload is a subscribe or control request, and
//! `[tag, data..]` carries a value. Publishers also answer broadcast
//! discovery probes (`[ping]`) with `[ping, own-tag]` addressed to the
//! probe's source, which is how [`Node::search_remotes`] finds them.
//!
//! Subscriber endpoints register a uniquely named local handler to
//! receive updates, send their subscribe request immediately, and send
//! it again whenever a network-modified notification is broadcast, so a
//! restarted publisher picks its subscribers back up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};
use uuid::Uuid;
use weft_registry::{Handler, Node};
use weft_wire::Rmt;

use crate::cell::{BooleanCell, EventChannel, FloatCell};
use crate::error::ChannelError;
use crate::log::{decode_log_entry, encode_log_entry, LogLevel, LogTarget};

/// Shared publisher-side state: who subscribed, and how to reach them.
struct Subscribers {
    node: Weak<Node>,
    name: String,
    tag: Rmt,
    set: Mutex<HashSet<String>>,
    /// Subscriber currently being serviced, excluded from fanout so a
    /// forwarded fire is not echoed back to where it came from.
    echo_skip: Mutex<Option<String>>,
}

impl Subscribers {
    fn new(node: &Arc<Node>, name: &str, tag: Rmt) -> Arc<Self> {
        Arc::new(Subscribers {
            node: Arc::downgrade(node),
            name: name.to_string(),
            tag,
            set: Mutex::new(HashSet::new()),
            echo_skip: Mutex::new(None),
        })
    }

    /// Record a subscribe request. Returns false for anonymous requests,
    /// which cannot be answered and are dropped.
    fn add(&self, source: Option<&str>) -> bool {
        let Some(source) = source else {
            warn!(channel = %self.name, "anonymous subscribe request ignored");
            return false;
        };
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source.to_string());
        debug!(channel = %self.name, subscriber = source, "subscriber added");
        true
    }

    fn send_to(&self, dest: &str, payload: &[u8]) {
        if let Some(node) = self.node.upgrade() {
            node.transmit(Some(dest), Some(&self.name), payload, None);
        }
    }

    fn fanout(&self, payload: &[u8]) {
        let skip = self
            .echo_skip
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let snapshot: Vec<String> = self
            .set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        for dest in snapshot {
            if skip.as_deref() == Some(dest.as_str()) {
                continue;
            }
            self.send_to(&dest, payload);
        }
    }

    /// Run `deliver` with `source` excluded from any fanout it causes.
    fn without_echo_to(&self, source: Option<&str>, deliver: impl FnOnce()) {
        *self.echo_skip.lock().unwrap_or_else(|e| e.into_inner()) = source.map(str::to_owned);
        deliver();
        *self.echo_skip.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Answer a broadcast discovery probe with this channel's kind.
    fn answer_probe(&self, source: Option<&str>, payload: &[u8]) {
        if payload == [Rmt::Ping as u8] {
            if let Some(source) = source {
                self.send_to(source, &[Rmt::Ping as u8, self.tag as u8]);
            }
        }
    }
}

fn unexpected(channel: &str, payload: &[u8]) {
    let kind = payload
        .first()
        .and_then(|&b| Rmt::try_from(b).ok())
        .map_or("unknown", Rmt::describe);
    warn!(
        channel,
        kind,
        len = payload.len(),
        "payload with unexpected tag ignored"
    );
}

struct BoolPublisher {
    cell: BooleanCell,
    subs: Arc<Subscribers>,
}

impl Handler for BoolPublisher {
    fn receive(&self, source: Option<&str>, payload: &[u8]) {
        match payload {
            [tag] if *tag == Rmt::BooleanValue as u8 => {
                if self.subs.add(source) {
                    if let Some(source) = source {
                        self.subs
                            .send_to(source, &[Rmt::BooleanValue as u8, self.cell.get() as u8]);
                    }
                }
            }
            [tag, value] if *tag == Rmt::BooleanValue as u8 => {
                self.cell.set(*value != 0);
            }
            _ => unexpected(&self.subs.name, payload),
        }
    }

    fn receive_broadcast(&self, source: Option<&str>, payload: &[u8]) {
        self.subs.answer_probe(source, payload);
    }
}

/// Publish a boolean cell under `name`.
///
/// Remote writes land in the cell; every change (local or remote) fans
/// out to all subscribers, each of whom got the current value the
/// moment they subscribed.
pub fn publish_bool(node: &Arc<Node>, name: &str, cell: BooleanCell) -> Result<(), ChannelError> {
    let subs = Subscribers::new(node, name, Rmt::BooleanValue);
    node.publish(
        name,
        Arc::new(BoolPublisher {
            cell: cell.clone(),
            subs: subs.clone(),
        }),
    )?;
    cell.on_change(move |value| {
        subs.fanout(&[Rmt::BooleanValue as u8, value as u8]);
    });
    Ok(())
}

struct FloatPublisher {
    cell: FloatCell,
    subs: Arc<Subscribers>,
}

impl Handler for FloatPublisher {
    fn receive(&self, source: Option<&str>, payload: &[u8]) {
        match payload {
            [tag] if *tag == Rmt::FloatValue as u8 => {
                if self.subs.add(source) {
                    if let Some(source) = source {
                        self.subs.send_to(source, &float_value(self.cell.get()));
                    }
                }
            }
            [tag, raw @ ..] if *tag == Rmt::FloatValue as u8 && raw.len() == 4 => {
                let bits = [raw[0], raw[1], raw[2], raw[3]];
                self.cell.set(f32::from_be_bytes(bits));
            }
            _ => unexpected(&self.subs.name, payload),
        }
    }

    fn receive_broadcast(&self, source: Option<&str>, payload: &[u8]) {
        self.subs.answer_probe(source, payload);
    }
}

fn float_value(value: f32) -> [u8; 5] {
    let raw = value.to_be_bytes();
    [Rmt::FloatValue as u8, raw[0], raw[1], raw[2], raw[3]]
}

/// Publish a float cell under `name`. Same contract as [`publish_bool`],
/// with big-endian f32 values.
pub fn publish_float(node: &Arc<Node>, name: &str, cell: FloatCell) -> Result<(), ChannelError> {
    let subs = Subscribers::new(node, name, Rmt::FloatValue);
    node.publish(
        name,
        Arc::new(FloatPublisher {
            cell: cell.clone(),
            subs: subs.clone(),
        }),
    )?;
    cell.on_change(move |value| {
        subs.fanout(&float_value(value));
    });
    Ok(())
}

struct EventPublisher {
    channel: EventChannel,
    subs: Arc<Subscribers>,
}

impl Handler for EventPublisher {
    fn receive(&self, source: Option<&str>, payload: &[u8]) {
        match payload {
            [tag] if *tag == Rmt::EventFire as u8 => {
                self.subs.add(source);
            }
            [tag, _] if *tag == Rmt::EventFire as u8 => {
                // Fire locally and fan out, but not back to the
                // subscriber that forwarded this fire; its own
                // listeners already ran when it fired.
                self.subs.without_echo_to(source, || self.channel.fire());
            }
            _ => unexpected(&self.subs.name, payload),
        }
    }

    fn receive_broadcast(&self, source: Option<&str>, payload: &[u8]) {
        self.subs.answer_probe(source, payload);
    }
}

/// Publish an event channel under `name`. Remote fires fire the local
/// channel; every fire (local or remote) reaches all subscribers.
pub fn publish_event(
    node: &Arc<Node>,
    name: &str,
    channel: EventChannel,
) -> Result<(), ChannelError> {
    let subs = Subscribers::new(node, name, Rmt::EventFire);
    node.publish(
        name,
        Arc::new(EventPublisher {
            channel: channel.clone(),
            subs: subs.clone(),
        }),
    )?;
    channel.on_fire(move || {
        subs.fanout(&[Rmt::EventFire as u8, 1]);
    });
    Ok(())
}

/// Subscriber-side endpoint state shared by the handler and the change
/// listener.
struct Endpoint {
    node: Weak<Node>,
    path: String,
    local_name: String,
    tag: Rmt,
    /// True while an update received from the network is being applied
    /// to the local cell, so the change listener knows not to send it
    /// straight back.
    from_network: AtomicBool,
}

impl Endpoint {
    fn new(node: &Arc<Node>, path: &str, tag: Rmt, kind: &str) -> Arc<Self> {
        Arc::new(Endpoint {
            node: Arc::downgrade(node),
            path: path.to_string(),
            local_name: format!("{kind}-{}", Uuid::new_v4().simple()),
            tag,
            from_network: AtomicBool::new(false),
        })
    }

    fn send(&self, payload: &[u8]) {
        if let Some(node) = self.node.upgrade() {
            node.transmit(Some(&self.path), Some(&self.local_name), payload, None);
        }
    }

    fn request_subscription(&self) {
        self.send(&[self.tag as u8]);
    }

    /// Apply a network-received update through `apply` with the
    /// from-network flag held, so the change listener stays quiet.
    fn apply_remote(&self, apply: impl FnOnce()) {
        self.from_network.store(true, Ordering::Release);
        apply();
        self.from_network.store(false, Ordering::Release);
    }

    fn is_from_network(&self) -> bool {
        self.from_network.load(Ordering::Acquire)
    }
}

struct CellSubscriber<F: Fn(&[u8]) + Send + Sync> {
    endpoint: Arc<Endpoint>,
    on_value: F,
}

impl<F: Fn(&[u8]) + Send + Sync> Handler for CellSubscriber<F> {
    fn receive(&self, _source: Option<&str>, payload: &[u8]) {
        match payload.split_first() {
            Some((&tag, body)) if tag == self.endpoint.tag as u8 && !body.is_empty() => {
                (self.on_value)(body);
            }
            _ => unexpected(&self.endpoint.local_name, payload),
        }
    }

    fn receive_broadcast(&self, _source: Option<&str>, payload: &[u8]) {
        if payload == [Rmt::Notify as u8] {
            debug!(path = %self.endpoint.path, "network modified, renewing subscription");
            self.endpoint.request_subscription();
        }
    }
}

/// Subscribe to a remote boolean cell at `path`.
///
/// The returned cell holds `default` until the first update arrives and
/// keeps its last known value across disconnects. Local writes are
/// forwarded to the publisher.
pub fn subscribe_bool(
    node: &Arc<Node>,
    path: &str,
    default: bool,
) -> Result<BooleanCell, ChannelError> {
    let cell = BooleanCell::new(default);
    let endpoint = Endpoint::new(node, path, Rmt::BooleanValue, "bool");

    let applied = cell.clone();
    let receiver = endpoint.clone();
    node.publish(
        &endpoint.local_name,
        Arc::new(CellSubscriber {
            endpoint: endpoint.clone(),
            on_value: move |body: &[u8]| {
                let value = body[0] != 0;
                receiver.apply_remote(|| applied.set(value));
            },
        }),
    )?;

    let writer = endpoint.clone();
    cell.on_change(move |value| {
        if !writer.is_from_network() {
            writer.send(&[Rmt::BooleanValue as u8, value as u8]);
        }
    });

    endpoint.request_subscription();
    Ok(cell)
}

/// Subscribe to a remote float cell at `path`. Same contract as
/// [`subscribe_bool`].
pub fn subscribe_float(
    node: &Arc<Node>,
    path: &str,
    default: f32,
) -> Result<FloatCell, ChannelError> {
    let cell = FloatCell::new(default);
    let endpoint = Endpoint::new(node, path, Rmt::FloatValue, "float");

    let applied = cell.clone();
    let receiver = endpoint.clone();
    node.publish(
        &endpoint.local_name,
        Arc::new(CellSubscriber {
            endpoint: endpoint.clone(),
            on_value: move |body: &[u8]| {
                if body.len() != 4 {
                    warn!(len = body.len(), "float update with wrong width ignored");
                    return;
                }
                let value = f32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                receiver.apply_remote(|| applied.set(value));
            },
        }),
    )?;

    let writer = endpoint.clone();
    cell.on_change(move |value| {
        if !writer.is_from_network() {
            writer.send(&float_value(value));
        }
    });

    endpoint.request_subscription();
    Ok(cell)
}

/// Subscribe to a remote event channel at `path`. Remote fires fire the
/// returned channel; local fires are forwarded to the publisher.
pub fn subscribe_event(node: &Arc<Node>, path: &str) -> Result<EventChannel, ChannelError> {
    let channel = EventChannel::new();
    let endpoint = Endpoint::new(node, path, Rmt::EventFire, "event");

    let fired = channel.clone();
    let receiver = endpoint.clone();
    node.publish(
        &endpoint.local_name,
        Arc::new(CellSubscriber {
            endpoint: endpoint.clone(),
            on_value: move |_body: &[u8]| {
                receiver.apply_remote(|| fired.fire());
            },
        }),
    )?;

    let writer = endpoint.clone();
    channel.on_fire(move || {
        if !writer.is_from_network() {
            writer.send(&[Rmt::EventFire as u8, 1]);
        }
    });

    endpoint.request_subscription();
    Ok(channel)
}

struct LogPublisher {
    target: Arc<dyn LogTarget>,
    subs: Arc<Subscribers>,
}

impl Handler for LogPublisher {
    fn receive(&self, source: Option<&str>, payload: &[u8]) {
        match payload.split_first() {
            Some((&tag, body)) if tag == Rmt::LogEntry as u8 && !body.is_empty() => {
                match decode_log_entry(body) {
                    Ok((level, message, extra)) => {
                        self.target.log(level, &message, extra.as_deref())
                    }
                    Err(err) => {
                        warn!(?source, %err, "discarding malformed log entry");
                    }
                }
            }
            _ => unexpected(&self.subs.name, payload),
        }
    }

    fn receive_broadcast(&self, source: Option<&str>, payload: &[u8]) {
        self.subs.answer_probe(source, payload);
    }
}

/// Publish a logging target under `name`. Entries shipped to the path
/// are decoded and forwarded to `target`.
pub fn publish_log(
    node: &Arc<Node>,
    name: &str,
    target: Arc<dyn LogTarget>,
) -> Result<(), ChannelError> {
    let subs = Subscribers::new(node, name, Rmt::LogEntry);
    node.publish(name, Arc::new(LogPublisher { target, subs }))?;
    Ok(())
}

/// A [`LogTarget`] that ships entries at or above a minimum severity to
/// a published logging target elsewhere on the network.
pub struct RemoteLogTarget {
    node: Weak<Node>,
    path: String,
    min_level: LogLevel,
}

impl LogTarget for RemoteLogTarget {
    fn log(&self, level: LogLevel, message: &str, extra: Option<&str>) {
        if level < self.min_level {
            return;
        }
        if let Some(node) = self.node.upgrade() {
            node.transmit(
                Some(&self.path),
                None,
                &encode_log_entry(level, message, extra),
                None,
            );
        }
    }
}

/// Build a [`LogTarget`] shipping to the published target at `path`.
pub fn subscribe_log(node: &Arc<Node>, path: &str, min_level: LogLevel) -> RemoteLogTarget {
    RemoteLogTarget {
        node: Arc::downgrade(node),
        path: path.to_string(),
        min_level,
    }
}

struct StreamPublisher<F: Fn(&[u8]) + Send + Sync> {
    sink: F,
    subs: Arc<Subscribers>,
}

impl<F: Fn(&[u8]) + Send + Sync> Handler for StreamPublisher<F> {
    fn receive(&self, _source: Option<&str>, payload: &[u8]) {
        match payload.split_first() {
            Some((&tag, body)) if tag == Rmt::StreamChunk as u8 && !body.is_empty() => {
                (self.sink)(body);
            }
            Some((&tag, [])) if tag == Rmt::StreamChunk as u8 => {}
            _ => unexpected(&self.subs.name, payload),
        }
    }

    fn receive_broadcast(&self, source: Option<&str>, payload: &[u8]) {
        self.subs.answer_probe(source, payload);
    }
}

/// Publish a byte-stream sink under `name`. Each received chunk is
/// passed to `sink` as-is.
pub fn publish_stream(
    node: &Arc<Node>,
    name: &str,
    sink: impl Fn(&[u8]) + Send + Sync + 'static,
) -> Result<(), ChannelError> {
    let subs = Subscribers::new(node, name, Rmt::StreamChunk);
    node.publish(name, Arc::new(StreamPublisher { sink, subs }))?;
    Ok(())
}

/// Writes raw chunks toward a published byte-stream sink.
pub struct StreamSender {
    node: Weak<Node>,
    path: String,
}

impl StreamSender {
    /// Ship one chunk. Returns false once the owning node is gone.
    pub fn send(&self, chunk: &[u8]) -> bool {
        let Some(node) = self.node.upgrade() else {
            return false;
        };
        let mut payload = Vec::with_capacity(1 + chunk.len());
        payload.push(Rmt::StreamChunk as u8);
        payload.extend_from_slice(chunk);
        node.transmit(Some(&self.path), None, &payload, None);
        true
    }
}

/// Build a sender shipping chunks to the stream sink at `path`.
pub fn subscribe_stream(node: &Arc<Node>, path: &str) -> StreamSender {
    StreamSender {
        node: Arc::downgrade(node),
        path: path.to_string(),
    }
}
