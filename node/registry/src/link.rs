//! Link capability and in-process implementations.
//!
//! A link is a named channel that can attempt to deliver a framed message
//! toward another node. The registry only holds a reference for routing;
//! a link backed by a live socket manages its own lifecycle.

use crate::node::Node;
use crate::path::prepend_link;
use std::sync::{Arc, OnceLock, Weak};

/// A named, possibly-remote channel capable of attempting delivery.
pub trait Link: Send + Sync {
    /// Attempt to send a message across this link.
    ///
    /// Returns whether the link is still able to carry messages, not
    /// whether this specific message was delivered. A disconnected link
    /// returns `false` without blocking or panicking.
    fn try_send(&self, dest: Option<&str>, source: Option<&str>, payload: &[u8]) -> bool;
}

/// Shared link handle as stored in a [`Node`].
pub type LinkRef = Arc<dyn Link>;

/// A link wrapper that silently denies destinations failing a predicate.
pub struct FilteredLink {
    inner: LinkRef,
    allow: Box<dyn Fn(Option<&str>) -> bool + Send + Sync>,
}

impl FilteredLink {
    /// Wrap `inner`, forwarding only destinations for which `allow` is true.
    pub fn new(
        inner: LinkRef,
        allow: impl Fn(Option<&str>) -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            allow: Box::new(allow),
        })
    }
}

impl Link for FilteredLink {
    fn try_send(&self, dest: Option<&str>, source: Option<&str>, payload: &[u8]) -> bool {
        if (self.allow)(dest) {
            self.inner.try_send(dest, source, payload)
        } else {
            false
        }
    }
}

/// One direction of an in-process bridge between two nodes.
///
/// Delivery into the target node prepends the name the target knows the
/// reverse direction by, exactly as a socket receiver would, so source
/// paths and deny-link echo suppression behave identically to TCP links.
pub struct InProcessLink {
    target: Weak<Node>,
    inbound_name: String,
    reverse: OnceLock<Weak<InProcessLink>>,
}

impl InProcessLink {
    /// Bridge two nodes, registering a link in each.
    ///
    /// `name_in_a` is the name node `a` uses to reach `b`, and vice versa.
    pub fn pair(
        a: &Arc<Node>,
        name_in_a: &str,
        b: &Arc<Node>,
        name_in_b: &str,
    ) -> Result<(LinkRef, LinkRef), crate::RegistryError> {
        let into_b = Arc::new(InProcessLink {
            target: Arc::downgrade(b),
            inbound_name: name_in_b.to_string(),
            reverse: OnceLock::new(),
        });
        let into_a = Arc::new(InProcessLink {
            target: Arc::downgrade(a),
            inbound_name: name_in_a.to_string(),
            reverse: OnceLock::new(),
        });
        let _ = into_b.reverse.set(Arc::downgrade(&into_a));
        let _ = into_a.reverse.set(Arc::downgrade(&into_b));

        let into_b: LinkRef = into_b;
        let into_a: LinkRef = into_a;
        a.add_or_replace_link(name_in_a, into_b.clone())?;
        b.add_or_replace_link(name_in_b, into_a.clone())?;
        Ok((into_b, into_a))
    }
}

impl Link for InProcessLink {
    fn try_send(&self, dest: Option<&str>, source: Option<&str>, payload: &[u8]) -> bool {
        let Some(node) = self.target.upgrade() else {
            return false;
        };
        let source = prepend_link(&self.inbound_name, source);
        let deny: Option<LinkRef> = self
            .reverse
            .get()
            .and_then(Weak::upgrade)
            .map(|l| l as LinkRef);
        node.transmit(dest, Some(&source), payload, deny.as_ref());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FnHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLink(AtomicUsize);

    impl Link for CountingLink {
        fn try_send(&self, _: Option<&str>, _: Option<&str>, _: &[u8]) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_filtered_link_denies() {
        let inner = Arc::new(CountingLink(AtomicUsize::new(0)));
        let filtered = FilteredLink::new(inner.clone(), |dest| dest == Some("allowed"));

        assert!(filtered.try_send(Some("allowed"), None, &[]));
        assert!(!filtered.try_send(Some("denied"), None, &[]));
        assert!(!filtered.try_send(None, None, &[]));
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_in_process_pair_routes_and_prepends_source() {
        let a = Arc::new(Node::new());
        let b = Arc::new(Node::new());
        InProcessLink::pair(&a, "to_b", &b, "to_a").unwrap();

        let seen: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
        let seen2 = seen.clone();
        b.publish(
            "sink",
            Arc::new(FnHandler(move |source: Option<&str>, _: &[u8]| {
                seen2.lock().unwrap().push(source.unwrap_or("").to_string());
            })),
        )
        .unwrap();

        a.transmit(Some("to_b/sink"), Some("origin"), &[1], None);
        assert_eq!(seen.lock().unwrap().as_slice(), ["to_a/origin"]);
    }

    #[test]
    fn test_broadcast_does_not_echo() {
        let a = Arc::new(Node::new());
        let b = Arc::new(Node::new());
        InProcessLink::pair(&a, "to_b", &b, "to_a").unwrap();

        let a_count = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));

        struct BroadcastCounter(Arc<AtomicUsize>);
        impl crate::Handler for BroadcastCounter {
            fn receive(&self, _: Option<&str>, _: &[u8]) {}
            fn receive_broadcast(&self, _: Option<&str>, _: &[u8]) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        a.publish("acount", Arc::new(BroadcastCounter(a_count.clone())))
            .unwrap();
        b.publish("bcount", Arc::new(BroadcastCounter(b_count.clone())))
            .unwrap();

        a.transmit(None, Some("acount"), &[0xAB], None);

        // Exactly one delivery on the far side, no echo back across the
        // link the broadcast arrived from.
        assert_eq!(a_count.load(Ordering::SeqCst), 1);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
    }
}
