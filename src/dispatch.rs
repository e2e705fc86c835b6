//! Result Dispatcher
//!
//! Recognition results are produced on the worker thread but must reach
//! listeners on the presentation context. The worker only ever sees tokens
//! (which subscription or request a result belongs to) and a channel; the
//! listener closures stay with the [`Dispatcher`], which runs them when the
//! presentation context calls [`Dispatcher::dispatch_pending`].
//!
//! Region listeners are standing subscriptions. Text listeners are one-shot:
//! the worker consumes the request token when it serves it, so a request is
//! fulfilled at most once and must be re-armed for the next one.

use crate::error::EngineError;
use crate::geometry::TextRegion;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type SubscriptionId = u64;
pub type RequestId = u64;

/// Word boxes recognized in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionBatch {
    pub frame: u64,
    pub regions: Vec<TextRegion>,
}

/// Out-of-band conditions the worker reports to the presentation context.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The engine could not be initialized; frames are drained unrecognized.
    EngineFailed(EngineError),
}

#[derive(Debug)]
enum Delivery {
    Regions {
        subscription: SubscriptionId,
        batch: RegionBatch,
    },
    Text {
        request: RequestId,
        frame: u64,
        text: String,
    },
    Event(WorkerEvent),
}

#[derive(Debug, Default)]
struct Tokens {
    regions: Option<SubscriptionId>,
    text: Option<RequestId>,
}

/// Which results are currently wanted. Written by the presentation context,
/// read by the worker at the start of each dispatch step.
#[derive(Debug, Default)]
pub struct Subscriptions {
    tokens: Mutex<Tokens>,
    next_id: AtomicU64,
}

impl Subscriptions {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn subscribe_regions(&self) -> SubscriptionId {
        let id = self.next_id();
        self.tokens.lock().regions = Some(id);
        id
    }

    fn unsubscribe_regions(&self) {
        self.tokens.lock().regions = None;
    }

    fn arm_text(&self) -> RequestId {
        let id = self.next_id();
        self.tokens.lock().text = Some(id);
        id
    }

    fn cancel_text(&self) {
        self.tokens.lock().text = None;
    }

    pub fn region_subscription(&self) -> Option<SubscriptionId> {
        self.tokens.lock().regions
    }

    pub fn text_request(&self) -> Option<RequestId> {
        self.tokens.lock().text
    }

    /// Claims the outstanding text request, if any. Only one caller can win.
    pub fn take_text_request(&self) -> Option<RequestId> {
        self.tokens.lock().text.take()
    }

    /// Puts back a request that could not be served, unless a newer one was
    /// armed in the meantime.
    pub fn restore_text_request(&self, request: RequestId) -> bool {
        let mut tokens = self.tokens.lock();
        if tokens.text.is_none() {
            tokens.text = Some(request);
            true
        } else {
            false
        }
    }

    /// Drops every subscription and request.
    pub fn cancel_all(&self) {
        let mut tokens = self.tokens.lock();
        tokens.regions = None;
        tokens.text = None;
    }
}

/// Worker-side end of the dispatcher.
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: Sender<Delivery>,
    subscriptions: Arc<Subscriptions>,
}

impl ResultSink {
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn send_regions(&self, subscription: SubscriptionId, batch: RegionBatch) -> bool {
        self.send(Delivery::Regions { subscription, batch })
    }

    pub fn send_text(&self, request: RequestId, frame: u64, text: String) -> bool {
        self.send(Delivery::Text { request, frame, text })
    }

    pub fn report(&self, event: WorkerEvent) -> bool {
        self.send(Delivery::Event(event))
    }

    fn send(&self, delivery: Delivery) -> bool {
        // A closed channel only means the presentation side has gone away.
        self.tx.send(delivery).is_ok()
    }
}

type RegionsListener = Box<dyn FnMut(&RegionBatch)>;
type TextListener = Box<dyn FnOnce(String)>;
type EventListener = Box<dyn FnMut(&WorkerEvent)>;

/// Presentation-side end of the dispatcher. Owns every listener.
pub struct Dispatcher {
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
    subscriptions: Arc<Subscriptions>,
    regions_listener: Option<(SubscriptionId, RegionsListener)>,
    text_listener: Option<(RequestId, TextListener)>,
    event_listener: Option<EventListener>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            subscriptions: Arc::new(Subscriptions::default()),
            regions_listener: None,
            text_listener: None,
            event_listener: None,
        }
    }

    /// A handle for the worker thread.
    pub fn sink(&self) -> ResultSink {
        ResultSink {
            tx: self.tx.clone(),
            subscriptions: self.subscriptions.clone(),
        }
    }

    pub fn subscriptions(&self) -> &Arc<Subscriptions> {
        &self.subscriptions
    }

    /// Registers the standing region listener, replacing any previous one.
    pub fn set_regions_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&RegionBatch) + 'static,
    {
        let id = self.subscriptions.subscribe_regions();
        self.regions_listener = Some((id, Box::new(listener)));
    }

    /// Deregisters the region listener. Batches already in flight are dropped.
    pub fn clear_regions_listener(&mut self) {
        self.subscriptions.unsubscribe_regions();
        self.regions_listener = None;
    }

    pub fn has_regions_listener(&self) -> bool {
        self.regions_listener.is_some()
    }

    /// Arms a one-shot text request. An outstanding request is replaced and its
    /// listener will never be called.
    pub fn request_text<F>(&mut self, listener: F) -> RequestId
    where
        F: FnOnce(String) + 'static,
    {
        let id = self.subscriptions.arm_text();
        if self.text_listener.replace((id, Box::new(listener))).is_some() {
            debug!("Replaced outstanding text request with #{}", id);
        }
        id
    }

    pub fn cancel_text_request(&mut self) {
        self.subscriptions.cancel_text();
        self.text_listener = None;
    }

    pub fn has_pending_text_request(&self) -> bool {
        self.text_listener.is_some()
    }

    pub fn set_event_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&WorkerEvent) + 'static,
    {
        self.event_listener = Some(Box::new(listener));
    }

    /// Drops every listener and token.
    pub fn clear_all(&mut self) {
        self.subscriptions.cancel_all();
        self.regions_listener = None;
        self.text_listener = None;
    }

    /// Delivers queued results in production order on the calling thread.
    /// Returns the number of listener invocations.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            if self.deliver(delivery) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&mut self, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Regions { subscription, batch } => match &mut self.regions_listener {
                Some((id, listener)) if *id == subscription => {
                    listener(&batch);
                    true
                }
                _ => {
                    debug!("Dropping region batch for stale subscription #{}", subscription);
                    false
                }
            },
            Delivery::Text { request, frame, text } => {
                match self.text_listener.take() {
                    Some((id, listener)) if id == request => {
                        debug!("Delivering text for request #{} from frame {}", request, frame);
                        listener(text);
                        true
                    }
                    other => {
                        self.text_listener = other;
                        debug!("Dropping text for stale request #{}", request);
                        false
                    }
                }
            }
            Delivery::Event(event) => {
                if let WorkerEvent::EngineFailed(e) = &event {
                    error!("Recognition engine unavailable: {}", e);
                }
                match &mut self.event_listener {
                    Some(listener) => {
                        listener(&event);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn batch(frame: u64) -> RegionBatch {
        RegionBatch {
            frame,
            regions: vec![TextRegion::new(0, 0, 10, 10)],
        }
    }

    #[test]
    fn region_batches_are_delivered_in_order() {
        let mut dispatcher = Dispatcher::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink_seen = seen.clone();
        dispatcher.set_regions_listener(move |b| sink_seen.borrow_mut().push(b.frame));

        let sink = dispatcher.sink();
        let sub = sink.subscriptions().region_subscription().unwrap();
        for frame in 1..=3 {
            assert!(sink.send_regions(sub, batch(frame)));
        }
        assert_eq!(dispatcher.dispatch_pending(), 3);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn batches_in_flight_are_dropped_after_deregistration() {
        let mut dispatcher = Dispatcher::new();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        dispatcher.set_regions_listener(move |_| *c.borrow_mut() += 1);

        let sink = dispatcher.sink();
        let sub = sink.subscriptions().region_subscription().unwrap();
        sink.send_regions(sub, batch(1));
        dispatcher.clear_regions_listener();
        assert!(sink.subscriptions().region_subscription().is_none());

        // Re-registering must not resurrect the old batch either.
        let c = count.clone();
        dispatcher.set_regions_listener(move |_| *c.borrow_mut() += 10);
        assert_eq!(dispatcher.dispatch_pending(), 0);
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn text_request_is_served_at_most_once() {
        let mut dispatcher = Dispatcher::new();
        let texts = Rc::new(RefCell::new(Vec::new()));
        let t = texts.clone();
        dispatcher.request_text(move |s| t.borrow_mut().push(s));

        let sink = dispatcher.sink();
        let request = sink.subscriptions().take_text_request().unwrap();
        assert!(sink.subscriptions().take_text_request().is_none());

        sink.send_text(request, 1, "hello".into());
        // A duplicate for the same token finds no listener.
        sink.send_text(request, 2, "again".into());
        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert_eq!(*texts.borrow(), vec!["hello".to_string()]);
        assert!(!dispatcher.has_pending_text_request());
    }

    #[test]
    fn rearming_replaces_outstanding_request() {
        let mut dispatcher = Dispatcher::new();
        let texts = Rc::new(RefCell::new(Vec::new()));
        let first = texts.clone();
        let stale = dispatcher.request_text(move |s| first.borrow_mut().push(format!("first:{s}")));
        let second = texts.clone();
        let current = dispatcher.request_text(move |s| second.borrow_mut().push(format!("second:{s}")));
        assert_ne!(stale, current);

        let sink = dispatcher.sink();
        assert_eq!(sink.subscriptions().take_text_request(), Some(current));
        sink.send_text(stale, 1, "old".into());
        sink.send_text(current, 1, "new".into());
        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert_eq!(*texts.borrow(), vec!["second:new".to_string()]);
    }

    #[test]
    fn restore_does_not_clobber_newer_request() {
        let subs = Subscriptions::default();
        let first = subs.arm_text();
        assert_eq!(subs.take_text_request(), Some(first));
        assert!(subs.restore_text_request(first));
        assert_eq!(subs.text_request(), Some(first));

        subs.take_text_request();
        let newer = subs.arm_text();
        assert!(!subs.restore_text_request(first));
        assert_eq!(subs.text_request(), Some(newer));
    }

    #[test]
    fn engine_failures_reach_event_listener() {
        let mut dispatcher = Dispatcher::new();
        let events = Rc::new(RefCell::new(0));
        let e = events.clone();
        dispatcher.set_event_listener(move |event| {
            assert!(matches!(event, WorkerEvent::EngineFailed(EngineError::NotInitialized)));
            *e.borrow_mut() += 1;
        });
        dispatcher.sink().report(WorkerEvent::EngineFailed(EngineError::NotInitialized));
        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert_eq!(*events.borrow(), 1);
    }
}
