// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus subscription dispatcher (`spec.md` §4.4): one consumer loop per
//! subscribed bus, fanning change-hub deltas out to subscribed plugins
//! under bounded concurrency with a per-subscriber circuit breaker.
//!
//! The teacher has no literal `Semaphore` anywhere (its worker pool tracks
//! `available_slots = concurrency.saturating_sub(active)` by hand in
//! `engine/runtime/handlers/worker/dispatch.rs`); `tokio::sync::Semaphore`
//! is the direct idiomatic equivalent and has precedent elsewhere in the
//! pack's example repos, so it stands in here rather than hand-rolled
//! slot-counting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use pb_bus::{BusChangeHub, ChangeEvent, ChangeOp};
use pb_core::bus_name::BusName;
use pb_core::ids::{PluginId, SubscriptionId};
use pb_core::Clock;
use serde_json::Value;
use tokio::sync::Semaphore;

const DEFAULT_CONCURRENCY: usize = 64;
const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_PAUSE: Duration = Duration::from_secs(5);
/// How often `run()`'s flush task scans `debounced` for entries whose
/// window has elapsed. Small relative to any realistic `debounce_ms` so the
/// actual delivered latency tracks the subscription's own setting rather
/// than this tick.
const DEBOUNCE_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// One `BUS_SUBSCRIBE` registration (`spec.md` §3 "BusSubscription").
#[derive(Debug, Clone)]
pub struct Subscription {
    pub sub_id: SubscriptionId,
    pub plugin_id: PluginId,
    pub bus: BusName,
    pub rules: Vec<String>,
    pub debounce_ms: Option<u64>,
}

impl Subscription {
    fn accepts(&self, op: ChangeOp) -> bool {
        self.rules.iter().any(|r| r == op.as_str())
    }
}

/// Delivers a bus-change delta to one plugin. Implemented by `ControlPlane`
/// so this module never depends on `PluginHost` directly.
pub trait SubscriberSink: Send + Sync {
    fn send(&self, plugin_id: &PluginId, payload: Value) -> Result<(), String>;
    /// Whether `plugin_id`'s process is currently able to receive a push
    /// (§4.4 step 3 "check host liveness").
    fn is_alive(&self, plugin_id: &PluginId) -> bool;
}

struct BreakerState {
    failures: u32,
    paused_until: Option<std::time::Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self { failures: 0, paused_until: None }
    }
}

/// One pending coalesced delta, keyed by `(plugin, sub, op)` in
/// [`BusSubscriptionDispatcher::debounced`]. `due` is fixed at first
/// insertion into the window, not slid forward on every update, so a
/// steady stream of changes still gets flushed at roughly `debounce_ms`
/// intervals rather than being coalesced forever.
struct DebouncedEntry {
    event: ChangeEvent,
    due: std::time::Instant,
}

/// Owns every active [`Subscription`], the per-(plugin, sub) circuit
/// breaker state, and the bounded-concurrency send machinery. One instance
/// per `ControlPlane`, fed by a consumer task per subscribed bus.
pub struct BusSubscriptionDispatcher {
    subscriptions: RwLock<HashMap<BusName, Vec<Subscription>>>,
    breakers: RwLock<HashMap<(PluginId, SubscriptionId), BreakerState>>,
    debounced: RwLock<HashMap<(PluginId, SubscriptionId, &'static str), DebouncedEntry>>,
    semaphore: Arc<Semaphore>,
    push_timeout: Duration,
    failure_threshold: u32,
    pause: Duration,
    debounce_max_pending: usize,
    consumer_sub_id: SubscriptionId,
}

impl BusSubscriptionDispatcher {
    pub fn new(debounce_max_pending: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            debounced: RwLock::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            pause: DEFAULT_PAUSE,
            debounce_max_pending,
            consumer_sub_id: SubscriptionId::new(),
        }
    }

    pub fn with_limits(
        debounce_max_pending: usize,
        concurrency: usize,
        push_timeout: Duration,
        failure_threshold: u32,
        pause: Duration,
    ) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            debounced: RwLock::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            push_timeout,
            failure_threshold,
            pause,
            debounce_max_pending,
            consumer_sub_id: SubscriptionId::new(),
        }
    }

    pub fn from_config(cfg: &pb_core::config::HostConfig) -> Self {
        Self::with_limits(
            cfg.debounce_max_pending,
            cfg.bus_dispatch_concurrency,
            cfg.bus_dispatch_push_timeout,
            cfg.bus_dispatch_failure_threshold,
            cfg.bus_dispatch_pause,
        )
    }

    /// Registers one hub mailbox per subscribable bus and runs the single
    /// consumer loop (§4.4 steps 1-2) until every `hub` registration is torn
    /// down or the sink's process is gone for good — in practice this runs
    /// for the lifetime of the host, driven as a `tokio::spawn`ed task.
    pub async fn run(self: Arc<Self>, hub: Arc<BusChangeHub>, sink: Arc<dyn SubscriberSink>, clock: impl Clock + 'static) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ChangeEvent>(4096);
        let mut forwarders = Vec::new();
        for bus in BusName::SUBSCRIBABLE {
            let mut mailbox = hub.register(bus, self.consumer_sub_id);
            let forward_tx = tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(event) = mailbox.recv().await {
                    if forward_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let flush_dispatcher = self.clone();
        let flush_sink = sink.clone();
        let flush_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DEBOUNCE_FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                flush_dispatcher.flush_debounced(flush_sink.as_ref()).await;
            }
        });

        while let Some(event) = rx.recv().await {
            self.dispatch(event, sink.as_ref(), &clock).await;
        }

        flush_task.abort();
        for forwarder in forwarders {
            forwarder.abort();
        }
    }

    pub fn subscribe(&self, sub: Subscription) {
        self.subscriptions.write().entry(sub.bus).or_default().push(sub);
    }

    /// Removes every subscription matching `sub_id`, wherever it's filed
    /// (§3: "removed by `BUS_UNSUBSCRIBE` or when the subscribing plugin
    /// stops" — the latter calls this once per subscription, the former
    /// is looked up by caller and passed the one bus it's on).
    pub fn unsubscribe(&self, bus: BusName, sub_id: SubscriptionId) {
        if let Some(subs) = self.subscriptions.write().get_mut(&bus) {
            subs.retain(|s| s.sub_id != sub_id);
        }
    }

    pub fn unsubscribe_all_for_plugin(&self, plugin_id: &PluginId) {
        for subs in self.subscriptions.write().values_mut() {
            subs.retain(|s| &s.plugin_id != plugin_id);
        }
    }

    fn is_paused(&self, plugin_id: &PluginId, sub_id: SubscriptionId, clock: &impl Clock) -> bool {
        let _ = clock;
        let breakers = self.breakers.read();
        match breakers.get(&(*plugin_id, sub_id)) {
            Some(state) => state.paused_until.map(|until| std::time::Instant::now() < until).unwrap_or(false),
            None => false,
        }
    }

    fn record_success(&self, plugin_id: PluginId, sub_id: SubscriptionId) {
        let mut breakers = self.breakers.write();
        if let Some(state) = breakers.get_mut(&(plugin_id, sub_id)) {
            state.failures = 0;
            state.paused_until = None;
        }
    }

    /// §4.4 step 5: increment the failure counter; pause once it reaches
    /// `failure_threshold`, resetting the counter.
    fn record_failure(&self, plugin_id: PluginId, sub_id: SubscriptionId) {
        let mut breakers = self.breakers.write();
        let state = breakers.entry((plugin_id, sub_id)).or_default();
        state.failures += 1;
        if state.failures >= self.failure_threshold {
            state.paused_until = Some(std::time::Instant::now() + self.pause);
            state.failures = 0;
        }
    }

    /// §4.4 pipeline step 3-4: looks up subscribers for `event.bus`, filters
    /// by rule, skips paused subscribers, and schedules a bounded-
    /// concurrency send per survivor.
    pub async fn dispatch(&self, event: ChangeEvent, sink: &(impl SubscriberSink + ?Sized), clock: &impl Clock) {
        let subs: Vec<Subscription> = {
            let table = self.subscriptions.read();
            table.get(&event.bus).cloned().unwrap_or_default()
        };

        for sub in subs {
            if !sub.accepts(event.op) {
                continue;
            }
            if self.is_paused(&sub.plugin_id, sub.sub_id, clock) {
                continue;
            }
            if !sink.is_alive(&sub.plugin_id) {
                continue;
            }
            if let Some(debounce_ms) = sub.debounce_ms {
                if self.should_coalesce(&sub, &event, debounce_ms) {
                    continue;
                }
            }
            self.send_one(&sub, event.clone(), sink).await;
        }
    }

    /// Returns `true` if this delta was coalesced into a pending one rather
    /// than needing an immediate send. Bounded by `debounce_max_pending`:
    /// past that many distinct pending keys, new keys are sent immediately
    /// rather than tracked, so a subscription storm can't grow this map
    /// without bound (advisory per §4.4, never a correctness guarantee).
    /// A key already pending just has its event replaced — "delivering only
    /// the latest" per spec §4.4 — without pushing `due` back out, so
    /// `run()`'s flush task still fires within `debounce_ms` of the first
    /// delta in the window.
    fn should_coalesce(&self, sub: &Subscription, event: &ChangeEvent, debounce_ms: u64) -> bool {
        let mut debounced = self.debounced.write();
        let key = (sub.plugin_id, sub.sub_id, event.op.as_str());
        if let Some(entry) = debounced.get_mut(&key) {
            entry.event = event.clone();
            return true;
        }
        if debounced.len() >= self.debounce_max_pending {
            return false;
        }
        let due = std::time::Instant::now() + Duration::from_millis(debounce_ms);
        debounced.insert(key, DebouncedEntry { event: event.clone(), due });
        true
    }

    /// `run()`'s ticking flusher (§4.4 "debounce hint" + DESIGN.md §5): pulls
    /// every pending entry whose window has elapsed and delivers it, so a
    /// debounced subscription eventually sees the latest delta instead of
    /// never hearing about it.
    async fn flush_debounced(&self, sink: &(impl SubscriberSink + ?Sized)) {
        let now = std::time::Instant::now();
        let due: Vec<((PluginId, SubscriptionId, &'static str), DebouncedEntry)> = {
            let mut debounced = self.debounced.write();
            let keys: Vec<_> = debounced.iter().filter(|(_, e)| e.due <= now).map(|(k, _)| *k).collect();
            keys.into_iter().filter_map(|k| debounced.remove(&k).map(|e| (k, e))).collect()
        };
        for ((plugin_id, sub_id, _op), entry) in due {
            self.deliver(plugin_id, sub_id, entry.event, sink).await;
        }
    }

    /// Sends one delta to one subscriber under the shared concurrency
    /// semaphore (§4.4 step 4). `SubscriberSink::send` only enqueues onto
    /// the plugin's command channel, so it never actually blocks for the
    /// full `push_timeout` — the timeout exists to bound a sink that starts
    /// blocking synchronously (e.g. a full channel) rather than one that
    /// awaits a reply.
    async fn send_one(&self, sub: &Subscription, event: ChangeEvent, sink: &(impl SubscriberSink + ?Sized)) {
        self.deliver(sub.plugin_id, sub.sub_id, event, sink).await;
    }

    async fn deliver(
        &self,
        plugin_id: PluginId,
        sub_id: SubscriptionId,
        event: ChangeEvent,
        sink: &(impl SubscriberSink + ?Sized),
    ) {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };
        let payload = serde_json::json!({
            "sub_id": sub_id,
            "bus": event.bus,
            "op": event.op,
            "delta": event,
        });
        let send = async { sink.send(&plugin_id, payload) };
        match tokio::time::timeout(self.push_timeout, send).await {
            Ok(Ok(())) => self.record_success(plugin_id, sub_id),
            Ok(Err(_)) | Err(_) => self.record_failure(plugin_id, sub_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_core::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        sends: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
        alive: bool,
    }

    impl SubscriberSink for CountingSink {
        fn send(&self, _plugin_id: &PluginId, _payload: Value) -> Result<(), String> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err("boom".to_string());
            }
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self, _plugin_id: &PluginId) -> bool {
            self.alive
        }
    }

    fn event(bus: BusName, op: ChangeOp, rev: u64) -> ChangeEvent {
        ChangeEvent { bus, op, rev, id: None, priority: None, source: None, count: None, batch: false, payload: None }
    }

    #[tokio::test]
    async fn delivers_to_subscriber_matching_rules() {
        let dispatcher = BusSubscriptionDispatcher::new(256);
        let plugin_id = PluginId::from_string("plg-sub");
        let sub_id = SubscriptionId::new();
        dispatcher.subscribe(Subscription {
            sub_id,
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: None,
        });
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: Default::default(), alive: true };
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 1), &sink, &SystemClock).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delta_not_matching_rules_is_dropped() {
        let dispatcher = BusSubscriptionDispatcher::new(256);
        let plugin_id = PluginId::from_string("plg-sub");
        dispatcher.subscribe(Subscription {
            sub_id: SubscriptionId::new(),
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: None,
        });
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: Default::default(), alive: true };
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Del, 1), &sink, &SystemClock).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dead_plugin_is_skipped() {
        let dispatcher = BusSubscriptionDispatcher::new(256);
        let plugin_id = PluginId::from_string("plg-sub");
        dispatcher.subscribe(Subscription {
            sub_id: SubscriptionId::new(),
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: None,
        });
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: Default::default(), alive: false };
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 1), &sink, &SystemClock).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_breaker_and_pause_further_sends() {
        let dispatcher =
            BusSubscriptionDispatcher::with_limits(256, 64, Duration::from_millis(100), 2, Duration::from_secs(60));
        let plugin_id = PluginId::from_string("plg-sub");
        let sub_id = SubscriptionId::new();
        dispatcher.subscribe(Subscription {
            sub_id,
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: None,
        });
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: std::sync::atomic::AtomicBool::new(true), alive: true };
        sink.fail_next.store(true, Ordering::SeqCst);
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 1), &sink, &SystemClock).await;
        sink.fail_next.store(true, Ordering::SeqCst);
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 2), &sink, &SystemClock).await;
        // Third delta: breaker should now be paused, so even a would-succeed send never happens.
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 3), &sink, &SystemClock).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn debounce_coalesces_consecutive_deltas_for_the_same_key() {
        let dispatcher = BusSubscriptionDispatcher::new(256);
        let plugin_id = PluginId::from_string("plg-sub");
        let sub_id = SubscriptionId::new();
        dispatcher.subscribe(Subscription {
            sub_id,
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: Some(50),
        });
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: Default::default(), alive: true };
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 1), &sink, &SystemClock).await;
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 2), &sink, &SystemClock).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.debounced.read().len(), 1);
    }

    #[tokio::test]
    async fn debounced_delta_is_flushed_once_its_window_elapses() {
        let dispatcher = BusSubscriptionDispatcher::new(256);
        let plugin_id = PluginId::from_string("plg-sub");
        let sub_id = SubscriptionId::new();
        dispatcher.subscribe(Subscription {
            sub_id,
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: Some(10),
        });
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: Default::default(), alive: true };
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 1), &sink, &SystemClock).await;
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 2), &sink, &SystemClock).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(25)).await;
        dispatcher.flush_debounced(&sink).await;

        assert_eq!(sink.sends.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.debounced.read().len(), 0);
    }

    #[tokio::test]
    async fn flush_before_the_window_elapses_is_a_no_op() {
        let dispatcher = BusSubscriptionDispatcher::new(256);
        let plugin_id = PluginId::from_string("plg-sub");
        let sub_id = SubscriptionId::new();
        dispatcher.subscribe(Subscription {
            sub_id,
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: Some(10_000),
        });
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: Default::default(), alive: true };
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 1), &sink, &SystemClock).await;
        dispatcher.flush_debounced(&sink).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.debounced.read().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_future_deliveries() {
        let dispatcher = BusSubscriptionDispatcher::new(256);
        let plugin_id = PluginId::from_string("plg-sub");
        let sub_id = SubscriptionId::new();
        dispatcher.subscribe(Subscription {
            sub_id,
            plugin_id,
            bus: BusName::Messages,
            rules: vec!["add".to_string()],
            debounce_ms: None,
        });
        dispatcher.unsubscribe(BusName::Messages, sub_id);
        let sink = CountingSink { sends: AtomicUsize::new(0), fail_next: Default::default(), alive: true };
        dispatcher.dispatch(event(BusName::Messages, ChangeOp::Add, 1), &sink, &SystemClock).await;
        assert_eq!(sink.sends.load(Ordering::SeqCst), 0);
    }
}
