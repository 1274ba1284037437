use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use mapsync_shared::{
    LayerPath, LayerSetEvent, LayerStatus, MapId, QueryTrigger, ResultSet, ResultSetEntry,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::error::LayerSetError;
use crate::layer::MapLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationAction {
    Add,
    Remove,
}

/// Per-set behavior plugged into a [`Registry`]. Every hook has a no-op default.
pub trait LayerSetHooks: Send + Sync + Sized + 'static {
    type Entry: ResultSetEntry;

    /// Short name used in logs.
    const NAME: &'static str;

    /// Registration predicate. Rejected layers are silently not tracked.
    fn accepts(&self, _layer: &dyn MapLayer) -> bool {
        true
    }

    fn new_entry(&self, layer: &dyn MapLayer) -> Self::Entry;

    /// Runs after the entry exists.
    fn on_register(&self, _registry: &Registry<Self>, _layer_path: &LayerPath) {}

    /// Runs while the entry still exists, right before it is removed.
    fn on_unregister(&self, _registry: &Registry<Self>, _layer_path: &LayerPath) {}

    /// Runs after the mirrored status has been updated.
    fn on_status_changed(
        &self,
        _registry: &Registry<Self>,
        _layer_path: &LayerPath,
        _status: LayerStatus,
    ) -> Result<(), LayerSetError> {
        Ok(())
    }
}

/// One registration of a layer path. Registering the same path again after
/// an unregistration yields a new generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(u64);

struct TrackedLayer {
    layer: Arc<dyn MapLayer>,
    generation: Generation,
    status_watch: JoinHandle<()>,
}

struct RegistryState<E> {
    result_set: ResultSet<E>,
    layers: HashMap<LayerPath, TrackedLayer>,
    next_generation: u64,
}

impl<E> Drop for RegistryState<E> {
    fn drop(&mut self) {
        for tracked in self.layers.values() {
            tracked.status_watch.abort();
        }
    }
}

struct RegistryInner<H: LayerSetHooks> {
    map_id: MapId,
    hooks: H,
    state: Mutex<RegistryState<H::Entry>>,
    event_tx: broadcast::Sender<LayerSetEvent<H::Entry>>,
}

/// Cheaply cloneable handle to one layer set's result set.
pub struct Registry<H: LayerSetHooks> {
    inner: Arc<RegistryInner<H>>,
}

impl<H: LayerSetHooks> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: LayerSetHooks> Registry<H> {
    pub fn new(map_id: MapId, hooks: H, event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self {
            inner: Arc::new(RegistryInner {
                map_id,
                hooks,
                state: Mutex::new(RegistryState {
                    result_set: ResultSet::new(),
                    layers: HashMap::new(),
                    next_generation: 0,
                }),
                event_tx,
            }),
        }
    }

    pub fn map_id(&self) -> &MapId {
        &self.inner.map_id
    }

    pub fn hooks(&self) -> &H {
        &self.inner.hooks
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<H::Entry>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_or_unregister_layer(
        &self,
        layer: Arc<dyn MapLayer>,
        action: RegistrationAction,
    ) -> bool {
        match action {
            RegistrationAction::Add => self.register_layer(layer),
            RegistrationAction::Remove => self.unregister_layer(layer.layer_path()),
        }
    }

    /// Start tracking `layer`. Returns false when the predicate rejects it or
    /// the path is already registered.
    ///
    /// Must be called from within a Tokio runtime: status changes are watched
    /// by a spawned task.
    pub fn register_layer(&self, layer: Arc<dyn MapLayer>) -> bool {
        let layer_path = layer.layer_path().clone();
        if !self.inner.hooks.accepts(layer.as_ref()) {
            debug!(set = H::NAME, layer_path = %layer_path, "layer not tracked by this set");
            return false;
        }

        {
            let mut state = self.lock();
            if state.result_set.contains_key(&layer_path) {
                return false;
            }
            // Subscribe before reading the status so no transition falls in between.
            let status_rx = layer.subscribe_status();
            let entry = self.inner.hooks.new_entry(layer.as_ref());
            let status_watch = self.spawn_status_watch(layer_path.clone(), status_rx);
            let generation = Generation(state.next_generation);
            state.next_generation += 1;
            state.result_set.insert(layer_path.clone(), entry);
            state.layers.insert(
                layer_path.clone(),
                TrackedLayer {
                    layer,
                    generation,
                    status_watch,
                },
            );
        }

        debug!(set = H::NAME, layer_path = %layer_path, "layer registered");
        self.inner.hooks.on_register(self, &layer_path);
        self.emit_updated(&layer_path);
        true
    }

    /// Stop tracking a layer. Unknown paths are a no-op.
    pub fn unregister_layer(&self, layer_path: &LayerPath) -> bool {
        if !self.contains(layer_path) {
            return false;
        }

        self.inner.hooks.on_unregister(self, layer_path);

        let removed = {
            let mut state = self.lock();
            if let Some(tracked) = state.layers.remove(layer_path) {
                tracked.status_watch.abort();
            }
            state.result_set.shift_remove(layer_path).is_some()
        };

        if removed {
            debug!(set = H::NAME, layer_path = %layer_path, "layer unregistered");
            self.emit_updated(layer_path);
        }
        removed
    }

    fn spawn_status_watch(
        &self,
        layer_path: LayerPath,
        mut status_rx: tokio::sync::watch::Receiver<LayerStatus>,
    ) -> JoinHandle<()> {
        let registry: Weak<RegistryInner<H>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow_and_update();
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                Registry { inner }.handle_status_change(&layer_path, status);
            }
        })
    }

    /// Mirror a layer's new status and run the set's reaction to it.
    /// Hook failures are logged here and never reach the layer.
    pub(crate) fn handle_status_change(&self, layer_path: &LayerPath, status: LayerStatus) {
        let mirrored = self
            .update_entry(layer_path, |entry| entry.set_layer_status(status))
            .is_some();
        if !mirrored {
            return;
        }

        if let Err(e) = self.inner.hooks.on_status_changed(self, layer_path, status) {
            warn!(
                set = H::NAME,
                layer_path = %layer_path,
                %status,
                error = %e,
                "layer status change handling failed"
            );
        }

        if self.contains(layer_path) {
            self.emit_updated(layer_path);
        }
    }

    pub fn contains(&self, layer_path: &LayerPath) -> bool {
        self.lock().result_set.contains_key(layer_path)
    }

    pub fn entry(&self, layer_path: &LayerPath) -> Option<H::Entry> {
        self.lock().result_set.get(layer_path).cloned()
    }

    pub fn layer(&self, layer_path: &LayerPath) -> Option<Arc<dyn MapLayer>> {
        self.lock()
            .layers
            .get(layer_path)
            .map(|tracked| Arc::clone(&tracked.layer))
    }

    /// Registered layers with their entries, in registration order.
    pub fn layers(&self) -> Vec<(LayerPath, Arc<dyn MapLayer>, H::Entry)> {
        let state = self.lock();
        state
            .result_set
            .iter()
            .filter_map(|(path, entry)| {
                let tracked = state.layers.get(path)?;
                Some((path.clone(), Arc::clone(&tracked.layer), entry.clone()))
            })
            .collect()
    }

    pub fn layer_paths(&self) -> Vec<LayerPath> {
        self.lock().result_set.keys().cloned().collect()
    }

    /// Snapshot of the whole result set.
    pub fn result_set(&self) -> ResultSet<H::Entry> {
        self.lock().result_set.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().result_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `read` against the result set while holding the set's lock, so no
    /// entry changes between what `read` observes and what it does with it.
    pub fn read<R>(&self, read: impl FnOnce(&ResultSet<H::Entry>) -> R) -> R {
        read(&self.lock().result_set)
    }

    /// Mutate one entry in place. `None` when the path is not registered.
    pub fn update_entry<R>(
        &self,
        layer_path: &LayerPath,
        update: impl FnOnce(&mut H::Entry) -> R,
    ) -> Option<R> {
        self.lock().result_set.get_mut(layer_path).map(update)
    }

    /// Like [`Registry::update_entry`], also returning the registration the
    /// entry belongs to. Queries capture it so their results can be written
    /// back with [`Registry::update_entry_at`].
    pub fn update_entry_tracked<R>(
        &self,
        layer_path: &LayerPath,
        update: impl FnOnce(&mut H::Entry) -> R,
    ) -> Option<(Generation, R)> {
        let mut state = self.lock();
        let generation = state.layers.get(layer_path)?.generation;
        let entry = state.result_set.get_mut(layer_path)?;
        Some((generation, update(entry)))
    }

    /// Mutate one entry only if it still belongs to `generation`. `None` when
    /// the path was unregistered, or registered again, since then.
    pub fn update_entry_at<R>(
        &self,
        layer_path: &LayerPath,
        generation: Generation,
        update: impl FnOnce(&mut H::Entry) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if state.layers.get(layer_path)?.generation != generation {
            return None;
        }
        state.result_set.get_mut(layer_path).map(update)
    }

    pub fn update_entries(&self, mut update: impl FnMut(&LayerPath, &mut H::Entry)) {
        let mut state = self.lock();
        for (path, entry) in state.result_set.iter_mut() {
            update(path, entry);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LayerSetEvent<H::Entry>> {
        self.inner.event_tx.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<LayerSetEvent<H::Entry>> {
        BroadcastStream::new(self.subscribe())
    }

    fn emit(&self, build: impl FnOnce(ResultSet<H::Entry>) -> LayerSetEvent<H::Entry>) {
        if self.inner.event_tx.receiver_count() == 0 {
            return;
        }
        let _ = self.inner.event_tx.send(build(self.result_set()));
    }

    fn emit_updated(&self, layer_path: &LayerPath) {
        self.emit(|result_set| LayerSetEvent::ResultSetUpdated {
            layer_path: layer_path.clone(),
            result_set,
        });
    }

    pub(crate) fn emit_query_ended(&self, trigger: QueryTrigger, layer_path: Option<LayerPath>) {
        self.emit(|result_set| LayerSetEvent::QueryEnded {
            trigger,
            layer_path,
            result_set,
            ended_at: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mapsync_shared::{LayerKind, LegendEntry};
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::test_support::{FakeLayer, settle};

    #[derive(Default)]
    struct CountingHooks {
        registered: AtomicUsize,
        unregistered: AtomicUsize,
        status_changes: AtomicUsize,
        fail_on_status: bool,
    }

    impl LayerSetHooks for CountingHooks {
        type Entry = LegendEntry;
        const NAME: &'static str = "counting";

        fn accepts(&self, layer: &dyn MapLayer) -> bool {
            layer.kind().supports_feature_info()
        }

        fn new_entry(&self, layer: &dyn MapLayer) -> LegendEntry {
            LegendEntry::new(layer.layer_name(), layer.layer_status())
        }

        fn on_register(&self, _registry: &Registry<Self>, _layer_path: &LayerPath) {
            self.registered.fetch_add(1, Ordering::Relaxed);
        }

        fn on_unregister(&self, registry: &Registry<Self>, layer_path: &LayerPath) {
            assert!(registry.contains(layer_path));
            self.unregistered.fetch_add(1, Ordering::Relaxed);
        }

        fn on_status_changed(
            &self,
            _registry: &Registry<Self>,
            layer_path: &LayerPath,
            _status: LayerStatus,
        ) -> Result<(), LayerSetError> {
            self.status_changes.fetch_add(1, Ordering::Relaxed);
            if self.fail_on_status {
                return Err(LayerSetError::Hook {
                    layer_path: layer_path.clone(),
                    reason: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    fn registry(hooks: CountingHooks) -> Registry<CountingHooks> {
        Registry::new(MapId::new("map"), hooks, 16)
    }

    #[tokio::test]
    async fn registering_twice_has_no_additional_effect() {
        let registry = registry(CountingHooks::default());
        let layer = FakeLayer::new("base/1", LayerKind::GeoJson);

        assert!(registry.register_layer(layer.clone()));
        assert!(!registry.register_layer(layer.clone()));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.hooks().registered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unregistering_unknown_path_is_a_noop() {
        let registry = registry(CountingHooks::default());
        let mut events = registry.subscribe();

        assert!(!registry.unregister_layer(&LayerPath::new("missing")));

        assert_eq!(registry.hooks().unregistered.load(Ordering::Relaxed), 0);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn rejected_layers_are_not_tracked() {
        let registry = registry(CountingHooks::default());
        let tiles = FakeLayer::new("basemap", LayerKind::XyzTiles);

        assert!(!registry.register_layer(tiles));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn register_and_unregister_emit_updates() {
        let registry = registry(CountingHooks::default());
        let mut events = registry.subscribe();
        let layer = FakeLayer::new("base/1", LayerKind::Wms);

        registry.register_or_unregister_layer(layer.clone(), RegistrationAction::Add);
        match events.try_recv() {
            Ok(LayerSetEvent::ResultSetUpdated {
                layer_path,
                result_set,
            }) => {
                assert_eq!(layer_path, LayerPath::new("base/1"));
                assert!(result_set.contains_key(&layer_path));
            }
            other => panic!("expected result set update, got {other:?}"),
        }

        registry.register_or_unregister_layer(layer, RegistrationAction::Remove);
        match events.try_recv() {
            Ok(LayerSetEvent::ResultSetUpdated { result_set, .. }) => {
                assert!(result_set.is_empty());
            }
            other => panic!("expected result set update, got {other:?}"),
        }
        assert_eq!(registry.hooks().unregistered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mirrored_status_follows_every_transition() {
        let registry = registry(CountingHooks::default());
        let layer = FakeLayer::new("base/1", LayerKind::EsriDynamic);
        registry.register_layer(layer.clone());
        let path = LayerPath::new("base/1");

        for status in [
            LayerStatus::Loading,
            LayerStatus::Loaded,
            LayerStatus::Processing,
            LayerStatus::Processed,
            LayerStatus::Error,
        ] {
            layer.set_status(status);
            settle().await;
            let entry = registry.entry(&path).expect("entry should stay registered");
            assert_eq!(entry.layer_status, status);
        }
        assert_eq!(registry.hooks().status_changes.load(Ordering::Relaxed), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_emits_update_with_mirrored_status() {
        let registry = registry(CountingHooks::default());
        let layer = FakeLayer::new("base/1", LayerKind::GeoJson);
        registry.register_layer(layer.clone());
        let mut events = registry.subscribe();

        layer.set_status(LayerStatus::Loaded);
        settle().await;

        match events.try_recv() {
            Ok(LayerSetEvent::ResultSetUpdated {
                layer_path,
                result_set,
            }) => {
                assert_eq!(layer_path, LayerPath::new("base/1"));
                assert_eq!(result_set[&layer_path].layer_status, LayerStatus::Loaded);
            }
            other => panic!("expected result set update, got {other:?}"),
        }
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn event_stream_yields_updates() {
        let registry = registry(CountingHooks::default());
        let mut stream = registry.event_stream();

        registry.register_layer(FakeLayer::new("base/1", LayerKind::GeoJson));

        let event = stream
            .next()
            .await
            .expect("stream open")
            .expect("receiver not lagging");
        match event {
            LayerSetEvent::ResultSetUpdated { layer_path, .. } => {
                assert_eq!(layer_path, LayerPath::new("base/1"));
            }
            other => panic!("expected result set update, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_registry_stops_status_watchers() {
        let registry = registry(CountingHooks::default());
        let layer = FakeLayer::new("base/1", LayerKind::GeoJson);
        registry.register_layer(layer.clone());
        settle().await;
        assert_eq!(layer.status_subscribers(), 1);

        drop(registry);
        settle().await;

        assert_eq!(layer.status_subscribers(), 0);
    }

    #[tokio::test]
    async fn registering_again_starts_a_new_generation() {
        let registry = registry(CountingHooks::default());
        let layer = FakeLayer::new("base/1", LayerKind::GeoJson);
        let path = LayerPath::new("base/1");
        registry.register_layer(layer.clone());
        let (first, ()) = registry
            .update_entry_tracked(&path, |_| ())
            .expect("registered");

        registry.unregister_layer(&path);
        registry.register_layer(layer);

        assert_eq!(
            registry.update_entry_at(&path, first, |entry| entry.layer_status),
            None
        );
        let (second, ()) = registry
            .update_entry_tracked(&path, |_| ())
            .expect("registered again");
        assert_ne!(first, second);
        assert!(registry.update_entry_at(&path, second, |_| ()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hook_failures_are_contained() {
        let registry = registry(CountingHooks {
            fail_on_status: true,
            ..CountingHooks::default()
        });
        let first = FakeLayer::new("a", LayerKind::GeoJson);
        let second = FakeLayer::new("b", LayerKind::GeoJson);
        registry.register_layer(first.clone());
        registry.register_layer(second.clone());

        first.set_status(LayerStatus::Loading);
        settle().await;
        second.set_status(LayerStatus::Loaded);
        settle().await;

        assert_eq!(
            registry.entry(&LayerPath::new("a")).map(|e| e.layer_status),
            Some(LayerStatus::Loading)
        );
        assert_eq!(
            registry.entry(&LayerPath::new("b")).map(|e| e.layer_status),
            Some(LayerStatus::Loaded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_layers_are_no_longer_watched() {
        let registry = registry(CountingHooks::default());
        let layer = FakeLayer::new("base/1", LayerKind::GeoJson);
        registry.register_layer(layer.clone());
        registry.unregister_layer(&LayerPath::new("base/1"));

        layer.set_status(LayerStatus::Loaded);
        settle().await;

        assert_eq!(registry.hooks().status_changes.load(Ordering::Relaxed), 0);
        assert!(registry.entry(&LayerPath::new("base/1")).is_none());
    }

    #[tokio::test]
    async fn registration_order_is_preserved() {
        let registry = registry(CountingHooks::default());
        for path in ["c", "a", "b"] {
            registry.register_layer(FakeLayer::new(path, LayerKind::Csv));
        }
        registry.unregister_layer(&LayerPath::new("a"));

        assert_eq!(
            registry.layer_paths(),
            [LayerPath::new("c"), LayerPath::new("b")]
        );
    }
}
