use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use mapsync_shared::{
    Feature, FeatureQuery, FieldInfo, LayerErrorKind, LayerKind, LayerPath, LayerStatus, Legend,
    LegendItem, QueryType,
};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;
use crate::layer::{FeatureQueryFuture, LayerOrder, LegendQueryFuture, MapLayer};

pub(crate) type FeatureReply = oneshot::Sender<Result<Vec<Feature>, QueryError>>;
pub(crate) type LegendReply = oneshot::Sender<Result<Option<Legend>, QueryError>>;

/// Let every spawned task run until it blocks.
///
/// Under a paused clock the runtime only advances time once all tasks are
/// idle, so this also moves the clock forward by one millisecond.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mapsync_engine=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub(crate) fn feature(feature_key: u64, name: &str) -> Feature {
    let mut field_info = IndexMap::new();
    field_info.insert(
        "name".to_string(),
        FieldInfo {
            alias: "Name".to_string(),
            data_type: "string".to_string(),
            value: serde_json::Value::String(name.to_string()),
        },
    );
    Feature {
        feature_key,
        name_field: Some("name".to_string()),
        field_info,
        geometry: None,
    }
}

pub(crate) fn legend(label: &str) -> Legend {
    Legend {
        items: vec![LegendItem {
            label: label.to_string(),
            icon: None,
            visible: true,
        }],
    }
}

/// Scriptable layer. Queries answer with the configured default unless a
/// reply gate was queued, in which case they wait for the test to resolve it.
pub(crate) struct FakeLayer {
    path: LayerPath,
    kind: LayerKind,
    status_tx: watch::Sender<LayerStatus>,
    hoverable: AtomicBool,
    queryable: AtomicBool,
    in_range: AtomicBool,
    error_kind: Mutex<Option<LayerErrorKind>>,
    feature_gates: Mutex<VecDeque<oneshot::Receiver<Result<Vec<Feature>, QueryError>>>>,
    default_features: Mutex<Result<Vec<Feature>, QueryError>>,
    legend_gates: Mutex<VecDeque<oneshot::Receiver<Result<Option<Legend>, QueryError>>>>,
    default_legend: Mutex<Result<Option<Legend>, QueryError>>,
    queries: Mutex<Vec<FeatureQuery>>,
    legend_queries: Mutex<usize>,
}

impl FakeLayer {
    pub(crate) fn new(path: &str, kind: LayerKind) -> Arc<Self> {
        Self::with_status(path, kind, LayerStatus::Init)
    }

    pub(crate) fn loaded(path: &str, kind: LayerKind) -> Arc<Self> {
        Self::with_status(path, kind, LayerStatus::Loaded)
    }

    pub(crate) fn with_status(path: &str, kind: LayerKind, status: LayerStatus) -> Arc<Self> {
        let (status_tx, _) = watch::channel(status);
        Arc::new(Self {
            path: LayerPath::new(path),
            kind,
            status_tx,
            hoverable: AtomicBool::new(true),
            queryable: AtomicBool::new(true),
            in_range: AtomicBool::new(true),
            error_kind: Mutex::new(None),
            feature_gates: Mutex::new(VecDeque::new()),
            default_features: Mutex::new(Ok(Vec::new())),
            legend_gates: Mutex::new(VecDeque::new()),
            default_legend: Mutex::new(Ok(None)),
            queries: Mutex::new(Vec::new()),
            legend_queries: Mutex::new(0),
        })
    }

    pub(crate) fn path(&self) -> LayerPath {
        self.path.clone()
    }

    pub(crate) fn set_status(&self, status: LayerStatus) {
        self.status_tx.send_replace(status);
    }

    /// Open status receivers, one per live status watcher.
    pub(crate) fn status_subscribers(&self) -> usize {
        self.status_tx.receiver_count()
    }

    pub(crate) fn fail_with(&self, kind: LayerErrorKind) {
        *self.error_kind.lock().expect("error kind lock") = Some(kind);
        self.set_status(LayerStatus::Error);
    }

    pub(crate) fn set_hoverable(&self, hoverable: bool) {
        self.hoverable.store(hoverable, Ordering::Relaxed);
    }

    pub(crate) fn set_queryable(&self, queryable: bool) {
        self.queryable.store(queryable, Ordering::Relaxed);
    }

    pub(crate) fn set_in_visible_range(&self, in_range: bool) {
        self.in_range.store(in_range, Ordering::Relaxed);
    }

    pub(crate) fn respond(&self, result: Result<Vec<Feature>, QueryError>) {
        *self.default_features.lock().expect("default features lock") = result;
    }

    /// Queue a gate: the next feature query waits until the returned sender fires.
    pub(crate) fn gate(&self) -> FeatureReply {
        let (tx, rx) = oneshot::channel();
        self.feature_gates
            .lock()
            .expect("feature gates lock")
            .push_back(rx);
        tx
    }

    pub(crate) fn respond_legend(&self, result: Result<Option<Legend>, QueryError>) {
        *self.default_legend.lock().expect("default legend lock") = result;
    }

    pub(crate) fn gate_legend(&self) -> LegendReply {
        let (tx, rx) = oneshot::channel();
        self.legend_gates
            .lock()
            .expect("legend gates lock")
            .push_back(rx);
        tx
    }

    pub(crate) fn queries(&self) -> Vec<FeatureQuery> {
        self.queries.lock().expect("queries lock").clone()
    }

    pub(crate) fn legend_query_count(&self) -> usize {
        *self.legend_queries.lock().expect("legend count lock")
    }
}

impl MapLayer for FakeLayer {
    fn layer_path(&self) -> &LayerPath {
        &self.path
    }

    fn layer_name(&self) -> Option<String> {
        Some(format!("Layer {}", self.path))
    }

    fn kind(&self) -> LayerKind {
        self.kind
    }

    fn layer_status(&self) -> LayerStatus {
        *self.status_tx.borrow()
    }

    fn subscribe_status(&self) -> watch::Receiver<LayerStatus> {
        self.status_tx.subscribe()
    }

    fn error_kind(&self) -> Option<LayerErrorKind> {
        *self.error_kind.lock().expect("error kind lock")
    }

    fn is_queryable(&self) -> bool {
        self.queryable.load(Ordering::Relaxed)
    }

    fn is_hoverable(&self) -> bool {
        self.hoverable.load(Ordering::Relaxed)
    }

    fn in_visible_range(&self) -> bool {
        self.in_range.load(Ordering::Relaxed)
    }

    fn query_features(
        &self,
        query: FeatureQuery,
        _include_geometry: bool,
        _cancel: Option<CancellationToken>,
    ) -> FeatureQueryFuture<'_> {
        self.queries.lock().expect("queries lock").push(query);
        let gate = self.feature_gates.lock().expect("feature gates lock").pop_front();
        let fallback = self
            .default_features
            .lock()
            .expect("default features lock")
            .clone();
        Box::pin(async move {
            match gate {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(QueryError::Rejected("reply gate dropped".into()))),
                None => fallback,
            }
        })
    }

    fn query_legend(&self) -> LegendQueryFuture<'_> {
        *self.legend_queries.lock().expect("legend count lock") += 1;
        let gate = self.legend_gates.lock().expect("legend gates lock").pop_front();
        let fallback = self
            .default_legend
            .lock()
            .expect("default legend lock")
            .clone();
        Box::pin(async move {
            match gate {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(QueryError::Rejected("reply gate dropped".into()))),
                None => fallback,
            }
        })
    }
}

/// Wraps a [`FakeLayer`] but only answers the listed query kinds.
pub(crate) struct RestrictedLayer {
    inner: Arc<FakeLayer>,
    supported: Vec<QueryType>,
}

impl RestrictedLayer {
    pub(crate) fn new(inner: Arc<FakeLayer>, supported: &[QueryType]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            supported: supported.to_vec(),
        })
    }

    pub(crate) fn inner(&self) -> &FakeLayer {
        &self.inner
    }
}

impl MapLayer for RestrictedLayer {
    fn layer_path(&self) -> &LayerPath {
        self.inner.layer_path()
    }

    fn layer_name(&self) -> Option<String> {
        self.inner.layer_name()
    }

    fn kind(&self) -> LayerKind {
        self.inner.kind()
    }

    fn layer_status(&self) -> LayerStatus {
        self.inner.layer_status()
    }

    fn subscribe_status(&self) -> watch::Receiver<LayerStatus> {
        self.inner.subscribe_status()
    }

    fn supports_query(&self, query_type: QueryType) -> bool {
        self.supported.contains(&query_type)
    }

    fn query_features(
        &self,
        query: FeatureQuery,
        include_geometry: bool,
        cancel: Option<CancellationToken>,
    ) -> FeatureQueryFuture<'_> {
        self.inner.query_features(query, include_geometry, cancel)
    }

    fn query_legend(&self) -> LegendQueryFuture<'_> {
        self.inner.query_legend()
    }
}

/// Stacking order the test can rearrange.
#[derive(Default)]
pub(crate) struct StaticOrder(Mutex<Vec<LayerPath>>);

impl StaticOrder {
    pub(crate) fn new(paths: &[&str]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            paths.iter().copied().map(LayerPath::new).collect(),
        )))
    }
}

impl LayerOrder for StaticOrder {
    fn ordered_layer_paths(&self) -> Vec<LayerPath> {
        self.0.lock().expect("order lock").clone()
    }
}
