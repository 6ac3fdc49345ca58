//! The `Browser` facade: one launched browser process, one transport,
//! and the perception/extraction pipeline behind a small async API.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use browser_watchdog::BrowserWatchdog;
use cdp_session::{CdpChannel, SessionPool, Transport};
use content_extractor::{chunk, extract, ExtractedSection, MarkdownChunk};
use dom_builder::{
    merge_detected_elements, BoundingBox, DetectedElement, DomTree, TreeBuilder,
};
use extraction_cache::{Aggregator, StrategyCache};
use pagelens_core_types::{BackendNodeId, CoreError, TargetId};
use pagelens_event_bus::{InMemoryBus, LifecycleEvent};

use crate::config::KernelConfig;
use crate::port::CdpPort;

struct Runtime {
    _transport: Arc<Transport>,
    pool: Arc<SessionPool<Transport>>,
    port: Arc<CdpPort<Transport>>,
    page: TargetId,
    last_tree: Option<Arc<DomTree>>,
}

pub struct Browser {
    cfg: KernelConfig,
    bus: Arc<InMemoryBus<LifecycleEvent>>,
    watchdog: Arc<BrowserWatchdog>,
    runtime: Mutex<Option<Runtime>>,
    strategies: StrategyCache,
    aggregator: Aggregator,
}

impl Browser {
    pub fn new(cfg: KernelConfig) -> Self {
        let bus = InMemoryBus::new(128);
        let watchdog = Arc::new(BrowserWatchdog::new(cfg.watchdog.clone(), bus.clone()));
        Self {
            cfg,
            bus,
            watchdog,
            runtime: Mutex::new(None),
            strategies: StrategyCache::new(),
            aggregator: Aggregator::new(),
        }
    }

    pub fn bus(&self) -> Arc<InMemoryBus<LifecycleEvent>> {
        self.bus.clone()
    }

    pub fn strategies(&self) -> &StrategyCache {
        &self.strategies
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Launch the browser process, connect the transport and attach to
    /// an initial page target. Idempotent while the runtime is up.
    pub async fn launch(&self) -> Result<(), CoreError> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(());
        }

        let endpoint = self.watchdog.launch().await?;
        let transport =
            Transport::connect(&endpoint.ws_url, self.cfg.transport.clone(), self.bus.clone())
                .await?;
        let pool = Arc::new(SessionPool::new(
            transport.clone(),
            self.bus.clone(),
            self.cfg.transport.default_deadline,
        ));
        let port = Arc::new(CdpPort::new(pool.clone(), self.cfg.command_deadline));

        let page = self.initial_page(&pool).await?;
        port.enable_domains(&page).await?;
        info!(target: "pagelens-kernel", page = %page, "browser ready");

        *runtime = Some(Runtime {
            _transport: transport,
            pool,
            port,
            page,
            last_tree: None,
        });
        Ok(())
    }

    async fn initial_page(
        &self,
        pool: &Arc<SessionPool<Transport>>,
    ) -> Result<TargetId, CoreError> {
        let result = pool
            .channel()
            .send(
                cdp_session::CommandTarget::Browser,
                "Target.getTargets",
                json!({}),
                self.cfg.command_deadline,
            )
            .await?;
        let existing = result
            .get("targetInfos")
            .and_then(Value::as_array)
            .and_then(|infos| {
                infos.iter().find(|info| {
                    info.get("type").and_then(Value::as_str) == Some("page")
                })
            })
            .and_then(|info| info.get("targetId").and_then(Value::as_str))
            .map(|id| TargetId(id.to_string()));
        if let Some(page) = existing {
            return Ok(page);
        }

        let created = pool
            .channel()
            .send(
                cdp_session::CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
                self.cfg.command_deadline,
            )
            .await?;
        created
            .get("targetId")
            .and_then(Value::as_str)
            .map(|id| TargetId(id.to_string()))
            .ok_or_else(|| CoreError::internal("createTarget returned no targetId"))
    }

    /// Navigate the page and wait for the load event; a missed load
    /// event degrades to proceeding after the deadline.
    pub async fn navigate(&self, url: &str) -> Result<(), CoreError> {
        let mut guard = self.runtime.lock().await;
        let runtime = require(&mut guard)?;

        let mut events = runtime.pool.channel().subscribe();
        let session = runtime.pool.get_or_create(&runtime.page).await?;
        runtime
            .pool
            .send_on(
                &session,
                "Page.navigate",
                json!({ "url": url }),
                self.cfg.command_deadline,
            )
            .await?;
        runtime.last_tree = None;

        let deadline = self.cfg.navigation_deadline;
        let session_id = session.0.clone();
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event)
                        if event.method == "Page.loadEventFired"
                            && event.session_id.as_deref() == Some(session_id.as_str()) =>
                    {
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        };
        if timeout(deadline, wait).await.is_err() {
            warn!(target: "pagelens-kernel", url, "load event not observed; continuing best-effort");
        }
        Ok(())
    }

    /// Build a fresh tree snapshot. The previous snapshot is replaced
    /// wholesale; callers holding it keep a consistent view.
    pub async fn snapshot(&self) -> Result<Arc<DomTree>, CoreError> {
        self.snapshot_with_detections(Vec::new()).await
    }

    /// Build a snapshot and merge externally detected elements into its
    /// selector-map keyspace.
    pub async fn snapshot_with_detections(
        &self,
        detections: Vec<DetectedElement>,
    ) -> Result<Arc<DomTree>, CoreError> {
        let mut guard = self.runtime.lock().await;
        let runtime = require(&mut guard)?;

        let builder = TreeBuilder::new(runtime.port.clone(), self.cfg.build.clone());
        let mut tree = builder.build(&runtime.page).await?;
        if !detections.is_empty() {
            merge_detected_elements(&mut tree, detections);
        }
        let tree = Arc::new(tree);
        runtime.last_tree = Some(tree.clone());
        Ok(tree)
    }

    /// Snapshot the page and extract its content regions.
    pub async fn extract(&self) -> Result<ExtractedSection, CoreError> {
        let tree = self.snapshot().await?;
        Ok(extract(&tree, &self.cfg.extract))
    }

    /// Extract and chunk the page's markdown rendering.
    pub async fn extract_chunked(
        &self,
        max_size: usize,
        overlap_lines: usize,
    ) -> Result<Vec<MarkdownChunk>, CoreError> {
        let section = self.extract().await?;
        Ok(chunk(&section.to_markdown(), max_size, overlap_lines))
    }

    /// Click an element by its selector-map id: scroll it into view,
    /// refresh its geometry, then dispatch a left press/release at its
    /// center.
    pub async fn click(&self, backend: BackendNodeId) -> Result<(), CoreError> {
        let mut guard = self.runtime.lock().await;
        let runtime = require(&mut guard)?;
        let bounds = resolve_bounds(runtime, backend).await?;
        let (x, y) = bounds.center();

        for kind in ["mousePressed", "mouseReleased"] {
            runtime
                .pool
                .send_to_target(
                    &runtime.page,
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": kind,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": 1,
                    }),
                    self.cfg.command_deadline,
                )
                .await?;
        }
        Ok(())
    }

    /// Focus an element and insert text as if typed.
    pub async fn type_text(&self, backend: BackendNodeId, text: &str) -> Result<(), CoreError> {
        let mut guard = self.runtime.lock().await;
        let runtime = require(&mut guard)?;
        runtime
            .pool
            .send_to_target(
                &runtime.page,
                "DOM.focus",
                json!({ "backendNodeId": backend.0 }),
                self.cfg.command_deadline,
            )
            .await?;
        runtime
            .pool
            .send_to_target(
                &runtime.page,
                "Input.insertText",
                json!({ "text": text }),
                self.cfg.command_deadline,
            )
            .await?;
        Ok(())
    }

    pub async fn scroll_into_view(&self, backend: BackendNodeId) -> Result<(), CoreError> {
        let mut guard = self.runtime.lock().await;
        let runtime = require(&mut guard)?;
        scroll_into_view_inner(runtime, backend, self.cfg.command_deadline).await
    }

    /// Capture a PNG screenshot of the page.
    pub async fn screenshot(&self) -> Result<Vec<u8>, CoreError> {
        let mut guard = self.runtime.lock().await;
        let runtime = require(&mut guard)?;
        let result = runtime
            .pool
            .send_to_target(
                &runtime.page,
                "Page.captureScreenshot",
                json!({ "format": "png" }),
                self.cfg.command_deadline,
            )
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::internal("captureScreenshot returned no data"))?;
        BASE64
            .decode(data)
            .map_err(|err| CoreError::internal(format!("invalid screenshot payload: {err}")))
    }

    /// Tear down the transport and terminate the browser process.
    pub async fn close(&self) -> Result<(), CoreError> {
        if let Some(runtime) = self.runtime.lock().await.take() {
            runtime.pool.invalidate_all();
        }
        self.watchdog.kill().await
    }
}

fn require<'a>(guard: &'a mut Option<Runtime>) -> Result<&'a mut Runtime, CoreError> {
    guard
        .as_mut()
        .ok_or_else(|| CoreError::internal("browser not launched; call launch() first"))
}

/// Geometry for input dispatch: scroll the element into view and read
/// its live box model; synthetic (detector-merged) elements fall back to
/// their recorded bounds.
async fn resolve_bounds(runtime: &mut Runtime, backend: BackendNodeId) -> Result<BoundingBox, CoreError> {
    let node_bounds = runtime
        .last_tree
        .as_ref()
        .and_then(|tree| tree.by_backend_id(backend))
        .and_then(|node| node.bounds);

    let deadline = std::time::Duration::from_secs(5);
    if scroll_into_view_inner(runtime, backend, deadline).await.is_ok() {
        use dom_builder::PerceptionPort;
        if let Ok(Some(bounds)) = runtime.port.box_model(&runtime.page, backend).await {
            if !bounds.is_empty() {
                return Ok(bounds);
            }
        }
    }

    node_bounds.filter(|b| !b.is_empty()).ok_or_else(|| {
        CoreError::internal(format!(
            "no geometry for element {backend}; take a fresh snapshot before dispatching input"
        ))
    })
}

async fn scroll_into_view_inner(
    runtime: &mut Runtime,
    backend: BackendNodeId,
    deadline: std::time::Duration,
) -> Result<(), CoreError> {
    runtime
        .pool
        .send_to_target(
            &runtime.page,
            "DOM.scrollIntoViewIfNeeded",
            json!({ "backendNodeId": backend.0 }),
            deadline,
        )
        .await
        .map(|_| ())
}
