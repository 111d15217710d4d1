//! Shared test harness for integration tests.
//!
//! [`FakeBackend`] runs Axum on a random port and plays both the
//! registration API (`/api/media/upload_hls/`, `/api/media/post/`) and the
//! object store behind the pre-signed URLs (`PUT /store/{file}`).
//! [`ScriptedEngine`] stands in for ffmpeg and writes a small HLS package.
//! [`TestHarness`] wires an [`IngestionService`] to both over real HTTP.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use popoff_av::engine::{ElapsedCallback, EngineRun};
use popoff_av::TranscodeEngine;
use popoff_core::config::Config;
use popoff_core::events::{EventBus, IngestEvent};
use popoff_core::{PostDraft, SourceAsset};
use popoff_pipeline::{IngestionService, JobHandle, Outcome};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// One object stored through a pre-signed URL.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Failure and latency injection for [`FakeBackend`].
#[derive(Debug, Clone, Default)]
pub struct BackendBehavior {
    /// Answer registration with 500.
    pub fail_register: bool,
    /// Leave this file out of `upload_urls`.
    pub omit_slot: Option<String>,
    /// Answer the n-th PUT (1-based) with 500.
    pub fail_put_at: Option<usize>,
    /// PUTs after this many stored objects hang for a long time.
    pub stall_puts_after: Option<usize>,
    /// Answer the commit with 500.
    pub fail_commit: bool,
}

#[derive(Default)]
struct Recorded {
    registrations: Vec<Value>,
    objects: Vec<StoredObject>,
    commits: Vec<Value>,
}

struct BackendState {
    base: String,
    behavior: BackendBehavior,
    recorded: Mutex<Recorded>,
    put_attempts: AtomicUsize,
}

/// Registration API and object store on `127.0.0.1:<random>`.
#[derive(Clone)]
pub struct FakeBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
}

impl FakeBackend {
    pub async fn start(behavior: BackendBehavior) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("no local addr");

        let state = Arc::new(BackendState {
            base: format!("http://{addr}"),
            behavior,
            recorded: Mutex::new(Recorded::default()),
            put_attempts: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/api/media/upload_hls/", post(register))
            .route("/api/media/post/", post(commit))
            .route("/store/{name}", put(store_object))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server error");
        });

        Self { addr, state }
    }

    /// Value for `api.base_url`.
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn registrations(&self) -> Vec<Value> {
        self.state.recorded.lock().registrations.clone()
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.state.recorded.lock().objects.clone()
    }

    pub fn commits(&self) -> Vec<Value> {
        self.state.recorded.lock().commits.clone()
    }

    /// Total requests that reached the backend, stalled ones included.
    pub fn request_count(&self) -> usize {
        let recorded = self.state.recorded.lock();
        recorded.registrations.len()
            + recorded.commits.len()
            + self.state.put_attempts.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` objects are stored.
    pub async fn wait_for_objects(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.objects().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("objects were not stored in time");
    }
}

async fn register(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.recorded.lock().registrations.push(body.clone());
    if state.behavior.fail_register {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "registration unavailable"})),
        );
    }

    let base_name = body["base_name"].as_str().unwrap_or("video").to_string();
    let mut upload_urls = serde_json::Map::new();
    for file in body["files"].as_array().into_iter().flatten() {
        let Some(file) = file.as_str() else { continue };
        if state.behavior.omit_slot.as_deref() == Some(file) {
            continue;
        }
        upload_urls.insert(
            file.to_string(),
            Value::String(format!("{}/store/{}", state.base, file)),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "upload_urls": upload_urls,
            "video_file_path": format!("hls/{base_name}/playlist.m3u8"),
            "thumb_url": format!("{}/store/thumbnail", state.base),
            "thumb_file_path": format!("thumbs/{base_name}.jpg"),
        })),
    )
}

async fn store_object(
    State(state): State<Arc<BackendState>>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let attempt = state.put_attempts.fetch_add(1, Ordering::SeqCst) + 1;

    if let Some(after) = state.behavior.stall_puts_after {
        let stored = state.recorded.lock().objects.len();
        if stored >= after {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
    if state.behavior.fail_put_at == Some(attempt) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.recorded.lock().objects.push(StoredObject {
        name,
        content_type,
        bytes: body.to_vec(),
    });
    StatusCode::OK
}

async fn commit(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.recorded.lock().commits.push(body);
    if state.behavior.fail_commit {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "database unavailable"})),
        );
    }
    (StatusCode::CREATED, Json(json!({"id": 42})))
}

// ---------------------------------------------------------------------------
// ScriptedEngine
// ---------------------------------------------------------------------------

/// What one engine invocation does.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub success: bool,
    pub segments: usize,
    pub log: String,
    /// Block this long (or until cancelled) before producing output.
    pub stall: Option<Duration>,
}

impl Attempt {
    pub fn ok(segments: usize) -> Self {
        Self {
            success: true,
            segments,
            log: String::new(),
            stall: None,
        }
    }

    pub fn fail() -> Self {
        Self {
            success: false,
            segments: 0,
            log: "Conversion failed!".into(),
            stall: None,
        }
    }

    pub fn stalled() -> Self {
        Self {
            stall: Some(Duration::from_secs(60)),
            ..Self::ok(1)
        }
    }
}

/// [`TranscodeEngine`] that follows a script instead of running ffmpeg.
///
/// The playlist path is the last argument; segments are written next to it.
pub struct ScriptedEngine {
    script: Mutex<Vec<Attempt>>,
    invocations: Mutex<Vec<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            invocations: Mutex::new(Vec::new()),
        })
    }

    /// Arguments of every invocation so far.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl TranscodeEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        args: &[String],
        on_elapsed: ElapsedCallback<'_>,
        cancel: &CancellationToken,
    ) -> popoff_core::Result<EngineRun> {
        self.invocations.lock().push(args.to_vec());
        let attempt = {
            let mut script = self.script.lock();
            if script.is_empty() {
                return Err(popoff_core::Error::Internal("engine script exhausted".into()));
            }
            script.remove(0)
        };

        if let Some(stall) = attempt.stall {
            on_elapsed(Duration::from_secs(1));
            tokio::select! {
                _ = cancel.cancelled() => return Err(popoff_core::Error::Cancelled),
                _ = tokio::time::sleep(stall) => {}
            }
        }

        let playlist = PathBuf::from(args.last().expect("no output argument"));
        let dir = playlist.parent().expect("playlist has no parent");
        for secs in 1..=4 {
            on_elapsed(Duration::from_millis(secs * 2500));
        }
        if attempt.success {
            let mut m3u8 = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:5\n");
            for i in 0..attempt.segments {
                m3u8.push_str(&format!("#EXTINF:5.0,\nsegment_{i:03}.ts\n"));
                std::fs::write(dir.join(format!("segment_{i:03}.ts")), vec![0x47u8; 188])?;
            }
            m3u8.push_str("#EXT-X-ENDLIST\n");
            std::fs::write(&playlist, m3u8)?;
        }

        Ok(EngineRun {
            success: attempt.success,
            log: attempt.log,
        })
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// A service wired to a [`FakeBackend`] and a [`ScriptedEngine`], with
/// source and thumbnail fixtures in a temp dir.
pub struct TestHarness {
    pub backend: FakeBackend,
    pub engine: Arc<ScriptedEngine>,
    pub events: Arc<EventBus>,
    pub service: IngestionService,
    pub config: Config,
    pub dir: TempDir,
}

impl TestHarness {
    pub async fn new(script: Vec<Attempt>) -> Self {
        Self::with_behavior(script, BackendBehavior::default()).await
    }

    pub async fn with_behavior(script: Vec<Attempt>, behavior: BackendBehavior) -> Self {
        let backend = FakeBackend::start(behavior).await;
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        std::fs::write(dir.path().join("clip.mov"), vec![1u8; 4096]).expect("write source");
        std::fs::write(dir.path().join("thumb.jpg"), b"\xFF\xD8\xFFthumb").expect("write thumb");

        let mut config = Config::default();
        config.api.base_url = backend.api_url();
        config.transcode.scratch_dir = dir.path().join("scratch");

        let engine = ScriptedEngine::new(script);
        let events = Arc::new(EventBus::default());
        let service = IngestionService::with_http(&config, engine.clone(), events.clone())
            .expect("failed to build service");

        Self {
            backend,
            engine,
            events,
            service,
            config,
            dir,
        }
    }

    /// A 10 second 720x1280 capture.
    pub fn source(&self) -> SourceAsset {
        self.source_with_duration(Duration::from_secs(10))
    }

    pub fn source_with_duration(&self, duration: Duration) -> SourceAsset {
        SourceAsset {
            path: self.dir.path().join("clip.mov"),
            duration,
            width: 720,
            height: 1280,
            file_size: 4096,
        }
    }

    pub fn draft(&self) -> PostDraft {
        PostDraft {
            description: "first post".into(),
            tags: vec!["cats".into(), " ".into(), "funny".into()],
            thumbnail: self.thumbnail(),
        }
    }

    pub fn thumbnail(&self) -> PathBuf {
        self.dir.path().join("thumb.jpg")
    }

    pub fn scratch_root(&self) -> &Path {
        &self.config.transcode.scratch_dir
    }

    pub fn start(&self) -> JobHandle {
        self.service
            .start(self.source(), self.draft())
            .expect("job should be admitted")
    }

    /// Progress values broadcast for `handle`'s job, in order.
    pub fn progress_values(&self, handle: &JobHandle) -> Vec<f64> {
        self.events
            .job_history(handle.id())
            .into_iter()
            .filter_map(|e| match e.payload {
                IngestEvent::Progress { progress, .. } => Some(progress),
                _ => None,
            })
            .collect()
    }
}

/// Wait for the outcome of `handle`, failing the test after [`WAIT`].
pub async fn outcome(handle: &JobHandle) -> Outcome {
    tokio::time::timeout(WAIT, handle.wait())
        .await
        .expect("job did not finish in time")
        .expect("job ended without an outcome")
}

/// Wait until `handle` reports `state`.
pub async fn wait_for_state(handle: &JobHandle, state: &str) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.name() == state))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
