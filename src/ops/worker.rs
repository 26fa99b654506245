// ============================================================================
// FILL WORKER - one background thread per session, request/response by id
// ============================================================================
//
// The main thread never shares a pixel buffer with the worker. Each request
// carries its own copy of the bytes; the worker owns that copy until the
// response is produced. Responses are routed back through `pending`, so a
// caller always receives the result for its own request id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{Color, PixelBuffer};
use crate::error::{EngineError, Result};
use crate::ops::fill::{FillRegion, FillStats, FloodFillResult, PixelChange, flood_fill};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FillAction {
    FloodFill,
}

/// What the caller asks for; pixels come from the buffer passed alongside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FloodFillParams {
    pub x: u32,
    pub y: u32,
    pub fill_color: Color,
    pub tolerance: u8,
    pub max_points: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequest {
    pub id: u64,
    pub action: FillAction,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
    pub fill_color: Color,
    pub tolerance: u8,
    pub max_points: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPerformance {
    pub total_time_ms: f64,
    pub processed_pixels: usize,
    pub changed_pixels: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillResponse {
    pub id: u64,
    pub action: FillAction,
    pub changes: Vec<PixelChange>,
    pub region: FillRegion,
    pub performance: FillPerformance,
    pub truncated: bool,
}

impl FillResponse {
    pub fn into_result(self) -> FloodFillResult {
        FloodFillResult {
            changes: self.changes,
            region: self.region,
            stats: FillStats {
                total_time_ms: self.performance.total_time_ms,
                processed_pixels: self.performance.processed_pixels,
                changed_pixels: self.performance.changed_pixels,
                truncated: self.truncated,
            },
        }
    }
}

/// Run one request to completion. Synchronous; the worker handles one
/// message at a time.
pub fn handle_request(request: FillRequest) -> Result<FillResponse> {
    let FillRequest {
        id,
        action,
        pixels,
        width,
        height,
        x,
        y,
        fill_color,
        tolerance,
        max_points,
    } = request;
    let buffer = PixelBuffer::from_raw(width, height, pixels)?;
    let result = match action {
        FillAction::FloodFill => flood_fill(&buffer, x, y, fill_color, tolerance, max_points),
    };
    Ok(FillResponse {
        id,
        action,
        performance: FillPerformance {
            total_time_ms: result.stats.total_time_ms,
            processed_pixels: result.stats.processed_pixels,
            changed_pixels: result.stats.changed_pixels,
        },
        truncated: result.stats.truncated,
        region: result.region,
        changes: result.changes,
    })
}

type Resolver = mpsc::Sender<Result<FloodFillResult>>;
type PendingMap = Arc<Mutex<HashMap<u64, Resolver>>>;

/// Handle for one in-flight fill. Dropping it abandons the result.
pub struct PendingFill {
    id: u64,
    rx: mpsc::Receiver<Result<FloodFillResult>>,
}

impl PendingFill {
    /// An already-resolved handle, used by the in-thread fallback.
    pub(crate) fn ready(id: u64, result: Result<FloodFillResult>) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(result);
        Self { id, rx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the worker answers. A terminated worker yields `Cancelled`.
    pub fn wait(self) -> Result<FloodFillResult> {
        self.rx.recv().map_err(|_| EngineError::Cancelled(self.id))?
    }

    /// Non-blocking poll; `None` while the request is still queued or running.
    pub fn try_take(&self) -> Option<Result<FloodFillResult>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(EngineError::Cancelled(self.id))),
        }
    }
}

/// The background fill worker for one drawing session.
pub struct FillWorker {
    session: Uuid,
    next_id: AtomicU64,
    inbox: Option<mpsc::Sender<FillRequest>>,
    pending: PendingMap,
    handle: Option<JoinHandle<()>>,
}

impl FillWorker {
    pub fn spawn() -> Result<Self> {
        let session = Uuid::new_v4();
        let (inbox, requests) = mpsc::channel::<FillRequest>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let worker_pending = Arc::clone(&pending);

        let handle = std::thread::Builder::new()
            .name(format!("fill-worker-{}", session.simple()))
            .spawn(move || worker_loop(requests, worker_pending))
            .map_err(|e| {
                warn!("fill worker could not start: {}", e);
                EngineError::WorkerUnavailable
            })?;

        info!("fill worker {} started", session);
        Ok(Self {
            session,
            next_id: AtomicU64::new(1),
            inbox: Some(inbox),
            pending,
            handle: Some(handle),
        })
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn is_running(&self) -> bool {
        self.inbox.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queue a fill against a copy of `buffer`. The caller keeps its buffer
    /// and can keep drawing from it while the worker runs.
    pub fn perform_flood_fill(
        &self,
        buffer: &PixelBuffer,
        params: FloodFillParams,
    ) -> Result<PendingFill> {
        let inbox = self.inbox.as_ref().ok_or(EngineError::WorkerUnavailable)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel();
        self.pending.lock().insert(id, tx);

        let request = FillRequest {
            id,
            action: FillAction::FloodFill,
            pixels: buffer.as_bytes().to_vec(),
            width: buffer.width(),
            height: buffer.height(),
            x: params.x,
            y: params.y,
            fill_color: params.fill_color,
            tolerance: params.tolerance,
            max_points: params.max_points,
        };
        if inbox.send(request).is_err() {
            self.pending.lock().remove(&id);
            return Err(EngineError::WorkerUnavailable);
        }
        debug!("fill request {} queued at ({}, {})", id, params.x, params.y);
        Ok(PendingFill { id, rx })
    }

    /// End the session. Unresolved requests are abandoned and their waiters
    /// see `Cancelled`; a fill already running finishes but is discarded.
    pub fn terminate(&mut self) {
        if self.inbox.take().is_none() {
            return;
        }
        let abandoned = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        // Detach: the thread exits once its current message is done.
        self.handle.take();
        info!(
            "fill worker {} terminated ({} pending request(s) abandoned)",
            self.session, abandoned
        );
    }
}

impl Drop for FillWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_loop(requests: mpsc::Receiver<FillRequest>, pending: PendingMap) {
    while let Ok(request) = requests.recv() {
        let id = request.id;
        if !pending.lock().contains_key(&id) {
            debug!("fill request {} abandoned before start", id);
            continue;
        }

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handle_request(request)
        }));
        let result = match outcome {
            Ok(response) => response.map(FillResponse::into_result),
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                warn!("fill request {} panicked: {}", id, msg);
                Err(EngineError::WorkerFailed(msg))
            }
        };

        let resolver = pending.lock().remove(&id);
        match resolver {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!("fill request {} finished after cancellation", id),
        }
    }
}

/// Where fills run: the session worker when available, else the calling
/// thread.
pub enum FillBackend {
    Worker(FillWorker),
    InThread,
}

impl FillBackend {
    /// Start a worker, degrading to in-thread fills when it cannot start.
    pub fn start(use_worker: bool) -> Self {
        if !use_worker {
            return FillBackend::InThread;
        }
        match FillWorker::spawn() {
            Ok(worker) => FillBackend::Worker(worker),
            Err(e) => {
                warn!("{}; falling back to in-thread flood fill", e);
                FillBackend::InThread
            }
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self, FillBackend::Worker(w) if w.is_running())
    }

    pub fn submit(&self, buffer: &PixelBuffer, params: FloodFillParams) -> Result<PendingFill> {
        match self {
            FillBackend::Worker(worker) => worker.perform_flood_fill(buffer, params),
            FillBackend::InThread => Ok(PendingFill::ready(
                0,
                Ok(flood_fill(
                    buffer,
                    params.x,
                    params.y,
                    params.fill_color,
                    params.tolerance,
                    params.max_points,
                )),
            )),
        }
    }

    pub fn shutdown(&mut self) {
        if let FillBackend::Worker(worker) = self {
            worker.terminate();
        }
    }
}
