//! proctord - The exam session tracking service
//!
//! This is the main entry point for the proctord service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Tracking engine and tick task
//! - Snapshot broadcast hub
//! - IPC server

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use proctor_api::{
    Command, ErrorCode, ErrorInfo, HealthStatus, MakeupOutcome, MakeupRequest, Response,
    ResponsePayload,
};
use proctor_config::{load_config, TrackerConfig};
use proctor_core::{TrackError, Tracker, TrackerHandle, TrackingEngine};
use proctor_ipc::{BroadcastHub, IpcServer, ServerMessage};
use proctor_store::{ExamStatusStore, SqliteStore};
use proctor_util::{default_config_path, ProctorError, SessionId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// proctord - Exam session tracking service for the school dashboard
#[derive(Parser, Debug)]
#[command(name = "proctord")]
#[command(about = "Exam session tracking service for the school dashboard", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/proctord/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set PROCTOR_SOCKET env var)
    #[arg(short, long, env = "PROCTOR_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set PROCTOR_DATA_DIR env var)
    #[arg(short, long, env = "PROCTOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    config: TrackerConfig,
    engine: Arc<TrackingEngine>,
    store: Arc<SqliteStore>,
    ipc: Arc<IpcServer>,
    hub: BroadcastHub,
    tracker: TrackerHandle,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = if args.config.exists() {
            load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?
        } else {
            warn!(config_path = %args.config.display(), "Config file not found, using defaults");
            TrackerConfig::default()
        };

        info!(
            config_path = %args.config.display(),
            tick = ?config.tracking.tick,
            "Configuration loaded"
        );

        // Determine paths
        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| config.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("proctord.db");
        let store = Arc::new(
            SqliteStore::open(&db_path, config.service.store_timeout)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let engine = Arc::new(TrackingEngine::new(
            store.clone(),
            store.clone(),
            config.tracking.clone(),
        ));

        let (snapshot_tx, snapshot_rx) = mpsc::channel(config.tracking.snapshot_buffer.max(1));
        let hub = BroadcastHub::start(snapshot_rx, config.tracking.subscriber_buffer);

        let mut ipc = IpcServer::new(&socket_path, hub.handle());
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        let tracker = Tracker::start(engine.clone(), snapshot_tx);

        Ok(Self {
            config,
            engine,
            store,
            ipc: Arc::new(ipc),
            hub,
            tracker,
        })
    }

    async fn run(mut self) -> Result<()> {
        let mut ipc_messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg).await;
                }
            }
        }

        info!("Shutting down proctord");

        self.tracker.stop().await;
        self.hub.stop().await;
        self.ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_ipc_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                let response = self.handle_command(request.request_id, request.command).await;
                if let Err(e) = self.ipc.send_response(&client_id, response).await {
                    debug!(client_id = %client_id, error = %e, "Failed to send response");
                }
            }
            ServerMessage::ClientConnected { client_id } => {
                debug!(client_id = %client_id, "Client connected");
            }
            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");
            }
        }
    }

    async fn handle_command(&self, request_id: u64, command: Command) -> Response {
        let now = proctor_util::now();

        match command {
            Command::Ping => Response::success(request_id, ResponsePayload::Pong),

            Command::Subscribe => Response::error(
                request_id,
                ErrorInfo::new(ErrorCode::InvalidRequest, "Subscribe is handled per connection"),
            ),

            Command::GetSnapshot => match self.engine.latest_snapshot() {
                Ok(Some(snapshot)) => {
                    Response::success(request_id, ResponsePayload::Snapshot(snapshot))
                }
                Ok(None) => Response::error(
                    request_id,
                    ErrorInfo::new(ErrorCode::NotReady, "No tick has completed yet"),
                ),
                Err(e) => Response::error(request_id, error_info(&track_error(e))),
            },

            Command::GetMissedExams => {
                let engine = self.engine.clone();
                let result = tokio::task::spawn_blocking(move || engine.get_missed_exams(now))
                    .await
                    .map_err(|e| ProctorError::internal(e.to_string()))
                    .and_then(|r| r.map_err(track_error));

                match result {
                    Ok(missed) => Response::success(request_id, ResponsePayload::MissedExams(missed)),
                    Err(e) => Response::error(request_id, error_info(&e)),
                }
            }

            Command::AddMakeupExams { items } => {
                let engine = self.engine.clone();
                let store = self.store.clone();
                let default_minutes = self.config.tracking.default_makeup_minutes;

                let outcomes = tokio::task::spawn_blocking(move || {
                    add_makeups(&engine, store.as_ref(), &items, default_minutes, now)
                })
                .await
                .map_err(|e| ProctorError::internal(e.to_string()))
                .and_then(|r| r);

                match outcomes {
                    Ok(outcomes) => {
                        if outcomes.iter().any(MakeupOutcome::is_ok) {
                            self.tracker.refresh();
                        }
                        Response::success(request_id, ResponsePayload::MakeupAdded { outcomes })
                    }
                    Err(e) => {
                        warn!(error = %e, "Makeup batch rejected");
                        Response::error(request_id, error_info(&e))
                    }
                }
            }

            Command::GetHealth => {
                let health = HealthStatus {
                    live: true,
                    tracking: self.tracker.is_running(),
                    store_ok: self.engine.store_healthy(),
                    subscribers: self.hub.handle().subscriber_count(),
                    makeup_entries: self.engine.makeup_count().unwrap_or(0),
                };
                Response::success(request_id, ResponsePayload::Health(health))
            }
        }
    }
}

/// Register a batch of makeup requests.
///
/// The whole batch is refused when any requested grade has a scheduled exam
/// about to start. Past that check each item succeeds or fails on its own.
fn add_makeups(
    engine: &TrackingEngine,
    store: &dyn ExamStatusStore,
    items: &[MakeupRequest],
    default_minutes: u32,
    now: DateTime<Local>,
) -> proctor_util::Result<Vec<MakeupOutcome>> {
    for item in items {
        if engine
            .regular_exam_starting_soon(item.grade, now)
            .map_err(track_error)?
        {
            return Err(ProctorError::SessionStartingSoon(item.grade.to_string()));
        }
    }

    let outcomes = items
        .iter()
        .map(|item| {
            let result = add_makeup(engine, store, item, default_minutes, now);
            if let Err(e) = &result {
                warn!(exam_id = %item.exam_id, grade = %item.grade, error = %e, "Makeup exam rejected");
            }
            MakeupOutcome {
                exam_id: item.exam_id.clone(),
                grade: item.grade,
                error: result.err().map(|e| error_info(&e)),
            }
        })
        .collect();

    Ok(outcomes)
}

/// Validate one makeup request against the store and register it.
fn add_makeup(
    engine: &TrackingEngine,
    store: &dyn ExamStatusStore,
    item: &MakeupRequest,
    default_minutes: u32,
    now: DateTime<Local>,
) -> proctor_util::Result<()> {
    let record = store
        .get_exam(&item.exam_id)
        .map_err(|e| ProctorError::store(e.to_string()))?
        .ok_or_else(|| ProctorError::ExamNotFound(item.exam_id.clone()))?;

    if record.grade != item.grade {
        return Err(ProctorError::invalid(format!(
            "exam {} belongs to grade {}, not {}",
            item.exam_id, record.grade, item.grade
        )));
    }

    let target = item
        .session_id
        .clone()
        .unwrap_or_else(|| SessionId::new(""));
    let minutes = record.duration_minutes.unwrap_or(default_minutes);

    engine
        .add_makeup_exam(item.grade, record.exam, minutes, target, now)
        .map_err(track_error)?;

    Ok(())
}

fn track_error(e: TrackError) -> ProctorError {
    match e {
        TrackError::DuplicateEntry { exam_id, .. } => ProctorError::DuplicateEntry(exam_id),
        TrackError::InvalidDuration => ProctorError::invalid(e.to_string()),
        TrackError::Store(e) => ProctorError::store(e.to_string()),
        TrackError::Token(_) | TrackError::LockPoisoned | TrackError::Task(_) => {
            ProctorError::internal(e.to_string())
        }
    }
}

fn error_info(e: &ProctorError) -> ErrorInfo {
    let code = match e {
        ProctorError::ExamNotFound(_) => ErrorCode::ExamNotFound,
        ProctorError::DuplicateEntry(_) => ErrorCode::DuplicateEntry,
        ProctorError::SessionStartingSoon(_) => ErrorCode::SessionStartingSoon,
        ProctorError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        ProctorError::StoreError(_) => ErrorCode::StoreError,
        ProctorError::Internal(_) => ErrorCode::InternalError,
    };
    ErrorInfo::new(code, e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mock_time = proctor_util::is_mock_time_active(),
        "proctord starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use proctor_api::{DaySchedule, Exam, GradeLevel, Session};
    use proctor_config::TrackingConfig;
    use proctor_util::ExamId;

    fn seeded() -> (Arc<SqliteStore>, TrackingEngine) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let day = DaySchedule::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            vec![
                Session::new("s1", 1, "07:30", "09:00")
                    .with_exams(vec![Exam::new("e1", "Matematika", "07:30", "09:00")]),
                Session::new("s2", 2, "10:00", "11:00")
                    .with_exams(vec![Exam::new("e2", "Fisika", "10:00", "11:00")]),
            ],
        );
        store.import_day(GradeLevel::X, &day).unwrap();
        let engine = TrackingEngine::new(store.clone(), store.clone(), TrackingConfig::default());
        (store, engine)
    }

    fn request(id: &str, grade: GradeLevel) -> MakeupRequest {
        MakeupRequest {
            exam_id: ExamId::new(id),
            grade,
            session_id: None,
        }
    }

    #[test]
    fn makeup_add_checks_exam_and_grade() {
        let (store, engine) = seeded();
        let now = Local.with_ymd_and_hms(2025, 3, 10, 9, 20, 0).unwrap();

        let missing = add_makeup(&engine, store.as_ref(), &request("nope", GradeLevel::X), 90, now);
        assert!(matches!(missing, Err(ProctorError::ExamNotFound(_))));

        let wrong = add_makeup(&engine, store.as_ref(), &request("e1", GradeLevel::XI), 90, now);
        assert!(matches!(wrong, Err(ProctorError::InvalidRequest(_))));

        add_makeup(&engine, store.as_ref(), &request("e1", GradeLevel::X), 90, now).unwrap();
        let again = add_makeup(&engine, store.as_ref(), &request("e1", GradeLevel::X), 90, now);
        assert_eq!(error_info(&again.unwrap_err()).code, ErrorCode::DuplicateEntry);
    }

    #[test]
    fn makeup_batch_blocked_before_session_start() {
        let (store, engine) = seeded();
        let now = Local.with_ymd_and_hms(2025, 3, 10, 9, 57, 0).unwrap();

        // Grade XI has nothing scheduled, but X does, so neither item lands
        let items = [request("e1", GradeLevel::XI), request("e1", GradeLevel::X)];
        let err = add_makeups(&engine, store.as_ref(), &items, 90, now).unwrap_err();
        assert_eq!(error_info(&err).code, ErrorCode::SessionStartingSoon);
        assert_eq!(engine.makeup_count().unwrap(), 0);
    }

    #[test]
    fn makeup_batch_reports_each_item() {
        let (store, engine) = seeded();
        let now = Local.with_ymd_and_hms(2025, 3, 10, 9, 20, 0).unwrap();

        let items = [request("e1", GradeLevel::X), request("nope", GradeLevel::X)];
        let outcomes = add_makeups(&engine, store.as_ref(), &items, 90, now).unwrap();

        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1].error.as_ref().map(|e| e.code),
            Some(ErrorCode::ExamNotFound)
        );
        assert_eq!(engine.makeup_count().unwrap(), 1);
    }
}
