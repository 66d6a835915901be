//! tetherd - The tether background service
//!
//! This is the main entry point for the tetherd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Core engine
//! - Platform bridge host
//! - Scene classifier
//! - IPC server

mod bridge;

use anyhow::{Context as _, Result};
use bridge::BridgeHost;
use chrono::{DateTime, Local};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_api::{
    Command, ErrorCode, ErrorInfo, Event, EventPayload, Response, ResponsePayload,
    VerificationOutcome,
};
use tether_config::load_config;
use tether_core::{verify, CoreEngine, CoreEvent, ShieldError, UnlockError};
use tether_host_api::{HostError, SceneClassifier};
use tether_ipc::{IpcServer, ServerMessage};
use tether_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use tether_util::{default_config_path, ChallengeId, ClientId, TetherError};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// tetherd - Usage escalation and prosocial verification service
#[derive(Parser, Debug)]
#[command(name = "tetherd")]
#[command(about = "Usage escalation and prosocial verification service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/tether/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set TETHER_SOCKET env var)
    #[arg(short, long, env = "TETHER_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set TETHER_DATA_DIR env var)
    #[arg(short, long, env = "TETHER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Classification verdicts flowing back into the loop
type Verdict = (ChallengeId, VerificationOutcome);

/// Main service state
struct Service {
    engine: CoreEngine,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    classifier: Arc<dyn SceneClassifier>,
    host: Arc<BridgeHost>,
    bridge_events: mpsc::UnboundedReceiver<EventPayload>,
    startup_events: Vec<CoreEvent>,
}

/// Shared handles used by the message handlers
#[derive(Clone)]
struct Context {
    engine: Arc<Mutex<CoreEngine>>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    classifier: Arc<dyn SceneClassifier>,
    host: Arc<BridgeHost>,
    verdicts: mpsc::UnboundedSender<Verdict>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let policy = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            levels = policy.escalation.thresholds.len(),
            contacts = policy.contacts.len(),
            "Configuration loaded"
        );

        // Determine paths
        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = data_dir.join("tetherd.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let classifier: Arc<dyn SceneClassifier> = Arc::new(
            verify::RemoteClassifier::from_policy(&policy.classifier)
                .context("Failed to build scene classifier")?,
        );
        if policy.classifier.endpoint.is_none() {
            warn!("No classifier endpoint configured, photos will be accepted as submitted");
        }

        // The platform bridge owns the shield stores, deep links and notifications
        let (host, bridge_events) = BridgeHost::new();

        let now = tether_util::now();
        let mut engine = CoreEngine::new(
            policy,
            store.clone(),
            host.clone(),
            host.clone(),
            host.clone(),
            now,
        );
        let startup_events = engine.restore(now);

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            ipc: Arc::new(ipc),
            store,
            classifier,
            host,
            bridge_events,
            startup_events,
        })
    }

    async fn run(self) -> Result<()> {
        let Service {
            engine,
            ipc,
            store,
            classifier,
            host,
            mut bridge_events,
            startup_events,
        } = self;

        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;
        let (verdicts, mut verdict_rx) = mpsc::unbounded_channel::<Verdict>();

        let ctx = Context {
            engine: Arc::new(Mutex::new(engine)),
            ipc: ipc.clone(),
            store: store.clone(),
            classifier,
            host,
            verdicts,
        };

        {
            let engine = ctx.engine.lock().await;
            publish(&ipc, &engine, startup_events, tether_util::now());
        }

        // Spawn IPC accept task
        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let mut tick_timer = tokio::time::interval(Duration::from_secs(1));

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

                // Call-watch timeouts, messaging windows, focus end, unlock relock, rollover
                _ = tick_timer.tick() => {
                    let now = tether_util::now();
                    let mut engine = ctx.engine.lock().await;
                    let events = engine.tick(now);
                    publish(&ipc, &engine, events, now);
                }

                // Photo classification results
                Some((challenge_id, outcome)) = verdict_rx.recv() => {
                    let now = tether_util::now();
                    let mut engine = ctx.engine.lock().await;
                    let events = engine.apply_photo_verdict(&challenge_id, outcome, now);
                    publish(&ipc, &engine, events, now);
                }

                // Host requests for the platform bridge
                Some(payload) = bridge_events.recv() => {
                    ipc.broadcast_event(Event::new(payload));
                }

                Some(msg) = ipc_messages.recv() => {
                    handle_ipc_message(&ctx, msg).await;
                }
            }
        }

        info!(
            subscribers = ipc.subscriber_count().await,
            "Shutting down tetherd"
        );

        ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Broadcast engine events, followed by a fresh snapshot when anything changed
fn publish(ipc: &IpcServer, engine: &CoreEngine, events: Vec<CoreEvent>, now: DateTime<Local>) {
    if events.is_empty() {
        return;
    }

    for event in events {
        if let CoreEvent::LevelReached {
            level,
            intervention,
            ..
        } = &event
        {
            info!(level, ?intervention, "Broadcasting level reached");
        }
        ipc.broadcast_event(Event::new(event_payload(event)));
    }

    ipc.broadcast_event(Event::new(EventPayload::StateChanged(engine.get_state(now))));
}

fn event_payload(event: CoreEvent) -> EventPayload {
    match event {
        CoreEvent::LevelReached {
            level,
            intervention,
            prosocial,
        } => EventPayload::LevelReached {
            level,
            intervention,
            prosocial,
        },
        CoreEvent::ChallengeIssued(challenge) => EventPayload::ChallengeIssued(challenge),
        CoreEvent::ChallengeResolved {
            challenge_id,
            outcome,
            ..
        } => EventPayload::ChallengeResolved {
            challenge_id,
            outcome,
        },
        CoreEvent::ChallengeSkipped { challenge_id } => {
            EventPayload::ChallengeSkipped { challenge_id }
        }
        CoreEvent::ShieldChanged { domain, active } => {
            EventPayload::ShieldChanged { domain, active }
        }
        CoreEvent::EmergencyUnlockGranted {
            expires_at,
            unlocks_remaining,
        } => EventPayload::EmergencyUnlockGranted {
            expires_at,
            unlocks_remaining,
        },
        CoreEvent::EmergencyUnlockExpired => EventPayload::EmergencyUnlockExpired,
        CoreEvent::DayRolledOver { day } => EventPayload::DayRolledOver { day },
        CoreEvent::ReminderSent {
            message,
            remaining_today,
        } => EventPayload::ReminderSent {
            message,
            remaining_today,
        },
    }
}

async fn handle_ipc_message(ctx: &Context, msg: ServerMessage) {
    match msg {
        ServerMessage::Request { client_id, request } => {
            let response =
                handle_command(ctx, &client_id, request.request_id, request.command).await;
            let _ = ctx.ipc.send_response(&client_id, response).await;
        }

        ServerMessage::ClientConnected { client_id, info } => {
            info!(
                client_id = %client_id,
                role = ?info.role,
                uid = ?info.uid,
                "Client connected"
            );

            let _ = ctx
                .store
                .append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                    client_id: client_id.to_string(),
                    role: format!("{:?}", info.role),
                    uid: info.uid,
                }));
        }

        ServerMessage::ClientDisconnected { client_id } => {
            debug!(client_id = %client_id, "Client disconnected");
            sync_bridge(ctx).await;

            let _ = ctx
                .store
                .append_audit(AuditEvent::new(AuditEventType::ClientDisconnected {
                    client_id: client_id.to_string(),
                }));
        }
    }
}

/// Let the bridge host know whether anyone is listening for its requests
async fn sync_bridge(ctx: &Context) {
    ctx.host.set_attached(ctx.ipc.subscriber_count().await);
}

async fn handle_command(
    ctx: &Context,
    client_id: &ClientId,
    request_id: u64,
    command: Command,
) -> Response {
    let now = tether_util::now();

    match command {
        Command::GetState => {
            let state = ctx.engine.lock().await.get_state(now);
            Response::success(request_id, ResponsePayload::State(state))
        }

        Command::ReportUsage { minutes } => {
            let mut engine = ctx.engine.lock().await;
            let events = engine.record_usage(minutes, now);
            let level = events
                .iter()
                .filter_map(|e| match e {
                    CoreEvent::LevelReached { level, .. } => Some(*level),
                    _ => None,
                })
                .max();
            publish(&ctx.ipc, &engine, events, now);
            Response::success(request_id, ResponsePayload::UsageRecorded { level })
        }

        Command::Telephony { signal } => {
            let mut engine = ctx.engine.lock().await;
            let events = engine.on_telephony(signal, now);
            publish(&ctx.ipc, &engine, events, now);
            Response::success(request_id, ResponsePayload::Accepted)
        }

        Command::MessagingForeground {
            challenge_id,
            seconds,
        } => {
            let mut engine = ctx.engine.lock().await;
            let events = engine.on_messaging_foreground(challenge_id, seconds, now);
            publish(&ctx.ipc, &engine, events, now);
            Response::success(request_id, ResponsePayload::Accepted)
        }

        Command::BeginChallenge { id } => {
            let mut engine = ctx.engine.lock().await;
            match engine.begin_challenge(&id, now) {
                Ok(challenge) => {
                    Response::success(request_id, ResponsePayload::ChallengeStarted { challenge })
                }
                Err(e) => engine_error(request_id, &e),
            }
        }

        Command::SkipChallenge { id } => {
            let mut engine = ctx.engine.lock().await;
            match engine.skip_challenge(&id, now) {
                Ok(events) => {
                    publish(&ctx.ipc, &engine, events, now);
                    Response::success(request_id, ResponsePayload::ChallengeSkipped)
                }
                Err(e) => engine_error(request_id, &e),
            }
        }

        Command::SubmitPhoto { id, image_base64 } => {
            let photo = match ctx.engine.lock().await.photo_request(&id) {
                Ok(photo) => photo,
                Err(e) => return engine_error(request_id, &e),
            };
            let image = match verify::decode_image(&image_base64) {
                Ok(image) => image,
                Err(message) => {
                    return Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::InvalidRequest, message),
                    );
                }
            };

            debug!(challenge_id = %id, bytes = image.len(), "Queueing photo classification");

            // Classification runs off the loop and reports back through the verdict channel
            let classifier = ctx.classifier.clone();
            let verdicts = ctx.verdicts.clone();
            tokio::spawn(async move {
                let outcome = verify::verify_photo(
                    classifier.as_ref(),
                    &image,
                    photo.scene,
                    photo.reward_xp,
                    photo.timeout,
                )
                .await;
                let _ = verdicts.send((photo.challenge_id, outcome));
            });

            Response::success(request_id, ResponsePayload::PhotoQueued)
        }

        Command::PollMessaging { id } => {
            let mut engine = ctx.engine.lock().await;
            let (status, events) = engine.poll_messaging(&id, now);
            publish(&ctx.ipc, &engine, events, now);
            Response::success(request_id, ResponsePayload::Messaging { status })
        }

        Command::EmergencyUnlock => {
            let mut engine = ctx.engine.lock().await;
            match engine.emergency_unlock(now) {
                Ok(grant) => {
                    publish(&ctx.ipc, &engine, grant.events, now);
                    Response::success(
                        request_id,
                        ResponsePayload::Unlocked {
                            expires_at: grant.expires_at,
                            unlocks_remaining: grant.unlocks_remaining,
                        },
                    )
                }
                Err(e) => {
                    let code = match &e {
                        UnlockError::QuotaExhausted { .. } => ErrorCode::QuotaExhausted,
                        UnlockError::DomainDisabled => ErrorCode::DomainDisabled,
                        UnlockError::Host(_) => ErrorCode::HostError,
                    };
                    Response::error(request_id, ErrorInfo::new(code, e.to_string()))
                }
            }
        }

        Command::StartFocusSession { minutes } => {
            let mut engine = ctx.engine.lock().await;
            match engine.start_focus_session(minutes, now) {
                Ok((ends_at, events)) => {
                    publish(&ctx.ipc, &engine, events, now);
                    Response::success(request_id, ResponsePayload::FocusStarted { ends_at })
                }
                Err(e) => {
                    let code = match &e {
                        ShieldError::DomainDisabled(_) => ErrorCode::DomainDisabled,
                        ShieldError::EmptySession => ErrorCode::InvalidRequest,
                        ShieldError::Host(_) => ErrorCode::HostError,
                    };
                    Response::error(request_id, ErrorInfo::new(code, e.to_string()))
                }
            }
        }

        Command::EndFocusSession => {
            let mut engine = ctx.engine.lock().await;
            match engine.end_focus_session() {
                Ok(events) => {
                    publish(&ctx.ipc, &engine, events, now);
                    Response::success(request_id, ResponsePayload::FocusEnded)
                }
                Err(e) => host_error(request_id, &e),
            }
        }

        Command::NetworkChanged { network } => {
            let mut engine = ctx.engine.lock().await;
            let events = engine.network_changed(network.as_deref());
            publish(&ctx.ipc, &engine, events, now);
            Response::success(request_id, ResponsePayload::Accepted)
        }

        Command::RequestReminder { message } => {
            let mut engine = ctx.engine.lock().await;
            let sent = engine.request_reminder(&message, now);
            let payload = ResponsePayload::Reminder {
                sent: sent.is_some(),
                remaining_today: engine.reminders_remaining(now),
            };
            publish(&ctx.ipc, &engine, sent.into_iter().collect(), now);
            Response::success(request_id, payload)
        }

        Command::ResetDay => {
            let role = ctx.ipc.get_client_info(client_id).await.map(|info| info.role);
            if !role.is_some_and(|r| r.can_reset_day()) {
                return Response::error(
                    request_id,
                    ErrorInfo::new(ErrorCode::PermissionDenied, "Only an admin may reset the day"),
                );
            }

            info!(client_id = %client_id, "Daily reset requested");
            let mut engine = ctx.engine.lock().await;
            let events = engine.reset_for_new_day(now);
            publish(&ctx.ipc, &engine, events, now);
            Response::success(request_id, ResponsePayload::DayReset)
        }

        Command::AddContact { contact } => {
            let mut engine = ctx.engine.lock().await;
            match engine.add_contact(&contact) {
                Ok(()) => Response::success(request_id, ResponsePayload::ContactSaved),
                Err(e) => engine_error(request_id, &e),
            }
        }

        Command::SubscribeEvents => {
            // The IPC layer already flagged the client; send it a baseline snapshot
            sync_bridge(ctx).await;
            let state = ctx.engine.lock().await.get_state(now);
            ctx.ipc
                .broadcast_event(Event::new(EventPayload::StateChanged(state)));
            Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: *client_id,
                },
            )
        }

        Command::UnsubscribeEvents => {
            sync_bridge(ctx).await;
            Response::success(request_id, ResponsePayload::Unsubscribed)
        }

        Command::GetHealth => {
            let health = ctx.engine.lock().await.health();
            Response::success(request_id, ResponsePayload::Health(health))
        }

        Command::Ping => Response::success(request_id, ResponsePayload::Pong),
    }
}

fn engine_error(request_id: u64, e: &TetherError) -> Response {
    let code = match e {
        TetherError::ChallengeNotFound(_) => ErrorCode::ChallengeNotFound,
        TetherError::ChallengeResolved(_) => ErrorCode::ChallengeResolved,
        TetherError::ValidationError(_) => ErrorCode::InvalidRequest,
        TetherError::ConfigError(_) => ErrorCode::ConfigError,
        TetherError::HostError(_) => ErrorCode::HostError,
        TetherError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        TetherError::StoreError(_) | TetherError::IpcError(_) | TetherError::Internal(_) => {
            ErrorCode::InternalError
        }
    };
    Response::error(request_id, ErrorInfo::new(code, e.to_string()))
}

fn host_error(request_id: u64, e: &HostError) -> Response {
    let code = match e {
        HostError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        _ => ErrorCode::HostError,
    };
    Response::error(request_id, ErrorInfo::new(code, e.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "tetherd starting");

    let service = Service::new(&args).await?;
    service.run().await
}
