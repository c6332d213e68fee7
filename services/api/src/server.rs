use crate::cli::ServeArgs;
use crate::infra::{AppState, LoggingCredentialsNotifier};
use crate::routes::with_assessment_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use qualtrack::assessment::domain::Role;
use qualtrack::assessment::enrollment::EnrollmentService;
use qualtrack::assessment::reconciler::HierarchyReconciler;
use qualtrack::assessment::router::AssessmentState;
use qualtrack::assessment::store::{EnrollmentStore, MemoryStore, NewUser};
use qualtrack::assessment::submissions::SubmissionService;
use qualtrack::config::AppConfig;
use qualtrack::error::AppError;
use qualtrack::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(MemoryStore::new());
    // The in-memory store starts empty; seed one admin so the API is
    // usable without out-of-band provisioning.
    let admin = store
        .insert_user(&NewUser {
            email: format!("admin@{}", config.institute.name.replace(' ', "-").to_lowercase()),
            role: Role::Admin,
            first_name: Some("Bootstrap".to_string()),
            middle_name: None,
            sur_name: Some("Admin".to_string()),
            contact: None,
            created_by: qualtrack::assessment::domain::UserId(0),
        })
        .map_err(|err| AppError::Io(std::io::Error::other(err.to_string())))?;

    let notifier = Arc::new(LoggingCredentialsNotifier);
    let assessment_state = Arc::new(AssessmentState {
        reconciler: HierarchyReconciler::new(Arc::clone(&store)),
        enrollment: EnrollmentService::new(Arc::clone(&store), notifier),
        submissions: SubmissionService::new(Arc::clone(&store)),
    });

    let app = with_assessment_routes(assessment_state)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, admin = admin.id.0, "assessment engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
