use metrics_exporter_prometheus::PrometheusHandle;
use qualtrack::assessment::enrollment::{CredentialsNotifier, NotifyError, UserCredentialsIssued};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Notifier that logs issued credentials instead of sending mail. The
/// temporary password is deliberately kept out of the log line; a real
/// deployment swaps this for an SMTP-backed implementation.
#[derive(Default, Clone)]
pub(crate) struct LoggingCredentialsNotifier;

impl CredentialsNotifier for LoggingCredentialsNotifier {
    fn publish(&self, event: &UserCredentialsIssued) -> Result<(), NotifyError> {
        tracing::info!(
            email = %event.email,
            role = event.role.label(),
            institute = %event.institute_name,
            qualifications = event.qualification_titles.len(),
            "credentials issued"
        );
        Ok(())
    }
}
