use brokerdesk::config::AppConfig;
use brokerdesk::error::AppError;
use brokerdesk::workflows::application::{
    FileDraftStore, HttpBrokerDirectory, HttpSubmissionGateway, WizardSessions,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type HttpWizardSessions =
    WizardSessions<FileDraftStore, HttpBrokerDirectory, HttpSubmissionGateway>;

/// Session host wired to the REST backend and the on-disk draft directory.
pub(crate) fn http_sessions(config: &AppConfig) -> Result<Arc<HttpWizardSessions>, AppError> {
    let backend = &config.backend;
    let directory = HttpBrokerDirectory::new(backend.base_url.as_str(), backend.timeout)?;
    let gateway = HttpSubmissionGateway::new(backend.base_url.as_str(), backend.timeout)?;
    let drafts = FileDraftStore::new(&config.drafts.directory);

    let sessions = WizardSessions::new(drafts, Arc::new(directory), Arc::new(gateway))
        .with_portal_path(config.portal_path.as_str())
        .with_idle_ttl(config.sessions.idle_ttl);
    Ok(Arc::new(sessions))
}
