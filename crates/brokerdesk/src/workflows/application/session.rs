use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broker::{resolve_referral, BrokerDirectory};
use super::controller::{
    BrokerResolution, SubmissionState, SubmissionStatus, WizardController, WizardEffect,
    WizardError, WizardEvent, WizardPhase, WizardScreen,
};
use super::domain::{BrokerToken, FieldName, FormValues, UnknownField, WizardStep};
use super::draft::{load_draft, DraftError, DraftRepository, DraftStore, VisitorId};
use super::gateway::{SubmissionGateway, SubmissionRequest};
use super::review::ReviewSummary;
use super::validation::ValidationErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("wizard session {0} not found")]
    NotFound(String),
    #[error("referral token '{0}' is not valid")]
    InvalidReferral(String),
    #[error(transparent)]
    UnknownField(#[from] UnknownField),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Wizard(#[from] WizardError),
    #[error("submission task ended before the application service answered: {0}")]
    SubmissionAborted(String),
}

/// Sessions untouched for this long are dropped on the next sweep.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Serializable snapshot of a session for the browser.
#[derive(Debug, Clone, Serialize)]
pub struct WizardView {
    pub session_id: SessionId,
    pub screen: WizardScreen,
    pub phase: WizardPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_label: Option<&'static str>,
    pub values: FormValues,
    pub errors: ValidationErrors,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_token: Option<BrokerToken>,
    pub broker: BrokerResolution,
    pub submission: SubmissionState,
    pub draft_restored: bool,
    pub can_submit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portal_path: Option<String>,
}

struct SessionEntry<D> {
    visitor: VisitorId,
    controller: Mutex<WizardController<D>>,
    last_seen: Mutex<Instant>,
}

impl<D> SessionEntry<D>
where
    D: DraftRepository + 'static,
{
    fn lock(&self) -> MutexGuard<'_, WizardController<D>> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_seen)
    }

    fn view(&self, id: SessionId, portal_path: &str) -> WizardView {
        let controller = self.lock();
        let state = controller.state();
        let complete = state.phase == WizardPhase::Complete;

        WizardView {
            session_id: id,
            screen: state.screen(),
            phase: state.phase,
            step_label: state.current_step().map(WizardStep::label),
            values: state.values.clone(),
            errors: state.visible_errors(),
            broker_token: state.broker_token.clone(),
            broker: state.broker.clone(),
            submission: state.submission.clone(),
            draft_restored: state.draft_restored,
            can_submit: state.current_step() == Some(WizardStep::Review)
                && state.submission.status != SubmissionStatus::Loading,
            portal_path: complete.then(|| portal_path.to_string()),
        }
    }
}

/// Performs controller effects on the tokio runtime and feeds results back.
struct EffectRunner<B, G> {
    directory: Arc<B>,
    gateway: Arc<G>,
}

impl<B, G> Clone for EffectRunner<B, G> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<B, G> EffectRunner<B, G>
where
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    fn spawn<D>(&self, session: Arc<SessionEntry<D>>, effect: WizardEffect)
    where
        D: DraftRepository + 'static,
    {
        let runner = self.clone();
        match effect {
            WizardEffect::ResolveBroker(token) => {
                tokio::spawn(async move {
                    let event = resolve_referral(runner.directory.as_ref(), token).await;
                    runner.feed(&session, event);
                });
            }
            WizardEffect::LoadDraft => {
                let drafts = session.lock().drafts();
                tokio::task::spawn_blocking(move || {
                    let event = load_draft(drafts.as_ref());
                    runner.feed(&session, event);
                });
            }
            WizardEffect::Submit(request) => {
                drop(runner.settle(session, request));
            }
        }
    }

    /// Runs the gateway call on its own task. Dropping the returned handle
    /// detaches it; the session still settles when the gateway answers.
    fn settle<D>(
        &self,
        session: Arc<SessionEntry<D>>,
        request: SubmissionRequest,
    ) -> JoinHandle<Result<(), WizardError>>
    where
        D: DraftRepository + 'static,
    {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let result = gateway.submit(&request).await;
            let settled = session.lock().finish_submission(result);
            if let Err(err) = &settled {
                warn!(
                    visitor = %session.visitor.as_str(),
                    error = %err,
                    "submission result rejected"
                );
            }
            settled
        })
    }

    fn feed<D>(&self, session: &Arc<SessionEntry<D>>, event: WizardEvent)
    where
        D: DraftRepository + 'static,
    {
        let next = match session.lock().apply(event) {
            Ok(next) => next,
            Err(err) => {
                warn!(
                    visitor = %session.visitor.as_str(),
                    error = %err,
                    "background wizard event rejected"
                );
                None
            }
        };

        if let Some(effect) = next {
            self.spawn(Arc::clone(session), effect);
        }
    }
}

/// Live wizard sessions. Controller locks are never held across an await.
pub struct WizardSessions<S, B, G>
where
    S: DraftStore,
{
    sessions: Mutex<HashMap<SessionId, Arc<SessionEntry<S::Repository>>>>,
    drafts: S,
    runner: EffectRunner<B, G>,
    portal_path: String,
    idle_ttl: Duration,
}

impl<S, B, G> WizardSessions<S, B, G>
where
    S: DraftStore + 'static,
    B: BrokerDirectory + 'static,
    G: SubmissionGateway + 'static,
{
    pub fn new(drafts: S, directory: Arc<B>, gateway: Arc<G>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            drafts,
            runner: EffectRunner { directory, gateway },
            portal_path: "/portal".to_string(),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_portal_path(mut self, portal_path: impl Into<String>) -> Self {
        self.portal_path = portal_path.into();
        self
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Opens a session and starts referral resolution and draft load side by side.
    /// Must be called from within a tokio runtime.
    pub fn open(
        &self,
        visitor_id: &str,
        broker_token: Option<&str>,
    ) -> Result<WizardView, SessionError> {
        let visitor = VisitorId::parse(visitor_id)?;
        let token = broker_token
            .map(|raw| {
                BrokerToken::parse(raw)
                    .ok_or_else(|| SessionError::InvalidReferral(raw.to_string()))
            })
            .transpose()?;

        let repository = self.drafts.for_visitor(&visitor)?;
        let mut controller = WizardController::new(repository, token);
        let effects = controller.start();

        let id = SessionId::generate();
        let entry = Arc::new(SessionEntry {
            visitor,
            controller: Mutex::new(controller),
            last_seen: Mutex::new(Instant::now()),
        });
        self.evict_idle();
        self.registry().insert(id, Arc::clone(&entry));
        info!(session = %id, visitor = %entry.visitor.as_str(), "wizard session opened");

        let view = entry.view(id, &self.portal_path);
        for effect in effects {
            self.runner.spawn(Arc::clone(&entry), effect);
        }
        Ok(view)
    }

    pub fn view(&self, id: &str) -> Result<WizardView, SessionError> {
        let (id, session) = self.session(id)?;
        Ok(session.view(id, &self.portal_path))
    }

    pub fn review(&self, id: &str) -> Result<ReviewSummary, SessionError> {
        let (_, session) = self.session(id)?;
        let summary = ReviewSummary::from_values(&session.lock().state().values);
        Ok(summary)
    }

    /// Applies one event, scheduling whatever follow-up work it asks for.
    pub fn dispatch(&self, id: &str, event: WizardEvent) -> Result<WizardView, SessionError> {
        let (id, session) = self.session(id)?;
        let effect = session.lock().apply(event)?;
        if let Some(effect) = effect {
            self.runner.spawn(Arc::clone(&session), effect);
        }
        Ok(session.view(id, &self.portal_path))
    }

    /// Writes several fields at once and marks them touched.
    pub fn update_fields(
        &self,
        id: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<WizardView, SessionError> {
        let parsed = fields
            .into_iter()
            .map(|(name, value)| name.parse::<FieldName>().map(|field| (field, value)))
            .collect::<Result<Vec<_>, UnknownField>>()?;

        let (id, session) = self.session(id)?;
        {
            let mut controller = session.lock();
            for (field, value) in parsed {
                controller.set_field(field, value)?;
                controller.apply(WizardEvent::FieldTouched(field))?;
            }
        }
        Ok(session.view(id, &self.portal_path))
    }

    /// Submits the session's application and waits for the gateway to settle.
    /// If the caller goes away first, the submission still settles in the background.
    pub async fn submit(&self, id: &str) -> Result<WizardView, SessionError> {
        let (id, session) = self.session(id)?;
        let request = session.lock().begin_submission()?;
        self.runner
            .settle(Arc::clone(&session), request)
            .await
            .map_err(|err| SessionError::SubmissionAborted(err.to_string()))??;
        Ok(session.view(id, &self.portal_path))
    }

    pub fn close(&self, id: &str) -> Result<(), SessionError> {
        let (id, _) = self.session(id)?;
        self.registry().remove(&id);
        info!(session = %id, "wizard session closed");
        Ok(())
    }

    /// Drops sessions idle longer than the configured TTL; returns how many went.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut registry = self.registry();
        let before = registry.len();
        registry.retain(|_, entry| entry.idle_for(now) < self.idle_ttl);
        let evicted = before - registry.len();
        if evicted > 0 {
            debug!(evicted, remaining = registry.len(), "idle wizard sessions evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<SessionEntry<S::Repository>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(
        &self,
        raw: &str,
    ) -> Result<(SessionId, Arc<SessionEntry<S::Repository>>), SessionError> {
        let id = raw
            .parse::<SessionId>()
            .map_err(|_| SessionError::NotFound(raw.to_string()))?;
        let session = self
            .registry()
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(raw.to_string()))?;
        session.touch();
        Ok((id, session))
    }
}
