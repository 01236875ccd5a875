use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::workflows::application::broker::InMemoryBrokerDirectory;
use crate::workflows::application::controller::WizardController;
use crate::workflows::application::domain::{
    ApplicationNumber, BrokerContact, BrokerStats, BrokerSummary, BrokerToken, FieldName,
    FormValues,
};
use crate::workflows::application::draft::{
    Draft, DraftError, DraftRepository, DraftStore, InMemoryDraftRepository, InMemoryDraftStore,
    VisitorId,
};
use crate::workflows::application::gateway::{
    InMemorySubmissionGateway, SubmissionError, SubmissionGateway, SubmissionRequest,
};
use crate::workflows::application::session::{WizardSessions, WizardView};

pub(super) type MemorySessions =
    WizardSessions<InMemoryDraftStore, InMemoryBrokerDirectory, InMemorySubmissionGateway>;

pub(super) fn token() -> BrokerToken {
    BrokerToken::parse("dana-whitfield").expect("valid token")
}

pub(super) fn broker() -> BrokerSummary {
    BrokerSummary {
        id: "brk_118".to_string(),
        name: "Dana Whitfield".to_string(),
        company: Some("Prairie Home Lending".to_string()),
        avatar_url: None,
        license_number: Some("NMLS 445812".to_string()),
        bio: Some("Helping first-time buyers across Iowa since 2012.".to_string()),
        stats: BrokerStats {
            applications_closed: 412,
            years_experience: 12,
            average_close_days: Some(27),
        },
        contact: BrokerContact {
            email: Some("dana@prairiehome.example".to_string()),
            phone: Some("515-555-0144".to_string()),
        },
    }
}

pub(super) fn directory() -> InMemoryBrokerDirectory {
    InMemoryBrokerDirectory::default().with_broker(token(), broker())
}

/// Values that pass every step with an employed applicant.
pub(super) fn complete_values() -> Vec<(FieldName, &'static str)> {
    vec![
        (FieldName::FirstName, "Avery"),
        (FieldName::LastName, "Lindqvist"),
        (FieldName::Email, "avery@example.com"),
        (FieldName::Phone, "(515) 555-0199"),
        (FieldName::AddressStreet, "1204 Grand Ave"),
        (FieldName::AddressCity, "Des Moines"),
        (FieldName::AddressState, "IA"),
        (FieldName::AddressZip, "50309"),
        (FieldName::CitizenshipStatus, "us_citizen"),
        (FieldName::LoanType, "purchase"),
        (FieldName::PropertyValue, "550000"),
        (FieldName::DownPayment, "110000"),
        (FieldName::PropertyType, "single_family"),
        (FieldName::PropertyCity, "Ames"),
        (FieldName::PropertyState, "IA"),
        (FieldName::PropertyZip, "50010"),
        (FieldName::LoanPurpose, "primary_residence"),
        (FieldName::AnnualIncome, "145000"),
        (FieldName::CreditScoreRange, "good"),
        (FieldName::IncomeType, "w2"),
        (FieldName::EmploymentStatus, "employed"),
        (FieldName::EmployerName, "Principal Financial"),
        (FieldName::YearsEmployed, "6"),
    ]
}

pub(super) fn draft_at(step: u8, values: FormValues, broker_token: Option<BrokerToken>) -> Draft {
    Draft {
        values,
        current_step: step,
        broker_token,
        saved_at: Utc::now(),
    }
}

pub(super) fn direct_controller() -> (
    WizardController<InMemoryDraftRepository>,
    Arc<InMemoryDraftRepository>,
) {
    let drafts = Arc::new(InMemoryDraftRepository::default());
    (WizardController::new(Arc::clone(&drafts), None), drafts)
}

/// Controller whose draft check has already come back empty.
pub(super) fn settled_direct_controller() -> (
    WizardController<InMemoryDraftRepository>,
    Arc<InMemoryDraftRepository>,
) {
    let (mut controller, drafts) = direct_controller();
    controller
        .apply(crate::workflows::application::WizardEvent::DraftLoaded(None))
        .expect("empty draft accepted");
    (controller, drafts)
}

pub(super) fn fill<D>(controller: &mut WizardController<D>)
where
    D: DraftRepository + 'static,
{
    for (field, value) in complete_values() {
        controller.set_field(field, value).expect("field editable");
    }
}

/// Fills every field and continues until the controller sits on Review.
pub(super) fn advance_to_review<D>(controller: &mut WizardController<D>)
where
    D: DraftRepository + 'static,
{
    fill(controller);
    for _ in 0..4 {
        controller.continue_step().expect("step validates");
    }
}

/// Draft slot whose writes always fail.
#[derive(Debug, Default)]
pub(super) struct ReadOnlyDrafts;

impl DraftRepository for ReadOnlyDrafts {
    fn load(&self) -> Result<Option<Draft>, DraftError> {
        Ok(None)
    }

    fn save(&self, _draft: Draft) -> Result<(), DraftError> {
        Err(DraftError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "draft directory is read-only",
        )))
    }

    fn clear(&self) -> Result<(), DraftError> {
        Err(DraftError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "draft directory is read-only",
        )))
    }
}

#[derive(Debug, Default)]
pub(super) struct ReadOnlyDraftStore;

impl DraftStore for ReadOnlyDraftStore {
    type Repository = ReadOnlyDrafts;

    fn for_visitor(&self, _visitor: &VisitorId) -> Result<Arc<Self::Repository>, DraftError> {
        Ok(Arc::new(ReadOnlyDrafts))
    }
}

/// Gateway that answers only after `delay`.
pub(super) struct SlowGateway {
    pub(super) delay: Duration,
    pub(super) inner: InMemorySubmissionGateway,
}

#[async_trait]
impl SubmissionGateway for SlowGateway {
    async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<ApplicationNumber, SubmissionError> {
        tokio::time::sleep(self.delay).await;
        self.inner.submit(request).await
    }
}

pub(super) fn memory_sessions(
    drafts: InMemoryDraftStore,
) -> (Arc<MemorySessions>, Arc<InMemorySubmissionGateway>) {
    let gateway = Arc::new(InMemorySubmissionGateway::default());
    let sessions = WizardSessions::new(drafts, Arc::new(directory()), Arc::clone(&gateway));
    (Arc::new(sessions), gateway)
}

/// Polls a session until `ready` holds; background tasks settle within a few ticks.
pub(super) async fn wait_for<S, B, G>(
    sessions: &WizardSessions<S, B, G>,
    id: &str,
    ready: impl Fn(&WizardView) -> bool,
) -> WizardView
where
    S: DraftStore + 'static,
    B: crate::workflows::application::BrokerDirectory + 'static,
    G: crate::workflows::application::SubmissionGateway + 'static,
{
    for _ in 0..200 {
        let view = sessions.view(id).expect("session exists");
        if ready(&view) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {id} never reached the expected state");
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}
