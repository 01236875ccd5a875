//! Loan application wizard for broker referred and direct applicants.
//!
//! A [`WizardController`] owns one applicant's state and is driven by
//! [`WizardEvent`]s. Async work (referral lookup, draft load, submission) is
//! requested as [`WizardEffect`]s and performed by the caller, either directly
//! through [`WizardController::run_effects`] or by [`WizardSessions`] on the
//! tokio runtime.

pub mod broker;
pub mod controller;
pub mod domain;
pub mod draft;
pub mod gateway;
pub mod review;
pub mod router;
pub mod session;
pub mod validation;

#[cfg(test)]
mod tests;

pub use broker::{
    resolve_referral, BrokerDirectory, BrokerLookupError, HttpBrokerDirectory,
    InMemoryBrokerDirectory,
};
pub use controller::{
    BrokerResolution, SubmissionState, SubmissionStatus, WizardController, WizardEffect,
    WizardError, WizardEvent, WizardPhase, WizardScreen, WizardState,
};
pub use domain::{
    ApplicationNumber, BrokerContact, BrokerStats, BrokerSummary, BrokerToken, EmploymentStatus,
    FieldName, FormValues, UnknownField, WizardStep,
};
pub use draft::{
    load_draft, Draft, DraftError, DraftRepository, DraftStore, FileDraftRepository,
    FileDraftStore, InMemoryDraftRepository, InMemoryDraftStore, VisitorId,
};
pub use gateway::{
    ApplicationPayload, HttpSubmissionGateway, InMemorySubmissionGateway, SubmissionError,
    SubmissionGateway, SubmissionRequest,
};
pub use review::{estimated_loan, format_currency, ReviewSummary};
pub use router::wizard_router;
pub use session::{SessionError, SessionId, WizardSessions, WizardView};
pub use validation::{validate, ValidationErrors};
