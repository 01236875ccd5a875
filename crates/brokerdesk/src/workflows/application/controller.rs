use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::broker::{resolve_referral, BrokerDirectory, BrokerLookupError};
use super::draft::{load_draft, Draft, DraftError, DraftRepository};
use super::domain::{
    ApplicationNumber, BrokerSummary, BrokerToken, FieldName, FormValues, WizardStep,
};
use super::gateway::{ApplicationPayload, SubmissionError, SubmissionGateway, SubmissionRequest};
use super::validation::{is_valid_email, validate, ValidationErrors};

/// Where the wizard is. BrokerWelcome only exists while a referral is present and
/// no email has been captured yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "step", rename_all = "snake_case")]
pub enum WizardPhase {
    BrokerWelcome,
    Step(WizardStep),
    Submitting,
    Complete,
}

/// Progress of the referral lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BrokerResolution {
    NotRequested,
    Loading,
    Loaded { broker: BrokerSummary },
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionState {
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_number: Option<ApplicationNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Screen presented for the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum WizardScreen {
    LoadingReferral,
    ReferralUnavailable { message: String },
    BrokerWelcome,
    Step { step: WizardStep, number: u8 },
    Submitting,
    Complete {
        application_number: Option<ApplicationNumber>,
    },
}

/// Everything one application session knows. Only the controller mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardState {
    pub phase: WizardPhase,
    pub values: FormValues,
    pub broker_token: Option<BrokerToken>,
    pub broker: BrokerResolution,
    pub submission: SubmissionState,
    pub touched: BTreeSet<FieldName>,
    pub errors: ValidationErrors,
    pub draft_checked: bool,
    pub draft_restored: bool,
    #[serde(skip)]
    pub idempotency_key: Uuid,
}

impl WizardState {
    fn new(broker_token: Option<BrokerToken>) -> Self {
        let phase = if broker_token.is_some() {
            WizardPhase::BrokerWelcome
        } else {
            WizardPhase::Step(WizardStep::Identity)
        };

        Self {
            phase,
            values: FormValues::default(),
            broker_token,
            broker: BrokerResolution::NotRequested,
            submission: SubmissionState::default(),
            touched: BTreeSet::new(),
            errors: ValidationErrors::new(),
            draft_checked: false,
            draft_restored: false,
            idempotency_key: Uuid::new_v4(),
        }
    }

    pub fn current_step(&self) -> Option<WizardStep> {
        match self.phase {
            WizardPhase::Step(step) => Some(step),
            _ => None,
        }
    }

    /// Errors for fields the applicant has touched; untouched errors stay hidden.
    pub fn visible_errors(&self) -> ValidationErrors {
        self.errors
            .iter()
            .filter(|(field, _)| self.touched.contains(field))
            .map(|(field, message)| (*field, message.clone()))
            .collect()
    }

    pub fn email_gate_satisfied(&self) -> bool {
        self.values.has_email()
    }

    pub fn referral_failed(&self) -> bool {
        matches!(self.broker, BrokerResolution::Failed { .. })
    }

    pub fn broker(&self) -> Option<&BrokerSummary> {
        match &self.broker {
            BrokerResolution::Loaded { broker } => Some(broker),
            _ => None,
        }
    }

    fn entry_phase(&self) -> WizardPhase {
        if self.broker_token.is_some() && !self.email_gate_satisfied() {
            WizardPhase::BrokerWelcome
        } else {
            WizardPhase::Step(WizardStep::Identity)
        }
    }

    pub fn screen(&self) -> WizardScreen {
        if let WizardPhase::Complete = self.phase {
            return WizardScreen::Complete {
                application_number: self.submission.application_number.clone(),
            };
        }

        if let BrokerResolution::Failed { message } = &self.broker {
            return WizardScreen::ReferralUnavailable {
                message: message.clone(),
            };
        }

        match self.phase {
            WizardPhase::BrokerWelcome => match self.broker {
                BrokerResolution::Loaded { .. } => WizardScreen::BrokerWelcome,
                _ => WizardScreen::LoadingReferral,
            },
            WizardPhase::Step(step) => WizardScreen::Step {
                step,
                number: step.number(),
            },
            WizardPhase::Submitting | WizardPhase::Complete => WizardScreen::Submitting,
        }
    }
}

/// Inputs to the reducer: applicant actions and results of async work.
#[derive(Debug, Clone)]
pub enum WizardEvent {
    BrokerResolved {
        token: BrokerToken,
        outcome: Result<BrokerSummary, BrokerLookupError>,
    },
    ReferralChanged(Option<BrokerToken>),
    DraftLoaded(Option<Draft>),
    FieldChanged {
        field: FieldName,
        value: String,
    },
    FieldTouched(FieldName),
    WelcomeSubmitted {
        email: String,
    },
    Continue,
    Back,
    SaveForLater,
    SubmissionStarted,
    SubmissionSettled(Result<ApplicationNumber, SubmissionError>),
    Reset,
    ReturnHome,
}

impl WizardEvent {
    fn action(&self) -> &'static str {
        match self {
            WizardEvent::BrokerResolved { .. } => "broker_resolved",
            WizardEvent::ReferralChanged(_) => "referral_changed",
            WizardEvent::DraftLoaded(_) => "draft_loaded",
            WizardEvent::FieldChanged { .. } => "edit_field",
            WizardEvent::FieldTouched(_) => "touch_field",
            WizardEvent::WelcomeSubmitted { .. } => "submit_welcome",
            WizardEvent::Continue => "continue",
            WizardEvent::Back => "back",
            WizardEvent::SaveForLater => "save_for_later",
            WizardEvent::SubmissionStarted => "submit",
            WizardEvent::SubmissionSettled(_) => "submission_settled",
            WizardEvent::Reset => "reset",
            WizardEvent::ReturnHome => "return_home",
        }
    }

    /// Events still accepted once a referral link has dead-ended.
    fn allowed_after_referral_failure(&self) -> bool {
        matches!(
            self,
            WizardEvent::BrokerResolved { .. }
                | WizardEvent::ReferralChanged(_)
                | WizardEvent::DraftLoaded(_)
                | WizardEvent::ReturnHome
        )
    }
}

/// Async work the reducer asks its host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardEffect {
    ResolveBroker(BrokerToken),
    LoadDraft,
    Submit(SubmissionRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("step {step} has {} invalid field(s)", .errors.len())]
    Validation {
        step: WizardStep,
        errors: ValidationErrors,
    },
    #[error("enter a valid email address to continue")]
    InvalidEmail,
    #[error("cannot {action} while the wizard is in {phase:?}")]
    IllegalTransition {
        action: &'static str,
        phase: WizardPhase,
    },
    #[error("referral link unavailable: {0}")]
    ReferralUnavailable(String),
    #[error("referral link is still being verified")]
    ReferralPending,
    #[error("an application submission is already in progress")]
    SubmissionInFlight,
    #[error(transparent)]
    Draft(#[from] DraftError),
}

/// Reducer over [`WizardState`] with an injected draft slot.
pub struct WizardController<D> {
    state: WizardState,
    drafts: Arc<D>,
}

impl<D> WizardController<D>
where
    D: DraftRepository + 'static,
{
    pub fn new(drafts: Arc<D>, broker_token: Option<BrokerToken>) -> Self {
        Self {
            state: WizardState::new(broker_token),
            drafts,
        }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn screen(&self) -> WizardScreen {
        self.state.screen()
    }

    pub fn drafts(&self) -> Arc<D> {
        Arc::clone(&self.drafts)
    }

    /// Kicks off referral resolution and the one-time draft load.
    pub fn start(&mut self) -> Vec<WizardEffect> {
        let mut effects = Vec::new();
        if let Some(effect) = self.request_resolution() {
            effects.push(effect);
        }
        if !self.state.draft_checked {
            effects.push(WizardEffect::LoadDraft);
        }
        effects
    }

    pub fn apply(&mut self, event: WizardEvent) -> Result<Option<WizardEffect>, WizardError> {
        if self.state.referral_failed() && !event.allowed_after_referral_failure() {
            return Err(WizardError::ReferralUnavailable(self.referral_failure_message()));
        }

        let action = event.action();
        match event {
            WizardEvent::BrokerResolved { token, outcome } => {
                self.on_broker_resolved(token, outcome);
                Ok(None)
            }
            WizardEvent::ReferralChanged(token) => self.on_referral_changed(token),
            WizardEvent::DraftLoaded(draft) => Ok(self.on_draft_loaded(draft)),
            WizardEvent::FieldChanged { field, value } => {
                self.on_field_changed(action, field, value)?;
                Ok(None)
            }
            WizardEvent::FieldTouched(field) => {
                self.ensure_editable(action)?;
                self.state.touched.insert(field);
                Ok(None)
            }
            WizardEvent::WelcomeSubmitted { email } => {
                self.on_welcome(action, email)?;
                Ok(None)
            }
            WizardEvent::Continue => {
                self.on_continue(action)?;
                Ok(None)
            }
            WizardEvent::Back => {
                let step = self.require_step(action)?;
                self.state.errors.clear();
                self.state.phase = WizardPhase::Step(step.previous());
                Ok(None)
            }
            WizardEvent::SaveForLater => {
                self.on_save(action)?;
                Ok(None)
            }
            WizardEvent::SubmissionStarted => self.on_submission_started(action).map(Some),
            WizardEvent::SubmissionSettled(result) => {
                self.on_submission_settled(action, result)?;
                Ok(None)
            }
            WizardEvent::Reset => {
                self.on_reset()?;
                Ok(None)
            }
            WizardEvent::ReturnHome => {
                self.on_return_home(action)?;
                Ok(None)
            }
        }
    }

    pub fn set_field(
        &mut self,
        field: FieldName,
        value: impl Into<String>,
    ) -> Result<(), WizardError> {
        self.apply(WizardEvent::FieldChanged {
            field,
            value: value.into(),
        })
        .map(|_| ())
    }

    pub fn submit_welcome(&mut self, email: impl Into<String>) -> Result<(), WizardError> {
        self.apply(WizardEvent::WelcomeSubmitted {
            email: email.into(),
        })
        .map(|_| ())
    }

    pub fn continue_step(&mut self) -> Result<(), WizardError> {
        self.apply(WizardEvent::Continue).map(|_| ())
    }

    pub fn back(&mut self) -> Result<(), WizardError> {
        self.apply(WizardEvent::Back).map(|_| ())
    }

    pub fn save_for_later(&mut self) -> Result<(), WizardError> {
        self.apply(WizardEvent::SaveForLater).map(|_| ())
    }

    pub fn reset(&mut self) -> Result<(), WizardError> {
        self.apply(WizardEvent::Reset).map(|_| ())
    }

    pub fn return_home(&mut self) -> Result<(), WizardError> {
        self.apply(WizardEvent::ReturnHome).map(|_| ())
    }

    /// Moves Review into Submitting and hands back the request to send.
    pub fn begin_submission(&mut self) -> Result<SubmissionRequest, WizardError> {
        match self.apply(WizardEvent::SubmissionStarted)? {
            Some(WizardEffect::Submit(request)) => Ok(request),
            _ => Err(WizardError::IllegalTransition {
                action: "submit",
                phase: self.state.phase,
            }),
        }
    }

    pub fn finish_submission(
        &mut self,
        result: Result<ApplicationNumber, SubmissionError>,
    ) -> Result<(), WizardError> {
        self.apply(WizardEvent::SubmissionSettled(result)).map(|_| ())
    }

    /// Submits through `gateway` and settles, for hosts that own the controller outright.
    pub async fn submit_with<G>(&mut self, gateway: &G) -> Result<&SubmissionState, WizardError>
    where
        G: SubmissionGateway + ?Sized,
    {
        let request = self.begin_submission()?;
        let result = gateway.submit(&request).await;
        self.finish_submission(result)?;
        Ok(&self.state.submission)
    }

    /// Runs effects to completion, feeding every result back through [`Self::apply`].
    pub async fn run_effects<B, G>(
        &mut self,
        effects: impl IntoIterator<Item = WizardEffect>,
        directory: &B,
        gateway: &G,
    ) -> Result<(), WizardError>
    where
        B: BrokerDirectory + ?Sized,
        G: SubmissionGateway + ?Sized,
    {
        let mut queue: VecDeque<WizardEffect> = effects.into_iter().collect();
        while let Some(effect) = queue.pop_front() {
            let event = match effect {
                WizardEffect::ResolveBroker(token) => resolve_referral(directory, token).await,
                WizardEffect::LoadDraft => load_draft(self.drafts.as_ref()),
                WizardEffect::Submit(request) => {
                    WizardEvent::SubmissionSettled(gateway.submit(&request).await)
                }
            };
            if let Some(next) = self.apply(event)? {
                queue.push_back(next);
            }
        }
        Ok(())
    }

    fn request_resolution(&mut self) -> Option<WizardEffect> {
        let token = self.state.broker_token.clone()?;
        if self.state.broker != BrokerResolution::NotRequested {
            return None;
        }
        self.state.broker = BrokerResolution::Loading;
        Some(WizardEffect::ResolveBroker(token))
    }

    fn referral_failure_message(&self) -> String {
        match &self.state.broker {
            BrokerResolution::Failed { message } => message.clone(),
            _ => String::new(),
        }
    }

    fn on_broker_resolved(
        &mut self,
        token: BrokerToken,
        outcome: Result<BrokerSummary, BrokerLookupError>,
    ) {
        if self.state.broker_token.as_ref() != Some(&token) {
            debug!(token = %token, "discarding stale referral resolution");
            return;
        }

        self.state.broker = match outcome {
            Ok(broker) => BrokerResolution::Loaded { broker },
            Err(err) => BrokerResolution::Failed {
                message: err.to_string(),
            },
        };
    }

    fn on_referral_changed(
        &mut self,
        token: Option<BrokerToken>,
    ) -> Result<Option<WizardEffect>, WizardError> {
        if self.state.broker_token == token {
            return Ok(None);
        }
        if matches!(self.state.phase, WizardPhase::Submitting) {
            return Err(WizardError::SubmissionInFlight);
        }

        let at_entry = matches!(self.state.phase, WizardPhase::BrokerWelcome)
            || (self.state.phase == WizardPhase::Step(WizardStep::Identity)
                && !self.state.email_gate_satisfied());

        self.state.broker_token = token;
        self.state.broker = BrokerResolution::NotRequested;
        if at_entry {
            self.state.phase = self.state.entry_phase();
        }
        Ok(self.request_resolution())
    }

    fn on_draft_loaded(&mut self, draft: Option<Draft>) -> Option<WizardEffect> {
        if self.state.draft_checked {
            debug!("draft already checked for this session; ignoring late load");
            return None;
        }
        self.state.draft_checked = true;

        let draft = draft?;
        let Some(step) = WizardStep::from_number(draft.current_step) else {
            warn!(step = draft.current_step, "ignoring draft with out-of-range step");
            return None;
        };
        if matches!(
            self.state.phase,
            WizardPhase::Submitting | WizardPhase::Complete
        ) {
            warn!(phase = ?self.state.phase, "ignoring draft that arrived after submission began");
            return None;
        }

        let still_welcoming = matches!(self.state.phase, WizardPhase::BrokerWelcome);
        self.state.values = draft.values;
        self.state.touched.clear();
        self.state.errors.clear();
        self.state.draft_restored = true;

        let adopted = if self.state.broker_token.is_none() {
            self.state.broker_token = draft.broker_token;
            self.request_resolution()
        } else {
            None
        };

        self.state.phase = if self.state.broker_token.is_some()
            && !self.state.email_gate_satisfied()
            && (still_welcoming || adopted.is_some())
        {
            WizardPhase::BrokerWelcome
        } else {
            WizardPhase::Step(step)
        };

        info!(step = step.number(), phase = ?self.state.phase, "draft restored");
        adopted
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), WizardError> {
        match self.state.phase {
            WizardPhase::BrokerWelcome | WizardPhase::Step(_) => Ok(()),
            WizardPhase::Submitting => Err(WizardError::SubmissionInFlight),
            phase => Err(WizardError::IllegalTransition { action, phase }),
        }
    }

    fn require_step(&self, action: &'static str) -> Result<WizardStep, WizardError> {
        match self.state.phase {
            WizardPhase::Step(step) => Ok(step),
            WizardPhase::Submitting => Err(WizardError::SubmissionInFlight),
            phase => Err(WizardError::IllegalTransition { action, phase }),
        }
    }

    fn on_field_changed(
        &mut self,
        action: &'static str,
        field: FieldName,
        value: String,
    ) -> Result<(), WizardError> {
        self.ensure_editable(action)?;
        self.state.values.set(field, value);

        if self.state.errors.contains_key(&field) {
            match self.state.phase {
                WizardPhase::Step(step) => self.state.errors = validate(step, &self.state.values),
                _ if is_valid_email(&self.state.values.email) => {
                    self.state.errors.remove(&FieldName::Email);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn on_welcome(&mut self, action: &'static str, email: String) -> Result<(), WizardError> {
        let phase = self.state.phase;
        if phase != WizardPhase::BrokerWelcome {
            return Err(WizardError::IllegalTransition { action, phase });
        }
        if !matches!(self.state.broker, BrokerResolution::Loaded { .. }) {
            return Err(WizardError::ReferralPending);
        }

        let email = email.trim().to_string();
        if !is_valid_email(&email) {
            self.state.touched.insert(FieldName::Email);
            self.state
                .errors
                .insert(FieldName::Email, "Enter a valid email address".to_string());
            return Err(WizardError::InvalidEmail);
        }

        self.state.values.email = email;
        self.state.errors.clear();
        self.state.phase = WizardPhase::Step(WizardStep::Identity);
        Ok(())
    }

    fn on_continue(&mut self, action: &'static str) -> Result<(), WizardError> {
        let step = self.require_step(action)?;
        if step == WizardStep::Review {
            return Err(WizardError::IllegalTransition {
                action,
                phase: self.state.phase,
            });
        }

        let errors = validate(step, &self.state.values);
        if !errors.is_empty() {
            self.state.touched.extend(errors.keys().copied());
            self.state.errors = errors.clone();
            return Err(WizardError::Validation { step, errors });
        }

        self.state.errors.clear();
        self.state.phase = WizardPhase::Step(step.next());
        Ok(())
    }

    fn on_save(&mut self, action: &'static str) -> Result<(), WizardError> {
        let step = self.require_step(action)?;
        let draft = Draft {
            values: self.state.values.clone(),
            current_step: step.number(),
            broker_token: self.state.broker_token.clone(),
            saved_at: Utc::now(),
        };
        self.drafts.save(draft)?;
        info!(step = step.number(), "draft saved for later");
        Ok(())
    }

    fn on_submission_started(
        &mut self,
        action: &'static str,
    ) -> Result<WizardEffect, WizardError> {
        if self.state.submission.status == SubmissionStatus::Loading {
            return Err(WizardError::SubmissionInFlight);
        }
        let step = self.require_step(action)?;
        if step != WizardStep::Review {
            return Err(WizardError::IllegalTransition {
                action,
                phase: self.state.phase,
            });
        }

        self.state.phase = WizardPhase::Submitting;
        self.state.submission = SubmissionState {
            status: SubmissionStatus::Loading,
            application_number: None,
            error: None,
        };

        let payload =
            ApplicationPayload::assemble(&self.state.values, self.state.broker_token.as_ref());
        Ok(WizardEffect::Submit(SubmissionRequest {
            payload,
            idempotency_key: self.state.idempotency_key,
        }))
    }

    fn on_submission_settled(
        &mut self,
        action: &'static str,
        result: Result<ApplicationNumber, SubmissionError>,
    ) -> Result<(), WizardError> {
        let phase = self.state.phase;
        if phase != WizardPhase::Submitting {
            return Err(WizardError::IllegalTransition { action, phase });
        }

        match result {
            Ok(number) => {
                info!(application_number = %number, "application submitted");
                self.state.submission = SubmissionState {
                    status: SubmissionStatus::Success,
                    application_number: Some(number),
                    error: None,
                };
                self.state.phase = WizardPhase::Complete;
                if let Err(err) = self.drafts.clear() {
                    error!(error = %err, "application submitted but draft could not be cleared");
                }
            }
            Err(err) => {
                warn!(error = %err, "application submission failed");
                self.state.submission = SubmissionState {
                    status: SubmissionStatus::Error,
                    application_number: None,
                    error: Some(err.to_string()),
                };
                self.state.phase = WizardPhase::Step(WizardStep::Review);
            }
        }
        Ok(())
    }

    fn on_reset(&mut self) -> Result<(), WizardError> {
        if matches!(self.state.phase, WizardPhase::Submitting) {
            return Err(WizardError::SubmissionInFlight);
        }
        self.drafts.clear()?;
        self.restart();
        Ok(())
    }

    fn on_return_home(&mut self, action: &'static str) -> Result<(), WizardError> {
        if self.state.referral_failed() {
            return Ok(());
        }
        let phase = self.state.phase;
        if phase != WizardPhase::Complete {
            return Err(WizardError::IllegalTransition { action, phase });
        }

        self.drafts.clear()?;
        self.restart();
        Ok(())
    }

    /// Fresh values under the same referral; the draft is never offered again.
    fn restart(&mut self) {
        let broker_token = self.state.broker_token.take();
        let broker = std::mem::replace(&mut self.state.broker, BrokerResolution::NotRequested);
        let mut fresh = WizardState::new(broker_token);
        fresh.broker = broker;
        fresh.draft_checked = true;
        self.state = fresh;
    }
}
