use super::common::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::workflows::application::controller::{
    BrokerResolution, SubmissionStatus, WizardError, WizardEvent, WizardScreen,
};
use crate::workflows::application::domain::{FieldName, FormValues, WizardStep};
use crate::workflows::application::draft::{DraftRepository, DraftStore, InMemoryDraftStore, VisitorId};
use crate::workflows::application::gateway::{InMemorySubmissionGateway, SubmissionError};
use crate::workflows::application::session::{SessionError, WizardSessions};

fn field_map(fields: &[(FieldName, &str)]) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(field, value)| (field.as_str().to_string(), value.to_string()))
        .collect()
}

fn all_fields() -> BTreeMap<String, String> {
    field_map(&complete_values())
}

#[tokio::test]
async fn direct_session_restores_saved_draft_in_background() {
    let drafts = InMemoryDraftStore::default();
    let visitor = VisitorId::parse("visitor-7").expect("visitor");
    let mut values = FormValues::default();
    values.email = "a@b.com".to_string();
    drafts
        .for_visitor(&visitor)
        .expect("slot")
        .save(draft_at(3, values, None))
        .expect("seeded");
    let (sessions, _) = memory_sessions(drafts);

    let opened = sessions.open("visitor-7", None).expect("session opens");
    let id = opened.session_id.to_string();

    let view = wait_for(&sessions, &id, |view| view.draft_restored).await;
    assert_eq!(
        view.screen,
        WizardScreen::Step {
            step: WizardStep::Finances,
            number: 3,
        }
    );
    assert_eq!(view.values.email, "a@b.com");
    assert_eq!(view.step_label, Some(WizardStep::Finances.label()));
}

#[tokio::test]
async fn referred_session_shows_broker_once_resolved() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let opened = sessions
        .open("visitor-1", Some("dana-whitfield"))
        .expect("session opens");
    assert_eq!(opened.screen, WizardScreen::LoadingReferral);
    let id = opened.session_id.to_string();

    let view = wait_for(&sessions, &id, |view| {
        matches!(view.broker, BrokerResolution::Loaded { .. })
    })
    .await;
    assert_eq!(view.screen, WizardScreen::BrokerWelcome);

    let view = sessions
        .dispatch(
            &id,
            WizardEvent::WelcomeSubmitted {
                email: "avery@example.com".to_string(),
            },
        )
        .expect("welcome accepted");
    assert_eq!(
        view.screen,
        WizardScreen::Step {
            step: WizardStep::Identity,
            number: 1,
        }
    );
    assert_eq!(view.values.email, "avery@example.com");
}

#[tokio::test]
async fn unknown_referral_dead_ends_the_session() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let opened = sessions
        .open("visitor-2", Some("no-such-broker"))
        .expect("session opens");
    let id = opened.session_id.to_string();

    let view = wait_for(&sessions, &id, |view| {
        matches!(view.screen, WizardScreen::ReferralUnavailable { .. })
    })
    .await;
    assert!(matches!(view.broker, BrokerResolution::Failed { .. }));

    let err = sessions
        .dispatch(&id, WizardEvent::Continue)
        .expect_err("dead end");
    assert!(matches!(
        err,
        SessionError::Wizard(WizardError::ReferralUnavailable(_))
    ));
}

#[tokio::test]
async fn full_application_submits_and_clears_draft() {
    let drafts = InMemoryDraftStore::default();
    let (sessions, gateway) = memory_sessions(drafts.clone());
    let id = sessions
        .open("visitor-3", None)
        .expect("session opens")
        .session_id
        .to_string();

    sessions.update_fields(&id, all_fields()).expect("fields set");
    for _ in 0..4 {
        sessions
            .dispatch(&id, WizardEvent::Continue)
            .expect("step validates");
    }
    let view = sessions
        .dispatch(&id, WizardEvent::SaveForLater)
        .expect("saved");
    assert!(view.can_submit);

    let slot = drafts
        .for_visitor(&VisitorId::parse("visitor-3").expect("visitor"))
        .expect("slot");
    assert_eq!(slot.load().expect("load").map(|d| d.current_step), Some(5));

    let view = sessions.submit(&id).await.expect("submitted");
    assert_eq!(
        view.screen,
        WizardScreen::Complete {
            application_number: view.submission.application_number.clone(),
        }
    );
    assert_eq!(view.submission.status, SubmissionStatus::Success);
    assert_eq!(view.portal_path.as_deref(), Some("/portal"));
    assert!(slot.load().expect("load").is_none());
    assert_eq!(gateway.issued_count(), 1);
}

#[tokio::test]
async fn failed_submission_stays_on_review_for_retry() {
    let (sessions, gateway) = memory_sessions(InMemoryDraftStore::default());
    let id = sessions
        .open("visitor-4", None)
        .expect("session opens")
        .session_id
        .to_string();
    sessions.update_fields(&id, all_fields()).expect("fields set");
    for _ in 0..4 {
        sessions.dispatch(&id, WizardEvent::Continue).expect("valid");
    }

    gateway.fail_next(SubmissionError::Rejected {
        status: 500,
        message: "application submission failed (status 500)".to_string(),
    });
    let view = sessions.submit(&id).await.expect("settled");
    assert_eq!(view.submission.status, SubmissionStatus::Error);
    assert_eq!(
        view.screen,
        WizardScreen::Step {
            step: WizardStep::Review,
            number: 5,
        }
    );
    assert_eq!(view.values.first_name, "Avery");

    let view = sessions.submit(&id).await.expect("retried");
    assert_eq!(view.submission.status, SubmissionStatus::Success);
    let received = gateway.received();
    assert_eq!(received[0].idempotency_key, received[1].idempotency_key);
}

#[tokio::test]
async fn continue_failure_exposes_every_step_error() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let id = sessions
        .open("visitor-5", None)
        .expect("session opens")
        .session_id
        .to_string();

    let view = sessions
        .update_fields(&id, field_map(&[(FieldName::Phone, "555")]))
        .expect("field set");
    assert!(view.errors.is_empty());

    let err = sessions
        .dispatch(&id, WizardEvent::Continue)
        .expect_err("identity incomplete");
    match err {
        SessionError::Wizard(WizardError::Validation { errors, .. }) => {
            assert!(errors.contains_key(&FieldName::FirstName));
            assert_eq!(
                errors.get(&FieldName::Phone).map(String::as_str),
                Some("Enter a 10-digit phone number")
            );
        }
        other => panic!("expected validation failure, got {other:?}"),
    }

    let view = sessions.view(&id).expect("view");
    assert!(view.errors.contains_key(&FieldName::LastName));
}

#[tokio::test]
async fn unknown_field_names_are_rejected_before_any_write() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let id = sessions
        .open("visitor-6", None)
        .expect("session opens")
        .session_id
        .to_string();

    let mut fields = field_map(&[(FieldName::FirstName, "Avery")]);
    fields.insert("ssn".to_string(), "123-45-6789".to_string());
    let err = sessions.update_fields(&id, fields).expect_err("unknown field");
    assert!(matches!(err, SessionError::UnknownField(_)));
    assert_eq!(sessions.view(&id).expect("view").values.first_name, "");
}

#[tokio::test]
async fn open_rejects_bad_identifiers() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());

    let err = sessions
        .open("visitor-1", Some("../admin"))
        .expect_err("bad token");
    assert!(matches!(err, SessionError::InvalidReferral(_)));

    let err = sessions.open("../../etc", None).expect_err("bad visitor");
    assert!(matches!(err, SessionError::Draft(_)));
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn review_and_close_track_the_registry() {
    let (sessions, _) = memory_sessions(InMemoryDraftStore::default());
    let id = sessions
        .open("visitor-8", None)
        .expect("session opens")
        .session_id
        .to_string();
    sessions.update_fields(&id, all_fields()).expect("fields set");
    assert_eq!(sessions.len(), 1);

    let review = sessions.review(&id).expect("review");
    assert_eq!(review.display.estimated_loan, "$440,000");

    sessions.close(&id).expect("closed");
    assert!(matches!(sessions.view(&id), Err(SessionError::NotFound(_))));
    assert!(matches!(
        sessions.view("not-a-uuid"),
        Err(SessionError::NotFound(_))
    ));
}

#[tokio::test]
async fn abandoned_submit_call_still_settles_the_session() {
    let gateway = Arc::new(SlowGateway {
        delay: Duration::from_millis(100),
        inner: InMemorySubmissionGateway::default(),
    });
    let sessions = WizardSessions::new(
        InMemoryDraftStore::default(),
        Arc::new(directory()),
        Arc::clone(&gateway),
    );
    let id = sessions
        .open("visitor-9", None)
        .expect("session opens")
        .session_id
        .to_string();
    sessions.update_fields(&id, all_fields()).expect("fields set");
    for _ in 0..4 {
        sessions.dispatch(&id, WizardEvent::Continue).expect("valid");
    }

    let abandoned = tokio::time::timeout(Duration::from_millis(10), sessions.submit(&id)).await;
    assert!(abandoned.is_err(), "gateway answers after the caller gives up");
    assert_eq!(
        sessions.view(&id).expect("view").screen,
        WizardScreen::Submitting
    );

    let view = wait_for(&sessions, &id, |view| {
        view.submission.status == SubmissionStatus::Success
    })
    .await;
    assert!(matches!(view.screen, WizardScreen::Complete { .. }));
    assert_eq!(gateway.inner.issued_count(), 1);
}

#[tokio::test]
async fn idle_sessions_are_evicted_when_the_next_visitor_arrives() {
    let sessions = WizardSessions::new(
        InMemoryDraftStore::default(),
        Arc::new(directory()),
        Arc::new(InMemorySubmissionGateway::default()),
    )
    .with_idle_ttl(Duration::from_millis(50));

    let stale = sessions
        .open("visitor-10", None)
        .expect("session opens")
        .session_id
        .to_string();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let fresh = sessions
        .open("visitor-11", None)
        .expect("session opens")
        .session_id
        .to_string();
    assert_eq!(sessions.len(), 1);
    assert!(matches!(sessions.view(&stale), Err(SessionError::NotFound(_))));
    assert!(sessions.view(&fresh).is_ok());
}

#[tokio::test]
async fn activity_keeps_a_session_alive_across_sweeps() {
    let sessions = WizardSessions::new(
        InMemoryDraftStore::default(),
        Arc::new(directory()),
        Arc::new(InMemorySubmissionGateway::default()),
    )
    .with_idle_ttl(Duration::from_millis(300));

    let id = sessions
        .open("visitor-12", None)
        .expect("session opens")
        .session_id
        .to_string();
    tokio::time::sleep(Duration::from_millis(150)).await;
    sessions.view(&id).expect("still open");
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(sessions.evict_idle(), 0);
    assert!(sessions.view(&id).is_ok());
}
