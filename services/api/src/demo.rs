use brokerdesk::error::AppError;
use brokerdesk::workflows::application::{
    BrokerContact, BrokerStats, BrokerSummary, BrokerToken, DraftRepository, FieldName,
    InMemoryBrokerDirectory, InMemoryDraftRepository, InMemorySubmissionGateway, ReviewSummary,
    SubmissionError, SubmissionGateway, SubmissionStatus, WizardController, WizardError,
    WizardScreen,
};
use clap::Args;
use std::sync::Arc;

const DEMO_TOKEN: &str = "dana-whitfield";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Run as a direct applicant with no broker referral.
    #[arg(long)]
    pub(crate) direct: bool,
    /// Make the first submission attempt fail to show the retry path.
    #[arg(long)]
    pub(crate) fail_first_submission: bool,
    /// Print the JSON payload sent to the application service.
    #[arg(long)]
    pub(crate) show_payload: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        direct,
        fail_first_submission,
        show_payload,
    } = args;

    let token = if direct {
        None
    } else {
        BrokerToken::parse(DEMO_TOKEN)
    };
    let directory = demo_directory();
    let gateway = InMemorySubmissionGateway::with_prefix("DEMO");
    if fail_first_submission {
        gateway.fail_next(SubmissionError::Transport("connection reset by peer".to_string()));
    }
    let drafts = Arc::new(InMemoryDraftRepository::default());

    println!("Loan application wizard demo");
    println!(
        "- Referral: {}",
        token
            .as_ref()
            .map(|token| token.to_string())
            .unwrap_or_else(|| "none (direct applicant)".to_string())
    );

    let mut wizard = WizardController::new(Arc::clone(&drafts), token.clone());
    let effects = wizard.start();
    wizard.run_effects(effects, &directory, &gateway).await?;
    render_screen(&wizard);

    if let Some(broker) = wizard.state().broker().cloned() {
        render_broker(&broker);
        if let Err(err) = wizard.submit_welcome("avery.lindqvist@") {
            println!("  Welcome rejected: {err}");
        }
        wizard.submit_welcome("avery.lindqvist@example.com")?;
        render_screen(&wizard);
    } else {
        wizard.set_field(FieldName::Email, "avery.lindqvist@example.com")?;
    }

    fill(
        &mut wizard,
        &[
            (FieldName::FirstName, "Avery"),
            (FieldName::LastName, "Lindqvist"),
            (FieldName::Phone, "555-0199"),
            (FieldName::AddressStreet, "1204 Grand Ave"),
            (FieldName::AddressCity, "Des Moines"),
            (FieldName::AddressState, "IA"),
            (FieldName::AddressZip, "50309"),
            (FieldName::CitizenshipStatus, "us_citizen"),
        ],
    )?;
    match wizard.continue_step() {
        Err(WizardError::Validation { step, errors }) => {
            println!("  Step {} blocked:", step.number());
            for (field, message) in &errors {
                println!("    - {}: {}", field.label(), message);
            }
        }
        other => other?,
    }
    wizard.set_field(FieldName::Phone, "(515) 555-0199")?;
    wizard.continue_step()?;
    render_screen(&wizard);

    fill(
        &mut wizard,
        &[
            (FieldName::LoanType, "purchase"),
            (FieldName::PropertyValue, "$550,000"),
            (FieldName::DownPayment, "$110,000"),
            (FieldName::PropertyType, "single_family"),
            (FieldName::PropertyCity, "Ames"),
            (FieldName::PropertyState, "IA"),
            (FieldName::LoanPurpose, "primary_residence"),
        ],
    )?;
    wizard.save_for_later()?;
    println!("  Saved for later on step 2; the applicant closes the tab");

    let mut resumed = WizardController::new(Arc::clone(&drafts), token);
    let effects = resumed.start();
    resumed.run_effects(effects, &directory, &gateway).await?;
    println!(
        "\nReturn visit (draft restored: {})",
        resumed.state().draft_restored
    );
    render_screen(&resumed);

    resumed.continue_step()?;
    fill(
        &mut resumed,
        &[
            (FieldName::AnnualIncome, "145000"),
            (FieldName::CreditScoreRange, "good"),
            (FieldName::IncomeType, "w2"),
        ],
    )?;
    resumed.continue_step()?;
    fill(
        &mut resumed,
        &[
            (FieldName::EmploymentStatus, "employed"),
            (FieldName::EmployerName, "Principal Financial"),
            (FieldName::YearsEmployed, "6"),
        ],
    )?;
    resumed.continue_step()?;
    render_screen(&resumed);
    render_review(&ReviewSummary::from_values(&resumed.state().values));

    submit(&mut resumed, &gateway, show_payload).await?;
    if resumed.state().submission.status == SubmissionStatus::Error {
        println!("  Retrying with the same idempotency key");
        submit(&mut resumed, &gateway, false).await?;
    }
    render_screen(&resumed);
    println!(
        "  Draft cleared after submission: {}",
        drafts.snapshot().is_none()
    );

    Ok(())
}

fn demo_directory() -> InMemoryBrokerDirectory {
    let broker = BrokerSummary {
        id: "brk_118".to_string(),
        name: "Dana Whitfield".to_string(),
        company: Some("Prairie Home Lending".to_string()),
        avatar_url: None,
        license_number: Some("NMLS 445812".to_string()),
        bio: Some("Helping first-time buyers across central Iowa.".to_string()),
        stats: BrokerStats {
            applications_closed: 412,
            years_experience: 12,
            average_close_days: Some(27),
        },
        contact: BrokerContact {
            email: Some("dana@prairiehome.example".to_string()),
            phone: Some("515-555-0144".to_string()),
        },
    };

    match BrokerToken::parse(DEMO_TOKEN) {
        Some(token) => InMemoryBrokerDirectory::default().with_broker(token, broker),
        None => InMemoryBrokerDirectory::default(),
    }
}

fn fill(
    wizard: &mut WizardController<InMemoryDraftRepository>,
    fields: &[(FieldName, &str)],
) -> Result<(), AppError> {
    for (field, value) in fields {
        wizard.set_field(*field, *value)?;
    }
    Ok(())
}

async fn submit<G>(
    wizard: &mut WizardController<InMemoryDraftRepository>,
    gateway: &G,
    show_payload: bool,
) -> Result<(), AppError>
where
    G: SubmissionGateway,
{
    let request = wizard.begin_submission()?;
    if show_payload {
        match serde_json::to_string_pretty(&request.payload) {
            Ok(json) => println!("  Submission payload:\n{json}"),
            Err(err) => println!("  Submission payload unavailable: {err}"),
        }
    }
    let result = gateway.submit(&request).await;
    wizard.finish_submission(result)?;

    let submission = &wizard.state().submission;
    match (&submission.application_number, &submission.error) {
        (Some(number), _) => println!("  Submitted: application {number}"),
        (None, Some(error)) => println!("  Submission failed: {error}"),
        (None, None) => println!("  Submission settled without a result"),
    }
    Ok(())
}

fn render_screen<D>(wizard: &WizardController<D>)
where
    D: DraftRepository + 'static,
{
    match wizard.screen() {
        WizardScreen::LoadingReferral => println!("\n[Verifying referral link]"),
        WizardScreen::ReferralUnavailable { message } => {
            println!("\n[Referral unavailable] {message}")
        }
        WizardScreen::BrokerWelcome => println!("\n[Welcome]"),
        WizardScreen::Step { step, number } => {
            println!("\n[Step {number} of 5] {}", step.label())
        }
        WizardScreen::Submitting => println!("\n[Submitting]"),
        WizardScreen::Complete { application_number } => println!(
            "\n[Complete] application {}",
            application_number
                .map(|number| number.to_string())
                .unwrap_or_else(|| "pending".to_string())
        ),
    }
}

fn render_broker(broker: &BrokerSummary) {
    println!(
        "  {} ({}) | {} closed | {} years",
        broker.name,
        broker.company.as_deref().unwrap_or("independent"),
        broker.stats.applications_closed,
        broker.stats.years_experience
    );
    if let Some(license) = &broker.license_number {
        println!("  License: {license}");
    }
}

fn render_review(review: &ReviewSummary) {
    println!("  Property value: {}", review.display.property_value);
    println!("  Down payment:   {}", review.display.down_payment);
    println!("  Estimated loan: {}", review.display.estimated_loan);
    if !review.display.loan_to_value.is_empty() {
        println!("  Loan-to-value:  {}", review.display.loan_to_value);
    }
}
