use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::domain::{
    parse_amount, parse_years, EmploymentStatus, FieldName, FormValues, WizardStep,
};

/// Field errors keyed by field, each carrying the message shown to the applicant.
pub type ValidationErrors = BTreeMap<FieldName, String>;

pub const CITIZENSHIP_OPTIONS: &[&str] = &[
    "us_citizen",
    "permanent_resident",
    "non_permanent_resident",
    "other",
];
pub const LOAN_TYPE_OPTIONS: &[&str] = &[
    "purchase",
    "refinance",
    "cash_out_refinance",
    "heloc",
    "construction",
];
pub const PROPERTY_TYPE_OPTIONS: &[&str] = &[
    "single_family",
    "condo",
    "townhouse",
    "multi_family",
    "manufactured",
];
pub const LOAN_PURPOSE_OPTIONS: &[&str] = &["primary_residence", "second_home", "investment"];
pub const CREDIT_SCORE_OPTIONS: &[&str] = &["excellent", "good", "fair", "poor", "unknown"];
pub const INCOME_TYPE_OPTIONS: &[&str] = &["w2", "self_employed", "retirement", "rental", "other"];

const MAX_YEARS_EMPLOYED: u8 = 60;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
    })
}

fn zip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("zip pattern compiles"))
}

/// `local@domain.tld` shape check used by both step 1 and the broker welcome gate.
pub fn is_valid_email(raw: &str) -> bool {
    email_pattern().is_match(raw.trim())
}

/// When a field must be filled in.
#[derive(Debug, Clone, Copy)]
pub enum Requirement {
    Always,
    Optional,
    /// Required only while the predicate holds for the current values.
    When(fn(&FormValues) -> bool),
}

/// Format constraint applied to non-empty input.
#[derive(Debug, Clone, Copy)]
pub enum FieldCheck {
    Text,
    Email,
    Phone,
    StateCode,
    Zip,
    OneOf(&'static [&'static str]),
    Amount { allow_zero: bool },
    Years,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: FieldName,
    pub requirement: Requirement,
    pub check: FieldCheck,
}

impl FieldRule {
    const fn required(field: FieldName, check: FieldCheck) -> Self {
        Self {
            field,
            requirement: Requirement::Always,
            check,
        }
    }

    const fn optional(field: FieldName, check: FieldCheck) -> Self {
        Self {
            field,
            requirement: Requirement::Optional,
            check,
        }
    }

    const fn required_when(
        field: FieldName,
        predicate: fn(&FormValues) -> bool,
        check: FieldCheck,
    ) -> Self {
        Self {
            field,
            requirement: Requirement::When(predicate),
            check,
        }
    }

    fn evaluate(&self, values: &FormValues) -> Option<String> {
        let raw = values.get(self.field).trim();
        if raw.is_empty() {
            let required = match self.requirement {
                Requirement::Always => true,
                Requirement::Optional => false,
                Requirement::When(predicate) => predicate(values),
            };
            return required.then(|| format!("{} is required", self.field.label()));
        }

        check_format(self.field, self.check, raw)
    }
}

fn check_format(field: FieldName, check: FieldCheck, raw: &str) -> Option<String> {
    let label = field.label();
    match check {
        FieldCheck::Text => None,
        FieldCheck::Email => {
            (!is_valid_email(raw)).then(|| "Enter a valid email address".to_string())
        }
        FieldCheck::Phone => {
            let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
            let valid = digits.len() == 10 || (digits.len() == 11 && digits.starts_with('1'));
            (!valid).then(|| "Enter a 10-digit phone number".to_string())
        }
        FieldCheck::StateCode => {
            let valid = raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic());
            (!valid).then(|| format!("{label} must be a two-letter state code"))
        }
        FieldCheck::Zip => {
            (!zip_pattern().is_match(raw)).then(|| format!("{label} must be 5 digits or ZIP+4"))
        }
        FieldCheck::OneOf(options) => {
            (!options.contains(&raw)).then(|| format!("Select a valid {}", label.to_lowercase()))
        }
        FieldCheck::Amount { allow_zero } => match parse_amount(raw) {
            Some(0) if !allow_zero => Some(format!("{label} must be greater than $0")),
            Some(_) => None,
            None => Some(format!("{label} must be a dollar amount")),
        },
        FieldCheck::Years => match parse_years(raw) {
            Some(years) if years <= MAX_YEARS_EMPLOYED => None,
            _ => Some(format!(
                "{label} must be a whole number between 0 and {MAX_YEARS_EMPLOYED}"
            )),
        },
    }
}

fn employer_required(values: &FormValues) -> bool {
    EmploymentStatus::parse(&values.employment_status)
        .map(EmploymentStatus::requires_employer)
        .unwrap_or(false)
}

/// Validation contract for one wizard step.
#[derive(Debug, Clone)]
pub struct StepSchema {
    pub step: WizardStep,
    pub rules: Vec<FieldRule>,
}

impl StepSchema {
    pub fn for_step(step: WizardStep) -> Self {
        use FieldCheck::{Amount, OneOf, StateCode, Text, Years, Zip};

        let rules = match step {
            WizardStep::Identity => vec![
                FieldRule::required(FieldName::FirstName, Text),
                FieldRule::required(FieldName::LastName, Text),
                FieldRule::required(FieldName::Email, FieldCheck::Email),
                FieldRule::required(FieldName::Phone, FieldCheck::Phone),
                FieldRule::required(FieldName::AddressStreet, Text),
                FieldRule::required(FieldName::AddressCity, Text),
                FieldRule::required(FieldName::AddressState, StateCode),
                FieldRule::required(FieldName::AddressZip, Zip),
                FieldRule::required(FieldName::CitizenshipStatus, OneOf(CITIZENSHIP_OPTIONS)),
            ],
            WizardStep::Property => vec![
                FieldRule::required(FieldName::LoanType, OneOf(LOAN_TYPE_OPTIONS)),
                FieldRule::required(FieldName::PropertyValue, Amount { allow_zero: false }),
                FieldRule::required(FieldName::DownPayment, Amount { allow_zero: true }),
                FieldRule::required(FieldName::PropertyType, OneOf(PROPERTY_TYPE_OPTIONS)),
                FieldRule::optional(FieldName::PropertyAddress, Text),
                FieldRule::required(FieldName::PropertyCity, Text),
                FieldRule::required(FieldName::PropertyState, StateCode),
                FieldRule::optional(FieldName::PropertyZip, Zip),
                FieldRule::required(FieldName::LoanPurpose, OneOf(LOAN_PURPOSE_OPTIONS)),
            ],
            WizardStep::Finances => vec![
                FieldRule::required(FieldName::AnnualIncome, Amount { allow_zero: false }),
                FieldRule::required(FieldName::CreditScoreRange, OneOf(CREDIT_SCORE_OPTIONS)),
                FieldRule::required(FieldName::IncomeType, OneOf(INCOME_TYPE_OPTIONS)),
            ],
            WizardStep::Employment => vec![
                FieldRule::required(
                    FieldName::EmploymentStatus,
                    OneOf(&EmploymentStatus::OPTIONS),
                ),
                FieldRule::required_when(FieldName::EmployerName, employer_required, Text),
                FieldRule::required_when(FieldName::YearsEmployed, employer_required, Years),
            ],
            WizardStep::Review => Vec::new(),
        };

        Self { step, rules }
    }

    pub fn validate(&self, values: &FormValues) -> ValidationErrors {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(values).map(|message| (rule.field, message)))
            .collect()
    }
}

/// Validates `values` against the schema of `step` only.
pub fn validate(step: WizardStep, values: &FormValues) -> ValidationErrors {
    StepSchema::for_step(step).validate(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_pattern_matches_simple_addresses_only() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("  jordan.lee+loan@example.co.uk "));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("@b.com"));
    }

    #[test]
    fn review_has_no_rules() {
        let errors = validate(WizardStep::Review, &FormValues::default());
        assert!(errors.is_empty());
    }

    #[test]
    fn optional_fields_are_still_format_checked() {
        let mut values = FormValues::default();
        values.property_zip = "5031".to_string();
        let errors = validate(WizardStep::Property, &values);
        assert_eq!(
            errors.get(&FieldName::PropertyZip).map(String::as_str),
            Some("Property ZIP code must be 5 digits or ZIP+4")
        );
        assert!(!errors.contains_key(&FieldName::PropertyAddress));
    }

    #[test]
    fn years_employed_rejects_out_of_range_values() {
        let mut values = FormValues::default();
        values.employment_status = "employed".to_string();
        values.employer_name = "Acme".to_string();
        values.years_employed = "75".to_string();
        let errors = validate(WizardStep::Employment, &values);
        assert!(errors.contains_key(&FieldName::YearsEmployed));

        values.years_employed = "4".to_string();
        assert!(validate(WizardStep::Employment, &values).is_empty());
    }

    #[test]
    fn zero_property_value_is_rejected_but_zero_down_payment_is_allowed() {
        let mut values = FormValues::default();
        values.property_value = "0".to_string();
        values.down_payment = "0".to_string();
        let errors = validate(WizardStep::Property, &values);
        assert!(errors.contains_key(&FieldName::PropertyValue));
        assert!(!errors.contains_key(&FieldName::DownPayment));
    }
}
