use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque referral identifier embedded in the wizard route by a broker's share link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerToken(String);

impl BrokerToken {
    /// Accepts URL-safe tokens only, since they are interpolated into backend paths.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 128 {
            return None;
        }

        trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            .then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the backend assigns to a finalized application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationNumber(pub String);

impl fmt::Display for ApplicationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public profile of the broker who shared the referral link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub license_number: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub stats: BrokerStats,
    #[serde(default)]
    pub contact: BrokerContact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerStats {
    #[serde(default)]
    pub applications_closed: u32,
    #[serde(default)]
    pub years_experience: u32,
    #[serde(default)]
    pub average_close_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerContact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Ordered wizard steps. Review only re-displays what steps 1-4 collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Identity,
    Property,
    Finances,
    Employment,
    Review,
}

impl WizardStep {
    pub const ALL: [WizardStep; 5] = [
        WizardStep::Identity,
        WizardStep::Property,
        WizardStep::Finances,
        WizardStep::Employment,
        WizardStep::Review,
    ];

    pub const fn number(self) -> u8 {
        match self {
            WizardStep::Identity => 1,
            WizardStep::Property => 2,
            WizardStep::Finances => 3,
            WizardStep::Employment => 4,
            WizardStep::Review => 5,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|step| step.number() == number)
    }

    /// Next step, capped at Review.
    pub fn next(self) -> Self {
        Self::from_number(self.number() + 1).unwrap_or(WizardStep::Review)
    }

    /// Previous step, floored at Identity.
    pub fn previous(self) -> Self {
        Self::from_number(self.number().saturating_sub(1)).unwrap_or(WizardStep::Identity)
    }

    pub const fn label(self) -> &'static str {
        match self {
            WizardStep::Identity => "About you",
            WizardStep::Property => "Property & loan",
            WizardStep::Finances => "Finances",
            WizardStep::Employment => "Employment",
            WizardStep::Review => "Review & submit",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.label())
    }
}

/// Every field the wizard collects, named exactly as the backend expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    FirstName,
    LastName,
    Email,
    Phone,
    AddressStreet,
    AddressCity,
    AddressState,
    AddressZip,
    CitizenshipStatus,
    LoanType,
    PropertyValue,
    DownPayment,
    PropertyType,
    PropertyAddress,
    PropertyCity,
    PropertyState,
    PropertyZip,
    LoanPurpose,
    AnnualIncome,
    CreditScoreRange,
    IncomeType,
    EmploymentStatus,
    EmployerName,
    YearsEmployed,
}

impl FieldName {
    pub const ALL: [FieldName; 24] = [
        FieldName::FirstName,
        FieldName::LastName,
        FieldName::Email,
        FieldName::Phone,
        FieldName::AddressStreet,
        FieldName::AddressCity,
        FieldName::AddressState,
        FieldName::AddressZip,
        FieldName::CitizenshipStatus,
        FieldName::LoanType,
        FieldName::PropertyValue,
        FieldName::DownPayment,
        FieldName::PropertyType,
        FieldName::PropertyAddress,
        FieldName::PropertyCity,
        FieldName::PropertyState,
        FieldName::PropertyZip,
        FieldName::LoanPurpose,
        FieldName::AnnualIncome,
        FieldName::CreditScoreRange,
        FieldName::IncomeType,
        FieldName::EmploymentStatus,
        FieldName::EmployerName,
        FieldName::YearsEmployed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FieldName::FirstName => "first_name",
            FieldName::LastName => "last_name",
            FieldName::Email => "email",
            FieldName::Phone => "phone",
            FieldName::AddressStreet => "address_street",
            FieldName::AddressCity => "address_city",
            FieldName::AddressState => "address_state",
            FieldName::AddressZip => "address_zip",
            FieldName::CitizenshipStatus => "citizenship_status",
            FieldName::LoanType => "loan_type",
            FieldName::PropertyValue => "property_value",
            FieldName::DownPayment => "down_payment",
            FieldName::PropertyType => "property_type",
            FieldName::PropertyAddress => "property_address",
            FieldName::PropertyCity => "property_city",
            FieldName::PropertyState => "property_state",
            FieldName::PropertyZip => "property_zip",
            FieldName::LoanPurpose => "loan_purpose",
            FieldName::AnnualIncome => "annual_income",
            FieldName::CreditScoreRange => "credit_score_range",
            FieldName::IncomeType => "income_type",
            FieldName::EmploymentStatus => "employment_status",
            FieldName::EmployerName => "employer_name",
            FieldName::YearsEmployed => "years_employed",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            FieldName::FirstName => "First name",
            FieldName::LastName => "Last name",
            FieldName::Email => "Email",
            FieldName::Phone => "Phone",
            FieldName::AddressStreet => "Street address",
            FieldName::AddressCity => "City",
            FieldName::AddressState => "State",
            FieldName::AddressZip => "ZIP code",
            FieldName::CitizenshipStatus => "Citizenship status",
            FieldName::LoanType => "Loan type",
            FieldName::PropertyValue => "Property value",
            FieldName::DownPayment => "Down payment",
            FieldName::PropertyType => "Property type",
            FieldName::PropertyAddress => "Property address",
            FieldName::PropertyCity => "Property city",
            FieldName::PropertyState => "Property state",
            FieldName::PropertyZip => "Property ZIP code",
            FieldName::LoanPurpose => "Loan purpose",
            FieldName::AnnualIncome => "Annual income",
            FieldName::CreditScoreRange => "Credit score range",
            FieldName::IncomeType => "Income type",
            FieldName::EmploymentStatus => "Employment status",
            FieldName::EmployerName => "Employer name",
            FieldName::YearsEmployed => "Years employed",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application field '{0}'")]
pub struct UnknownField(pub String);

impl FromStr for FieldName {
    type Err = UnknownField;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == needle)
            .ok_or_else(|| UnknownField(value.to_string()))
    }
}

/// Flat record shared by every step. Values are kept exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormValues {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address_street: String,
    pub address_city: String,
    pub address_state: String,
    pub address_zip: String,
    pub citizenship_status: String,
    pub loan_type: String,
    pub property_value: String,
    pub down_payment: String,
    pub property_type: String,
    pub property_address: String,
    pub property_city: String,
    pub property_state: String,
    pub property_zip: String,
    pub loan_purpose: String,
    pub annual_income: String,
    pub credit_score_range: String,
    pub income_type: String,
    pub employment_status: String,
    pub employer_name: String,
    pub years_employed: String,
}

impl FormValues {
    pub fn get(&self, field: FieldName) -> &str {
        match field {
            FieldName::FirstName => &self.first_name,
            FieldName::LastName => &self.last_name,
            FieldName::Email => &self.email,
            FieldName::Phone => &self.phone,
            FieldName::AddressStreet => &self.address_street,
            FieldName::AddressCity => &self.address_city,
            FieldName::AddressState => &self.address_state,
            FieldName::AddressZip => &self.address_zip,
            FieldName::CitizenshipStatus => &self.citizenship_status,
            FieldName::LoanType => &self.loan_type,
            FieldName::PropertyValue => &self.property_value,
            FieldName::DownPayment => &self.down_payment,
            FieldName::PropertyType => &self.property_type,
            FieldName::PropertyAddress => &self.property_address,
            FieldName::PropertyCity => &self.property_city,
            FieldName::PropertyState => &self.property_state,
            FieldName::PropertyZip => &self.property_zip,
            FieldName::LoanPurpose => &self.loan_purpose,
            FieldName::AnnualIncome => &self.annual_income,
            FieldName::CreditScoreRange => &self.credit_score_range,
            FieldName::IncomeType => &self.income_type,
            FieldName::EmploymentStatus => &self.employment_status,
            FieldName::EmployerName => &self.employer_name,
            FieldName::YearsEmployed => &self.years_employed,
        }
    }

    pub fn set(&mut self, field: FieldName, value: impl Into<String>) {
        let slot = match field {
            FieldName::FirstName => &mut self.first_name,
            FieldName::LastName => &mut self.last_name,
            FieldName::Email => &mut self.email,
            FieldName::Phone => &mut self.phone,
            FieldName::AddressStreet => &mut self.address_street,
            FieldName::AddressCity => &mut self.address_city,
            FieldName::AddressState => &mut self.address_state,
            FieldName::AddressZip => &mut self.address_zip,
            FieldName::CitizenshipStatus => &mut self.citizenship_status,
            FieldName::LoanType => &mut self.loan_type,
            FieldName::PropertyValue => &mut self.property_value,
            FieldName::DownPayment => &mut self.down_payment,
            FieldName::PropertyType => &mut self.property_type,
            FieldName::PropertyAddress => &mut self.property_address,
            FieldName::PropertyCity => &mut self.property_city,
            FieldName::PropertyState => &mut self.property_state,
            FieldName::PropertyZip => &mut self.property_zip,
            FieldName::LoanPurpose => &mut self.loan_purpose,
            FieldName::AnnualIncome => &mut self.annual_income,
            FieldName::CreditScoreRange => &mut self.credit_score_range,
            FieldName::IncomeType => &mut self.income_type,
            FieldName::EmploymentStatus => &mut self.employment_status,
            FieldName::EmployerName => &mut self.employer_name,
            FieldName::YearsEmployed => &mut self.years_employed,
        };
        *slot = value.into();
    }

    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }
}

/// Employment discriminant driving conditional requiredness on step 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentStatus {
    Employed,
    SelfEmployed,
    Retired,
    Unemployed,
    Student,
    Other,
}

impl EmploymentStatus {
    pub const OPTIONS: [&'static str; 6] = [
        "employed",
        "self_employed",
        "retired",
        "unemployed",
        "student",
        "other",
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "employed" => Some(Self::Employed),
            "self_employed" => Some(Self::SelfEmployed),
            "retired" => Some(Self::Retired),
            "unemployed" => Some(Self::Unemployed),
            "student" => Some(Self::Student),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub const fn requires_employer(self) -> bool {
        matches!(self, Self::Employed | Self::SelfEmployed)
    }
}

/// Parses a whole-dollar amount, tolerating `$`, thousands separators, and cents.
pub fn parse_amount(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    let (whole, cents) = match cleaned.split_once('.') {
        Some((whole, cents)) => (whole, Some(cents)),
        None => (cleaned.as_str(), None),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Some(cents) = cents {
        if cents.is_empty() || cents.len() > 2 || !cents.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    whole.parse().ok()
}

/// Parses a whole number of years.
pub fn parse_years(raw: &str) -> Option<u8> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
