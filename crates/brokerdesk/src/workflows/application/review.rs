use serde::Serialize;

use super::domain::{parse_amount, FormValues};

/// Figures shown on the review step. Display only; never submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub property_value: Option<u64>,
    pub down_payment: Option<u64>,
    pub estimated_loan: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_to_value_pct: Option<f64>,
    pub display: ReviewDisplay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewDisplay {
    pub property_value: String,
    pub down_payment: String,
    pub estimated_loan: String,
    pub loan_to_value: String,
}

impl ReviewSummary {
    pub fn from_values(values: &FormValues) -> Self {
        let property_value = parse_amount(&values.property_value);
        let down_payment = parse_amount(&values.down_payment);
        let estimated_loan = estimated_loan(property_value, down_payment);

        let loan_to_value_pct = property_value
            .filter(|value| *value > 0)
            .map(|value| estimated_loan as f64 / value as f64 * 100.0);

        let display = ReviewDisplay {
            property_value: property_value.map(format_currency).unwrap_or_default(),
            down_payment: down_payment.map(format_currency).unwrap_or_default(),
            estimated_loan: format_currency(estimated_loan),
            loan_to_value: loan_to_value_pct
                .map(|pct| format!("{pct:.1}%"))
                .unwrap_or_default(),
        };

        Self {
            property_value,
            down_payment,
            estimated_loan,
            loan_to_value_pct,
            display,
        }
    }
}

/// Property value minus down payment, floored at zero. Missing inputs count as zero.
pub fn estimated_loan(property_value: Option<u64>, down_payment: Option<u64>) -> u64 {
    property_value
        .unwrap_or(0)
        .saturating_sub(down_payment.unwrap_or(0))
}

/// Whole dollars with thousands separators, e.g. `$440,000`.
pub fn format_currency(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("${grouped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(property_value: &str, down_payment: &str) -> FormValues {
        FormValues {
            property_value: property_value.to_string(),
            down_payment: down_payment.to_string(),
            ..FormValues::default()
        }
    }

    #[test]
    fn estimated_loan_subtracts_down_payment() {
        let summary = ReviewSummary::from_values(&values("550000", "110000"));
        assert_eq!(summary.estimated_loan, 440_000);
        assert_eq!(summary.display.estimated_loan, "$440,000");
        assert_eq!(summary.display.loan_to_value, "80.0%");
    }

    #[test]
    fn estimated_loan_floors_at_zero() {
        let summary = ReviewSummary::from_values(&values("200000", "250000"));
        assert_eq!(summary.estimated_loan, 0);
        assert_eq!(summary.display.estimated_loan, "$0");
    }

    #[test]
    fn missing_values_render_blank_rather_than_failing() {
        let summary = ReviewSummary::from_values(&FormValues::default());
        assert_eq!(summary.display.estimated_loan, "$0");
        assert!(summary.display.property_value.is_empty());
        assert!(summary.loan_to_value_pct.is_none());
    }

    #[test]
    fn currency_groups_thousands() {
        assert_eq!(format_currency(0), "$0");
        assert_eq!(format_currency(999), "$999");
        assert_eq!(format_currency(1_000), "$1,000");
        assert_eq!(format_currency(1_234_567), "$1,234,567");
    }
}
