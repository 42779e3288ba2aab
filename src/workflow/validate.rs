// src/workflow/validate.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::db::models::expense::NewExpense;
use crate::workflow::error::WorkflowError;

/// ISO-4217 codes the payroll system settles in. Anything outside this set is
/// rejected at submission time.
pub const RECOGNIZED_CURRENCIES: &[&str] = &[
    "AED", "AUD", "BRL", "CAD", "CHF", "CNY", "CZK", "DKK", "EUR", "GBP", "HKD", "HUF", "IDR",
    "ILS", "INR", "JPY", "KRW", "MXN", "MYR", "NOK", "NZD", "PHP", "PLN", "QAR", "RON", "SAR",
    "SEK", "SGD", "THB", "TRY", "TWD", "USD", "VND", "ZAR",
];

/// Raw multipart fields of an expense submission, before validation.
#[derive(Debug, Default)]
pub struct ExpenseForm {
    pub category: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub expense_date: Option<String>,
    pub tax_included: Option<String>,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, WorkflowError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(WorkflowError::Validation(format!("'{field}' is required"))),
    }
}

/// Validates a raw submission into a `NewExpense` owned by `employee_id`.
///
/// Rules per the workflow contract: amount strictly positive, currency a
/// recognized ISO code, expense date in `YYYY-MM-DD` form.
pub fn validate_submission(employee_id: i32, form: ExpenseForm) -> Result<NewExpense, WorkflowError> {
    let category = required(&form.category, "category")?.to_string();

    let amount_raw = required(&form.amount, "amount")?;
    let amount: Decimal = amount_raw
        .parse()
        .map_err(|_| WorkflowError::Validation(format!("'{amount_raw}' is not a valid amount")))?;
    if amount <= Decimal::ZERO {
        return Err(WorkflowError::Validation(
            "amount must be greater than zero".into(),
        ));
    }

    let currency = required(&form.currency, "currency")?.to_ascii_uppercase();
    if !RECOGNIZED_CURRENCIES.contains(&currency.as_str()) {
        return Err(WorkflowError::Validation(format!(
            "'{currency}' is not a recognized currency code"
        )));
    }

    let date_raw = required(&form.expense_date, "expense_date")?;
    let expense_date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d").map_err(|_| {
        WorkflowError::Validation(format!("'{date_raw}' is not a valid date (expected YYYY-MM-DD)"))
    })?;

    let tax_included = match form.tax_included.as_deref().map(str::trim) {
        None | Some("") => false,
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes"),
    };

    let description = form
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    Ok(NewExpense {
        employee_id,
        category,
        amount,
        currency,
        description,
        expense_date,
        tax_included,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> ExpenseForm {
        ExpenseForm {
            category: Some("Travel".into()),
            amount: Some("150.00".into()),
            currency: Some("GBP".into()),
            description: Some("Client visit".into()),
            expense_date: Some("2025-03-14".into()),
            tax_included: Some("true".into()),
        }
    }

    #[test]
    fn accepts_a_well_formed_submission() {
        let expense = validate_submission(7, form()).unwrap();
        assert_eq!(expense.employee_id, 7);
        assert_eq!(expense.amount, Decimal::new(15000, 2));
        assert_eq!(expense.currency, "GBP");
        assert!(expense.tax_included);
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for bad in ["0", "-12.50"] {
            let mut f = form();
            f.amount = Some(bad.into());
            assert!(matches!(
                validate_submission(7, f),
                Err(WorkflowError::Validation(_))
            ));
        }
    }

    #[test]
    fn rejects_unparsable_amounts_and_dates() {
        let mut f = form();
        f.amount = Some("lots".into());
        assert!(validate_submission(7, f).is_err());

        let mut f = form();
        f.expense_date = Some("14/03/2025".into());
        assert!(validate_submission(7, f).is_err());
    }

    #[test]
    fn rejects_unknown_currency_codes() {
        let mut f = form();
        f.currency = Some("XYZ".into());
        assert!(matches!(
            validate_submission(7, f),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn currency_is_normalized_to_uppercase() {
        let mut f = form();
        f.currency = Some("gbp".into());
        assert_eq!(validate_submission(7, f).unwrap().currency, "GBP");
    }

    #[test]
    fn missing_required_fields_fail_fast() {
        let mut f = form();
        f.category = None;
        assert!(validate_submission(7, f).is_err());

        let mut f = form();
        f.amount = Some("   ".into());
        assert!(validate_submission(7, f).is_err());
    }

    #[test]
    fn tax_flag_defaults_to_false() {
        let mut f = form();
        f.tax_included = None;
        assert!(!validate_submission(7, f).unwrap().tax_included);
    }
}
