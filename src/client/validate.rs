// Pre-wire argument validation.
//
// Every check here runs before any frame is written, so a rejected call
// leaves the channel untouched. The rules follow the AMQ grammar:
// exchange names restrict their alphabet, short strings and field-table
// keys are bounded at 256 characters, delivery mode and priority have
// closed domains.

use crate::codec::FieldTable;
use crate::errors::{Error, Result};

const MAX_SHORT_STR: usize = 256;

/// Short strings: at most 256 characters.
pub(crate) fn short_str(name: &str, value: &str) -> Result<()> {
    if value.chars().count() > MAX_SHORT_STR {
        return Err(Error::InvalidRequest(format!(
            "{name} must not exceed {MAX_SHORT_STR} characters"
        )));
    }
    Ok(())
}

/// Exchange names: empty is allowed (the default exchange); otherwise
/// letters, digits, hyphen, underscore, period, or colon.
pub(crate) fn exchange_name(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    short_str(name, value)?;
    let valid = value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '.' | '-'));
    if !valid {
        return Err(Error::InvalidRequest(format!(
            "{name} must only contain letters, digits, hyphen, underscore, period, or colon"
        )));
    }
    Ok(())
}

/// Field tables: every key is a non-empty string of at most 256 chars.
pub(crate) fn field_table(name: &str, value: &FieldTable) -> Result<()> {
    for key in value.keys() {
        if key.is_empty() || key.chars().count() > MAX_SHORT_STR {
            return Err(Error::InvalidRequest(format!(
                "{name} keys must be between 1 and {MAX_SHORT_STR} characters"
            )));
        }
    }
    Ok(())
}

/// Delivery mode: 1 (transient) or 2 (persistent).
pub(crate) fn delivery_mode(value: u8) -> Result<()> {
    if !(1..=2).contains(&value) {
        return Err(Error::InvalidRequest("delivery_mode must be 1 or 2".into()));
    }
    Ok(())
}

/// Priority: strictly between 0 and 256.
pub(crate) fn priority(value: u8) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidRequest(
            "priority must be between 0 and 256".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldValue;

    #[test]
    fn empty_exchange_name_is_the_default_exchange() {
        assert!(exchange_name("exchange", "").is_ok());
    }

    #[test]
    fn exchange_name_alphabet() {
        assert!(exchange_name("exchange", "amq.topic").is_ok());
        assert!(exchange_name("exchange", "my-x_1:queue").is_ok());
        assert!(exchange_name("exchange", "bad name").is_err());
        assert!(exchange_name("exchange", "bad/name").is_err());
    }

    #[test]
    fn long_names_are_rejected() {
        let long = "x".repeat(257);
        assert!(short_str("routing_key", &long).is_err());
        assert!(exchange_name("exchange", &long).is_err());
        assert!(short_str("routing_key", &"x".repeat(256)).is_ok());
    }

    #[test]
    fn field_table_key_bounds() {
        let mut table = FieldTable::new();
        table.insert("ok".into(), FieldValue::Bool(true));
        assert!(field_table("headers", &table).is_ok());

        let mut bad = FieldTable::new();
        bad.insert(String::new(), FieldValue::Bool(true));
        assert!(field_table("headers", &bad).is_err());
    }

    #[test]
    fn delivery_mode_domain() {
        assert!(delivery_mode(1).is_ok());
        assert!(delivery_mode(2).is_ok());
        assert!(delivery_mode(0).is_err());
        assert!(delivery_mode(3).is_err());
    }

    #[test]
    fn priority_domain() {
        assert!(priority(0).is_err());
        assert!(priority(1).is_ok());
        assert!(priority(255).is_ok());
    }
}
