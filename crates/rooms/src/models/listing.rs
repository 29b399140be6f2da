use crate::error::ValidationError;

/// Hard upper bound for any listing limit, protects the store and memory usage.
pub const MAX_LISTING_ELEMENTS: usize = 200;
pub const DEFAULT_LIMIT: usize = 50;

pub fn validate_limit(limit: usize) -> Result<(), ValidationError> {
    if limit < 1 {
        return Err(ValidationError::InvalidInput {
            value: limit.to_string(),
            reason: "limit should be >= 1".to_string(),
        });
    }
    if limit > MAX_LISTING_ELEMENTS {
        return Err(ValidationError::LimitExceeded {
            subject: "listing limit".to_string(),
            unit: "element".to_string(),
            attempted: limit,
            limit: MAX_LISTING_ELEMENTS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounds() {
        validate_limit(1).unwrap();
        validate_limit(DEFAULT_LIMIT).unwrap();
        validate_limit(MAX_LISTING_ELEMENTS).unwrap();
    }

    #[test]
    fn rejects_zero() {
        let err = validate_limit(0).expect_err("expected invalid input error");
        assert!(matches!(
            err,
            ValidationError::InvalidInput { value, .. } if value == "0"
        ));
    }

    #[test]
    fn rejects_above_maximum() {
        let err = validate_limit(MAX_LISTING_ELEMENTS + 1).expect_err("expected limit error");
        assert!(matches!(
            err,
            ValidationError::LimitExceeded { attempted, limit, .. }
                if attempted == MAX_LISTING_ELEMENTS + 1 && limit == MAX_LISTING_ELEMENTS
        ));
    }
}
