use crate::error::{Result, SpecflowError};
use crate::types::PhaseNumber;
use serde::Serialize;

/// Result of a number allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub number: PhaseNumber,
    /// True when `after`'s decade was full and the number is the next
    /// decade's primary slot.
    pub rolled_over: bool,
}

/// First number after `after` within its decade that `used` does not hold.
/// When the decade is exhausted, the next decade's primary slot is returned
/// with `rolled_over` set. Pure: identical inputs give identical results.
pub fn next_in_decade(after: PhaseNumber, used: &[PhaseNumber]) -> Result<Allocation> {
    let start = u32::from(after.value()) + 1;
    let last = u32::from(after.decade()) * 10 + 9;
    for candidate in start..=last {
        let n = PhaseNumber::new(candidate)?;
        if !used.contains(&n) {
            return Ok(Allocation {
                number: n,
                rolled_over: false,
            });
        }
    }

    let next_primary = (u32::from(after.decade()) + 1) * 10;
    let number = PhaseNumber::new(next_primary).map_err(|_| SpecflowError::DecadeExhausted {
        after: after.to_string(),
        reason: "no decade remains below 9999".to_string(),
    })?;
    Ok(Allocation {
        number,
        rolled_over: true,
    })
}

/// Allocation with the caller's rollover policy applied. A rollover is an
/// error when disallowed or when the next decade's primary slot is taken.
pub fn allocate(after: PhaseNumber, used: &[PhaseNumber], allow_rollover: bool) -> Result<Allocation> {
    let alloc = next_in_decade(after, used)?;
    if !alloc.rolled_over {
        return Ok(alloc);
    }
    if !allow_rollover {
        return Err(SpecflowError::DecadeExhausted {
            after: after.to_string(),
            reason: format!(
                "decade {}0-{}9 is full and roadmap.allow_decade_rollover is false",
                after.decade(),
                after.decade()
            ),
        });
    }
    if used.contains(&alloc.number) {
        return Err(SpecflowError::DecadeExhausted {
            after: after.to_string(),
            reason: format!("decade is full and {} is already in use", alloc.number),
        });
    }
    tracing::warn!(after = %after, number = %alloc.number, "decade rolled over");
    Ok(alloc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: u32) -> PhaseNumber {
        PhaseNumber::new(v).unwrap()
    }

    #[test]
    fn first_free_slot_in_decade() {
        let used = [n(10), n(11), n(20)];
        let alloc = next_in_decade(n(10), &used).unwrap();
        assert_eq!(alloc.number, n(12));
        assert!(!alloc.rolled_over);
    }

    #[test]
    fn allocation_is_deterministic_and_advances() {
        let mut used = vec![n(10), n(20)];
        let first = next_in_decade(n(10), &used).unwrap();
        assert_eq!(first, next_in_decade(n(10), &used).unwrap());
        used.push(first.number);
        let second = next_in_decade(n(10), &used).unwrap();
        assert!(second.number > first.number);
    }

    #[test]
    fn exhausted_decade_rolls_over() {
        let used: Vec<PhaseNumber> = (20..=29).map(n).collect();
        let alloc = next_in_decade(n(20), &used).unwrap();
        assert_eq!(alloc.number, n(30));
        assert!(alloc.rolled_over);
    }

    #[test]
    fn last_slot_anchor_rolls_over() {
        let alloc = next_in_decade(n(29), &[n(29)]).unwrap();
        assert_eq!(alloc.number.to_string(), "0030");
        assert!(alloc.rolled_over);
    }

    #[test]
    fn rollover_past_9999_is_exhausted() {
        let err = next_in_decade(n(9999), &[n(9999)]).unwrap_err();
        assert!(matches!(err, SpecflowError::DecadeExhausted { .. }));
    }

    #[test]
    fn policy_rejects_rollover() {
        let used: Vec<PhaseNumber> = (20..=29).map(n).collect();
        assert!(matches!(
            allocate(n(20), &used, false),
            Err(SpecflowError::DecadeExhausted { .. })
        ));
        assert_eq!(allocate(n(20), &used, true).unwrap().number, n(30));
    }

    #[test]
    fn rollover_into_taken_slot_is_exhausted() {
        let mut used: Vec<PhaseNumber> = (20..=29).map(n).collect();
        used.push(n(30));
        let err = allocate(n(25), &used, true).unwrap_err();
        assert!(err.to_string().contains("0030"));
    }
}
