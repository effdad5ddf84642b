//! Lockout policy: the pure pre-check over account state.
//!
//! The persistence half of the policy (atomic increment, block at threshold,
//! reset on success) lives in the accounts repository; this module decides
//! whether an authentication attempt may proceed at all. Neither outcome
//! here mutates the failure counter.

pub const DEFAULT_LOCKOUT_THRESHOLD: i32 = 5;

/// Result of the pre-authentication state check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutCheck {
    /// Account may attempt authentication
    Proceed,
    /// Account was permanently deactivated by an administrator
    Disabled,
    /// Account is blocked, by the lockout mechanism or an administrator
    Blocked,
}

/// Check account state before any password or SSO verification.
/// Disabled wins over blocked: a disabled account reports disabled even
/// when its blocked flag is also set.
pub fn check(is_disabled: bool, is_blocked: bool) -> LockoutCheck {
    if is_disabled {
        LockoutCheck::Disabled
    } else if is_blocked {
        LockoutCheck::Blocked
    } else {
        LockoutCheck::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ordering() {
        assert_eq!(check(false, false), LockoutCheck::Proceed);
        assert_eq!(check(false, true), LockoutCheck::Blocked);
        assert_eq!(check(true, false), LockoutCheck::Disabled);
        // Disabled takes precedence when both flags are set
        assert_eq!(check(true, true), LockoutCheck::Disabled);
    }
}
