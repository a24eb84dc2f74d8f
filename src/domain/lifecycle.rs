//! Transaction status state machine.
//!
//! ```text
//! pending -> processing -> completed | failed | cancelled
//! pending ------------->   completed | failed | cancelled
//! completed -> refunded
//! ```
//!
//! Every other edge is illegal. Re-observing the current status is a no-op.

use super::transaction::TransactionStatus;
use serde::Serialize;
use std::fmt;

/// Where a status observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    Capture,
    Webhook,
    Poll,
    Staff,
    Refund,
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransitionSource::Capture => "capture",
            TransitionSource::Webhook => "webhook",
            TransitionSource::Poll => "poll",
            TransitionSource::Staff => "staff",
            TransitionSource::Refund => "refund",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCheck {
    Allowed,
    Unchanged,
    Illegal,
}

/// Validates a single edge of the state machine.
pub fn check(from: TransactionStatus, to: TransactionStatus) -> EdgeCheck {
    use TransactionStatus::*;

    if from == to {
        return EdgeCheck::Unchanged;
    }
    match (from, to) {
        (Pending, Processing | Completed | Failed | Cancelled)
        | (Processing, Completed | Failed | Cancelled)
        | (Completed, Refunded) => EdgeCheck::Allowed,
        _ => EdgeCheck::Illegal,
    }
}

/// True when `current` already accounts for a `requested` status that lost a race.
///
/// Used only after a guarded update failed: a terminal winner makes any
/// competing request a verified no-op, as does a request the winner has
/// already moved past.
pub fn supersedes(current: TransactionStatus, requested: TransactionStatus) -> bool {
    use TransactionStatus::*;

    if current == requested {
        return true;
    }
    match current {
        Refunded => true,
        Completed | Failed | Cancelled => requested != Refunded,
        Processing => requested == Pending,
        Pending => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn test_forward_edges_are_allowed() {
        assert_eq!(check(Pending, Processing), EdgeCheck::Allowed);
        assert_eq!(check(Pending, Completed), EdgeCheck::Allowed);
        assert_eq!(check(Processing, Failed), EdgeCheck::Allowed);
        assert_eq!(check(Completed, Refunded), EdgeCheck::Allowed);
    }

    #[test]
    fn test_backward_edges_are_illegal() {
        assert_eq!(check(Completed, Pending), EdgeCheck::Illegal);
        assert_eq!(check(Refunded, Completed), EdgeCheck::Illegal);
        assert_eq!(check(Processing, Pending), EdgeCheck::Illegal);
        assert_eq!(check(Failed, Completed), EdgeCheck::Illegal);
        assert_eq!(check(Pending, Refunded), EdgeCheck::Illegal);
    }

    #[test]
    fn test_edge_table_is_exhaustive() {
        let legal = [
            (Pending, Processing),
            (Pending, Completed),
            (Pending, Failed),
            (Pending, Cancelled),
            (Processing, Completed),
            (Processing, Failed),
            (Processing, Cancelled),
            (Completed, Refunded),
        ];
        for from in TransactionStatus::ALL {
            for to in TransactionStatus::ALL {
                let expected = if from == to {
                    EdgeCheck::Unchanged
                } else if legal.contains(&(from, to)) {
                    EdgeCheck::Allowed
                } else {
                    EdgeCheck::Illegal
                };
                assert_eq!(check(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_same_status_is_unchanged() {
        for status in TransactionStatus::ALL {
            assert_eq!(check(status, status), EdgeCheck::Unchanged);
        }
    }

    #[test]
    fn test_terminal_winner_supersedes_losing_request() {
        assert!(supersedes(Failed, Completed));
        assert!(supersedes(Completed, Failed));
        assert!(supersedes(Processing, Pending));
        assert!(!supersedes(Completed, Refunded));
        assert!(!supersedes(Processing, Completed));
    }
}
