//! Per-target execution arena.
//!
//! Holds the single active healing execution of each target. Claiming a slot
//! never waits: a second request for a busy target fails immediately with the
//! holder's execution id. Status changes go through a compare-and-set.
//!
//! A slot is `busy` while some task is driving the execution. Executions
//! parked in AWAITING_APPROVAL are not busy; whoever wants to move one on
//! (approve or reject) must `begin` first, and only one caller wins.

use healer_common::{HealerError, HealerResult, HealingStatus};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSlot {
    pub execution_id: String,
    pub status: HealingStatus,
    pub busy: bool,
}

#[derive(Default)]
pub struct ExecutionArena {
    slots: Mutex<HashMap<String, ActiveSlot>>,
}

impl ExecutionArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, ActiveSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the target's slot for a new execution, or report the holder
    pub fn try_claim(
        &self,
        target_id: &str,
        execution_id: &str,
        status: HealingStatus,
    ) -> HealerResult<()> {
        let mut slots = self.slots();
        if let Some(active) = slots.get(target_id) {
            return Err(HealerError::HealingInProgress {
                target_id: target_id.to_string(),
                execution_id: active.execution_id.clone(),
            });
        }
        slots.insert(
            target_id.to_string(),
            ActiveSlot {
                execution_id: execution_id.to_string(),
                status,
                busy: true,
            },
        );
        Ok(())
    }

    /// Take over a parked execution before moving it from `from` to `to`
    pub fn begin(
        &self,
        target_id: &str,
        execution_id: &str,
        from: HealingStatus,
        to: HealingStatus,
    ) -> HealerResult<()> {
        let mut slots = self.slots();
        let slot = match slots.get_mut(target_id) {
            Some(slot) if slot.execution_id == execution_id => slot,
            _ => return Err(HealerError::InvalidTransition { from, to }),
        };
        if slot.busy {
            return Err(HealerError::HealingInProgress {
                target_id: target_id.to_string(),
                execution_id: execution_id.to_string(),
            });
        }
        if slot.status != from || !from.can_transition_to(to) {
            return Err(HealerError::InvalidTransition {
                from: slot.status,
                to,
            });
        }
        slot.busy = true;
        Ok(())
    }

    /// Leave the execution waiting for an operator
    pub fn park(&self, target_id: &str, execution_id: &str) {
        if let Some(slot) = self.slots().get_mut(target_id) {
            if slot.execution_id == execution_id {
                slot.busy = false;
            }
        }
    }

    /// Move the slot from `from` to `to` if it still holds `execution_id` in
    /// state `from`. Terminal targets release the slot.
    pub fn compare_and_set(
        &self,
        target_id: &str,
        execution_id: &str,
        from: HealingStatus,
        to: HealingStatus,
    ) -> HealerResult<()> {
        if !from.can_transition_to(to) {
            return Err(HealerError::InvalidTransition { from, to });
        }
        let mut slots = self.slots();
        let current = match slots.get(target_id) {
            Some(slot) if slot.execution_id == execution_id => slot.status,
            _ => return Err(HealerError::InvalidTransition { from, to }),
        };
        if current != from {
            return Err(HealerError::InvalidTransition { from: current, to });
        }
        if to.is_terminal() {
            slots.remove(target_id);
        } else if let Some(slot) = slots.get_mut(target_id) {
            slot.status = to;
        }
        Ok(())
    }

    /// Drop the slot if `execution_id` still holds it
    pub fn release(&self, target_id: &str, execution_id: &str) -> bool {
        let mut slots = self.slots();
        match slots.get(target_id) {
            Some(slot) if slot.execution_id == execution_id => {
                slots.remove(target_id);
                true
            }
            _ => false,
        }
    }

    pub fn active(&self, target_id: &str) -> Option<ActiveSlot> {
        self.slots().get(target_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use HealingStatus::*;

    #[test]
    fn test_second_claim_fails_fast() {
        let arena = ExecutionArena::new();
        arena.try_claim("blog", "e1", Pending).unwrap();

        match arena.try_claim("blog", "e2", Pending) {
            Err(HealerError::HealingInProgress { execution_id, .. }) => {
                assert_eq!(execution_id, "e1")
            }
            other => panic!("expected HealingInProgress, got {:?}", other),
        }
        // Other targets are independent
        arena.try_claim("shop", "e3", Pending).unwrap();
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_cas_follows_state_machine() {
        let arena = ExecutionArena::new();
        arena.try_claim("blog", "e1", Pending).unwrap();
        arena.compare_and_set("blog", "e1", Pending, Diagnosing).unwrap();
        arena
            .compare_and_set("blog", "e1", Diagnosing, AwaitingApproval)
            .unwrap();

        // Stale expectation loses
        assert!(arena
            .compare_and_set("blog", "e1", Diagnosing, Healing)
            .is_err());
        // Not in the state machine at all
        assert!(arena
            .compare_and_set("blog", "e1", AwaitingApproval, Success)
            .is_err());

        arena
            .compare_and_set("blog", "e1", AwaitingApproval, Failed)
            .unwrap();
        assert!(arena.active("blog").is_none());
    }

    #[test]
    fn test_parked_execution_taken_over_once() {
        let arena = ExecutionArena::new();
        arena.try_claim("blog", "e1", Pending).unwrap();
        arena.compare_and_set("blog", "e1", Pending, Diagnosing).unwrap();
        arena
            .compare_and_set("blog", "e1", Diagnosing, AwaitingApproval)
            .unwrap();

        // Still driven by the request that parked it
        assert!(arena.begin("blog", "e1", AwaitingApproval, Healing).is_err());

        arena.park("blog", "e1");
        arena.begin("blog", "e1", AwaitingApproval, Healing).unwrap();
        let second = arena.begin("blog", "e1", AwaitingApproval, Failed);
        assert!(matches!(second, Err(HealerError::HealingInProgress { .. })));
    }

    #[test]
    fn test_release_only_by_holder() {
        let arena = ExecutionArena::new();
        arena.try_claim("blog", "e1", Pending).unwrap();
        assert!(!arena.release("blog", "e2"));
        assert!(arena.release("blog", "e1"));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_racing_claims_single_winner() {
        let arena = Arc::new(ExecutionArena::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let arena = Arc::clone(&arena);
                std::thread::spawn(move || arena.try_claim("blog", &format!("e{}", i), Pending).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
