use std::cmp::Ordering;

use super::super::domain::LeadQueueEntry;

/// Pluggable comparator for claimable listings. Implementations decide how
/// tier, age, and geography trade off against each other.
pub trait QueueOrdering: Send + Sync {
    fn compare(&self, a: &LeadQueueEntry, b: &LeadQueueEntry) -> Ordering;
}

/// Default ordering: subscription-tier priority descending, then lead age
/// ascending so older leads surface first, with the lead id as a
/// deterministic final tie-break.
pub struct TierThenAge;

impl QueueOrdering for TierThenAge {
    fn compare(&self, a: &LeadQueueEntry, b: &LeadQueueEntry) -> Ordering {
        b.tier_priority
            .cmp(&a.tier_priority)
            .then_with(|| a.lead.created_at.cmp(&b.lead.created_at))
            .then_with(|| a.lead.id.cmp(&b.lead.id))
    }
}
