//! Retention planning
//!
//! Only generations strictly older than the published one are candidates.
//! Orphans (never published) always go; preserved generations always stay;
//! the newest `keep_last` of the rest stay.

use runtime_core::{RetentionPolicy, SequenceNumber};

use crate::generation::GenerationInfo;

/// Generations to delete after `published` became the latest
pub(crate) fn plan_prune(
    generations: &[GenerationInfo],
    published: SequenceNumber,
    policy: RetentionPolicy,
) -> Vec<&GenerationInfo> {
    let keep_last = match policy {
        RetentionPolicy::KeepAll => return Vec::new(),
        RetentionPolicy::KeepLast(n) => n,
    };

    let older = generations.iter().filter(|g| g.sequence < published);

    let mut doomed: Vec<&GenerationInfo> = older.clone().filter(|g| !g.is_committed()).collect();

    let mut retained: Vec<&GenerationInfo> = older
        .filter(|g| g.is_committed() && !g.is_preserved())
        .collect();
    retained.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    doomed.extend(retained.into_iter().skip(keep_last));

    doomed.sort_by_key(|g| g.sequence);
    doomed
}
