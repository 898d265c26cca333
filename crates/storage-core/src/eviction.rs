//! Eviction candidate selection and the policy-specific usage-counter table.
//!
//! Selection only ever *picks* a path; removing it, accounting for the freed
//! capacity, and collecting its waiters for notification is
//! [`crate::storage::Storage`]'s job, since that requires the storage-global
//! mutex the selector itself does not take.

use std::collections::HashMap;

use crate::file_entry::FileEntry;
use crate::policy::EvictionPolicy;
use crate::shard::ShardedMap;

/// Per-file facts the selector needs, read under the file's shard lock and
/// copied out so the lock is never held across the candidate loop.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    size: usize,
    last_usage_time: u64,
    usage_counter: u64,
    order_index: usize,
}

fn read_candidate(entry: &FileEntry, order_index: usize) -> Candidate {
    Candidate {
        size: entry.size(),
        last_usage_time: entry.last_usage_time(),
        usage_counter: entry.usage_counter(),
        order_index,
    }
}

/// Reads the metadata needed to judge one candidate path, without ever
/// locking a shard the caller already holds a second time (that shard could
/// be the same mutex as the one already locked, via a hash collision with
/// the forbidden path — re-locking a non-reentrant mutex from the same
/// thread would deadlock).
fn inspect(
    files: &ShardedMap<String, FileEntry>,
    held_shard_index: usize,
    held_shard: &HashMap<String, FileEntry>,
    path: &str,
    order_index: usize,
) -> Option<Candidate> {
    let shard_index = files.shard_index_for(&path.to_owned());
    if shard_index == held_shard_index {
        held_shard.get(path).map(|entry| read_candidate(entry, order_index))
    } else {
        let guard = files.lock_shard_at(shard_index);
        guard.get(path).map(|entry| read_candidate(entry, order_index))
    }
}

/// Picks at most one eviction victim, or `None` if nothing is eligible.
///
/// `forbidden` (the path the current request depends on) is always excluded
/// (invariant F4). `allow_empty` controls whether zero-size files are
/// eligible: they are for a create that is short on file-count capacity, but
/// not for a write/append that is short on byte capacity (evicting an empty
/// file frees no bytes).
pub fn select_victim(
    files: &ShardedMap<String, FileEntry>,
    held_shard_index: usize,
    held_shard: &HashMap<String, FileEntry>,
    files_in_order: &[String],
    policy: EvictionPolicy,
    forbidden: &str,
    allow_empty: bool,
) -> Option<String> {
    let mut best: Option<(String, Candidate)> = None;

    for (order_index, path) in files_in_order.iter().enumerate() {
        if path == forbidden {
            continue;
        }
        let Some(candidate) = inspect(files, held_shard_index, held_shard, path, order_index) else {
            continue;
        };
        if candidate.size == 0 && !allow_empty {
            continue;
        }

        let better = match &best {
            None => true,
            Some((_, current_best)) => is_better_candidate(policy, &candidate, current_best),
        };
        if better {
            best = Some((path.clone(), candidate));
        }
        if matches!(policy, EvictionPolicy::Fifo) && best.is_some() {
            // FIFO only ever wants the first eligible file in creation order.
            break;
        }
    }

    best.map(|(path, _)| path)
}

fn is_better_candidate(policy: EvictionPolicy, candidate: &Candidate, current_best: &Candidate) -> bool {
    match policy {
        EvictionPolicy::Fifo => candidate.order_index < current_best.order_index,
        EvictionPolicy::Lru => {
            candidate.last_usage_time < current_best.last_usage_time
                || (candidate.last_usage_time == current_best.last_usage_time && candidate.order_index < current_best.order_index)
        }
        EvictionPolicy::Lfu | EvictionPolicy::Lw => {
            let key = (candidate.usage_counter, candidate.last_usage_time, candidate.order_index);
            let best_key = (current_best.usage_counter, current_best.last_usage_time, current_best.order_index);
            key < best_key
        }
    }
}

/// The event a usage-counter update is reacting to, per the policy table in
/// the spec (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageEvent {
    OpenCreate,
    OpenPlain,
    OpenLock,
    /// write, append, read, read_many (per file).
    Access,
    LockUnlock,
    Close,
    Remove,
}

/// Applies `event`'s usage-counter update to `entry`, per policy.
///
/// `Remove` never updates a counter on the removed file (it is gone), so
/// this is never called for that case; it exists in [`UsageEvent`] purely
/// for documentation symmetry with the spec's table.
pub fn apply_usage_event(entry: &mut FileEntry, policy: EvictionPolicy, event: UsageEvent, tick: u64) {
    match policy {
        EvictionPolicy::Fifo => {}
        EvictionPolicy::Lru => {
            if !matches!(event, UsageEvent::Close | UsageEvent::Remove) {
                entry.touch(tick);
            }
        }
        EvictionPolicy::Lfu => apply_lfu(entry, event),
        EvictionPolicy::Lw => apply_lw(entry, event),
    }
}

fn apply_lfu(entry: &mut FileEntry, event: UsageEvent) {
    match event {
        UsageEvent::OpenCreate => entry.set_usage_counter(1),
        UsageEvent::OpenPlain | UsageEvent::OpenLock | UsageEvent::Access | UsageEvent::LockUnlock => entry.bump_usage_counter(1),
        UsageEvent::Close | UsageEvent::Remove => {}
    }
}

fn apply_lw(entry: &mut FileEntry, event: UsageEvent) {
    match event {
        UsageEvent::OpenCreate => entry.set_usage_counter(2),
        UsageEvent::OpenPlain => {
            // "+2 (capped)": the cap is `halve_if_near_overflow`, called by
            // `Storage` before each selector invocation, not a ceiling here.
            entry.bump_usage_counter(2);
        }
        UsageEvent::OpenLock | UsageEvent::Access => entry.bump_usage_counter(1),
        UsageEvent::LockUnlock => {}
        UsageEvent::Close => entry.bump_usage_counter(-2),
        UsageEvent::Remove => {}
    }
}

/// Halves (rounding down) every live file's usage counter once any one of
/// them reaches the integer maximum, per the spec's overflow rule. Called
/// before each selector invocation, not on every single update.
///
/// `held_shard_index`/`held_shard` is the caller's already-locked path
/// shard; re-locking it here would deadlock (parking_lot's mutex is not
/// reentrant), so that one shard is inspected and halved through the
/// reference the caller already holds instead of through `files`.
pub fn halve_if_near_overflow(files: &ShardedMap<String, FileEntry>, held_shard_index: usize, held_shard: &mut HashMap<String, FileEntry>, files_in_order: &[String]) {
    let near_overflow = files_in_order.iter().any(|path| {
        let idx = files.shard_index_for(&path.clone());
        if idx == held_shard_index {
            held_shard.get(path).is_some_and(|e| e.usage_counter() == u64::MAX)
        } else {
            files.lock_shard_at(idx).get(path).is_some_and(|e| e.usage_counter() == u64::MAX)
        }
    });
    if !near_overflow {
        return;
    }

    for entry in held_shard.values_mut() {
        entry.set_usage_counter(entry.usage_counter() / 2);
    }
    for shard_index in 0..files.shard_count() {
        if shard_index == held_shard_index {
            continue;
        }
        let mut guard = files.lock_shard_at(shard_index);
        for entry in guard.values_mut() {
            entry.set_usage_counter(entry.usage_counter() / 2);
        }
    }
}
