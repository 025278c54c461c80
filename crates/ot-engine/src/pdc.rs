//! Plugin delay compensation.
//!
//! Every summing junction (master, bus inputs) must receive all of its
//! tributary signals with equal delay, otherwise parallel paths smear.
//! Compensation is computed bottom-up: a track's subtree latency is
//! its own chain latency plus the largest subtree feeding it, and each
//! tributary is padded up to the largest sibling.
//!
//! The computation is pure and idempotent — rerunning it over an
//! unchanged topology produces identical delays.

use std::collections::BTreeMap;

use ot_ir::{OutputTarget, TrackId};

/// Per-track routing facts the computation needs.
#[derive(Clone, Copy, Debug)]
pub struct PathLatency {
    /// Latency the track's own chain introduces, in samples.
    pub chain_latency: u64,
    pub output: OutputTarget,
}

/// Compute the compensation delay for every track.
///
/// A track routed to a missing bus is treated as routed to master.
/// Cycles cannot occur here (routing commands refuse them), but an
/// inconsistent map degrades to zero compensation rather than
/// recursing forever.
pub fn compute_compensation(paths: &BTreeMap<TrackId, PathLatency>) -> BTreeMap<TrackId, u64> {
    let mut subtree: BTreeMap<TrackId, u64> = BTreeMap::new();
    for &id in paths.keys() {
        subtree_latency(id, paths, &mut subtree, &mut Vec::new());
    }

    // Largest subtree feeding each junction.
    let mut max_into_master = 0u64;
    let mut max_into_bus: BTreeMap<TrackId, u64> = BTreeMap::new();
    for (&id, info) in paths {
        let lat = subtree[&id];
        match resolve(info.output, paths) {
            OutputTarget::Master => max_into_master = max_into_master.max(lat),
            OutputTarget::Bus(bus) => {
                let entry = max_into_bus.entry(bus).or_insert(0);
                *entry = (*entry).max(lat);
            }
        }
    }

    paths
        .iter()
        .map(|(&id, info)| {
            let target = match resolve(info.output, paths) {
                OutputTarget::Master => max_into_master,
                OutputTarget::Bus(bus) => max_into_bus.get(&bus).copied().unwrap_or(0),
            };
            (id, target - subtree[&id])
        })
        .collect()
}

fn resolve(output: OutputTarget, paths: &BTreeMap<TrackId, PathLatency>) -> OutputTarget {
    match output {
        OutputTarget::Bus(bus) if paths.contains_key(&bus) => OutputTarget::Bus(bus),
        _ => OutputTarget::Master,
    }
}

/// Chain latency plus the deepest tributary, memoized.
fn subtree_latency(
    id: TrackId,
    paths: &BTreeMap<TrackId, PathLatency>,
    memo: &mut BTreeMap<TrackId, u64>,
    visiting: &mut Vec<TrackId>,
) -> u64 {
    if let Some(&lat) = memo.get(&id) {
        return lat;
    }
    if visiting.contains(&id) {
        return 0;
    }
    visiting.push(id);

    let own = paths.get(&id).map_or(0, |p| p.chain_latency);
    let deepest = paths
        .iter()
        .filter(|(_, info)| resolve(info.output, paths) == OutputTarget::Bus(id))
        .map(|(&child, _)| subtree_latency(child, paths, memo, visiting))
        .max()
        .unwrap_or(0);

    visiting.pop();
    let lat = own + deepest;
    memo.insert(id, lat);
    lat
}
