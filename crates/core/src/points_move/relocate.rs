use rayon::prelude::*;

use crate::attributes::AttributeArray;
use crate::parallel;
use crate::points::PointLeaf;
use crate::tree::SIZE;

use super::maps::{GlobalMove, LocalMove, MoveMaps, NO_SOURCE};

/// Copies the attribute data of every moving point into the freshly
/// allocated target leaves. Cross-leaf moves land first, then same-leaf moves
/// continue the per-voxel counters the cross-leaf phase left behind.
pub(crate) fn relocate(
    targets: &mut [PointLeaf],
    sources: &[PointLeaf],
    source_indices: &[u32],
    maps: &MoveMaps,
    threaded: bool,
) {
    parallel::for_each_indexed_mut(targets, threaded, |idx, leaf| {
        let global = &maps.global[idx];
        let local = &maps.local[idx];
        if global.is_empty() && local.is_empty() {
            return;
        }
        let mut counters = vec![0u32; SIZE];

        if !global.is_empty() {
            for (source_leaf, pairs) in global_runs(leaf, global, &mut counters) {
                copy_into(leaf, &sources[source_leaf], &pairs, threaded);
            }
        }

        let source = source_indices[idx];
        if !local.is_empty() && source != NO_SOURCE {
            let pairs = local_pairs(leaf, local, &mut counters);
            copy_into(leaf, &sources[source as usize], &pairs, threaded);
        }
    });
}

/// Consumes the next slot of voxel `target_offset`, `start(voxel) + counter`.
fn next_index(leaf: &PointLeaf, target_offset: u32, counters: &mut [u32]) -> usize {
    let offset = target_offset as usize;
    let index = leaf.voxel_range(offset).start + counters[offset];
    counters[offset] += 1;
    index as usize
}

/// Splits the sorted incoming records into runs sharing a source leaf, each
/// run carrying its `(source index, target index)` pairs.
fn global_runs(
    leaf: &PointLeaf,
    moves: &[GlobalMove],
    counters: &mut [u32],
) -> Vec<(usize, Vec<(usize, usize)>)> {
    let mut runs: Vec<(usize, Vec<(usize, usize)>)> = Vec::new();
    for chunk in moves.chunk_by(|a, b| a.source_leaf == b.source_leaf) {
        let pairs = chunk
            .iter()
            .map(|m| {
                (
                    m.source_index as usize,
                    next_index(leaf, m.target_offset, counters),
                )
            })
            .collect();
        runs.push((chunk[0].source_leaf as usize, pairs));
    }
    runs
}

fn local_pairs(leaf: &PointLeaf, moves: &[LocalMove], counters: &mut [u32]) -> Vec<(usize, usize)> {
    moves
        .iter()
        .map(|m| {
            (
                m.source_index as usize,
                next_index(leaf, m.target_offset, counters),
            )
        })
        .collect()
}

/// One bulk copy per attribute, attributes in parallel.
fn copy_into(target: &mut PointLeaf, source: &PointLeaf, pairs: &[(usize, usize)], threaded: bool) {
    let sources = source.attributes().arrays();
    let arrays = target.attributes_mut().arrays_mut();
    debug_assert_eq!(
        arrays.len(),
        sources.len(),
        "source and target leaves must share a descriptor"
    );
    let copy = |(array, source_array): (&mut AttributeArray, &AttributeArray)| {
        array.copy_values(source_array, pairs.iter().copied());
    };
    if threaded {
        arrays.par_iter_mut().zip(sources.par_iter()).for_each(copy);
    } else {
        arrays.iter_mut().zip(sources.iter()).for_each(copy);
    }
}
