use identity_hash::IntSet;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::chain::Chain;
use crate::model::QueryId;

/// Queries in the order they first show up in the chains, followed by the
/// ones that never do.
pub fn first_appearance_order(chains: &[Chain], queries: usize) -> Vec<QueryId> {
    let mut seen = IntSet::default();
    let mut r = Vec::with_capacity(queries);
    for q in chains
        .iter()
        .flat_map(|c| c.entries().iter())
        .flat_map(|e| e.queries())
        .chain(0..queries)
    {
        if seen.insert(q) {
            r.push(q);
        }
    }
    r
}

/// `1 - mean(shared/blocks(q1), shared/blocks(q2))`, as a dense row-major matrix.
pub fn dissimilarities(chains: &[Chain], queries: usize) -> Vec<f64> {
    let members = chains
        .iter()
        .flat_map(|c| c.entries().iter())
        .map(|e| e.queries().collect::<IntSet<_>>())
        .collect::<Vec<_>>();
    let blocks = (0..queries)
        .map(|q| members.iter().filter(|m| m.contains(&q)).count())
        .collect::<Vec<_>>();

    (0..queries)
        .into_par_iter()
        .flat_map_iter(|i| {
            let members = &members;
            let blocks = &blocks;
            (0..queries).map(move |j| {
                if i == j {
                    return 0.;
                }
                let shared = members.iter().filter(|m| m.contains(&i) && m.contains(&j)).count() as f64;
                let share = |q: QueryId| if blocks[q] == 0 { 0. } else { shared / blocks[q] as f64 };
                1. - (share(i) + share(j)) / 2.
            })
        })
        .collect()
}

/// Leaves of the average-linkage tree over the query dissimilarities, read
/// left to right.
pub fn upgma_order(chains: &[Chain], queries: usize) -> Vec<QueryId> {
    if queries == 0 {
        return Vec::new();
    }
    let mut dist = dissimilarities(chains, queries);
    let n = queries;
    // active clusters: leaves and size
    let mut clusters: Vec<Option<(Vec<QueryId>, usize)>> = (0..n).map(|q| Some((vec![q], 1))).collect();

    while clusters.iter().filter(|c| c.is_some()).count() > 1 {
        let active = clusters.iter().enumerate().filter(|(_, c)| c.is_some()).map(|(i, _)| i).collect::<Vec<_>>();
        let Some((i, j)) = active
            .iter()
            .tuple_combinations()
            .min_by_key(|(i, j)| (OrderedFloat(dist[**i * n + **j]), **i, **j))
            .map(|(i, j)| (*i, *j))
        else {
            break;
        };
        let (Some((mut left, si)), Some((right, sj))) = (clusters[i].take(), clusters[j].take()) else {
            break;
        };

        for &k in active.iter().filter(|k| **k != i && **k != j) {
            let d = (dist[i * n + k] * si as f64 + dist[j * n + k] * sj as f64) / (si + sj) as f64;
            dist[i * n + k] = d;
            dist[k * n + i] = d;
        }
        left.extend(right);
        clusters[i] = Some((left, si + sj));
    }

    clusters.into_iter().flatten().flat_map(|(leaves, _)| leaves).collect()
}
