//! Splits destination lists into request-sized batches.

/// Partitions `items` into consecutive batches of at most `size` items.
///
/// A `size` of zero is treated as one.
pub fn batches<T>(items: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.max(1))
}

/// Batches several destination kinds in lockstep.
///
/// Round `i` holds the `i`-th batch of every kind. The number of rounds is
/// the largest batch count among the kinds, so a kind that runs out early
/// contributes an empty slice to the remaining rounds. A round in which every
/// kind is empty is never produced; if all lists are empty there are no rounds.
pub fn lockstep<'a, T, const N: usize>(lists: [&'a [T]; N], sizes: [usize; N]) -> Vec<[&'a [T]; N]> {
    let sizes = sizes.map(|s| s.max(1));
    let rounds = lists
        .iter()
        .zip(sizes)
        .map(|(list, size)| list.len().div_ceil(size))
        .max()
        .unwrap_or(0);

    (0..rounds)
        .map(|round| {
            std::array::from_fn(|i| {
                let list = lists[i];
                let lo = (round * sizes[i]).min(list.len());
                let hi = ((round + 1) * sizes[i]).min(list.len());
                &list[lo..hi]
            })
        })
        .collect()
}
