// SPDX-License-Identifier: Apache-2.0

use std::thread;

/// Applies `f` to every item on at most `workers` scoped threads and returns
/// the results in input order. Workers share nothing mutable; the caller
/// merges after every worker has finished.
pub fn map_bounded<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let workers = workers.clamp(1, items.len().max(1));
    if workers == 1 {
        return items.into_iter().map(&f).collect();
    }

    let total = items.len();
    let mut buckets = (0..workers).map(|_| Vec::new()).collect::<Vec<_>>();
    for (idx, item) in items.into_iter().enumerate() {
        buckets[idx % workers].push((idx, item));
    }

    let f = &f;
    let mut indexed = thread::scope(|scope| {
        let handles = buckets
            .into_iter()
            .map(|bucket| {
                scope.spawn(move || {
                    bucket
                        .into_iter()
                        .map(|(idx, item)| (idx, f(item)))
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let mut out = Vec::with_capacity(total);
        for handle in handles {
            match handle.join() {
                Ok(rows) => out.extend(rows),
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        out
    });
    indexed.sort_by_key(|(idx, _)| *idx);
    indexed.into_iter().map(|(_, value)| value).collect()
}
