// SPDX-License-Identifier: AGPL-3.0-only

//! Reproducible random streams.
//!
//! Every tile owns one [`TileRng`]. Element-wise sampling over large tensors
//! draws a single `u64` from that stream and forks one ChaCha sub-stream per
//! fixed-size chunk (`set_stream(chunk_index)`), so chunks can be processed in
//! parallel and the numbers drawn do not depend on the thread count.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Random stream owned by one tile.
pub type TileRng = ChaCha8Rng;

/// Elements per forked sub-stream.
pub(crate) const CHUNK: usize = 4096;

/// Seed a tile stream.
pub fn seeded(seed: u64) -> TileRng {
    TileRng::seed_from_u64(seed)
}

fn fork(base: u64, chunk: usize) -> TileRng {
    let mut rng = TileRng::seed_from_u64(base);
    rng.set_stream(chunk as u64);
    rng
}

/// Apply `f` to every element of `data` with a chunk-local random stream.
///
/// Consumes exactly one `u64` from `rng` regardless of `data.len()`.
pub(crate) fn map_chunks<F>(rng: &mut TileRng, data: &mut [f32], f: F)
where
    F: Fn(&mut TileRng, &mut f32) + Sync,
{
    let base: u64 = rng.gen();
    data.par_chunks_mut(CHUNK)
        .enumerate()
        .for_each(|(chunk, values)| {
            let mut local = fork(base, chunk);
            for v in values {
                f(&mut local, v);
            }
        });
}

/// Like [`map_chunks`] but walks two equally sized buffers in lockstep.
pub(crate) fn map_chunks_pair<F>(rng: &mut TileRng, a: &mut [f32], b: &mut [f32], f: F)
where
    F: Fn(&mut TileRng, &mut f32, &mut f32) + Sync,
{
    debug_assert_eq!(a.len(), b.len());
    let base: u64 = rng.gen();
    a.par_chunks_mut(CHUNK)
        .zip(b.par_chunks_mut(CHUNK))
        .enumerate()
        .for_each(|(chunk, (xs, ys))| {
            let mut local = fork(base, chunk);
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                f(&mut local, x, y);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_values() {
        let mut a = vec![0.0f32; 3 * CHUNK + 17];
        let mut b = a.clone();
        map_chunks(&mut seeded(7), &mut a, |r, v| *v = r.gen());
        map_chunks(&mut seeded(7), &mut b, |r, v| *v = r.gen());
        assert_eq!(a, b);
    }

    #[test]
    fn chunks_draw_distinct_streams() {
        let mut a = vec![0.0f32; 2 * CHUNK];
        map_chunks(&mut seeded(1), &mut a, |r, v| *v = r.gen());
        assert_ne!(a[..CHUNK], a[CHUNK..]);
    }

    #[test]
    fn one_draw_per_call() {
        let mut rng = seeded(3);
        let mut reference = seeded(3);
        let mut data = vec![0.0f32; 10];
        map_chunks(&mut rng, &mut data, |_, _| {});
        let _: u64 = reference.gen();
        assert_eq!(rng.gen::<u64>(), reference.gen::<u64>());
    }
}
