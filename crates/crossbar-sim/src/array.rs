// SPDX-License-Identifier: AGPL-3.0-only

//! Large matrices split over a grid of tiles.
//!
//! A physical crossbar has a fixed size, so a layer larger than
//! `max_tile_out × max_tile_in` is mapped onto a grid:
//!
//! ```text
//!              in: [0, max_in) [max_in, 2·max_in) ...
//! out: [0, max_out)      tile 0        tile 1
//!      [max_out, ..)     tile C        tile C+1
//! ```
//!
//! Forward outputs of tiles in one grid row are summed; grid rows are
//! concatenated. Every tile owns its own random stream (`seed + index`) and
//! the tiles run in parallel.

use crate::config::RpuConfig;
use crate::error::{check_batch, check_len, CrossbarError, Result};
use crate::tile::AnalogTile;
use rayon::prelude::*;
use std::ops::Range;
use tracing::info;

/// Logical weight matrix backed by a grid of [`AnalogTile`]s.
#[derive(Debug, Clone)]
pub struct TileArray {
    out_size: usize,
    in_size: usize,
    rows: Vec<Range<usize>>,
    cols: Vec<Range<usize>>,
    tiles: Vec<AnalogTile>,
}

fn split(size: usize, max: usize) -> Vec<Range<usize>> {
    (0..size)
        .step_by(max)
        .map(|start| start..(start + max).min(size))
        .collect()
}

/// Copy columns `range` of a `[batch × width]` buffer.
fn gather(data: &[f32], width: usize, range: &Range<usize>) -> Vec<f32> {
    data.chunks_exact(width)
        .flat_map(|row| row[range.clone()].iter().copied())
        .collect()
}

/// Add a `[batch × range.len()]` block into columns `range` of `out`.
fn scatter_add(out: &mut [f32], width: usize, range: &Range<usize>, block: &[f32]) {
    for (row, part) in out.chunks_exact_mut(width).zip(block.chunks_exact(range.len())) {
        for (o, v) in row[range.clone()].iter_mut().zip(part) {
            *o += v;
        }
    }
}

impl TileArray {
    /// Build the grid. Tile `k` (row-major) is seeded with `seed + k`.
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Config`] for zero sizes or an invalid
    /// configuration.
    pub fn new(
        out_size: usize,
        in_size: usize,
        config: &RpuConfig,
        max_tile_out: usize,
        max_tile_in: usize,
        seed: u64,
    ) -> Result<Self> {
        if max_tile_out == 0 || max_tile_in == 0 {
            return Err(CrossbarError::config(format!(
                "maximum tile size must be non-zero, got {max_tile_out}×{max_tile_in}"
            )));
        }
        if out_size == 0 || in_size == 0 {
            return Err(CrossbarError::config(format!(
                "array dimensions must be non-zero, got {out_size}×{in_size}"
            )));
        }
        let rows = split(out_size, max_tile_out);
        let cols = split(in_size, max_tile_in);
        let mut tiles = Vec::with_capacity(rows.len() * cols.len());
        for r in &rows {
            for c in &cols {
                let k = tiles.len() as u64;
                tiles.push(AnalogTile::new(
                    r.len(),
                    c.len(),
                    config.clone(),
                    seed.wrapping_add(k),
                )?);
            }
        }
        info!(
            "TileArray: {out_size}×{in_size} on {}×{} tiles",
            rows.len(),
            cols.len()
        );
        Ok(Self {
            out_size,
            in_size,
            rows,
            cols,
            tiles,
        })
    }

    /// Logical output rows.
    pub const fn out_size(&self) -> usize {
        self.out_size
    }

    /// Logical input columns.
    pub const fn in_size(&self) -> usize {
        self.in_size
    }

    /// Grid shape `(tile rows, tile columns)`.
    pub fn grid(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    /// Tiles in row-major grid order.
    pub fn tiles(&self) -> &[AnalogTile] {
        &self.tiles
    }

    fn position(&self, k: usize) -> (&Range<usize>, &Range<usize>) {
        let n = self.cols.len();
        (&self.rows[k / n], &self.cols[k % n])
    }

    /// Store `[out × in]` weights, split over the tiles.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::set_weights`].
    pub fn set_weights(&mut self, weights: &[f32]) -> Result<()> {
        check_len("weights", self.out_size * self.in_size, weights.len())?;
        let blocks: Vec<Vec<f32>> = (0..self.tiles.len())
            .map(|k| {
                let (r, c) = self.position(k);
                weights[r.start * self.in_size..r.end * self.in_size]
                    .chunks_exact(self.in_size)
                    .flat_map(|row| row[c.clone()].iter().copied())
                    .collect()
            })
            .collect();
        self.tiles
            .par_iter_mut()
            .zip(blocks.par_iter())
            .try_for_each(|(tile, block)| tile.set_weights(block))
    }

    /// Assemble the stored `[out × in]` weights.
    pub fn weights(&self) -> Vec<f32> {
        let mut w = vec![0.0f32; self.out_size * self.in_size];
        for (k, tile) in self.tiles.iter().enumerate() {
            let (r, c) = self.position(k);
            for (i, row) in tile.weights().chunks_exact(c.len()).enumerate() {
                let start = (r.start + i) * self.in_size + c.start;
                w[start..start + c.len()].copy_from_slice(row);
            }
        }
        w
    }

    /// Forward pass on `[batch × in]`, returns `[batch × out]`.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::forward`].
    pub fn forward(&mut self, x: &[f32]) -> Result<Vec<f32>> {
        let batch = check_batch("input", self.in_size, x.len())?;
        let inputs: Vec<Vec<f32>> = (0..self.tiles.len())
            .map(|k| gather(x, self.in_size, self.position(k).1))
            .collect();
        let partials = self
            .tiles
            .par_iter_mut()
            .zip(inputs.par_iter())
            .map(|(tile, input)| tile.forward(input))
            .collect::<Result<Vec<_>>>()?;

        let mut y = vec![0.0f32; batch * self.out_size];
        for (k, block) in partials.iter().enumerate() {
            scatter_add(&mut y, self.out_size, self.position(k).0, block);
        }
        Ok(y)
    }

    /// Backward pass on `[batch × out]`, returns `[batch × in]`.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::backward`].
    pub fn backward(&mut self, d: &[f32]) -> Result<Vec<f32>> {
        let batch = check_batch("error signal", self.out_size, d.len())?;
        let errors: Vec<Vec<f32>> = (0..self.tiles.len())
            .map(|k| gather(d, self.out_size, self.position(k).0))
            .collect();
        let partials = self
            .tiles
            .par_iter_mut()
            .zip(errors.par_iter())
            .map(|(tile, error)| tile.backward(error))
            .collect::<Result<Vec<_>>>()?;

        let mut z = vec![0.0f32; batch * self.in_size];
        for (k, block) in partials.iter().enumerate() {
            scatter_add(&mut z, self.in_size, self.position(k).1, block);
        }
        Ok(z)
    }

    /// Pulsed update of every tile with its slice of `x` and `d`.
    ///
    /// Every tile checks its operands before any tile is updated, so a failed
    /// call leaves the whole array unchanged.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::update`].
    pub fn update(&mut self, x: &[f32], d: &[f32]) -> Result<()> {
        let batch = check_batch("activations", self.in_size, x.len())?;
        check_len("error signal", batch * self.out_size, d.len())?;
        let operands: Vec<(Vec<f32>, Vec<f32>)> = (0..self.tiles.len())
            .map(|k| {
                let (r, c) = self.position(k);
                (gather(x, self.in_size, c), gather(d, self.out_size, r))
            })
            .collect();
        self.tiles
            .par_iter()
            .zip(operands.par_iter())
            .try_for_each(|(tile, (xs, ds))| tile.check_update(xs, ds))?;
        self.tiles
            .par_iter_mut()
            .zip(operands.par_iter())
            .try_for_each(|(tile, (xs, ds))| tile.update(xs, ds))
    }

    /// Program every tile.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::program_weights`].
    pub fn program_weights(&mut self) -> Result<()> {
        self.tiles
            .par_iter_mut()
            .try_for_each(AnalogTile::program_weights)
    }

    /// Drift every tile to `t`.
    ///
    /// # Errors
    ///
    /// As [`AnalogTile::apply_drift`].
    pub fn apply_drift(&mut self, t: f64) -> Result<()> {
        self.tiles
            .par_iter_mut()
            .try_for_each(|tile| tile.apply_drift(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_covers_range() {
        assert_eq!(split(10, 4), vec![0..4, 4..8, 8..10]);
        assert_eq!(split(4, 4), vec![0..4]);
    }

    #[test]
    fn grid_shape_and_seeds() {
        let array = TileArray::new(5, 7, &RpuConfig::ideal(), 2, 3, 0).unwrap();
        assert_eq!(array.grid(), (3, 3));
        assert_eq!(array.tiles()[8].out_size(), 1);
        assert_eq!(array.tiles()[8].in_size(), 1);
        assert!(TileArray::new(5, 7, &RpuConfig::ideal(), 0, 3, 0).is_err());
    }

    #[test]
    fn weights_round_trip_through_grid() {
        let w: Vec<f32> = (0..35).map(|i| i as f32 / 50.0).collect();
        let mut array = TileArray::new(5, 7, &RpuConfig::ideal(), 2, 3, 0).unwrap();
        array.set_weights(&w).unwrap();
        assert_eq!(array.weights(), w);
    }

    #[test]
    fn failed_update_leaves_every_tile_alone() {
        let cfg = RpuConfig::ideal().with_update(
            crate::config::UpdateConfig::default()
                .with_pulse_type(crate::pulse::PulseType::Deterministic)
                .with_learning_rate(0.5),
        );
        let mut array = TileArray::new(1, 4, &cfg, 1, 2, 0).unwrap();
        assert_eq!(array.grid(), (1, 2));
        let before = array.weights();

        let err = array.update(&[1.0, 1.0, f32::NAN, 1.0], &[0.2]);
        assert!(matches!(err, Err(CrossbarError::Numeric { .. })));
        assert_eq!(array.weights(), before);

        array.update(&[1.0, 1.0, 0.0, 1.0], &[0.2]).unwrap();
        assert_eq!(array.weights(), vec![0.1, 0.1, 0.0, 0.1]);
    }

    #[test]
    fn ideal_grid_matches_dense_product() {
        let (out, inp) = (5, 7);
        let w: Vec<f32> = (0..out * inp).map(|i| ((i % 9) as f32 - 4.0) / 8.0).collect();
        let mut array = TileArray::new(out, inp, &RpuConfig::ideal(), 2, 3, 0).unwrap();
        array.set_weights(&w).unwrap();
        let x: Vec<f32> = (0..2 * inp).map(|i| (i as f32 - 6.0) / 4.0).collect();

        let y = array.forward(&x).unwrap();
        for b in 0..2 {
            for i in 0..out {
                let expected: f32 = (0..inp).map(|j| w[i * inp + j] * x[b * inp + j]).sum();
                assert!((y[b * out + i] - expected).abs() < 1e-5);
            }
        }

        let d: Vec<f32> = (0..out).map(|i| i as f32 - 2.0).collect();
        let z = array.backward(&d).unwrap();
        for j in 0..inp {
            let expected: f32 = (0..out).map(|i| w[i * inp + j] * d[i]).sum();
            assert!((z[j] - expected).abs() < 1e-5);
        }
    }
}
