// SPDX-License-Identifier: AGPL-3.0-only

//! Persisted tile state.
//!
//! A [`TileSnapshot`] holds everything needed to rebuild a tile except its
//! random stream. It serializes with serde (JSON, including the configuration)
//! or as a compact little-endian blob for the numeric state:
//!
//! ```text
//! [magic "XBAR"][version u8][flags u8][reserved u16]
//! [out u32 LE][in u32 LE][drift_scale f32 LE][learning_rate f32 LE][elapsed f64 LE]
//! [conductance f32 × out·in]
//! if programmed: [programmed f32 × out·in][drift coefficients f32 × out·in]
//!                [reference f32 × out]
//! ```
//!
//! The blob does not carry the configuration, the caller supplies it when
//! unpacking.

use crate::config::RpuConfig;
use crate::error::{CrossbarError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const MAGIC: &[u8; 4] = b"XBAR";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 1 + 2 + 4 + 4 + 4 + 4 + 8;

const FLAG_PROGRAMMED: u8 = 1 << 0;
const FLAG_DRIFTED: u8 = 1 << 1;

/// Device state captured by the last `program_weights` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammingState {
    /// Conductance written by programming, before drift, `[out × in]`
    pub programmed: Vec<f32>,
    /// Drift exponent of every device, `[out × in]`
    pub drift_coeffs: Vec<f32>,
    /// Time of the last `apply_drift`, `None` right after programming
    pub elapsed: Option<f64>,
    /// Probe readout right after programming, `[out]`
    pub reference: Vec<f32>,
}

/// Serializable tile state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSnapshot {
    /// Output rows
    pub out_size: usize,
    /// Input columns
    pub in_size: usize,
    /// Configuration the tile was built with
    pub config: RpuConfig,
    /// Target conductance, `[out × in]`
    pub conductance: Vec<f32>,
    /// Programming record, `None` if never programmed
    pub programming: Option<ProgrammingState>,
    /// Current drift compensation scale
    pub drift_scale: f32,
    /// Current learning rate
    pub learning_rate: f32,
}

impl TileSnapshot {
    /// Encode the numeric state as a binary blob.
    #[allow(clippy::cast_possible_truncation)]
    pub fn pack_state(&self) -> Bytes {
        let cells = self.conductance.len();
        let extra = self
            .programming
            .as_ref()
            .map_or(0, |p| {
                p.programmed.len() + p.drift_coeffs.len() + p.reference.len()
            });
        let mut buf = BytesMut::with_capacity(HEADER_LEN + (cells + extra) * 4);

        let mut flags = 0u8;
        if let Some(p) = &self.programming {
            flags |= FLAG_PROGRAMMED;
            if p.elapsed.is_some() {
                flags |= FLAG_DRIFTED;
            }
        }
        let elapsed = self
            .programming
            .as_ref()
            .and_then(|p| p.elapsed)
            .unwrap_or(0.0);

        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(flags);
        buf.put_u16_le(0);
        buf.put_u32_le(self.out_size as u32);
        buf.put_u32_le(self.in_size as u32);
        buf.put_f32_le(self.drift_scale);
        buf.put_f32_le(self.learning_rate);
        buf.put_f64_le(elapsed);
        put_f32s(&mut buf, &self.conductance);
        if let Some(p) = &self.programming {
            put_f32s(&mut buf, &p.programmed);
            put_f32s(&mut buf, &p.drift_coeffs);
            put_f32s(&mut buf, &p.reference);
        }
        buf.freeze()
    }

    /// Decode a blob produced by [`TileSnapshot::pack_state`].
    ///
    /// # Errors
    ///
    /// Returns [`CrossbarError::Snapshot`] for a wrong magic or version, or a
    /// truncated blob.
    pub fn unpack_state(config: RpuConfig, blob: &[u8]) -> Result<Self> {
        let mut buf = blob;
        if buf.remaining() < HEADER_LEN {
            return Err(CrossbarError::snapshot(format!(
                "blob too short: {} < {HEADER_LEN} header bytes",
                blob.len()
            )));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(CrossbarError::snapshot("bad magic"));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(CrossbarError::snapshot(format!(
                "unsupported version {version}"
            )));
        }
        let flags = buf.get_u8();
        let _reserved = buf.get_u16_le();
        let out_size = buf.get_u32_le() as usize;
        let in_size = buf.get_u32_le() as usize;
        let drift_scale = buf.get_f32_le();
        let learning_rate = buf.get_f32_le();
        let elapsed = buf.get_f64_le();

        let cells = out_size
            .checked_mul(in_size)
            .ok_or_else(|| CrossbarError::snapshot("dimensions overflow"))?;
        let conductance = get_f32s(&mut buf, cells, "conductance")?;
        let programming = if flags & FLAG_PROGRAMMED == 0 {
            None
        } else {
            Some(ProgrammingState {
                programmed: get_f32s(&mut buf, cells, "programmed conductance")?,
                drift_coeffs: get_f32s(&mut buf, cells, "drift coefficients")?,
                elapsed: (flags & FLAG_DRIFTED != 0).then_some(elapsed),
                reference: get_f32s(&mut buf, out_size, "reference readout")?,
            })
        };
        if buf.has_remaining() {
            return Err(CrossbarError::snapshot(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(Self {
            out_size,
            in_size,
            config,
            conductance,
            programming,
            drift_scale,
            learning_rate,
        })
    }
}

fn put_f32s(buf: &mut BytesMut, values: &[f32]) {
    for &v in values {
        buf.put_f32_le(v);
    }
}

fn get_f32s(buf: &mut &[u8], count: usize, what: &str) -> Result<Vec<f32>> {
    let needed = count
        .checked_mul(4)
        .ok_or_else(|| CrossbarError::snapshot(format!("{what} length overflows")))?;
    if buf.remaining() < needed {
        return Err(CrossbarError::snapshot(format!(
            "{what} truncated: {} of {needed} bytes",
            buf.remaining()
        )));
    }
    Ok((0..count).map(|_| buf.get_f32_le()).collect())
}
