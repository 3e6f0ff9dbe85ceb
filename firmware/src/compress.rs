//! Delta + run-length telemetry compression.
//!
//! Each register is compressed as an independent stream: the first value is
//! emitted verbatim (two bytes big-endian), and every following sample
//! becomes either an extension of a zero-delta run (`[0x00, run_len]`,
//! flushed at 255) or an explicit signed delta (`[0x01, hi, lo]`). A 5-byte
//! header `[count_hi, count_lo, reg_count, payload_hi, payload_lo]` precedes
//! the payload.
//!
//! Solar telemetry sits still for most of the day, so zero-runs dominate;
//! when the compressed frame still exceeds the upload limit the buffer is
//! averaged down by [`aggregate_avg`] and recompressed.

use log::info;

use crate::buffer::RegisterReading;
use crate::config::{MAX_COMPRESSION_SIZE, READ_REGISTER_COUNT};
use crate::error::{Error, Result};

/// Bookkeeping from one compression pass, for the serial log and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionMetrics {
    pub num_samples: usize,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f32,
}

/// Compress `readings` into a framed Delta+RLE byte sequence.
///
/// Fails with [`Error::CompressionFailed`] on an empty input or when the
/// output would exceed [`MAX_COMPRESSION_SIZE`].
pub fn compress(readings: &[RegisterReading]) -> Result<(Vec<u8>, CompressionMetrics)> {
    let count = readings.len();
    if count == 0 || count > u16::MAX as usize {
        return Err(Error::CompressionFailed);
    }

    let mut payload: Vec<u8> = Vec::with_capacity(count * READ_REGISTER_COUNT);

    for reg in 0..READ_REGISTER_COUNT {
        let mut prev = readings[0].values[reg];
        push_bounded(&mut payload, &prev.to_be_bytes())?;

        let mut run: u8 = 0;
        for reading in &readings[1..] {
            let cur = reading.values[reg];
            let delta = cur.wrapping_sub(prev) as i16;
            prev = cur;

            if delta == 0 {
                run += 1;
                if run == u8::MAX {
                    push_bounded(&mut payload, &[0x00, run])?;
                    run = 0;
                }
            } else {
                if run > 0 {
                    push_bounded(&mut payload, &[0x00, run])?;
                    run = 0;
                }
                let d = delta.to_be_bytes();
                push_bounded(&mut payload, &[0x01, d[0], d[1]])?;
            }
        }
        if run > 0 {
            push_bounded(&mut payload, &[0x00, run])?;
        }
    }

    if 5 + payload.len() > MAX_COMPRESSION_SIZE {
        return Err(Error::CompressionFailed);
    }

    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.extend_from_slice(&(count as u16).to_be_bytes());
    frame.push(READ_REGISTER_COUNT as u8);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(&payload);

    let metrics = CompressionMetrics {
        num_samples: count,
        original_size: count * READ_REGISTER_COUNT * 2,
        compressed_size: frame.len(),
        ratio: (count * READ_REGISTER_COUNT * 2) as f32 / payload.len().max(1) as f32,
    };
    info!(
        "Compression: {} samples, {} -> {} bytes (ratio {:.2})",
        metrics.num_samples, metrics.original_size, metrics.compressed_size, metrics.ratio
    );
    Ok((frame, metrics))
}

fn push_bounded(payload: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    if 5 + payload.len() + bytes.len() > MAX_COMPRESSION_SIZE {
        return Err(Error::CompressionFailed);
    }
    payload.extend_from_slice(bytes);
    Ok(())
}

/// Invert [`compress`]: the raw-mode round-trip contract.
pub fn decompress(frame: &[u8]) -> Result<Vec<RegisterReading>> {
    if frame.len() < 5 {
        return Err(Error::InvalidResponse);
    }
    let count = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let reg_count = frame[2] as usize;
    let payload_len = u16::from_be_bytes([frame[3], frame[4]]) as usize;
    if reg_count != READ_REGISTER_COUNT || 5 + payload_len != frame.len() || count == 0 {
        return Err(Error::InvalidResponse);
    }

    let payload = &frame[5..];
    let mut readings = vec![RegisterReading::zeroed(); count];
    let mut pos = 0usize;

    for reg in 0..reg_count {
        if pos + 2 > payload.len() {
            return Err(Error::InvalidResponse);
        }
        let mut value = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
        pos += 2;
        readings[0].values[reg] = value;

        let mut sample = 1usize;
        while sample < count {
            if pos >= payload.len() {
                return Err(Error::InvalidResponse);
            }
            match payload[pos] {
                0x00 => {
                    if pos + 2 > payload.len() {
                        return Err(Error::InvalidResponse);
                    }
                    let run = payload[pos + 1] as usize;
                    pos += 2;
                    if run == 0 || sample + run > count {
                        return Err(Error::InvalidResponse);
                    }
                    for _ in 0..run {
                        readings[sample].values[reg] = value;
                        sample += 1;
                    }
                }
                0x01 => {
                    if pos + 3 > payload.len() {
                        return Err(Error::InvalidResponse);
                    }
                    let delta = i16::from_be_bytes([payload[pos + 1], payload[pos + 2]]);
                    pos += 3;
                    value = value.wrapping_add(delta as u16);
                    readings[sample].values[reg] = value;
                    sample += 1;
                }
                _ => return Err(Error::InvalidResponse),
            }
        }
    }

    if pos != payload.len() {
        return Err(Error::InvalidResponse);
    }
    Ok(readings)
}

/// Average `readings` down over fixed windows, per register.
///
/// Output length is `ceil(count / window)`; each output register is the
/// truncating integer mean of however many samples fall in the window.
pub fn aggregate_avg(readings: &[RegisterReading], window: usize) -> Vec<RegisterReading> {
    if window == 0 || readings.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(readings.len().div_ceil(window));
    for chunk in readings.chunks(window) {
        let mut averaged = RegisterReading::zeroed();
        for (reg, slot) in averaged.values.iter_mut().enumerate() {
            let sum: u32 = chunk.iter().map(|r| r.values[reg] as u32).sum();
            *slot = (sum / chunk.len() as u32) as u16;
        }
        out.push(averaged);
    }
    out
}
