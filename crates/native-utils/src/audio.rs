use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits a slice of audio samples into a vector of vectors, where each inner vector has a fixed chunk size.
/// If a chunk is smaller than the `chunk_size`, it is padded with zeros.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Mono resampler for a continuous stream of arbitrarily sized buffers.
///
/// Input is queued until a full chunk is available. Equal rates pass through
/// untouched.
pub struct StreamResampler {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    chunk_size: usize,
    ratio: f64,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32, chunk_size: usize) -> anyhow::Result<Self> {
        let resampler = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(in_rate as f64, out_rate as f64, chunk_size)?)
        };
        Ok(Self {
            resampler,
            pending: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            ratio: out_rate as f64 / in_rate as f64,
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Queues `samples` and returns everything that could be resampled.
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };
        self.pending.extend_from_slice(samples);

        let mut resampled = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(out) => {
                    if let Some(out) = out.first() {
                        resampled.extend_from_slice(out);
                    }
                }
                Err(e) => tracing::warn!("failed to resample chunk: {}", e),
            }
        }
        resampled
    }

    /// Pads the queued remainder with silence and resamples it, keeping only
    /// as many samples as the remainder accounts for.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let remainder = std::mem::take(&mut self.pending);
        let expected = (remainder.len() as f64 * self.ratio).round() as usize;
        let Some(resampler) = self.resampler.as_mut() else {
            return remainder;
        };

        let mut resampled = Vec::new();
        for chunk in split_for_chunks(&remainder, self.chunk_size) {
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(out) => {
                    if let Some(out) = out.first() {
                        resampled.extend_from_slice(out);
                    }
                }
                Err(e) => tracing::warn!("failed to resample final chunk: {}", e),
            }
        }
        resampled.truncate(expected);
        resampled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[0.5, -0.5, 1.0, 0.0], 2), vec![0.0, 0.5]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn sample_conversion_clamps() {
        assert_eq!(convert_f32_to_i16(&[0.0, 1.0, -2.0]), vec![0, i16::MAX, i16::MIN]);
        assert_eq!(convert_i16_to_f32(&[0, -32768, 16384]), vec![0.0, -1.0, 0.5]);
    }

    #[test]
    fn chunks_are_zero_padded() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);

        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }

    #[test]
    fn equal_rates_pass_through() {
        let mut resampler = StreamResampler::new(16_000, 16_000, 1024).unwrap();

        assert_eq!(resampler.push(&[0.1, 0.2, 0.3]), vec![0.1, 0.2, 0.3]);
        assert!(resampler.flush().is_empty());
    }

    #[test]
    fn downsampling_keeps_duration() {
        let mut resampler = StreamResampler::new(48_000, 16_000, 1024).unwrap();
        let input = vec![0.0f32; 4800];

        let mut output = resampler.push(&input[..3000]);
        output.extend(resampler.push(&input[3000..]));
        output.extend(resampler.flush());

        assert!((1590..=1610).contains(&output.len()), "got {}", output.len());
    }
}
