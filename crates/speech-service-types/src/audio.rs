/// Little-endian PCM16 bytes, as the service sends and expects them.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decodes little-endian PCM16. A trailing odd byte is dropped.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Sample rate encoded in an output format name such as
/// `raw-16khz-16bit-mono-pcm`.
pub fn format_sample_rate(format: &str) -> Option<u32> {
    format.split('-').find_map(|part| {
        part.strip_suffix("khz")
            .and_then(|khz| khz.parse::<u32>().ok())
            .map(|khz| khz * 1000)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_bytes_are_little_endian() {
        assert_eq!(pcm16_to_le_bytes(&[1, -2]), vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(le_bytes_to_pcm16(&[0x01, 0x00, 0xFE, 0xFF, 0x07]), vec![1, -2]);
    }

    #[test]
    fn sample_rate_from_format_name() {
        assert_eq!(format_sample_rate("raw-16khz-16bit-mono-pcm"), Some(16_000));
        assert_eq!(format_sample_rate("raw-24khz-16bit-mono-pcm"), Some(24_000));
        assert_eq!(format_sample_rate("audio-16bit-mono"), None);
    }
}
