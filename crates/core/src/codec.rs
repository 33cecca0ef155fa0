//! Telephony wire codecs
//!
//! G.711 μ-law companding plus the two rate converters used on the
//! telephony path: 8→16 kHz pairwise linear upsampling for inbound mic
//! audio and 24→8 kHz block averaging for outbound speaker audio. The
//! block average doubles as a crude anti-aliasing step.

/// μ-law encoding bias (G.711)
const ULAW_BIAS: i32 = 0x84;
/// μ-law clipping ceiling (G.711)
const ULAW_CLIP: i32 = 32635;

/// Encode one linear PCM16 sample to μ-law (G.711).
pub fn ulaw_encode(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };

    if pcm > ULAW_CLIP {
        pcm = ULAW_CLIP;
    }
    pcm += ULAW_BIAS;

    // Exponent is the position of the highest set bit above bit 7.
    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one μ-law byte (G.711) to linear PCM16.
pub fn ulaw_decode(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;

    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode a PCM16 buffer to μ-law bytes.
pub fn ulaw_encode_buf(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| ulaw_encode(s)).collect()
}

/// Decode a μ-law buffer to PCM16 samples.
pub fn ulaw_decode_buf(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| ulaw_decode(b)).collect()
}

/// Upsample 8 kHz mono to 16 kHz by pairwise linear interpolation.
///
/// Each input sample produces itself plus the midpoint to the next sample;
/// the final sample is duplicated.
pub fn upsample_8k_16k(samples: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for (i, &s) in samples.iter().enumerate() {
        out.push(s);
        let next = samples.get(i + 1).copied().unwrap_or(s);
        out.push((s + next) / 2.0);
    }
    out
}

/// Downsample 24 kHz mono to 8 kHz by averaging 3-sample blocks.
///
/// A trailing partial block is averaged over its actual length.
pub fn downsample_24k_8k(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks(3)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulaw_silence_is_exact() {
        assert_eq!(ulaw_encode(0), 0xFF);
        assert_eq!(ulaw_decode(0xFF), 0);
        assert_eq!(ulaw_decode(ulaw_encode(0)), 0);
    }

    #[test]
    fn test_ulaw_byte_domain_round_trip() {
        // encode(decode(b)) is bit-exact for every byte except 0x7F, the
        // G.711 negative-zero code, which canonicalizes to 0xFF.
        for b in 0..=255u8 {
            let rt = ulaw_encode(ulaw_decode(b));
            if b == 0x7F {
                assert_eq!(rt, 0xFF);
            } else {
                assert_eq!(rt, b, "byte 0x{:02X} did not round-trip", b);
            }
        }
    }

    #[test]
    fn test_ulaw_requantization_is_stable() {
        // decode∘encode lands on a codebook value; re-encoding that value
        // must reproduce the same byte for every 16-bit input.
        for sample in (i16::MIN..=i16::MAX).step_by(7) {
            let byte = ulaw_encode(sample);
            let decoded = ulaw_decode(byte);
            assert_eq!(ulaw_encode(decoded), byte, "sample {} drifted", sample);
        }
    }

    #[test]
    fn test_ulaw_sign_symmetry() {
        for sample in [1i16, 100, 1000, 10000, 32000] {
            let pos = ulaw_decode(ulaw_encode(sample));
            let neg = ulaw_decode(ulaw_encode(-sample));
            assert_eq!(pos, -neg);
        }
    }

    #[test]
    fn test_upsample_silence_round_trip() {
        let silence = vec![0.0f32; 80];
        let up = upsample_8k_16k(&silence);
        assert_eq!(up.len(), 160);
        assert!(up.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let up = upsample_8k_16k(&[0.0, 1.0]);
        assert_eq!(up, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let down = downsample_24k_8k(&[0.0, 0.3, 0.6, 1.0, 1.0, 1.0]);
        assert_eq!(down.len(), 2);
        assert!((down[0] - 0.3).abs() < 1e-6);
        assert!((down[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_downsample_silence_round_trip() {
        let silence = vec![0.0f32; 240];
        let down = downsample_24k_8k(&silence);
        assert_eq!(down.len(), 80);
        assert!(down.iter().all(|&s| s == 0.0));
    }
}
