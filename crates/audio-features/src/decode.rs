use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::io::Cursor;

/// Decoded WAV: interleaved samples scaled to [-1, 1].
#[derive(Debug, Clone)]
pub struct DecodedWav {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl DecodedWav {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn to_mono(&self) -> Vec<f32> {
        downmix(&self.samples, self.channels as usize)
    }
}

/// Decode an in-memory WAV. Supports 16/24/32-bit PCM and 32-bit float.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedWav> {
    let mut reader = WavReader::new(Cursor::new(bytes)).context("not a valid WAV")?;
    let spec = reader.spec();
    if spec.channels == 0 {
        bail!("WAV has zero channels");
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Int, bits @ (24 | 32)) => {
            let max = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()?
        }
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => bail!("unsupported WAV sample format {format:?}/{bits}-bit"),
    };

    Ok(DecodedWav { sample_rate: spec.sample_rate, channels: spec.channels, samples })
}

/// Average interleaved channels down to mono; a trailing partial frame is averaged over what is there.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Interleaved `i16` PCM to mono `f32`.
pub fn pcm16_to_mono(interleaved: &[i16], channels: usize) -> Vec<f32> {
    let scaled: Vec<f32> = interleaved.iter().map(|&s| s as f32 / 32768.0).collect();
    downmix(&scaled, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn wav_bytes(channels: u16, frames: &[i16]) -> Vec<u8> {
        let spec = WavSpec { channels, sample_rate: 8_000, bits_per_sample: 16, sample_format: SampleFormat::Int };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in frames {
                w.write_sample(s).unwrap();
            }
            w.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_stereo_pcm16() {
        let decoded = decode_wav(&wav_bytes(2, &[16384, -16384, 8192, 8192])).unwrap();
        assert_eq!(decoded.sample_rate, 8_000);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.frames(), 2);
        assert_eq!(decoded.to_mono(), vec![0.0, 0.25]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"definitely not riff").is_err());
    }

    #[test]
    fn test_downmix_handles_partial_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(pcm16_to_mono(&[0, 0], 1), vec![0.0, 0.0]);
    }
}
