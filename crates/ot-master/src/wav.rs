//! WAV encoding for offline renders.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use ot_engine::Frame;

fn spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode frames as an in-memory 16-bit stereo WAV file.
pub fn frames_to_wav(frames: &[Frame], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec(sample_rate))?;
        for frame in frames {
            writer.write_sample(to_i16(frame.left))?;
            writer.write_sample(to_i16(frame.right))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Write frames to a WAV file on disk.
pub fn write_wav_file(
    path: &Path,
    frames: &[Frame],
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(sample_rate))?;
    for frame in frames {
        writer.write_sample(to_i16(frame.left))?;
        writer.write_sample(to_i16(frame.right))?;
    }
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_and_length() {
        let frames = vec![Frame { left: 0.5, right: -0.5 }; 100];
        let bytes = frames_to_wav(&frames, 48_000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44-byte header + 100 frames * 2 channels * 2 bytes.
        assert_eq!(bytes.len(), 44 + 400);
    }

    #[test]
    fn clipping_saturates() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }
}
