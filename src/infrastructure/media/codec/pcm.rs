//! Linear PCM conditioning for narrowband encoding

/// Mix interleaved frames down to mono
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Convert a float sample in [-1, 1] to 16-bit
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Streaming rate converter from an arbitrary input rate down to a lower one.
///
/// Averages the input samples that fall into each output period, which is
/// enough low-pass for speech headed to G.711.
#[derive(Debug)]
pub struct Decimator {
    ratio: f64,
    position: f64,
    acc: f32,
    acc_count: u32,
}

impl Decimator {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            ratio: input_rate as f64 / output_rate.max(1) as f64,
            position: 0.0,
            acc: 0.0,
            acc_count: 0,
        }
    }

    pub fn process(&mut self, mono: &[f32], out: &mut Vec<i16>) {
        for &sample in mono {
            self.acc += sample;
            self.acc_count += 1;
            self.position += 1.0;
            if self.position >= self.ratio {
                self.position -= self.ratio;
                out.push(to_i16(self.acc / self.acc_count as f32));
                self.acc = 0.0;
                self.acc_count = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_decimate_48k_to_8k() {
        let mut decimator = Decimator::new(48_000, 8_000);
        let mut out = Vec::new();
        decimator.process(&vec![0.25f32; 960], &mut out);
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|&s| s == to_i16(0.25)));
    }

    #[test]
    fn test_decimate_keeps_phase_across_calls() {
        let mut decimator = Decimator::new(44_100, 8_000);
        let mut out = Vec::new();
        for _ in 0..10 {
            decimator.process(&vec![0.0f32; 441], &mut out);
        }
        assert!((799..=800).contains(&out.len()));
    }

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
    }
}
