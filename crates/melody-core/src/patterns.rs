//! Loop pools. Plans select loops by index; steps are sixteenth notes in a 4/4 bar.

/// One-bar drum loop; bit `i` set = hit on step `i`.
#[derive(Clone, Copy, Debug)]
pub struct DrumLoop {
    pub kick: u16,
    pub snare: u16,
    pub hat: u16,
}

/// `(step, chord-relative degree, length in steps)`.
pub type StepNote = (u8, i8, u8);

pub const DRUM_LOOPS: [DrumLoop; 8] = [
    // boom bap
    DrumLoop { kick: 0b0000_0001_0000_0001, snare: 0b0001_0000_0001_0000, hat: 0b0101_0101_0101_0101 },
    DrumLoop { kick: 0b0000_0100_0000_0001, snare: 0b0001_0000_0001_0000, hat: 0b0101_0101_0101_0101 },
    // lazy kick pickup
    DrumLoop { kick: 0b0010_0000_1000_0001, snare: 0b0001_0000_0001_0000, hat: 0b0111_0101_0111_0101 },
    DrumLoop { kick: 0b0000_0001_0010_0001, snare: 0b1001_0000_0001_0000, hat: 0b0101_0101_0101_0101 },
    // four on the floor
    DrumLoop { kick: 0b0001_0001_0001_0001, snare: 0b0001_0000_0001_0000, hat: 0b0100_0100_0100_0100 },
    DrumLoop { kick: 0b0000_0000_0000_0001, snare: 0b0000_0000_0001_0000, hat: 0b0001_0001_0001_0001 },
    DrumLoop { kick: 0b0100_0001_0000_0101, snare: 0b0001_0000_0001_0000, hat: 0b1111_1111_1111_1111 },
    DrumLoop { kick: 0b0000_1001_0000_0001, snare: 0b0001_0010_0001_0000, hat: 0b0101_0101_0101_0101 },
];

pub const BASS_LOOPS: [&[StepNote]; 6] = [
    &[(0, 0, 6), (8, 0, 4), (14, 4, 2)],
    &[(0, 0, 3), (3, 0, 3), (10, 4, 2), (12, 2, 4)],
    &[(0, 0, 8), (8, 4, 8)],
    &[(0, 0, 2), (4, 0, 2), (8, 0, 2), (12, 4, 2)],
    &[(0, 0, 4), (6, 2, 2), (8, 4, 4), (14, 6, 2)],
    &[(0, 0, 12), (12, -1, 4)],
];

pub const MELODY_MOTIFS: [&[StepNote]; 8] = [
    &[(0, 4, 2), (2, 2, 2), (4, 0, 4), (10, 1, 2), (12, 2, 4)],
    &[(2, 7, 2), (6, 6, 2), (8, 4, 6)],
    &[(0, 2, 3), (3, 4, 3), (6, 6, 2), (8, 7, 4), (12, 4, 4)],
    &[(4, 0, 2), (6, 2, 2), (8, 4, 2), (10, 2, 2), (12, 1, 4)],
    &[(0, 9, 4), (4, 7, 2), (6, 6, 2), (8, 4, 8)],
    &[(0, 4, 1), (1, 5, 1), (2, 4, 2), (6, 2, 2), (10, 0, 6)],
    &[(8, 2, 2), (10, 4, 2), (12, 6, 4)],
    &[(0, 0, 2), (3, 2, 2), (6, 4, 2), (9, 6, 3), (12, 7, 4)],
];

/// Sparse bell figures spanning two bars (steps 0..32).
pub const FX_LOOPS: [&[StepNote]; 4] = [
    &[(0, 7, 4), (20, 9, 4)],
    &[(6, 4, 2), (14, 6, 2), (22, 11, 6)],
    &[(0, 14, 8)],
    &[(4, 7, 2), (8, 9, 2), (12, 11, 4), (28, 9, 4)],
];

pub const DRUM_POOL: usize = DRUM_LOOPS.len();
pub const BASS_POOL: usize = BASS_LOOPS.len();
pub const MELODY_POOL: usize = MELODY_MOTIFS.len();
pub const FX_POOL: usize = FX_LOOPS.len();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loops_fit_their_bars() {
        for pool in [&BASS_LOOPS[..], &MELODY_MOTIFS[..]] {
            for lp in pool {
                assert!(lp.iter().all(|&(step, _, len)| step < 16 && len > 0 && step + len <= 16));
            }
        }
        for lp in FX_LOOPS {
            assert!(lp.iter().all(|&(step, _, len)| step < 32 && len > 0 && step + len <= 32));
        }
    }

    #[test]
    fn test_every_drum_loop_has_a_downbeat_kick() {
        assert!(DRUM_LOOPS.iter().all(|d| d.kick & 1 == 1));
    }
}
