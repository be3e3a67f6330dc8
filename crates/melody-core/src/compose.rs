//! Chain snapshot + config -> composition plan.
//!
//! Mapping rules:
//! - tempo: `min + block_number mod (max - min)`; lofi takes `[min, max]` from
//!   `lofiSettings.bpmRange`, the other styles from their profile.
//! - gas bucket (gwei): `<1, <10, <30, <100, rest` -> 0..=4; picks the scale
//!   from the style profile. Key root pitch class is `gas_price mod 12`.
//! - progression: `timestamp mod pool` within the style's progressions.
//! - loops: drums `tx_count mod pool`, bass `block_number mod pool`,
//!   fx `(timestamp / 60) mod pool`, melody from the seeded stream.
//! - effects: crackle density grows with the gas bucket, filter closes as gas rises.

use chain_data::{BigUint, ChainSnapshot};
use rand::Rng;

use crate::config::{Complexity, MusicConfig, Style};
use crate::patterns::{BASS_POOL, DRUM_POOL, FX_POOL, MELODY_POOL};
use crate::plan::{CompositionPlan, EffectParams, Layers, TrackSelection, SAMPLE_RATE};
use crate::rng::component_rng;
use crate::style::profile;
use crate::theory::{Chord, Extension, Key};
use crate::ComposeError;

const WEI_PER_GWEI: u64 = 1_000_000_000;
const GAS_BUCKETS_GWEI: [u64; 4] = [1, 10, 30, 100];

fn mod_small(v: &BigUint, m: u64) -> u64 {
    if m == 0 {
        return 0;
    }
    (v % m).iter_u64_digits().next().unwrap_or(0)
}

pub fn tempo_for_block(block_number: &BigUint, bpm_range: [u32; 2]) -> u32 {
    let [min, max] = bpm_range;
    if max <= min {
        return min;
    }
    min + mod_small(block_number, (max - min) as u64) as u32
}

pub fn gas_bucket(gas_price_wei: &BigUint) -> u8 {
    let gwei = gas_price_wei / WEI_PER_GWEI;
    let gwei = u64::try_from(&gwei).unwrap_or(u64::MAX);
    GAS_BUCKETS_GWEI.iter().take_while(|&&limit| gwei >= limit).count() as u8
}

/// Derive the composition plan. Pure: no I/O, no clock, randomness seeded from the snapshot.
pub fn compose(snapshot: &ChainSnapshot, config: &MusicConfig) -> Result<CompositionPlan, ComposeError> {
    config.validate()?;
    if snapshot.chain_id() != config.chain_id {
        return Err(ComposeError::ChainMismatch { snapshot: snapshot.chain_id(), config: config.chain_id });
    }

    let style = profile(config.style);
    let lofi = config.style == Style::LofiHipHop;
    let seed = snapshot.seed();
    let mut rng = component_rng(seed, "compose");

    let bpm_range = if lofi { config.lofi_settings.bpm_range } else { style.bpm_range };
    let tempo_bpm = tempo_for_block(snapshot.block_number(), bpm_range);

    let bucket = gas_bucket(snapshot.gas_price());
    let key = Key {
        root: mod_small(snapshot.gas_price(), 12) as u8,
        scale: style.scales[bucket as usize],
    };

    let extended = style.extended_chords || (lofi && config.lofi_settings.jazz_chords);
    let extension = match (extended, config.complexity) {
        (false, _) => Extension::Triad,
        (true, Complexity::High) => Extension::Ninth,
        (true, _) => Extension::Seventh,
    };
    let pool = style.progressions;
    let degrees = pool[(snapshot.timestamp() % pool.len() as u64) as usize];
    let progression = degrees.iter().map(|&degree| Chord { degree, extension }).collect();

    let tracks = TrackSelection {
        drums: (snapshot.transaction_count() % DRUM_POOL as u64) as usize,
        bass: mod_small(snapshot.block_number(), BASS_POOL as u64) as usize,
        melody: rng.gen_range(0..MELODY_POOL),
        fx: ((snapshot.timestamp() / 60) % FX_POOL as u64) as usize,
    };
    let layers = Layers {
        drums: style.drums,
        bass: true,
        melody: config.complexity != Complexity::Low,
        fx: config.complexity == Complexity::High,
    };

    let swing = if style.swing > 0.0 {
        (style.swing + rng.gen_range(-0.02f32..0.02)).clamp(0.0, 0.35)
    } else {
        0.0
    };
    let effects = EffectParams {
        vinyl_crackle: if lofi && config.lofi_settings.vinyl_crackle { 0.015 + 0.01 * bucket as f32 } else { 0.0 },
        swing,
        humanize: style.humanize,
        lowpass_hz: ((1_800 + 900 * (4 - bucket as u32)) as f32 * style.lowpass_scale).min(16_000.0),
        echo_mix: match config.complexity {
            Complexity::Low => 0.0,
            Complexity::Medium => 0.12,
            Complexity::High => 0.2,
        },
    };

    Ok(CompositionPlan {
        seed,
        chain_id: snapshot.chain_id(),
        source_block: snapshot.block_number().to_str_radix(10),
        style: config.style,
        complexity: config.complexity,
        tempo_bpm,
        key,
        gas_bucket: bucket,
        progression,
        tracks,
        layers,
        timbre: style.timbre.to_vec(),
        effects,
        duration_secs: config.duration,
        sample_rate: SAMPLE_RATE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LofiSettings;
    use crate::theory::ScaleKind;
    use pretty_assertions::assert_eq;

    fn snapshot(block: u64, gas_wei: u64) -> ChainSnapshot {
        ChainSnapshot::new(
            33139,
            BigUint::from(block),
            BigUint::from(gas_wei),
            1_700_000_000,
            &["0x01", "0x02", "0x03", "0x04", "0x05"],
        )
    }

    fn lofi_config() -> MusicConfig {
        MusicConfig {
            chain_id: 33139,
            style: Style::LofiHipHop,
            duration: 60,
            lofi_settings: LofiSettings { bpm_range: [70, 90], vinyl_crackle: true, jazz_chords: true },
            complexity: Complexity::Medium,
        }
    }

    #[test]
    fn test_compose_is_deterministic() {
        let snap = snapshot(12345, 25 * WEI_PER_GWEI);
        for style in Style::ALL {
            let cfg = MusicConfig { style, ..lofi_config() };
            assert_eq!(compose(&snap, &cfg).unwrap(), compose(&snap, &cfg).unwrap());
        }
    }

    #[test]
    fn test_lofi_tempo_scenario() {
        let snap = snapshot(12345, 25 * WEI_PER_GWEI);
        let plan = compose(&snap, &lofi_config()).unwrap();
        assert!((70..=90).contains(&plan.tempo_bpm));
        assert_eq!(plan.tempo_bpm, 75);
        for _ in 0..3 {
            assert_eq!(compose(&snap, &lofi_config()).unwrap().tempo_bpm, 75);
        }
    }

    #[test]
    fn test_tempo_handles_huge_and_degenerate_ranges() {
        let huge = BigUint::parse_bytes(b"340282366920938463463374607431768211457", 10).unwrap();
        let t = tempo_for_block(&huge, [70, 90]);
        assert!((70..90).contains(&t));
        assert_eq!(tempo_for_block(&BigUint::from(999u32), [80, 80]), 80);
    }

    #[test]
    fn test_gas_buckets() {
        assert_eq!(gas_bucket(&BigUint::from(500_000_000u64)), 0);
        assert_eq!(gas_bucket(&BigUint::from(WEI_PER_GWEI)), 1);
        assert_eq!(gas_bucket(&BigUint::from(25 * WEI_PER_GWEI)), 2);
        assert_eq!(gas_bucket(&BigUint::from(99 * WEI_PER_GWEI)), 3);
        let absurd = BigUint::parse_bytes(b"1000000000000000000000000000000", 10).unwrap();
        assert_eq!(gas_bucket(&absurd), 4);
    }

    #[test]
    fn test_key_follows_gas() {
        let plan = compose(&snapshot(1, 25 * WEI_PER_GWEI), &lofi_config()).unwrap();
        assert_eq!(plan.gas_bucket, 2);
        assert_eq!(plan.key.scale, ScaleKind::Minor);
        assert_eq!(plan.key.root as u64, (25 * WEI_PER_GWEI) % 12);
    }

    #[test]
    fn test_loop_selection_rules() {
        let snap = snapshot(12345, 25 * WEI_PER_GWEI);
        let plan = compose(&snap, &lofi_config()).unwrap();
        assert_eq!(plan.tracks.drums, 5 % DRUM_POOL);
        assert_eq!(plan.tracks.bass, 12345 % BASS_POOL);
        assert_eq!(plan.tracks.fx, ((1_700_000_000u64 / 60) % FX_POOL as u64) as usize);
        assert!(plan.tracks.melody < MELODY_POOL);
    }

    #[test]
    fn test_toggles_shape_the_plan() {
        let snap = snapshot(12345, 25 * WEI_PER_GWEI);
        let mut cfg = lofi_config();
        let plan = compose(&snap, &cfg).unwrap();
        assert!(plan.effects.vinyl_crackle > 0.0);
        assert!(plan.progression.iter().all(|c| c.extension == Extension::Seventh));

        cfg.lofi_settings.vinyl_crackle = false;
        cfg.lofi_settings.jazz_chords = false;
        let plain = compose(&snap, &cfg).unwrap();
        assert_eq!(plain.effects.vinyl_crackle, 0.0);
        assert!(plain.progression.iter().all(|c| c.extension == Extension::Triad));
    }

    #[test]
    fn test_complexity_controls_layers() {
        let snap = snapshot(12345, 25 * WEI_PER_GWEI);
        let low = compose(&snap, &MusicConfig { complexity: Complexity::Low, ..lofi_config() }).unwrap();
        assert!(!low.layers.melody && !low.layers.fx);
        let high = compose(&snap, &MusicConfig { complexity: Complexity::High, ..lofi_config() }).unwrap();
        assert!(high.layers.melody && high.layers.fx);
        assert!(high.progression.iter().all(|c| c.extension == Extension::Ninth));
    }

    #[test]
    fn test_non_lofi_styles_use_profile_tempo() {
        let snap = snapshot(12345, 25 * WEI_PER_GWEI);
        let plan = compose(&snap, &MusicConfig { style: Style::Electronic, ..lofi_config() }).unwrap();
        assert!((118..=128).contains(&plan.tempo_bpm));
        assert_eq!(plan.effects.vinyl_crackle, 0.0);
        assert!(!compose(&snap, &MusicConfig { style: Style::Ambient, ..lofi_config() }).unwrap().layers.drums);
    }

    #[test]
    fn test_validation_errors() {
        let snap = snapshot(1, 1);
        let cfg = MusicConfig { duration: 301, ..lofi_config() };
        assert!(matches!(compose(&snap, &cfg), Err(ComposeError::InvalidDuration { .. })));
        let cfg = MusicConfig { chain_id: 1, ..lofi_config() };
        assert!(matches!(
            compose(&snap, &cfg),
            Err(ComposeError::ChainMismatch { snapshot: 33139, config: 1 })
        ));
    }
}
