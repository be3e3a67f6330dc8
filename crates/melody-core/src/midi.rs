use crate::arrange::{arrange, Score};
use crate::plan::CompositionPlan;
use crate::ArrangeError;

impl CompositionPlan {
    /// Arrange the plan and export the score as a standard MIDI file.
    pub fn to_midi_bytes(&self) -> Result<Vec<u8>, ArrangeError> {
        arrange(self)?.to_mid_bytes()
    }
}

impl Score {
    /// Serialize to SMF bytes (single track, one channel per part, drums on channel 10).
    pub fn to_mid_bytes(&self) -> Result<Vec<u8>, ArrangeError> {
        use midly::{
            num::{u4, u7},
            Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
        };
        let ppq: u16 = 480;
        let micros_per_quarter = 60_000_000u32 / self.tempo_bpm.max(1);

        let mut evs: Vec<(u32, bool, usize)> = Vec::with_capacity(self.notes.len() * 2);
        for (i, n) in self.notes.iter().enumerate() {
            let on = (n.start * ppq as f64).round() as u32;
            let off = ((n.start + n.length) * ppq as f64).round() as u32;
            evs.push((on, true, i));
            evs.push((off.max(on + 1), false, i));
        }
        // note-offs before note-ons on the same tick
        evs.sort_by_key(|&(tick, is_on, _)| (tick, is_on));

        let mut track: Vec<TrackEvent> = Vec::with_capacity(evs.len() + 3);
        track.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(micros_per_quarter.into())),
        });
        track.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        });

        let mut last_tick: u32 = 0;
        for (tick, is_on, i) in evs {
            let n = &self.notes[i];
            let delta = tick.saturating_sub(last_tick);
            last_tick = tick;
            let key = u7::new(n.pitch.min(127));
            let message = if is_on {
                MidiMessage::NoteOn { key, vel: u7::new(n.velocity.min(127)) }
            } else {
                MidiMessage::NoteOff { key, vel: u7::new(0) }
            };
            track.push(TrackEvent {
                delta: delta.into(),
                kind: TrackEventKind::Midi { channel: u4::new(n.part.midi_channel()), message },
            });
        }
        track.push(TrackEvent { delta: 0.into(), kind: TrackEventKind::Meta(MetaMessage::EndOfTrack) });

        let smf = Smf {
            header: Header { format: Format::SingleTrack, timing: Timing::Metrical(ppq.into()) },
            tracks: vec![track],
        };

        let mut buf = Vec::new();
        smf.write_std(&mut buf).map_err(|e| ArrangeError::Midi(e.to_string()))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use crate::arrange::{Part, Score, ScoreNote};

    fn score() -> Score {
        Score {
            tempo_bpm: 80,
            total_beats: 8.0,
            notes: vec![
                ScoreNote { part: Part::Pad, pitch: 60, start: 0.0, length: 4.0, velocity: 56 },
                ScoreNote { part: Part::Kick, pitch: 36, start: 0.0, length: 0.25, velocity: 112 },
                ScoreNote { part: Part::Melody, pitch: 72, start: 1.5, length: 0.5, velocity: 84 },
            ],
        }
    }

    #[test]
    fn test_midi_header_and_note_count() {
        let bytes = score().to_mid_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"MThd");

        let smf = midly::Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 1);
        let note_ons = smf.tracks[0]
            .iter()
            .filter(|ev| matches!(ev.kind, midly::TrackEventKind::Midi { message: midly::MidiMessage::NoteOn { .. }, .. }))
            .count();
        assert_eq!(note_ons, 3);
    }

    #[test]
    fn test_drums_use_channel_ten() {
        let bytes = score().to_mid_bytes().unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();
        let drum = smf.tracks[0].iter().find_map(|ev| match ev.kind {
            midly::TrackEventKind::Midi { channel, message: midly::MidiMessage::NoteOn { key, .. } }
                if key.as_int() == 36 => Some(channel.as_int()),
            _ => None,
        });
        assert_eq!(drum, Some(9));
    }
}
