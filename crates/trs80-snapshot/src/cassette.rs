//! Byte-stream encoding for `trs80_cassette::Cassette`.

use trs80_cassette::{Cassette, CassetteCallback, CassetteState, Polarity, Speed, TransitionState};
use trs80_core::{Clock, PulseScheduler};

use crate::io::{push_bool, push_bytes, push_i32, push_option_u64, push_u16, push_u32, push_usize, Reader};

const VERSION: u16 = 1;

fn push_speed(buf: &mut Vec<u8>, speed: Speed) {
    buf.push(match speed {
        Speed::Low => 0,
        Speed::High => 1,
    });
}

fn read_speed(r: &mut Reader) -> Result<Speed, String> {
    match r.u8()? {
        0 => Ok(Speed::Low),
        1 => Ok(Speed::High),
        other => Err(format!("unknown cassette speed tag {other}")),
    }
}

fn push_polarity(buf: &mut Vec<u8>, polarity: Polarity) {
    buf.push(match polarity {
        Polarity::Positive => 0,
        Polarity::Negative => 1,
        Polarity::Zero => 2,
    });
}

fn read_polarity(r: &mut Reader) -> Result<Polarity, String> {
    match r.u8()? {
        0 => Ok(Polarity::Positive),
        1 => Ok(Polarity::Negative),
        2 => Ok(Polarity::Zero),
        other => Err(format!("unknown cassette polarity tag {other}")),
    }
}

/// Encode a cassette's current state to a versioned byte stream.
#[must_use]
pub fn encode_cassette(cassette: &Cassette) -> Vec<u8> {
    let state = cassette.export_state();
    let mut buf = Vec::new();
    push_u16(&mut buf, VERSION);
    push_bytes(&mut buf, &state.data);
    push_usize(&mut buf, state.byte_cursor);
    buf.push(state.bit_cursor);
    push_bool(&mut buf, state.is_blank);
    push_speed(&mut buf, state.speed);
    push_bool(&mut buf, state.motor_engaged);
    push_bool(&mut buf, state.motor_on_signal);
    push_bool(&mut buf, state.record_invoked);
    push_option_u64(&mut buf, state.last_write_positive);
    push_polarity(&mut buf, state.last_write_polarity);
    push_i32(&mut buf, state.high_speed_write_evidence);
    push_bool(&mut buf, state.skipped_last);
    match &state.transition {
        Some(t) => {
            push_bool(&mut buf, true);
            push_speed(&mut buf, t.speed);
            push_bool(&mut buf, t.second_half);
            push_polarity(&mut buf, t.level);
            push_polarity(&mut buf, t.last_non_zero);
            push_bool(&mut buf, t.flip_flop);
        }
        None => push_bool(&mut buf, false),
    }
    push_u32(&mut buf, state.consecutive_fifty_fives);
    push_u32(&mut buf, state.consecutive_zeros);
    push_usize(&mut buf, state.max_tape_length);
    buf
}

/// Decode a byte stream produced by [`encode_cassette`] and apply it to
/// `cassette`, re-registering any pending read pulse with `scheduler`.
pub fn decode_cassette(
    cassette: &mut Cassette,
    bytes: &[u8],
    clock: &Clock,
    scheduler: &mut PulseScheduler<CassetteCallback>,
) -> Result<(), crate::SnapshotError> {
    let mut r = Reader::new(bytes);
    let version = r.u16()?;
    if version != VERSION {
        return Err(format!("unsupported cassette snapshot version {version}").into());
    }

    let data = r.bytes()?;
    let byte_cursor = r.usize()?;
    let bit_cursor = r.u8()?;
    let is_blank = r.bool()?;
    let speed = read_speed(&mut r)?;
    let motor_engaged = r.bool()?;
    let motor_on_signal = r.bool()?;
    let record_invoked = r.bool()?;
    let last_write_positive = r.option_u64()?;
    let last_write_polarity = read_polarity(&mut r)?;
    let high_speed_write_evidence = r.i32()?;
    let skipped_last = r.bool()?;
    let transition = if r.bool()? {
        let speed = read_speed(&mut r)?;
        let second_half = r.bool()?;
        let level = read_polarity(&mut r)?;
        let last_non_zero = read_polarity(&mut r)?;
        let flip_flop = r.bool()?;
        Some(TransitionState {
            speed,
            second_half,
            level,
            last_non_zero,
            flip_flop,
        })
    } else {
        None
    };
    let consecutive_fifty_fives = r.u32()?;
    let consecutive_zeros = r.u32()?;
    let max_tape_length = r.usize()?;

    let state = CassetteState {
        data,
        byte_cursor,
        bit_cursor,
        is_blank,
        speed,
        motor_engaged,
        motor_on_signal,
        record_invoked,
        last_write_positive,
        last_write_polarity,
        high_speed_write_evidence,
        skipped_last,
        transition,
        consecutive_fifty_fives,
        consecutive_zeros,
        max_tape_length,
    };
    cassette.import_state(state, clock, scheduler);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trs80_core::PeripheralConfig;

    #[test]
    fn encode_then_decode_round_trips_through_bytes() {
        let config = PeripheralConfig::default();
        let mut cassette = Cassette::new(&config);
        cassette.load(&[0x55, 0xAA, 0x12, 0x34]);
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        cassette.engage_motor(true, false, &clock, &mut scheduler);

        let bytes = encode_cassette(&cassette);

        let mut restored = Cassette::new(&config);
        let mut restored_scheduler = PulseScheduler::new();
        decode_cassette(&mut restored, &bytes, &clock, &mut restored_scheduler).expect("valid snapshot");

        assert_eq!(restored.data(), cassette.data());
        assert_eq!(restored.export_state().motor_engaged, cassette.export_state().motor_engaged);
    }

    #[test]
    fn rejects_wrong_version_tag() {
        let bytes = vec![0xFF, 0xFF];
        let config = PeripheralConfig::default();
        let mut cassette = Cassette::new(&config);
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let result = decode_cassette(&mut cassette, &bytes, &clock, &mut scheduler);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_truncated_stream() {
        let bytes = vec![1, 0];
        let config = PeripheralConfig::default();
        let mut cassette = Cassette::new(&config);
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let result = decode_cassette(&mut cassette, &bytes, &clock, &mut scheduler);
        assert!(result.is_err());
    }
}
