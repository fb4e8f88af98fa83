//! TFA pool temperature sensor.
//!
//! Frame layout (28 bits, repeated in rows 1..8):
//! `AAAABBBB BBBBCCCC CCCCCCCC DDEE` - A unknown, B device id (changes on
//! reset), C temperature in tenths of a degree (12-bit two's complement),
//! D channel, E unknown.

use crate::bitbuffer::BitBuffer;
use crate::data::{DataRecord, Value};
use crate::demod::Modulation;
use crate::device::{DecodeFail, DecodeResult, Decoder, Device};

struct TfaPool;

impl Decoder for TfaPool {
    fn decode(&self, bits: &BitBuffer) -> DecodeResult {
        if bits.num_rows() < 8 {
            return Err(DecodeFail::AbortLength);
        }
        for row in 1..8 {
            if bits.bits_per_row(row) != 28 {
                return Err(DecodeFail::AbortLength);
            }
        }

        let device = ((bits.byte(1, 0) & 0x0f) as i64) << 4 | ((bits.byte(1, 1) & 0xf0) >> 4) as i64;
        let raw_temp = (((bits.byte(1, 1) & 0x0f) as i32) << 8) + bits.byte(1, 2) as i32;
        let temp_c = if raw_temp > 2048 { raw_temp - 4096 } else { raw_temp } as f64 / 10.0;
        let channel = ((bits.byte(1, 3) & 0xc0) >> 6) as i64;

        if !(-40.0..=80.0).contains(&temp_c) {
            return Err(DecodeFail::FailSanity);
        }

        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String("TFA pool temperature sensor".into()))
            .push("id", "Id", Value::Int(device))
            .push("channel", "Channel", Value::Int(channel))
            .push_fmt("temperature_C", "Temperature", "%.1f C", Value::Double(temp_c));
        Ok(vec![rec])
    }
}

pub fn device() -> Device {
    let mut dev = Device::new("TFA pool temperature sensor", Modulation::OokPpm);
    dev.short_width = 2000.0;
    dev.long_width = 4600.0;
    dev.gap_limit = 7800.0;
    dev.reset_limit = 10_000.0;
    dev.decoder = Some(Box::new(TfaPool));
    dev.fields = ["model", "id", "channel", "temperature_C"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    dev
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(word: u32) -> BitBuffer {
        let mut bits = BitBuffer::new();
        bits.add_bit(false); // row 0: partial preamble
        for _ in 0..7 {
            bits.add_row();
            for i in (0..28).rev() {
                bits.add_bit((word >> i) & 1 != 0);
            }
        }
        bits
    }

    #[test]
    fn decodes_temperature() {
        // id 0x5a, temperature 21.3 C (0x0d5), channel 1
        let word: u32 = (0x0a << 24) | (0x5a << 16) | (0x0d5 << 4) | 0b0100;
        let dev = device();
        let records = dev.decoder.as_ref().unwrap().decode(&frame(word)).unwrap();
        let rec = &records[0];
        assert_eq!(rec.get("id").unwrap().value, Value::Int(0x5a));
        assert_eq!(rec.get("channel").unwrap().value, Value::Int(1));
        match rec.get("temperature_C").unwrap().value {
            Value::Double(t) => assert!((t - 21.3).abs() < 1e-9),
            ref other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn negative_temperatures_use_twos_complement() {
        // -5.0 C = -50 tenths -> 4096 - 50 = 0xFCE
        let word: u32 = (0x0a << 24) | (0x11 << 16) | (0xfce << 4) | 0b0000;
        let dev = device();
        let records = dev.decoder.as_ref().unwrap().decode(&frame(word)).unwrap();
        match records[0].get("temperature_C").unwrap().value {
            Value::Double(t) => assert!((t + 5.0).abs() < 1e-9),
            ref other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn wrong_row_length_aborts() {
        let mut bits = BitBuffer::new();
        for _ in 0..8 {
            bits.add_bit(true);
            bits.add_row();
        }
        let dev = device();
        assert_eq!(
            dev.decoder.as_ref().unwrap().decode(&bits),
            Err(DecodeFail::AbortLength)
        );
    }
}
