//! Intertechno remotes.
//!
//! Intertechno remote labeled ITT-1500 that came with 3x ITR-1500 remote
//! outlets. The PPM consists of a 220 µs high followed by 340 µs or 1400 µs
//! of gap. A second remote type has an ID prefix of 0x56 and slightly
//! shorter timing.

use crate::bitbuffer::BitBuffer;
use crate::data::{DataRecord, Value};
use crate::demod::Modulation;
use crate::device::{DecodeFail, DecodeResult, Decoder, Device};

struct Intertechno;

impl Decoder for Intertechno {
    fn decode(&self, bits: &BitBuffer) -> DecodeResult {
        if bits.num_rows() < 2 || bits.bits_per_row(1) < 64 {
            return Err(DecodeFail::AbortLength);
        }
        if bits.byte(0, 0) != 0 || (bits.byte(1, 0) != 0x56 && bits.byte(1, 0) != 0x69) {
            return Err(DecodeFail::AbortEarly);
        }

        let b: Vec<u8> = (0..8).map(|col| bits.byte(1, col)).collect();
        let id_str = format!("{:02x}{:02x}{:02x}{:02x}{:02x}", b[0], b[1], b[2], b[3], b[4]);
        let slave = (b[7] & 0x0f) as i64;
        let master = ((b[7] & 0xf0) >> 4) as i64;
        let command = (b[6] & 0x07) as i64;

        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String("Intertechno".into()))
            .push("id", "", Value::String(id_str))
            .push("slave", "", Value::Int(slave))
            .push("master", "", Value::Int(master))
            .push("command", "", Value::Int(command));
        Ok(vec![rec])
    }
}

pub fn device() -> Device {
    let mut dev = Device::new("Intertechno 433", Modulation::OokPpm);
    dev.short_width = 330.0;
    dev.long_width = 1400.0;
    dev.gap_limit = 1700.0;
    dev.reset_limit = 10_000.0;
    dev.decoder = Some(Box::new(Intertechno));
    dev.disabled = 1;
    dev.fields = ["model", "type", "id", "slave", "master", "command"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    dev
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(first: u8) -> BitBuffer {
        let mut bits = BitBuffer::new();
        bits.add_bit(false); // row 0: a single zero bit
        bits.add_row();
        let bytes = [first, 0x12, 0x34, 0x56, 0x78, 0x00, 0x05, 0x3a];
        for byte in bytes {
            for i in (0..8).rev() {
                bits.add_bit((byte >> i) & 1 != 0);
            }
        }
        bits
    }

    #[test]
    fn decodes_valid_frame() {
        let dev = device();
        let decoder = dev.decoder.as_ref().unwrap();
        let records = decoder.decode(&frame(0x56)).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.get("id").unwrap().value, Value::String("5612345678".into()));
        assert_eq!(rec.get("slave").unwrap().value, Value::Int(0x0a));
        assert_eq!(rec.get("master").unwrap().value, Value::Int(0x03));
        assert_eq!(rec.get("command").unwrap().value, Value::Int(0x05));
    }

    #[test]
    fn rejects_wrong_prefix() {
        let dev = device();
        let decoder = dev.decoder.as_ref().unwrap();
        assert_eq!(decoder.decode(&frame(0x12)), Err(DecodeFail::AbortEarly));
    }

    #[test]
    fn rejects_short_rows() {
        let dev = device();
        let decoder = dev.decoder.as_ref().unwrap();
        let mut bits = BitBuffer::new();
        bits.add_bit(false);
        assert_eq!(decoder.decode(&bits), Err(DecodeFail::AbortLength));
    }
}
