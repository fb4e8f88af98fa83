//! Flex devices: generic decoders configured from a spec string at startup.
//!
//! The spec grammar is the one the analyzer prints:
//! `n=name,m=OOK_PWM,s=100,l=500,g=1700,r=10000,t=40,y=0`
//! with timings in microseconds. Keys: `n` name, `m` modulation, `s` short,
//! `l` long, `g` gap limit, `r` reset limit, `y` sync, `t` tolerance,
//! `bits` minimum row length for a report.

use crate::bitbuffer::BitBuffer;
use crate::data::{DataRecord, Value};
use crate::demod::Modulation;
use crate::device::{Decoder, DecodeResult, Device};
use crate::error::{Error, Result};

/// Generic decoder reporting raw row codes for any matching package.
struct FlexDecoder {
    name: String,
    min_bits: usize,
}

impl Decoder for FlexDecoder {
    fn decode(&self, bits: &BitBuffer) -> DecodeResult {
        let mut rows = Vec::new();
        for r in 0..bits.num_rows() {
            if bits.bits_per_row(r) >= self.min_bits.max(1) {
                rows.push(Value::String(bits.row_code(r)));
            }
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String(self.name.clone()))
            .push("count", "", Value::Int(rows.len() as i64))
            .push("num_rows", "", Value::Int(bits.num_rows() as i64))
            .push("codes", "", Value::Array(rows));
        Ok(vec![rec])
    }
}

fn parse_modulation(value: &str) -> Result<Modulation> {
    Ok(match value {
        "OOK_PCM_RZ" => Modulation::OokPcmRz,
        "OOK_PPM" => Modulation::OokPpm,
        "OOK_PWM" => Modulation::OokPwm,
        "OOK_MC_ZEROBIT" => Modulation::OokManchesterZerobit,
        "OOK_PIWM_RAW" => Modulation::OokPiwmRaw,
        "OOK_PIWM_DC" => Modulation::OokPiwmDc,
        "OOK_DMC" => Modulation::OokDmc,
        "OOK_PWM_OSV1" => Modulation::OokPwmOsv1,
        "FSK_PCM" => Modulation::FskPcm,
        "FSK_PWM" => Modulation::FskPwm,
        "FSK_MC_ZEROBIT" => Modulation::FskManchesterZerobit,
        other => return Err(Error::FlexSpec(format!("unknown modulation {:?}", other))),
    })
}

/// Create a device from a flex spec string.
pub fn create_device(spec: &str) -> Result<Device> {
    let mut name = None;
    let mut modulation = None;
    let mut short = 0.0f32;
    let mut long = 0.0f32;
    let mut gap = 0.0f32;
    let mut reset = 0.0f32;
    let mut sync = 0.0f32;
    let mut tolerance = 0.0f32;
    let mut min_bits = 0usize;

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| Error::FlexSpec(format!("expected key=value, got {:?}", part)))?;
        let num = || -> Result<f32> {
            value
                .parse()
                .map_err(|_| Error::FlexSpec(format!("bad number for {}: {:?}", key, value)))
        };
        match key {
            "n" | "name" => name = Some(value.to_string()),
            "m" | "modulation" => modulation = Some(parse_modulation(value)?),
            "s" | "short" => short = num()?,
            "l" | "long" => long = num()?,
            "g" | "gap" => gap = num()?,
            "r" | "reset" => reset = num()?,
            "y" | "sync" => sync = num()?,
            "t" | "tolerance" => tolerance = num()?,
            "bits" => {
                min_bits = value
                    .parse()
                    .map_err(|_| Error::FlexSpec(format!("bad number for bits: {:?}", value)))?
            }
            other => return Err(Error::FlexSpec(format!("unknown key {:?}", other))),
        }
    }

    let name = name.ok_or_else(|| Error::FlexSpec("missing name (n=)".into()))?;
    let modulation = modulation.ok_or_else(|| Error::FlexSpec("missing modulation (m=)".into()))?;
    if reset <= 0.0 {
        return Err(Error::FlexSpec("missing reset limit (r=)".into()));
    }

    let mut dev = Device::new(&name, modulation);
    dev.short_width = short;
    dev.long_width = long;
    dev.gap_limit = gap;
    dev.reset_limit = reset;
    dev.sync_width = sync;
    dev.tolerance = tolerance;
    dev.decoder = Some(Box::new(FlexDecoder {
        name: name.clone(),
        min_bits,
    }));
    dev.fields = ["model", "count", "num_rows", "codes"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    Ok(dev)
}
