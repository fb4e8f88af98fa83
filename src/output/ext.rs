//! In-process callback sink.
//!
//! The only channel that receives unknown-signal deliveries: the callback
//! gets the record plus the extended side channel with the raw bit buffer,
//! pulse data, modulation tag and sample rate.

use crate::data::DataRecord;

use super::{ExtData, Sink};

type ExtCallback = Box<dyn FnMut(&DataRecord, Option<&ExtData<'_>>) + Send>;

pub struct ExtSink {
    callback: ExtCallback,
}

impl ExtSink {
    pub fn new(callback: ExtCallback) -> Self {
        tracing::info!("output to in-process callback");
        Self { callback }
    }
}

impl Sink for ExtSink {
    fn emit(&mut self, record: &DataRecord) {
        (self.callback)(record, None);
    }

    fn emit_ext(&mut self, record: &DataRecord, ext: &ExtData<'_>) {
        (self.callback)(record, Some(ext));
    }

    fn wants_ext(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::pulse::PulseData;
    use std::sync::{Arc, Mutex};

    #[test]
    fn callback_sees_records_and_extensions() {
        let log: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let mut sink = ExtSink::new(Box::new(move |rec, ext| {
            let model = match &rec.get("model").unwrap().value {
                Value::String(s) => s.clone(),
                _ => String::new(),
            };
            log2.lock().unwrap().push((model, ext.is_some()));
        }));
        assert!(sink.wants_ext());

        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String("known".into()));
        sink.emit(&rec);

        let pulses = PulseData::new();
        let ext = ExtData {
            bitbuffer: None,
            pulses: &pulses,
            modulation: None,
            sample_rate: 250_000,
            center_frequency: 433_920_000,
        };
        let mut rec2 = DataRecord::new();
        rec2.push("model", "", Value::String("unknown device".into()));
        sink.emit_ext(&rec2, &ext);

        let seen = log.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("known".into(), false), ("unknown device".into(), true)]);
    }
}
