//! JSON sink: one RFC 8259 object per line.

use std::io::Write;

use crate::data::DataRecord;

use super::Sink;

pub struct JsonSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Sink for JsonSink<W> {
    fn emit(&mut self, record: &DataRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(self.writer, "{}", line) {
                    tracing::warn!("json output write failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("json serialization failed: {}", e),
        }
    }

    fn poll(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataRecord, Value};

    #[test]
    fn one_object_per_line() {
        let mut sink = JsonSink::new(Vec::new());
        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String("Test".into()))
            .push("id", "", Value::Int(7));
        sink.emit(&rec);
        sink.emit(&rec);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"model":"Test","id":7}"#);
    }

    #[test]
    fn round_trips_through_serde() {
        let mut sink = JsonSink::new(Vec::new());
        let mut rec = DataRecord::new();
        rec.push("temperature_C", "", Value::Double(21.5));
        sink.emit(&rec);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let json: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        let back = DataRecord::from_json(&json).unwrap();
        assert!(rec.approx_eq(&back, 1e-9));
    }
}
