//! CSV sink.
//!
//! The schema is fixed when the stream starts: the union of well-known fields
//! and every enabled device's declared fields, duplicates collapsed, order
//! preserved. Records render one row each; fields absent from a record leave
//! their column empty. Separator characters inside strings are
//! backslash-escaped; array elements join with `;`.

use std::io::Write;

use crate::data::{DataRecord, Value};

use super::Sink;

const SEPARATOR: char = ',';

pub struct CsvSink<W: Write + Send> {
    writer: W,
    fields: Vec<String>,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            fields: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn render(value: &Value, out: &mut String) {
        match value {
            Value::String(s) => {
                for c in s.chars() {
                    if c == SEPARATOR {
                        out.push('\\');
                    }
                    out.push(c);
                }
            }
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Double(d) => out.push_str(&format!("{:.3}", d)),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(';');
                    }
                    Self::render(item, out);
                }
            }
            // nested records are not representable in a flat row
            Value::Record(_) => {}
        }
    }
}

impl<W: Write + Send> Sink for CsvSink<W> {
    fn start(&mut self, fields: &[String]) {
        self.fields = fields.to_vec();
        let header = self.fields.join(",");
        if let Err(e) = writeln!(self.writer, "{}", header) {
            tracing::warn!("csv header write failed: {}", e);
        }
    }

    fn emit(&mut self, record: &DataRecord) {
        let mut row = String::new();
        for (i, key) in self.fields.iter().enumerate() {
            if i > 0 {
                row.push(SEPARATOR);
            }
            if let Some(field) = record.get(key) {
                Self::render(&field.value, &mut row);
            }
        }
        if let Err(e) = writeln!(self.writer, "{}", row) {
            tracing::warn!("csv output write failed: {}", e);
        }
    }

    fn poll(&mut self) {
        let _ = self.writer.flush();
    }
}
