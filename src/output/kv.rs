//! Pretty terminal key-value sink.
//!
//! Width-aware layout on a 26-column grid with colour per key class:
//! time/tag blue, model/type/id red, mic cyan, mod/freq magenta,
//! rssi/snr/noise yellow, everything else green. Colour is only used when
//! writing to a TTY.

use std::io::{self, Write};

use crossterm::queue;
use crossterm::style::{Color, ResetColor, SetForegroundColor};

use crate::data::{format_value, DataRecord, Field, Value};

use super::Sink;

const KV_SEP: &str =
    "_ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ ";

fn color_for_key(key: &str) -> Color {
    match key {
        "tag" | "time" => Color::Blue,
        "model" | "type" | "id" => Color::Red,
        "mic" => Color::Cyan,
        "mod" | "freq" | "freq1" | "freq2" => Color::Magenta,
        "rssi" | "snr" | "noise" => Color::Yellow,
        _ => Color::Green,
    }
}

fn break_before_key(key: &str) -> bool {
    matches!(key, "model" | "mod" | "rssi" | "codes")
}

fn break_after_key(key: &str) -> bool {
    matches!(key, "id" | "mic")
}

pub struct KvSink<W: Write + Send> {
    writer: W,
    color: bool,
    term_width: usize,
    column: usize,
}

impl KvSink<io::Stdout> {
    /// KV output on stdout; colour when stdout is a TTY.
    pub fn stdout() -> Self {
        let color = atty::is(atty::Stream::Stdout);
        Self {
            writer: io::stdout(),
            color,
            term_width: 80,
            column: 0,
        }
    }
}

impl<W: Write + Send> KvSink<W> {
    /// KV output on an arbitrary writer, no colour.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            color: false,
            term_width: 80,
            column: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn set_color(&mut self, color: Color) {
        if self.color {
            let _ = queue!(self.writer, SetForegroundColor(color));
        }
    }

    fn reset_color(&mut self) {
        if self.color {
            let _ = queue!(self.writer, ResetColor);
        }
    }

    fn write_str(&mut self, s: &str) {
        let _ = self.writer.write_all(s.as_bytes());
    }

    fn emit_fields(&mut self, fields: &[Field]) {
        for field in fields {
            // break before some known keys
            if self.column > 0 && break_before_key(&field.key) {
                self.write_str("\n");
                self.column = 0;
            } else if self.column >= self.term_width.saturating_sub(26) {
                // not enough width left
                self.write_str("\n");
                self.column = 0;
            } else if self.column > 0 {
                // pad to the next column stop
                let pad = 25 - self.column % 26;
                self.write_str(&" ".repeat(pad));
                self.column += pad;
            }

            let label = if field.pretty.is_empty() {
                &field.key
            } else {
                &field.pretty
            };
            let head = format!("{:<10}: ", label);
            self.column += head.len();
            self.write_str(&head);

            self.set_color(color_for_key(&field.key));
            match &field.value {
                Value::Record(nested) => {
                    self.reset_color();
                    self.write_str("\n");
                    self.column = 0;
                    let nested_fields: Vec<Field> = nested.fields().to_vec();
                    self.emit_fields(&nested_fields);
                }
                Value::Array(items) => {
                    let text = items
                        .iter()
                        .map(|v| format_value(v, field.format.as_deref()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.column += text.len();
                    self.write_str(&text);
                }
                other => {
                    let text = format_value(other, field.format.as_deref());
                    self.column += text.len();
                    self.write_str(&text);
                }
            }
            self.reset_color();

            if self.column > 0 && break_after_key(&field.key) {
                self.column = self.term_width; // force a break
            }
        }
    }
}

impl<W: Write + Send> Sink for KvSink<W> {
    fn emit(&mut self, record: &DataRecord) {
        // refresh the terminal width and print the separator line
        if let Ok((cols, _)) = crossterm::terminal::size() {
            if cols > 0 {
                self.term_width = cols as usize;
            }
        }
        let mut sep = KV_SEP.repeat(4);
        sep.truncate(self.term_width.saturating_sub(1));
        self.set_color(Color::DarkGrey);
        self.write_str(&sep);
        self.write_str("\n");
        self.reset_color();

        self.column = 0;
        let fields: Vec<Field> = record.fields().to_vec();
        self.emit_fields(&fields);
        if self.column > 0 {
            self.write_str("\n");
            self.column = 0;
        }
        let _ = self.writer.flush();
    }

    fn poll(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_keys_values_and_breaks() {
        let mut sink = KvSink::new(Vec::new());
        let mut rec = DataRecord::new();
        rec.push("time", "", Value::String("2025-01-01 12:00:00".into()))
            .push("model", "", Value::String("TFA pool temperature sensor".into()))
            .push("id", "Id", Value::Int(90))
            .push_fmt("temperature_C", "Temperature", "%.1f C", Value::Double(21.3));
        sink.emit(&rec);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.starts_with("_ _ _"));
        assert!(out.contains("time      : 2025-01-01 12:00:00"));
        // model breaks onto its own line
        assert!(out.contains("\nmodel     : TFA pool temperature sensor"));
        // id forces a break after, so temperature starts a fresh line
        assert!(out.contains("\nTemperature: 21.3 C"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn no_color_codes_without_tty() {
        let mut sink = KvSink::new(Vec::new());
        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String("X".into()));
        sink.emit(&rec);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(!out.contains('\x1b'));
    }
}
