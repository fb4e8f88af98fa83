//! Structured record model.
//!
//! A [`DataRecord`] is an ordered sequence of typed name-value fields produced
//! by a decode callback, then annotated (time, tag, meta), unit-converted, and
//! handed to the output sinks. Field order is significant: sinks render fields
//! in insertion order, with prepends going to the front.
//!
//! Values carry an optional printf-style format hint (`"%.1f C"`, `"%d"`)
//! used by the pretty printers; the JSON view ignores it.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::ConversionMode;

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Double(f64),
    Array(Vec<Value>),
    Record(DataRecord),
}

/// One named field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Machine key, e.g. `temperature_C`.
    pub key: String,
    /// Human label for pretty output; empty falls back to the key.
    pub pretty: String,
    /// Optional printf-style render hint.
    pub format: Option<String>,
    pub value: Value,
}

/// An ordered record of typed fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRecord {
    fields: Vec<Field>,
}

impl DataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn push(&mut self, key: &str, pretty: &str, value: Value) -> &mut Self {
        self.fields.push(Field {
            key: key.to_string(),
            pretty: pretty.to_string(),
            format: None,
            value,
        });
        self
    }

    /// Append a field with a printf-style format hint.
    pub fn push_fmt(&mut self, key: &str, pretty: &str, format: &str, value: Value) -> &mut Self {
        self.fields.push(Field {
            key: key.to_string(),
            pretty: pretty.to_string(),
            format: Some(format.to_string()),
            value,
        });
        self
    }

    /// Insert a field at the front (annotation prepends: time, tag, protocol).
    pub fn prepend(&mut self, key: &str, pretty: &str, value: Value) -> &mut Self {
        self.fields.insert(
            0,
            Field {
                key: key.to_string(),
                pretty: pretty.to_string(),
                format: None,
                value,
            },
        );
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a record from a JSON object, mapping numbers back to Int/Double.
    /// Inverse of the serde view up to floating-point rounding; format hints
    /// and pretty labels do not survive the trip.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let obj = json.as_object()?;
        let mut rec = DataRecord::new();
        for (k, v) in obj {
            rec.push(k, "", json_to_value(v)?);
        }
        Some(rec)
    }

    /// Semantic equality for round-trip checks: same keys, same values with
    /// doubles compared by distance. Field order is not significant here
    /// (JSON objects do not promise to keep it).
    pub fn approx_eq(&self, other: &Self, eps: f64) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().all(|a| {
                other
                    .get(&a.key)
                    .is_some_and(|b| value_approx_eq(&a.value, &b.value, eps))
            })
    }
}

fn json_to_value(v: &serde_json::Value) -> Option<Value> {
    Some(match v {
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Double(n.as_f64()?)
            }
        }
        serde_json::Value::Array(a) => {
            Value::Array(a.iter().map(json_to_value).collect::<Option<Vec<_>>>()?)
        }
        serde_json::Value::Object(_) => Value::Record(DataRecord::from_json(v)?),
        _ => return None,
    })
}

fn value_approx_eq(a: &Value, b: &Value, eps: f64) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => (x - y).abs() <= eps,
        (Value::Double(x), Value::Int(y)) | (Value::Int(y), Value::Double(x)) => {
            (x - *y as f64).abs() <= eps
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| value_approx_eq(p, q, eps))
        }
        (Value::Record(x), Value::Record(y)) => x.approx_eq(y, eps),
        _ => a == b,
    }
}

impl Serialize for DataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for f in &self.fields {
            map.serialize_entry(&f.key, &f.value)?;
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::Array(a) => a.serialize(serializer),
            Value::Record(r) => r.serialize(serializer),
        }
    }
}

/// Render a value through its printf-style hint. Supports the `%s`, `%d` and
/// `%.Nf` conversions the device catalogue actually uses, with surrounding
/// literal text kept.
pub fn format_value(value: &Value, format: Option<&str>) -> String {
    let Some(fmt) = format else {
        return default_format(value);
    };
    let Some(pos) = fmt.find('%') else {
        return default_format(value);
    };
    let (head, rest) = fmt.split_at(pos);
    let rest = &rest[1..];
    let mut out = String::from(head);
    // parse "%.3f", "%d", "%s" with optional precision
    let mut chars = rest.char_indices().peekable();
    let mut precision: Option<usize> = None;
    let mut conv = None;
    let mut tail_start = rest.len();
    while let Some((i, c)) = chars.next() {
        match c {
            '.' => {
                let mut digits = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                precision = digits.parse().ok();
            }
            'f' | 'd' | 'i' | 's' | 'x' | 'X' => {
                conv = Some(c);
                tail_start = i + c.len_utf8();
                break;
            }
            '0'..='9' => {} // width, ignored
            _ => {
                tail_start = i;
                break;
            }
        }
    }
    match (conv, value) {
        (Some('f'), Value::Double(d)) => {
            out.push_str(&format!("{:.*}", precision.unwrap_or(6), d))
        }
        (Some('f'), Value::Int(i)) => {
            out.push_str(&format!("{:.*}", precision.unwrap_or(6), *i as f64))
        }
        (Some('d' | 'i'), Value::Int(i)) => out.push_str(&i.to_string()),
        (Some('d' | 'i'), Value::Double(d)) => out.push_str(&(*d as i64).to_string()),
        (Some('x'), Value::Int(i)) => out.push_str(&format!("{:x}", i)),
        (Some('X'), Value::Int(i)) => out.push_str(&format!("{:X}", i)),
        (Some('s'), Value::String(s)) => out.push_str(s),
        _ => out.push_str(&default_format(value)),
    }
    out.push_str(&rest[tail_start..]);
    out
}

fn default_format(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Double(d) => format!("{:.3}", d),
        Value::Array(a) => a
            .iter()
            .map(|v| default_format(v))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Record(_) => "{..}".to_string(),
    }
}

// ─── Unit conversions ────────────────────────────────────────────────────────

pub fn fahrenheit2celsius(f: f64) -> f64 {
    (f - 32.0) / 1.8
}

pub fn celsius2fahrenheit(c: f64) -> f64 {
    c * 1.8 + 32.0
}

pub fn mph2kmph(mph: f64) -> f64 {
    mph * 1.609344
}

pub fn kmph2mph(kph: f64) -> f64 {
    kph / 1.609344
}

pub fn inch2mm(inch: f64) -> f64 {
    inch * 25.4
}

pub fn mm2inch(mm: f64) -> f64 {
    mm / 25.4
}

pub fn inhg2hpa(inhg: f64) -> f64 {
    inhg * 33.8639
}

pub fn hpa2inhg(hpa: f64) -> f64 {
    hpa / 33.8639
}

pub fn psi2kpa(psi: f64) -> f64 {
    psi * 6.89476
}

pub fn kpa2psi(kpa: f64) -> f64 {
    kpa / 6.89476
}

/// Table of suffix rewrites per direction: (key suffix, replacement suffix,
/// format fragment, replacement fragment, conversion).
type Conv = (&'static str, &'static str, &'static str, &'static str, fn(f64) -> f64);

const TO_SI: &[Conv] = &[
    ("_F", "_C", "F", "C", fahrenheit2celsius),
    ("_mph", "_kph", "mph", "kph", mph2kmph),
    ("_inch", "_mm", "inch", "mm", inch2mm),
    ("_inHg", "_hPa", "inHg", "hPa", inhg2hpa),
    ("_PSI", "_kPa", "PSI", "kPa", psi2kpa),
];

const TO_CUSTOMARY: &[Conv] = &[
    ("_C", "_F", "C", "F", celsius2fahrenheit),
    ("_kph", "_mph", "kph", "mph", kmph2mph),
    ("_mm", "_inch", "mm", "inch", mm2inch),
    ("_hPa", "_inHg", "hPa", "inHg", hpa2inhg),
    ("_kPa", "_PSI", "kPa", "PSI", kpa2psi),
];

/// Rewrite double-typed fields whose key carries a unit suffix to the
/// requested unit system, fixing up the format hint to match.
pub fn convert_units(record: &mut DataRecord, mode: ConversionMode) {
    let table = match mode {
        ConversionMode::Native => return,
        ConversionMode::Si => TO_SI,
        ConversionMode::Customary => TO_CUSTOMARY,
    };
    for field in record.fields_mut() {
        let Value::Double(v) = field.value else {
            continue;
        };
        for &(suffix, new_suffix, fmt_old, fmt_new, conv) in table {
            if field.key.ends_with(suffix) {
                field.value = Value::Double(conv(v));
                let stem = field.key.len() - suffix.len();
                field.key.truncate(stem);
                field.key.push_str(new_suffix);
                if let Some(fmt) = field.format.take() {
                    field.format = Some(fmt.replacen(fmt_old, fmt_new, 1));
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn si_conversion_rewrites_key_value_and_format() {
        let mut rec = DataRecord::new();
        rec.push_fmt("temperature_F", "Temperature", "%.1f F", Value::Double(68.0));
        convert_units(&mut rec, ConversionMode::Si);
        let f = rec.get("temperature_C").expect("key rewritten");
        match f.value {
            Value::Double(c) => assert!((c - 20.0).abs() < 0.05),
            _ => panic!("not a double"),
        }
        assert_eq!(f.format.as_deref(), Some("%.1f C"));
    }

    #[test]
    fn conversions_reverse_within_tolerance() {
        let c = fahrenheit2celsius(celsius2fahrenheit(21.7));
        assert!((c - 21.7).abs() < 0.05);
        let mph = kmph2mph(mph2kmph(12.5));
        assert!((mph - 12.5).abs() < 0.05);
        let inhg = hpa2inhg(inhg2hpa(29.92));
        assert!((inhg - 29.92).abs() < 0.05);
        let psi = kpa2psi(psi2kpa(32.0));
        assert!((psi - 32.0).abs() < 0.05);
    }

    #[test]
    fn json_round_trip_preserves_record() {
        let mut inner = DataRecord::new();
        inner.push("len", "", Value::Int(25));
        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String("Test".into()))
            .push("id", "", Value::Int(42))
            .push("temperature_C", "", Value::Double(21.5))
            .push(
                "codes",
                "",
                Value::Array(vec![Value::String("{25}fb2dd58".into())]),
            )
            .push("row", "", Value::Record(inner));
        let json = serde_json::to_value(&rec).unwrap();
        let back = DataRecord::from_json(&json).unwrap();
        assert!(rec.approx_eq(&back, 1e-9));
    }

    #[test]
    fn format_hints_render_like_printf() {
        assert_eq!(
            format_value(&Value::Double(21.54), Some("%.1f C")),
            "21.5 C"
        );
        assert_eq!(format_value(&Value::Int(7), Some("%d")), "7");
        assert_eq!(
            format_value(&Value::String("FSK".into()), Some("%s")),
            "FSK"
        );
        assert_eq!(format_value(&Value::Double(433.92), Some("%.1f MHz")), "433.9 MHz");
    }
}
