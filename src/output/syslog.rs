//! Syslog UDP sink: RFC 5424 frames, one datagram per record.
//!
//! Frame: `<165>1 <ISO-8601-Z> <host> rx433 - - - <json-body>` - facility 20
//! (local use 4) x 8 + severity 5 (notice). Datagrams are capped at 1024
//! bytes; oversize records are dropped. Delivery is best-effort: socket
//! errors are logged and swallowed.

use std::net::UdpSocket;

use crate::data::DataRecord;

use super::Sink;

/// Severity 5 "Notice", Facility 20 "local use 4".
const SYSLOG_PRI: u8 = 20 * 8 + 5;
const MAX_DATAGRAM: usize = 1024;

pub struct SyslogSink {
    socket: Option<UdpSocket>,
    target: String,
    hostname: String,
}

impl SyslogSink {
    pub fn new(host: &str, port: u16) -> Self {
        let target = format!("{}:{}", host, port);
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("syslog socket bind failed: {}", e);
                None
            }
        };
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        tracing::info!("syslog UDP datagrams to {}", target);
        Self {
            socket,
            target,
            hostname,
        }
    }

    /// Build the RFC 5424 frame for a record; `None` when it exceeds the
    /// datagram cap or fails to serialize.
    fn frame(&self, record: &DataRecord) -> Option<String> {
        let body = serde_json::to_string(record).ok()?;
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let frame = format!(
            "<{}>1 {} {} rx433 - - - {}",
            SYSLOG_PRI, timestamp, self.hostname, body
        );
        (frame.len() <= MAX_DATAGRAM).then_some(frame)
    }
}

impl Sink for SyslogSink {
    fn emit(&mut self, record: &DataRecord) {
        let Some(socket) = &self.socket else {
            return;
        };
        let Some(frame) = self.frame(record) else {
            tracing::debug!("syslog datagram oversize or unserializable, dropped");
            return;
        };
        if let Err(e) = socket.send_to(frame.as_bytes(), &self.target) {
            tracing::warn!("syslog send failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    #[test]
    fn frame_has_rfc5424_shape() {
        let sink = SyslogSink::new("127.0.0.1", 5514);
        let mut rec = DataRecord::new();
        rec.push("model", "", Value::String("Test".into()));
        let frame = sink.frame(&rec).unwrap();
        assert!(frame.starts_with("<165>1 "));
        assert!(frame.contains(" rx433 - - - {"));
        assert!(frame.ends_with(r#"{"model":"Test"}"#));
    }

    #[test]
    fn oversize_frames_are_dropped() {
        let sink = SyslogSink::new("127.0.0.1", 5514);
        let mut rec = DataRecord::new();
        rec.push("blob", "", Value::String("x".repeat(2000)));
        assert!(sink.frame(&rec).is_none());
    }

    #[test]
    fn delivers_to_local_receiver() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sink = SyslogSink::new("127.0.0.1", port);
        let mut rec = DataRecord::new();
        rec.push("id", "", Value::Int(1));
        sink.emit(&rec);

        let mut buf = [0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("<165>1 "));
        assert!(text.ends_with(r#"{"id":1}"#));
    }
}
