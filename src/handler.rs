//! Single-event processing: decode, build a reading, check the soil, write.
//!
//! Failures are split across two boundaries. [`Handler::write`] absorbs
//! everything the sink can report. [`Handler::handle`] absorbs
//! [`ProcessError`], which by construction cannot carry a sink failure.
//! Neither boundary propagates: the caller always gets [`ACK`].

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, field, info, info_span, warn, Instrument, Span};

use crate::{
    bigquery::{models::InsertError, RowSink, SinkError},
    irrigation::{check_soil, IrrigationAlert},
    pubsub::{DecodeError, PushEnvelope},
    reading::{CoercionError, SensorReading},
};

/// Returned to the delivery platform on every path.
pub const ACK: &str = "OK";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

#[derive(Debug)]
pub enum WriteOutcome {
    Stored,
    RowErrors(Vec<InsertError>),
    TransportFailed(SinkError),
}

/// What happened to one successfully decoded event.
#[derive(Debug)]
pub struct Outcome {
    pub reading: SensorReading,
    pub alert: Option<IrrigationAlert>,
    pub write: WriteOutcome,
}

/// Clones share the sink handle.
#[derive(Clone)]
pub struct Handler {
    sink: Arc<dyn RowSink>,
}

impl Handler {
    pub fn new(sink: Arc<dyn RowSink>) -> Self {
        Self { sink }
    }

    /// Processes one push body and acknowledges it, whatever the outcome.
    pub async fn handle(&self, body: &[u8]) -> &'static str {
        let span = info_span!("sensor_event", message_id = field::Empty);

        async {
            if let Err(e) = self.process(body).await {
                error!(error = %e, "Critical system error: unexpected challenge addressed");
            }
        }
        .instrument(span)
        .await;

        ACK
    }

    pub async fn process(&self, body: &[u8]) -> Result<Outcome, ProcessError> {
        let envelope = PushEnvelope::from_slice(body)?;
        if let Some(id) = &envelope.message.message_id {
            Span::current().record("message_id", id.as_str());
        }

        let payload = envelope.message.decode_payload()?;
        let reading = SensorReading::from_payload(&payload, Utc::now())?;

        let alert = check_soil(&reading);
        if let Some(alert) = &alert {
            info!(
                moisture = alert.moisture,
                "ALERT: Soil dry ({}). Triggering irrigation.",
                alert.moisture
            );
        }

        let write = self.write(&reading).await;
        Ok(Outcome {
            reading,
            alert,
            write,
        })
    }

    /// Inserts `reading` as a one-row batch. Only sink failures are handled here.
    pub async fn write(&self, reading: &SensorReading) -> WriteOutcome {
        match self.sink.insert_rows(std::slice::from_ref(reading)).await {
            Ok(errors) if errors.is_empty() => {
                info!(
                    timestamp = %reading.timestamp,
                    "Successfully logged data point to BigQuery at {}",
                    reading.timestamp
                );
                WriteOutcome::Stored
            }
            Ok(errors) => {
                let detail =
                    serde_json::to_string(&errors).unwrap_or_else(|_| format!("{errors:?}"));
                error!(errors = %detail, "BigQuery insertion errors");
                WriteOutcome::RowErrors(errors)
            }
            Err(e) => {
                warn!(error = %e, "Preventive measure triggered: cloud API error");
                WriteOutcome::TransportFailed(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{io, sync::Mutex};

    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use chrono::DateTime;
    use reqwest::StatusCode;
    use serde_json::json;
    use tracing::Level;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::bigquery::models::ErrorProto;

    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Accept,
        Reject,
        Fail,
    }

    /// In-memory sink recording every batch it receives.
    pub(crate) struct FakeSink {
        reply: Reply,
        pub batches: Mutex<Vec<Vec<SensorReading>>>,
    }

    impl FakeSink {
        pub(crate) fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                batches: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RowSink for FakeSink {
        async fn insert_rows(
            &self,
            rows: &[SensorReading],
        ) -> Result<Vec<InsertError>, SinkError> {
            self.batches.lock().unwrap().push(rows.to_vec());
            match self.reply {
                Reply::Accept => Ok(Vec::new()),
                Reply::Reject => Ok(vec![InsertError {
                    index: 0,
                    errors: vec![ErrorProto {
                        reason: Some("invalid".to_owned()),
                        location: Some("moisture".to_owned()),
                        debug_info: None,
                        message: Some("no such field".to_owned()),
                    }],
                }]),
                Reply::Fail => Err(SinkError::Status {
                    url: "http://bigquery.test/insertAll".to_owned(),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: "unavailable".to_owned(),
                }),
            }
        }
    }

    pub(crate) fn push_body(payload: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "message": {
                "data": STANDARD.encode(payload),
                "messageId": "msg-1",
                "publishTime": "2026-10-19T08:30:00.000Z"
            },
            "subscription": "projects/p/subscriptions/sensor-push"
        }))
        .unwrap()
    }

    fn handler(sink: &Arc<FakeSink>) -> Handler {
        Handler::new(sink.clone())
    }

    /// Collects everything a `fmt` subscriber writes.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Runs `handle` under a thread-local subscriber and returns the log text.
    async fn handle_logged(h: &Handler, body: &[u8]) -> String {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        assert_eq!(h.handle(body).await, ACK);
        logs.contents()
    }

    fn line_with<'a>(logs: &'a str, needle: &str) -> &'a str {
        logs.lines()
            .find(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("no log line containing {needle:?} in:\n{logs}"))
    }

    #[tokio::test]
    async fn valid_reading_is_stored_with_exact_values() {
        let sink = FakeSink::new(Reply::Accept);
        let before = Utc::now();

        let out = handler(&sink)
            .process(&push_body(r#"{"moisture": 512, "temperature": 21.5, "humidity": 48.25}"#))
            .await
            .unwrap();

        let after = Utc::now();
        assert!(matches!(out.write, WriteOutcome::Stored));
        assert_eq!(out.reading.moisture, 512.0);
        assert_eq!(out.reading.temperature, 21.5);
        assert_eq!(out.reading.humidity, 48.25);

        let ts = DateTime::parse_from_rfc3339(&out.reading.timestamp)
            .unwrap()
            .with_timezone(&Utc);
        assert!(ts >= before - chrono::Duration::milliseconds(1) && ts <= after);

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![out.reading.clone()]);
    }

    #[tokio::test]
    async fn missing_fields_default_to_zero() {
        let sink = FakeSink::new(Reply::Accept);

        let out = handler(&sink)
            .process(&push_body(r#"{"humidity": 55}"#))
            .await
            .unwrap();

        assert_eq!(out.reading.moisture, 0.0);
        assert_eq!(out.reading.temperature, 0.0);
        assert_eq!(out.reading.humidity, 55.0);
    }

    #[tokio::test]
    async fn non_numeric_field_skips_write() {
        let sink = FakeSink::new(Reply::Accept);
        let h = handler(&sink);
        let body = push_body(r#"{"moisture": "soggy", "temperature": 20}"#);

        let err = h.process(&body).await.unwrap_err();
        assert!(matches!(err, ProcessError::Coercion(_)));
        assert_eq!(sink.calls(), 0);

        assert_eq!(h.handle(&body).await, ACK);
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn dry_soil_raises_alert() {
        let sink = FakeSink::new(Reply::Accept);

        let out = handler(&sink)
            .process(&push_body(r#"{"moisture": 399.5}"#))
            .await
            .unwrap();

        assert_eq!(out.alert, Some(IrrigationAlert { moisture: 399.5 }));
    }

    #[tokio::test]
    async fn moist_soil_raises_no_alert() {
        let sink = FakeSink::new(Reply::Accept);

        let out = handler(&sink)
            .process(&push_body(r#"{"moisture": 400}"#))
            .await
            .unwrap();

        assert_eq!(out.alert, None);
    }

    #[tokio::test]
    async fn row_errors_are_reported_not_propagated() {
        let sink = FakeSink::new(Reply::Reject);
        let h = handler(&sink);
        let body = push_body(r#"{"moisture": 700}"#);

        let out = h.process(&body).await.unwrap();
        match out.write {
            WriteOutcome::RowErrors(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].index, 0);
            }
            other => panic!("expected row errors, got {other:?}"),
        }

        assert_eq!(h.handle(&body).await, ACK);
    }

    #[tokio::test]
    async fn transport_failure_is_absorbed_after_alert() {
        let sink = FakeSink::new(Reply::Fail);
        let h = handler(&sink);
        let body = push_body(r#"{"moisture": 120}"#);

        let out = h.process(&body).await.unwrap();
        assert!(matches!(out.write, WriteOutcome::TransportFailed(_)));
        assert!(out.alert.is_some());

        assert_eq!(h.handle(&body).await, ACK);
        assert_eq!(sink.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_base64_is_caught_by_outer_boundary() {
        let sink = FakeSink::new(Reply::Accept);
        let h = handler(&sink);
        let body = serde_json::to_vec(&json!({"message": {"data": "%%%not-base64%%%"}})).unwrap();

        let err = h.process(&body).await.unwrap_err();
        assert!(matches!(err, ProcessError::Decode(DecodeError::Base64(_))));

        assert_eq!(h.handle(&body).await, ACK);
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn garbage_body_is_acknowledged() {
        let sink = FakeSink::new(Reply::Accept);
        let h = handler(&sink);

        assert!(matches!(
            h.process(b"not json at all").await,
            Err(ProcessError::Decode(DecodeError::Envelope(_)))
        ));
        assert_eq!(h.handle(b"not json at all").await, ACK);
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn identical_events_produce_two_rows() {
        let sink = FakeSink::new(Reply::Accept);
        let h = handler(&sink);
        let body = push_body(r#"{"moisture": 450, "temperature": 17, "humidity": 80}"#);

        h.handle(&body).await;
        h.handle(&body).await;

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches[0][0].timestamp <= batches[1][0].timestamp);
    }

    #[tokio::test]
    async fn dry_soil_logs_alert_with_moisture() {
        let sink = FakeSink::new(Reply::Accept);

        let logs = handle_logged(&handler(&sink), &push_body(r#"{"moisture": 120}"#)).await;

        let line = line_with(&logs, "ALERT: Soil dry (120). Triggering irrigation.");
        assert!(line.contains("INFO"));
    }

    #[tokio::test]
    async fn moist_soil_logs_no_alert() {
        let sink = FakeSink::new(Reply::Accept);

        let logs = handle_logged(&handler(&sink), &push_body(r#"{"moisture": 400}"#)).await;

        assert!(!logs.contains("ALERT"), "unexpected alert in:\n{logs}");
    }

    #[tokio::test]
    async fn stored_reading_logs_its_timestamp() {
        let sink = FakeSink::new(Reply::Accept);

        let logs = handle_logged(&handler(&sink), &push_body(r#"{"moisture": 650}"#)).await;

        let ts = sink.batches.lock().unwrap()[0][0].timestamp.clone();
        line_with(&logs, &format!("Successfully logged data point to BigQuery at {ts}"));
        assert!(!logs.contains("Critical system error"));
    }

    #[tokio::test]
    async fn row_errors_log_the_error_payload() {
        let sink = FakeSink::new(Reply::Reject);

        let logs = handle_logged(&handler(&sink), &push_body(r#"{"moisture": 650}"#)).await;

        let line = line_with(&logs, "BigQuery insertion errors");
        assert!(line.contains(r#""index":0"#));
        assert!(line.contains(r#""message":"no such field""#));
        assert!(!logs.contains("Successfully logged"));
        assert!(!logs.contains("Critical system error"));
    }

    #[tokio::test]
    async fn transport_failure_logs_preventive_measure() {
        let sink = FakeSink::new(Reply::Fail);

        let logs = handle_logged(&handler(&sink), &push_body(r#"{"moisture": 650}"#)).await;

        let line = line_with(&logs, "Preventive measure triggered");
        assert!(line.contains("503"));
        assert!(!logs.contains("Successfully logged"));
        assert!(!logs.contains("BigQuery insertion errors"));
        assert!(!logs.contains("Critical system error"));
    }

    #[tokio::test]
    async fn coercion_failure_logs_only_the_critical_line() {
        let sink = FakeSink::new(Reply::Accept);

        let logs = handle_logged(
            &handler(&sink),
            &push_body(r#"{"moisture": "soggy", "temperature": 20}"#),
        )
        .await;

        let line = line_with(&logs, "Critical system error");
        assert!(line.contains("moisture"));
        assert!(line.contains("msg-1"), "message_id missing from: {line}");
        assert!(!logs.contains("ALERT"));
        assert!(!logs.contains("Successfully logged"));
        assert!(!logs.contains("Preventive measure"));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn non_finite_value_is_not_written() {
        let sink = FakeSink::new(Reply::Accept);
        let h = handler(&sink);
        let body = push_body(r#"{"moisture": "nan", "temperature": "inf"}"#);

        assert!(matches!(h.process(&body).await, Err(ProcessError::Coercion(_))));

        let logs = handle_logged(&h, &body).await;
        line_with(&logs, "Critical system error");
        assert!(!logs.contains("Successfully logged"));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_base64_logs_only_the_critical_line() {
        let sink = FakeSink::new(Reply::Accept);
        let body = serde_json::to_vec(&json!({"message": {"data": "%%%", "messageId": "m-7"}})).unwrap();

        let logs = handle_logged(&handler(&sink), &body).await;

        let line = line_with(&logs, "Critical system error");
        assert!(line.contains("base64"));
        assert!(line.contains("m-7"));
        assert_eq!(logs.lines().filter(|l| !l.trim().is_empty()).count(), 1);
    }
}
