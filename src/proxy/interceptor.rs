//! Per-call interception: timing capture, response buffering, emission
//!
//! One [`ProxyInterceptor`] exists per proxied call and walks a four-state
//! machine: `Forwarded` -> `ResponseStreaming` -> `ResponseComplete` ->
//! `Emitted`. No transition skips a state, and every accepted forwarded
//! request ends in `Emitted` exactly once -- including upstream failures,
//! mid-stream resets, and client disconnects, which emit whatever partial
//! data is available with an explicit error marker.
//!
//! The response byte buffer is owned exclusively by the interceptor handling
//! that exchange and is released when the record is emitted.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::warn;

use crate::proxy::exchange::{
    ErrorPhase, ExchangeRecorder, ProxyFailure, RequestSide, ResponseSide,
};
use crate::proxy::sink::{Record, RecordSink};
use crate::proxy::types::{Headers, HttpMethod, HttpStatusCode, RequestId};

/// Lifecycle states of a single proxied call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterceptorState {
    /// Request handed to upstream, start time recorded
    Forwarded,
    /// Response headers received, body chunks arriving
    ResponseStreaming,
    /// End of stream signaled, record being assembled
    ResponseComplete,
    /// Exchange built and handed to the sink
    Emitted,
}

/// How the response stream ended
enum StreamOutcome {
    Complete,
    ClientDisconnected,
    Failed(String),
}

/// Hooks invoked by the forwarding engine around one proxied call
pub struct ProxyInterceptor {
    request_id: RequestId,
    sink: Arc<dyn RecordSink>,
    state: InterceptorState,
    started_at: DateTime<Utc>,
    request: RequestSide,
    response_status: Option<HttpStatusCode>,
    response_headers: Option<Headers>,
    buffer: BytesMut,
}

impl ProxyInterceptor {
    /// Called once per request selected for proxying, before bytes leave for
    /// upstream. The start timestamp is attached synchronously; request-side
    /// decoding runs before the await point that forwards the request.
    pub async fn on_forward(
        request_id: RequestId,
        sink: Arc<dyn RecordSink>,
        method: HttpMethod,
        url: String,
        headers: Headers,
        body: &Bytes,
    ) -> Self {
        let started_at = Utc::now();
        let request = ExchangeRecorder::request_side(method, url, headers, body).await;

        Self {
            request_id,
            sink,
            state: InterceptorState::Forwarded,
            started_at,
            request,
            response_status: None,
            response_headers: None,
            buffer: BytesMut::new(),
        }
    }

    pub fn state(&self) -> InterceptorState {
        self.state
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Response headers received from upstream
    pub fn on_response_start(&mut self, status: HttpStatusCode, headers: Headers) {
        if self.state != InterceptorState::Forwarded {
            warn!(request_id = %self.request_id, state = ?self.state,
                "on_response_start called out of order, ignoring");
            return;
        }
        self.response_status = Some(status);
        self.response_headers = Some(headers);
        self.state = InterceptorState::ResponseStreaming;
    }

    /// A response body chunk arrived; append to the exchange-scoped buffer
    pub fn on_response_chunk(&mut self, chunk: &[u8]) {
        if self.state != InterceptorState::ResponseStreaming {
            warn!(request_id = %self.request_id, state = ?self.state,
                "on_response_chunk called out of order, dropping chunk");
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// The upstream response stream closed cleanly
    pub async fn on_response_end(self) {
        self.finish(StreamOutcome::Complete).await;
    }

    /// The client went away before the response completed
    pub async fn on_client_disconnect(self) {
        self.finish(StreamOutcome::ClientDisconnected).await;
    }

    /// The upstream connection failed or reset mid-stream
    pub async fn on_stream_error(self, message: String) {
        self.finish(StreamOutcome::Failed(message)).await;
    }

    /// Hard network failure before any response headers arrived: emit an
    /// exchange with a null response side and an explicit proxy-error marker
    pub fn on_proxy_error(mut self, message: String) {
        if self.state != InterceptorState::Forwarded {
            warn!(request_id = %self.request_id, state = ?self.state,
                "on_proxy_error called out of order");
        }
        let failure = ProxyFailure {
            phase: ErrorPhase::RequestForwarding,
            message,
        };
        self.emit(None, Some(failure), Utc::now());
    }

    async fn finish(mut self, outcome: StreamOutcome) {
        if self.state != InterceptorState::ResponseStreaming {
            warn!(request_id = %self.request_id, state = ?self.state,
                "response stream ended out of order, emitting best-effort record");
        }
        // End-of-data marks the end of the exchange's lifetime; decoding
        // happens after, so it never extends the measured duration.
        let ended_at = Utc::now();
        self.state = InterceptorState::ResponseComplete;

        let (complete, error) = match outcome {
            StreamOutcome::Complete => (true, None),
            StreamOutcome::ClientDisconnected => (
                false,
                Some(ProxyFailure {
                    phase: ErrorPhase::ResponseDelivery,
                    message: "client disconnected before response completed".to_string(),
                }),
            ),
            StreamOutcome::Failed(message) => (
                false,
                Some(ProxyFailure {
                    phase: ErrorPhase::ResponseStreaming,
                    message,
                }),
            ),
        };

        let response = match (self.response_status.take(), self.response_headers.take()) {
            (Some(status), Some(headers)) => {
                let body = std::mem::take(&mut self.buffer).freeze();
                Some(ExchangeRecorder::response_side(status, headers, body, complete).await)
            }
            _ => None,
        };

        self.emit(response, error, ended_at);
    }

    fn emit(
        &mut self,
        response: Option<ResponseSide>,
        error: Option<ProxyFailure>,
        ended_at: DateTime<Utc>,
    ) {
        let exchange = ExchangeRecorder::merge(
            self.request_id,
            self.request.clone(),
            response,
            error,
            self.started_at,
            ended_at,
        );
        // Sink failures are the sink's problem; emission is fire-and-forget
        self.sink.emit(Record::Exchange(exchange));
        self.buffer = BytesMut::new();
        self.state = InterceptorState::Emitted;
    }
}

/// Events the recording body feeds to the interceptor task
#[derive(Debug)]
pub enum TapEvent {
    Chunk(Bytes),
    End,
    Failed(String),
}

/// Spawn the task that owns the interceptor for the streaming phase.
///
/// The returned sender is held by the [`RecordingBody`] wrapping the response.
/// A dropped sender without a prior `End` event means the client disconnected;
/// the task still drives the call to `Emitted`.
pub fn spawn_tap(interceptor: ProxyInterceptor) -> mpsc::UnboundedSender<TapEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<TapEvent>();

    tokio::spawn(async move {
        let mut interceptor = interceptor;
        loop {
            match rx.recv().await {
                Some(TapEvent::Chunk(chunk)) => interceptor.on_response_chunk(&chunk),
                Some(TapEvent::End) => {
                    interceptor.on_response_end().await;
                    return;
                }
                Some(TapEvent::Failed(message)) => {
                    interceptor.on_stream_error(message).await;
                    return;
                }
                None => {
                    interceptor.on_client_disconnect().await;
                    return;
                }
            }
        }
    });

    tx
}

pin_project! {
    /// Response body wrapper that tees every data frame to the tap task
    /// while forwarding it unchanged to the client
    pub struct RecordingBody<B> {
        #[pin]
        inner: B,
        tx: Option<mpsc::UnboundedSender<TapEvent>>,
    }
}

impl<B> RecordingBody<B> {
    pub fn new(inner: B, tx: mpsc::UnboundedSender<TapEvent>) -> Self {
        Self {
            inner,
            tx: Some(tx),
        }
    }
}

impl<B> http_body::Body for RecordingBody<B>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(tx)) = (frame.data_ref(), this.tx.as_ref()) {
                    let _ = tx.send(TapEvent::Chunk(data.clone()));
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(error))) => {
                let error = error.into();
                if let Some(tx) = this.tx.take() {
                    let _ = tx.send(TapEvent::Failed(error.to_string()));
                }
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                if let Some(tx) = this.tx.take() {
                    let _ = tx.send(TapEvent::End);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::decoder::DecodedPayload;
    use crate::proxy::sink::CaptureSink;
    use serde_json::json;

    fn method(s: &str) -> HttpMethod {
        HttpMethod::try_new(s.to_string()).unwrap()
    }

    fn status(code: u16) -> HttpStatusCode {
        HttpStatusCode::try_new(code).unwrap()
    }

    async fn forwarded(sink: Arc<CaptureSink>) -> ProxyInterceptor {
        ProxyInterceptor::on_forward(
            RequestId::new(),
            sink,
            method("POST"),
            "https://upstream.example/items".to_string(),
            Headers::from_pairs(vec![(
                "content-type".to_string(),
                "application/json".to_string(),
            )])
            .unwrap(),
            &Bytes::from_static(br#"{"a":1}"#),
        )
        .await
    }

    #[tokio::test]
    async fn test_full_lifecycle_emits_exactly_one_exchange() {
        let sink = Arc::new(CaptureSink::new());
        let mut interceptor = forwarded(sink.clone()).await;
        assert_eq!(interceptor.state(), InterceptorState::Forwarded);

        interceptor.on_response_start(
            status(200),
            Headers::from_pairs(vec![(
                "content-type".to_string(),
                "text/plain".to_string(),
            )])
            .unwrap(),
        );
        assert_eq!(interceptor.state(), InterceptorState::ResponseStreaming);

        interceptor.on_response_chunk(b"po");
        interceptor.on_response_chunk(b"ng");
        interceptor.on_response_end().await;

        let exchanges = sink.exchanges();
        assert_eq!(exchanges.len(), 1);

        let exchange = &exchanges[0];
        assert_eq!(
            exchange.request.payload,
            Some(DecodedPayload::Json(json!({"a": 1})))
        );
        let response = exchange.response.as_ref().unwrap();
        assert_eq!(response.status, status(200));
        assert_eq!(response.payload, Some(DecodedPayload::Text("pong".to_string())));
        assert!(response.complete);
        assert!(exchange.error.is_none());
        assert!(*exchange.duration_ms.as_ref() < 10_000);
    }

    #[tokio::test]
    async fn test_proxy_error_emits_null_response_with_marker() {
        let sink = Arc::new(CaptureSink::new());
        let interceptor = forwarded(sink.clone()).await;

        interceptor.on_proxy_error("connection refused".to_string());

        let exchanges = sink.exchanges();
        assert_eq!(exchanges.len(), 1);
        let exchange = &exchanges[0];
        assert!(exchange.response.is_none());
        let error = exchange.error.as_ref().unwrap();
        assert_eq!(error.phase, ErrorPhase::RequestForwarding);
        assert_eq!(error.message, "connection refused");
    }

    #[tokio::test]
    async fn test_client_disconnect_still_emits_partial_exchange() {
        let sink = Arc::new(CaptureSink::new());
        let mut interceptor = forwarded(sink.clone()).await;

        interceptor.on_response_start(
            status(200),
            Headers::from_pairs(vec![(
                "content-type".to_string(),
                "text/plain".to_string(),
            )])
            .unwrap(),
        );
        interceptor.on_response_chunk(b"partial");
        interceptor.on_client_disconnect().await;

        let exchanges = sink.exchanges();
        assert_eq!(exchanges.len(), 1);
        let response = exchanges[0].response.as_ref().unwrap();
        assert!(!response.complete);
        assert_eq!(
            response.payload,
            Some(DecodedPayload::Text("partial".to_string()))
        );
        assert_eq!(
            exchanges[0].error.as_ref().unwrap().phase,
            ErrorPhase::ResponseDelivery
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_marks_streaming_phase() {
        let sink = Arc::new(CaptureSink::new());
        let mut interceptor = forwarded(sink.clone()).await;

        interceptor.on_response_start(status(502), Headers::new());
        interceptor.on_stream_error("connection reset by peer".to_string()).await;

        let exchanges = sink.exchanges();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(
            exchanges[0].error.as_ref().unwrap().phase,
            ErrorPhase::ResponseStreaming
        );
    }

    #[tokio::test]
    async fn test_out_of_order_hooks_are_ignored() {
        let sink = Arc::new(CaptureSink::new());
        let mut interceptor = forwarded(sink.clone()).await;

        // Chunk before headers: dropped, state unchanged
        interceptor.on_response_chunk(b"early");
        assert_eq!(interceptor.state(), InterceptorState::Forwarded);

        interceptor.on_response_start(status(200), Headers::new());
        // Second start is ignored
        interceptor.on_response_start(status(500), Headers::new());
        interceptor.on_response_end().await;

        let exchanges = sink.exchanges();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].response.as_ref().unwrap().status, status(200));
    }

    #[tokio::test]
    async fn test_tap_task_drives_emission_on_sender_drop() {
        let sink = Arc::new(CaptureSink::new());
        let mut interceptor = forwarded(sink.clone()).await;
        interceptor.on_response_start(status(200), Headers::new());

        let tx = spawn_tap(interceptor);
        tx.send(TapEvent::Chunk(Bytes::from_static(b"some"))).unwrap();
        drop(tx);

        // The tap task emits asynchronously after the channel closes
        for _ in 0..50 {
            if !sink.exchanges().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let exchanges = sink.exchanges();
        assert_eq!(exchanges.len(), 1);
        assert!(!exchanges[0].response.as_ref().unwrap().complete);
    }
}
