use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use diarization_domain::ProgressEvent;
use futures::stream::Stream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// Turns the orchestrator's progress channel into an SSE body (§9 "SSE as a
/// channel"). Transport-level 30s pings via [`KeepAlive`] cover the "emit a
/// heartbeat every 30s" requirement (§4.10) between real step-progress
/// events; the orchestrator's own leading keep-alive event rides the same
/// channel as ordinary data frames.
pub fn progress_stream(receiver: UnboundedReceiver<ProgressEvent>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(receiver).map(|event| {
        let event_name = event_name(&event);
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event_name).data(payload))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keep-alive"))
}

fn event_name(event: &ProgressEvent) -> &'static str {
    use diarization_domain::ProgressEventKind::*;
    match &event.kind {
        StepProgress { .. } => "step-progress",
        FinalResult { .. } => "final-result",
        PipelineError { .. } => "pipeline-error",
        KeepAlive => "keep-alive",
    }
}
