use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{BoxStream, Stream};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use waypoint_agent::strategy::JourneyForm;
use waypoint_agent::{Agent, StepData};
use waypoint_core::types::{ChatMessage, StreamDelta};

use crate::adapter::StreamingAdapter;
use crate::protocol::DomainEvent;
use crate::sink::ChannelSink;
use crate::state::AppState;

const SINK_BUFFER: usize = 32;

type SseStream = Sse<axum::response::sse::KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>;

// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// POST /plan: feedback planner, streamed as domain events
pub async fn plan(
    State(state): State<Arc<AppState>>,
    Json(form): Json<JourneyForm>,
) -> Result<SseStream, StatusCode> {
    info!(from = %form.from_city, to = %form.to_city, "Planning journey");
    stream_run(state.planner_agent(), form)
}

// POST /plan/research: points of interest, researched in parallel
pub async fn plan_research(
    State(state): State<Arc<AppState>>,
    Json(form): Json<JourneyForm>,
) -> Result<SseStream, StatusCode> {
    info!(from = %form.from_city, to = %form.to_city, "Researching journey");
    stream_run(state.research_agent(), form)
}

#[derive(Deserialize)]
pub struct AgentQuery {
    pub question: String,
}

// GET /agent?question=: chat strategy, streamed as domain events
pub async fn agent(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AgentQuery>,
) -> Result<SseStream, StatusCode> {
    if q.question.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    stream_run(state.chat_agent(), q.question)
}

/// Start a run on a per-request agent and stream its translated events. The
/// stream ends after the root run closes; a client that goes away cancels
/// the run.
fn stream_run<I: StepData, O: StepData>(agent: Agent<I, O>, input: I) -> Result<SseStream, StatusCode> {
    let handle = agent.run(input).map_err(|e| {
        error!(error = %e, "Failed to start run");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let parts = handle.into_parts();
    let (mut sink, rx) = ChannelSink::new(SINK_BUFFER);

    tokio::spawn(async move {
        let adapter = StreamingAdapter::new(parts.run_id.clone(), parts.cancel);
        let summary = adapter.forward(parts.events, &mut sink).await;
        match parts.outcome.wait().await {
            Ok(_) => debug!(run_id = %parts.run_id, end = ?summary.end, "Run complete"),
            Err(e) => debug!(run_id = %parts.run_id, error = %e, "Run ended with error"),
        }
    });

    Ok(sse(ReceiverStream::new(rx).map(domain_event).boxed()))
}

fn domain_event(event: DomainEvent) -> Result<Event, Infallible> {
    let sse = Event::default().event(event.name());
    Ok(match serde_json::to_string(&event) {
        Ok(json) => sse.data(json),
        Err(e) => sse.data(format!("{{\"type\":\"Error\",\"message\":\"{}\"}}", e)),
    })
}

fn sse(stream: BoxStream<'static, Result<Event, Infallible>>) -> SseStream {
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
pub struct ChatQuery {
    pub message: String,
}

// GET /chat?message=: plain token stream, no graph involved
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ChatQuery>,
) -> Result<SseStream, StatusCode> {
    if q.message.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let (tx, rx) = mpsc::channel::<Event>(SINK_BUFFER);
    tokio::spawn(stream_tokens(state, q.message, tx));
    Ok(sse(token_events(rx).boxed()))
}

fn token_events(rx: mpsc::Receiver<Event>) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(Ok)
}

async fn stream_tokens(state: Arc<AppState>, message: String, tx: mpsc::Sender<Event>) {
    let mut messages = Vec::new();
    if let Some(prompt) = &state.config.agent.system_prompt {
        messages.push(ChatMessage::system(prompt.clone()));
    }
    messages.push(ChatMessage::user(message));

    let llm = state.services.llm.clone();
    let mut stream = match llm.chat_stream(&state.services.model, messages, &[]).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Chat request failed");
            let _ = tx.send(Event::default().event("error").data(e.to_string())).await;
            return;
        }
    };

    loop {
        let delta = tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!("Chat client disconnected");
                return;
            }
            delta = stream.next() => delta,
        };
        let last = !matches!(delta, Some(Ok(_)));
        let event = match delta {
            Some(Ok(StreamDelta::TextDelta(token))) => Event::default().event("token").data(token),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(error = %e, "Chat stream failed");
                Event::default().event("error").data(e.to_string())
            }
            None => Event::default().event("done").data(""),
        };
        if tx.send(event).await.is_err() || last {
            return;
        }
    }
}
