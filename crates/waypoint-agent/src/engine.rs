use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::event::{EventBus, EventReceiver, LifecycleEvent};
use waypoint_core::types::{AgentId, ChatMessage, RunId, RunStatus};

use crate::context::{ExecutionContext, Services};
use crate::graph::{Graph, StepData};
use crate::walker::run_graph;

/// Runs one graph against a set of services. At most one run is active per
/// agent; distinct agents run independently.
pub struct Agent<I, O> {
    id: AgentId,
    graph: Graph<I, O>,
    services: Arc<Services>,
    system_prompt: Option<String>,
    running: Arc<AtomicBool>,
}

impl<I: StepData, O: StepData> Agent<I, O> {
    pub fn new(graph: Graph<I, O>, services: Services) -> Self {
        Self {
            id: AgentId::new(),
            graph,
            services: Arc::new(services),
            system_prompt: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = AgentId::from_string(id);
        self
    }

    /// Seed every run's history with a system message.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn graph(&self) -> &Graph<I, O> {
        &self.graph
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a run in the background.
    ///
    /// Fails immediately with [`WaypointError::AlreadyRunning`] while another
    /// run of this agent is active. The agent is free again once the spawned
    /// run has emitted `Agent.BeforeClose` and finished.
    pub fn run(&self, input: I) -> Result<RunHandle<O>> {
        let guard = RunGuard::acquire(&self.running).ok_or_else(|| {
            WaypointError::AlreadyRunning {
                agent_id: self.id.to_string(),
            }
        })?;

        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let (tx, rx) = EventBus::channel(self.services.config.event_buffer);
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);

        let mut ctx = ExecutionContext::new(
            run_id.clone(),
            self.id.clone(),
            self.services.clone(),
            tx,
            cancel.clone(),
            Arc::new(input.clone()),
        );
        if let Some(prompt) = &self.system_prompt {
            ctx.push_message(ChatMessage::system(prompt.clone()));
        }

        info!(agent_id = %self.id, run_id = %run_id, strategy = %self.graph.name(), "Starting run");

        let graph = self.graph.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            status_tx.send_replace(RunStatus::Running);
            let result = run_graph(&graph, &mut ctx, input).await;
            // A vanished consumer cancels the token, so that counts as cancelled too.
            let status = match &result {
                Ok(_) => RunStatus::Finished,
                Err(e) if e.is_cancellation() || ctx.is_cancelled() => RunStatus::Cancelled,
                Err(_) => RunStatus::Failed,
            };
            // Closes the event bus before the status turns terminal.
            drop(ctx);
            status_tx.send_replace(status);
            result
        });

        Ok(RunHandle {
            run_id,
            events: rx,
            cancel,
            status: status_rx,
            outcome: RunOutcome { task },
        })
    }
}

/// Holds the agent's single-flight flag for the lifetime of a run.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The final value of a run.
pub struct RunOutcome<O> {
    task: JoinHandle<Result<O>>,
}

impl<O> RunOutcome<O> {
    pub async fn wait(self) -> Result<O> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(WaypointError::Cancelled),
            Err(e) => Err(WaypointError::Step {
                node: "run".to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// A handle on one run: its ordered event stream, status and result.
///
/// Dropping the handle (or its event receiver) cancels the run at its next
/// event, since nobody is left to observe it.
pub struct RunHandle<O> {
    run_id: RunId,
    events: EventReceiver,
    cancel: CancellationToken,
    status: watch::Receiver<RunStatus>,
    outcome: RunOutcome<O>,
}

/// A [`RunHandle`] taken apart, for consumers that drive the event stream and
/// the result separately.
pub struct RunParts<O> {
    pub run_id: RunId,
    pub events: EventReceiver,
    pub cancel: CancellationToken,
    pub status: watch::Receiver<RunStatus>,
    pub outcome: RunOutcome<O>,
}

impl<O> RunHandle<O> {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The next lifecycle event, or `None` once the run has closed its bus.
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// A receiver that observes status changes, usable after the handle is
    /// consumed.
    pub fn watch_status(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// Drain every remaining event, then return them with the run result.
    pub async fn finish(mut self) -> (Vec<LifecycleEvent>, Result<O>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, self.outcome.wait().await)
    }

    pub fn into_parts(self) -> RunParts<O> {
        RunParts {
            run_id: self.run_id,
            events: self.events,
            cancel: self.cancel,
            status: self.status,
            outcome: self.outcome,
        }
    }
}
