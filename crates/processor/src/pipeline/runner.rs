//! Async driver for a query container
//!
//! A [`ContainerRunner`] moves a container onto a tokio task and serializes
//! every call through a bounded command channel. Producers push through
//! [`InputSender`]s from any task; checkpoints are taken between commands, so
//! they never observe a half-processed event.

use super::container::{ContainerState, ContainerStats, InputHandle, QueryContainer};
use crate::error::{ProcessorError, Result};
use tempo_types::StreamEvent;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default capacity of the command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 1024;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Next {
        input: InputHandle,
        events: Vec<StreamEvent>,
        reply: Reply<()>,
    },
    Completed {
        input: InputHandle,
        reply: Reply<()>,
    },
    Error {
        input: InputHandle,
        reason: String,
        reply: Reply<()>,
    },
    Checkpoint {
        reply: Reply<Vec<u8>>,
    },
    Stats {
        reply: oneshot::Sender<(ContainerState, ContainerStats)>,
    },
    Shutdown,
}

fn stopped() -> ProcessorError {
    ProcessorError::Unexpected("container task has stopped".to_string())
}

async fn request<T>(
    commands: &mpsc::Sender<Command>,
    build: impl FnOnce(Reply<T>) -> Command,
) -> Result<T> {
    let (reply, response) = oneshot::channel();
    commands.send(build(reply)).await.map_err(|_| stopped())?;
    response.await.map_err(|_| stopped())?
}

/// A container running on its own task
#[derive(Debug)]
pub struct ContainerRunner {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<QueryContainer>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Next { .. } => "next",
            Command::Completed { .. } => "completed",
            Command::Error { .. } => "error",
            Command::Checkpoint { .. } => "checkpoint",
            Command::Stats { .. } => "stats",
            Command::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

impl ContainerRunner {
    /// Spawn a task owning `container`
    ///
    /// The container is usually restored beforehand; commands on a container
    /// that is not running fail the same way the direct calls do.
    pub fn spawn(container: QueryContainer) -> Self {
        Self::spawn_with_buffer(container, DEFAULT_COMMAND_BUFFER)
    }

    pub fn spawn_with_buffer(mut container: QueryContainer, buffer: usize) -> Self {
        let (commands, mut receiver) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(async move {
            info!(container = %container.id(), "container task started");
            while let Some(command) = receiver.recv().await {
                match command {
                    Command::Next { input, events, reply } => {
                        let _ = reply.send(container.on_next_batch(&input, events));
                    }
                    Command::Completed { input, reply } => {
                        let _ = reply.send(container.on_completed(&input));
                    }
                    Command::Error { input, reason, reply } => {
                        let _ = reply.send(container.on_error(&input, reason));
                    }
                    Command::Checkpoint { reply } => {
                        let _ = reply.send(container.checkpoint());
                    }
                    Command::Stats { reply } => {
                        let _ = reply.send((container.state(), container.stats()));
                    }
                    Command::Shutdown => break,
                }
            }
            debug!(container = %container.id(), "container task stopped");
            container
        });
        Self { commands, task }
    }

    /// Sender pushing into `input`
    pub fn sender(&self, input: &InputHandle) -> InputSender {
        InputSender {
            input: input.clone(),
            commands: self.commands.clone(),
        }
    }

    pub async fn checkpoint(&self) -> Result<Vec<u8>> {
        request(&self.commands, |reply| Command::Checkpoint { reply }).await
    }

    pub async fn stats(&self) -> Result<ContainerStats> {
        Ok(self.status().await?.1)
    }

    pub async fn state(&self) -> Result<ContainerState> {
        Ok(self.status().await?.0)
    }

    async fn status(&self) -> Result<(ContainerState, ContainerStats)> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .await
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())
    }

    /// Stop the task after the commands queued so far and hand the container
    /// back
    pub async fn shutdown(self) -> Result<QueryContainer> {
        self.commands.send(Command::Shutdown).await.map_err(|_| stopped())?;
        self.task
            .await
            .map_err(|e| ProcessorError::Unexpected(format!("container task failed: {}", e)))
    }
}

/// Cloneable producer handle for one input of a running container
#[derive(Debug, Clone)]
pub struct InputSender {
    input: InputHandle,
    commands: mpsc::Sender<Command>,
}

impl InputSender {
    pub fn input(&self) -> &InputHandle {
        &self.input
    }

    pub async fn send(&self, event: StreamEvent) -> Result<()> {
        self.send_batch(vec![event]).await
    }

    pub async fn send_batch(&self, events: Vec<StreamEvent>) -> Result<()> {
        let input = self.input.clone();
        request(&self.commands, |reply| Command::Next { input, events, reply }).await
    }

    pub async fn complete(&self) -> Result<()> {
        let input = self.input.clone();
        request(&self.commands, |reply| Command::Completed { input, reply }).await
    }

    pub async fn error(&self, reason: impl Into<String>) -> Result<()> {
        let input = self.input.clone();
        let reason = reason.into();
        request(&self.commands, |reply| Command::Error { input, reason, reply }).await
    }
}
