//! Output and diagnostic channels of a container

use super::plan::NodeId;
use crate::error::ProcessorError;
use crate::ingress::DisorderDiagnostic;
use std::collections::BTreeSet;
use tempo_types::{StreamEvent, INFINITY, MIN_TIME};
use tokio::sync::mpsc;
use tracing::trace;

/// Message delivered to a registered output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMessage {
    /// A data event, or a punctuation of the output stream
    Event(StreamEvent),
    /// Every input the output depends on has completed
    Completed,
    /// The container faulted; no further messages follow
    Faulted(ProcessorError),
}

impl OutputMessage {
    /// The data event carried by this message, if any
    pub fn into_data(self) -> Option<StreamEvent> {
        match self {
            OutputMessage::Event(event) if event.is_data() => Some(event),
            _ => None,
        }
    }
}

/// Receiving end of a registered output
#[derive(Debug)]
pub struct OutputHandle {
    node: NodeId,
    receiver: mpsc::UnboundedReceiver<OutputMessage>,
}

impl OutputHandle {
    pub(crate) fn new(node: NodeId, receiver: mpsc::UnboundedReceiver<OutputMessage>) -> Self {
        Self { node, receiver }
    }

    /// Plan node this output observes
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Wait for the next message; `None` once the container is gone and
    /// everything has been received
    pub async fn recv(&mut self) -> Option<OutputMessage> {
        self.receiver.recv().await
    }

    /// Take every message available right now
    pub fn drain(&mut self) -> Vec<OutputMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Take the data events available right now
    pub fn drain_data(&mut self) -> Vec<StreamEvent> {
        self.drain().into_iter().filter_map(OutputMessage::into_data).collect()
    }
}

/// Receiving end of an input's disorder diagnostics
#[derive(Debug)]
pub struct DiagnosticReceiver {
    receiver: mpsc::UnboundedReceiver<DisorderDiagnostic>,
}

impl DiagnosticReceiver {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<DisorderDiagnostic>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<DisorderDiagnostic> {
        self.receiver.recv().await
    }

    pub fn drain(&mut self) -> Vec<DisorderDiagnostic> {
        let mut diagnostics = Vec::new();
        while let Ok(diagnostic) = self.receiver.try_recv() {
            diagnostics.push(diagnostic);
        }
        diagnostics
    }
}

/// Sending end of a registered output, owned by the container
#[derive(Debug, Clone)]
pub(crate) struct OutputSink {
    node: NodeId,
    sender: mpsc::UnboundedSender<OutputMessage>,
    /// Inputs that must complete before the output completes
    ancestors: BTreeSet<NodeId>,
    punctuation: i64,
    closed: bool,
}

impl OutputSink {
    pub fn new(node: NodeId, sender: mpsc::UnboundedSender<OutputMessage>, ancestors: BTreeSet<NodeId>) -> Self {
        Self {
            node,
            sender,
            ancestors,
            punctuation: MIN_TIME,
            closed: false,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn send(&self, message: OutputMessage) {
        if self.sender.send(message).is_err() {
            trace!(node = self.node, "output receiver dropped");
        }
    }

    /// Deliver data events; returns how many were sent
    pub fn deliver_events(&self, events: Vec<StreamEvent>) -> u64 {
        if self.closed {
            return 0;
        }
        let count = events.len() as u64;
        for event in events {
            self.send(OutputMessage::Event(event));
        }
        count
    }

    /// Forward an advancing punctuation; end of stream is reported by
    /// completion instead
    pub fn deliver_punctuation(&mut self, time: i64) {
        if self.closed || time <= self.punctuation || time == INFINITY {
            return;
        }
        self.punctuation = time;
        self.send(OutputMessage::Event(StreamEvent::punctuation(time)));
    }

    /// Complete the output once all its inputs are in `completed`
    pub fn complete_if_ready(&mut self, completed: &BTreeSet<NodeId>) {
        if !self.closed && self.ancestors.is_subset(completed) {
            self.closed = true;
            self.send(OutputMessage::Completed);
        }
    }

    pub fn fault(&mut self, error: &ProcessorError) {
        if !self.closed {
            self.closed = true;
            self.send(OutputMessage::Faulted(error.clone()));
        }
    }
}
