use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    domain::ChatId,
    memory::Checkpointer,
    pipeline::state::{GraphInput, GraphState},
    Result,
};

/// One step of the response graph.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: GraphState) -> Result<GraphState>;
}

/// Fixed linear sequence of nodes with per-thread checkpointing.
pub struct Graph {
    nodes: Vec<Arc<dyn Node>>,
    checkpointer: Arc<dyn Checkpointer>,
}

impl Graph {
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            nodes: Vec::new(),
            checkpointer,
        }
    }

    pub fn then(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    /// Runs every node in order; the thread is saved only when all of them succeed.
    pub async fn invoke(&self, input: GraphInput) -> Result<GraphState> {
        let thread_id = input.chat_id.0.to_string();
        let saved = self.checkpointer.load(&thread_id).await?;
        let mut state = GraphState::new(input, saved);

        let started = Instant::now();
        for node in &self.nodes {
            let t = Instant::now();
            state = node.run(state).await?;
            debug!(
                node = node.name(),
                elapsed_ms = t.elapsed().as_millis() as u64,
                "node finished"
            );
        }

        self.checkpointer
            .save(&thread_id, &state.to_thread_state())
            .await?;
        info!(
            thread_id,
            replies = state.formatted_output.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "graph run complete"
        );
        Ok(state)
    }

    pub async fn reset(&self, chat_id: ChatId) -> Result<()> {
        self.checkpointer.reset_thread(&chat_id.0.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::Reply,
        errors::Error,
        memory::InMemoryCheckpointer,
        model::ChatMessage,
        pipeline::input_digest::InputDigest,
    };

    struct Echo;

    #[async_trait]
    impl Node for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, mut state: GraphState) -> Result<GraphState> {
            let answer = format!("eco: {}", state.chat_input);
            state.messages_history.push(ChatMessage::assistant(&answer));
            state.formatted_output = vec![Reply::text(answer)];
            Ok(state)
        }
    }

    struct Fails;

    #[async_trait]
    impl Node for Fails {
        fn name(&self) -> &'static str {
            "fails"
        }

        async fn run(&self, _state: GraphState) -> Result<GraphState> {
            Err(Error::External("boom".into()))
        }
    }

    #[tokio::test]
    async fn history_accumulates_across_runs() {
        let cp = Arc::new(InMemoryCheckpointer::new());
        let graph = Graph::new(cp.clone())
            .then(Arc::new(InputDigest::new(10)))
            .then(Arc::new(Echo));
        assert_eq!(graph.node_names(), vec!["input_digest", "echo"]);

        graph.invoke(GraphInput::new(ChatId(5), "um")).await.unwrap();
        let out = graph.invoke(GraphInput::new(ChatId(5), "dois")).await.unwrap();
        assert_eq!(out.formatted_output, vec![Reply::text("eco: dois")]);
        assert_eq!(out.messages_history.len(), 4);

        graph.reset(ChatId(5)).await.unwrap();
        assert!(cp.load("5").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_run_is_not_saved() {
        let cp = Arc::new(InMemoryCheckpointer::new());
        let graph = Graph::new(cp.clone())
            .then(Arc::new(InputDigest::new(10)))
            .then(Arc::new(Fails));
        assert!(graph.invoke(GraphInput::new(ChatId(9), "oi")).await.is_err());
        assert!(cp.load("9").await.unwrap().is_none());
    }
}
