//! Shared fixtures for experiment tests: scripted producers and a manager
//! factory over a temp-dir store

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ExperimentManager;
use crate::config::ExperimentsConfig;
use crate::error::{Error, Result};
use crate::producer::{ConversationProducer, EventSink, ProducerEvent};
use crate::store::FileStore;
use crate::types::{AgentConfig, ExperimentTask, NewExperiment, StreamFrame};

/// Emits one message per agent per pass; the well-behaved baseline
pub(crate) struct ScriptedProducer;

impl ConversationProducer for ScriptedProducer {
    fn run(
        &self,
        agents: &[AgentConfig],
        prompt: &str,
        emit: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for agent in agents {
            if cancel.is_cancelled() {
                return Ok(());
            }
            emit(ProducerEvent {
                agent: agent.name.clone(),
                content: format!("{}: {prompt}", agent.name),
                model: agent.model.clone(),
            });
        }
        Ok(())
    }
}

/// Emits one message, then fails
pub(crate) struct FailingProducer;

impl ConversationProducer for FailingProducer {
    fn run(
        &self,
        agents: &[AgentConfig],
        _prompt: &str,
        emit: EventSink<'_>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(agent) = agents.first() {
            emit(ProducerEvent {
                agent: agent.name.clone(),
                content: "about to fail".to_string(),
                model: agent.model.clone(),
            });
        }
        Err(Error::Other("conversation engine exploded".to_string()))
    }
}

/// Blocks until cancelled; the stuck-worker case for watchdog tests
pub(crate) struct HangingProducer;

impl ConversationProducer for HangingProducer {
    fn run(
        &self,
        _agents: &[AgentConfig],
        _prompt: &str,
        _emit: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }
}

/// Panics mid-conversation
pub(crate) struct PanickingProducer;

impl ConversationProducer for PanickingProducer {
    fn run(
        &self,
        _agents: &[AgentConfig],
        _prompt: &str,
        _emit: EventSink<'_>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        panic!("producer blew up");
    }
}

/// Emits one message per agent with a pause between agents, so tests can
/// cancel mid-conversation
pub(crate) struct SlowProducer;

impl ConversationProducer for SlowProducer {
    fn run(
        &self,
        agents: &[AgentConfig],
        prompt: &str,
        emit: EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for agent in agents {
            if cancel.is_cancelled() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(50));
            emit(ProducerEvent {
                agent: agent.name.clone(),
                content: format!("{}: {prompt}", agent.name),
                model: agent.model.clone(),
            });
        }
        Ok(())
    }
}

pub(crate) fn test_manager(
    producer: Arc<dyn ConversationProducer>,
    config: ExperimentsConfig,
) -> (ExperimentManager, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path()).unwrap();
    (ExperimentManager::new(store, producer, config), temp_dir)
}

pub(crate) fn two_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig {
            name: "optimist".into(),
            color: Some("#81b29a".into()),
            model: "llama3.2".into(),
        },
        AgentConfig {
            name: "skeptic".into(),
            color: None,
            model: "mistral".into(),
        },
    ]
}

pub(crate) fn request(iterations: u32) -> NewExperiment {
    NewExperiment {
        title: Some("test run".into()),
        task: ExperimentTask {
            prompt: "discuss".into(),
            dataset: vec![],
        },
        agents: two_agents(),
        iterations: Some(iterations),
    }
}

/// Drain the stream until (and including) the terminal frame
pub(crate) async fn collect_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<StreamFrame>,
) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(frame)) => {
                let terminal = frame.is_terminal();
                frames.push(frame);
                if terminal {
                    return frames;
                }
            }
            Ok(None) => return frames,
            Err(_) => panic!("stream stalled before a terminal frame arrived"),
        }
    }
}

/// After the terminal frame, nothing further may claim to be terminal
pub(crate) async fn assert_no_further_terminal(rx: &mut mpsc::UnboundedReceiver<StreamFrame>) {
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_millis(300), rx.recv()).await
    {
        assert!(
            !frame.is_terminal(),
            "a second terminal frame leaked: {frame:?}"
        );
    }
}
