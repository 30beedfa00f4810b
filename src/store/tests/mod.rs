use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use super::*;
use crate::types::{
    AgentConfig, ConversationSnapshot, Experiment, ExperimentStatus, ExperimentTask, Message,
    NewExperiment,
};

mod experiments;

/// Helper to create a store rooted in a fresh temp directory
fn test_store() -> (FileStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path()).unwrap();
    (store, temp_dir)
}

fn agents() -> Vec<AgentConfig> {
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

/// A pending experiment with a distinct created_at offset (minutes ago),
/// so listing order is deterministic
fn sample_experiment(title: &str, minutes_ago: i64) -> Experiment {
    let mut experiment = NewExperiment {
        title: Some(title.to_string()),
        task: ExperimentTask {
            prompt: format!("prompt for {title}"),
            dataset: vec![],
        },
        agents: agents(),
        iterations: Some(2),
    }
    .into_experiment()
    .unwrap();
    experiment.created_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    experiment
}

fn sample_message(agent: &str) -> Message {
    Message {
        agent: agent.to_string(),
        content: format!("{agent} speaks"),
        model: "llama3.2".into(),
        timestamp: Utc::now(),
    }
}

fn sample_snapshot(experiment: &Experiment, iteration: u32) -> ConversationSnapshot {
    ConversationSnapshot {
        id: ConversationSnapshot::composite_id(&experiment.id, iteration),
        experiment_id: experiment.id.clone(),
        iteration,
        title: format!("{} — iteration {iteration}", experiment.title),
        agents: experiment.agents.clone(),
        messages: vec![sample_message("optimist"), sample_message("skeptic")],
        created_at: Utc::now(),
    }
}
