use std::sync::Arc;
use std::time::Duration;

use super::test_helpers::*;
use super::*;

mod manager;

/// Poll the store until the persisted experiment reaches a terminal status
async fn wait_for_terminal_on_disk(
    store: &crate::store::FileStore,
    id: &ExperimentId,
) -> Experiment {
    for _ in 0..250 {
        if let Ok(experiment) = store.get_experiment(id)
            && experiment.status.is_terminal()
        {
            return experiment;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("experiment {id} never reached a terminal status on disk");
}
