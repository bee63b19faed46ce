//! `generate_clusters`: a content-generation handler
//!
//! Payload shape: `{"count": u32, "delay_ms": u64, "fail_rate": f64}`.
//! Generates `count` clusters one at a time, logging each as an artifact
//! before it becomes visible in the content repository and advancing
//! progress as it goes. `fail_rate` injects a transient failure partway
//! through, for exercising the runner's retry path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use crate::content::ContentRepository;
use crate::content_log::ContentAction;
use crate::registry::{HandlerError, TaskHandler, TaskReporter};
use crate::task::Task;

#[derive(Debug, Deserialize)]
struct Payload {
    count: u32,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    fail_rate: f64,
}

pub struct GenerateClustersHandler {
    content: Arc<dyn ContentRepository>,
}

impl GenerateClustersHandler {
    pub fn new(content: Arc<dyn ContentRepository>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl TaskHandler for GenerateClustersHandler {
    async fn run(&self, task: &Task, reporter: &TaskReporter) -> Result<(), HandlerError> {
        let payload: Payload = serde_json::from_value(task.payload.clone())
            .context("invalid generate_clusters payload")?;

        for i in 0..payload.count {
            if payload.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(payload.delay_ms)).await;
            }
            if payload.fail_rate > 0.0 && rand::thread_rng().gen::<f64>() < payload.fail_rate {
                return Err(anyhow!("simulated cluster generation failure at item {i}").into());
            }

            let entity_id = format!("{}-{i}", task.id);
            self.content
                .create_entity("cluster", &entity_id, serde_json::json!({ "index": i }))
                .await
                .map_err(|e| anyhow!(e.to_string()))?;
            reporter
                .log_artifact("cluster", &entity_id, ContentAction::Created, None)
                .await;
            reporter
                .update_progress(i as i32 + 1, payload.count as i32, None)
                .await;
        }

        Ok(())
    }
}
