use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use scope_core::{Agent, AssignationStatus, Event};

use crate::cmd::config;
use crate::instrument;
use crate::output::print_json;

/// Run one action in-process and follow it to completion.
pub fn run(
    config_path: Option<&Path>,
    action: &str,
    args: Option<&str>,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let args: serde_json::Value = match args {
        Some(raw) => serde_json::from_str(raw).context("--args must be a JSON object")?,
        None => serde_json::Value::Null,
    };
    let config = config::load(config_path)?;
    let agent = Agent::new(instrument::registry()?, config);

    let rt = tokio::runtime::Runtime::new()?;
    let finished = rt.block_on(async {
        let mut events = agent.subscribe().await;
        let submitted = match timeout_ms {
            Some(ms) => {
                agent
                    .assign_with_deadline(action, args, None, Duration::from_millis(ms))
                    .await?
            }
            None => agent.assign(action, args, None).await?,
        };
        let id = submitted.id;

        let interrupted = tokio::select! {
            res = follow(&mut events, id, json) => {
                res?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            agent.cancel(id).await?;
            follow(&mut events, id, json).await?;
        }
        agent.shutdown().await;
        Ok::<_, anyhow::Error>(agent.get(id).await?)
    })?;

    if json {
        print_json(&finished)?;
    } else if let Some(result) = &finished.result {
        println!("{}", serde_json::to_string_pretty(result)?);
    }

    match finished.status {
        AssignationStatus::Done => Ok(()),
        AssignationStatus::Error => Err(anyhow!(
            "{action} failed: {}",
            finished.error.as_deref().unwrap_or("unknown error")
        )),
        status => Err(anyhow!("{action} ended {status}")),
    }
}

/// Print events for `id` until its terminal event. Quiet under `--json`.
async fn follow(
    events: &mut scope_core::broadcast::Subscription,
    id: uuid::Uuid,
    json: bool,
) -> Result<()> {
    while let Some(event) = events.recv().await {
        if event.assignation_id() != Some(id) {
            continue;
        }
        if !json {
            match &event {
                Event::AssignationProgress {
                    progress, message, ..
                } => eprintln!("{progress:>3}% {}", message.as_deref().unwrap_or("")),
                Event::AssignationLog { level, message, .. } => {
                    eprintln!("[{level:?}] {message}")
                }
                Event::AssignationYield { index, value, .. } => println!("#{index} {value}"),
                _ => {}
            }
        }
        if event.is_terminal() {
            return Ok(());
        }
    }
    Err(anyhow!("event stream closed before {id} finished"))
}
