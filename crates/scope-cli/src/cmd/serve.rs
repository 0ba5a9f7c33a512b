use std::path::Path;

use anyhow::Result;
use scope_core::Agent;

use crate::cmd::config;
use crate::instrument;

pub fn run(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = config::load(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    let agent = Agent::new(instrument::registry()?, config.clone());
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
        let actual_port = listener.local_addr()?.port();
        println!(
            "scopehub serving {} actions on http://localhost:{actual_port}",
            agent.registry().len()
        );

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        };
        scope_server::serve_on(agent, listener, shutdown).await
    })
}
