//! Nodeflow exit adapter - main entry point.
//!
//! Consumes the outputs of every pipeline node and forwards what must reach
//! the external caller to its output subject. Runs until SIGINT/SIGTERM.

use nodeflow::{exitpoint, runtime::NodeBuilder, Config, Error};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    nodeflow::observability::init_tracing();

    let config = Config::from_env()?;
    let last_node = config
        .last_node
        .clone()
        .ok_or_else(|| Error::config("missing NODEFLOW_LAST_NODE"))?;

    tracing::info!(
        node_id = %config.node_id,
        last_node = %last_node,
        "Exit adapter starting"
    );

    let node = NodeBuilder::new(config)
        .handlers(exitpoint::handlers(&last_node)?)
        .accept_terminal(true)
        .connect()
        .await?;

    node.run_until_signal().await?;
    tracing::info!("Exit adapter stopped");
    Ok(())
}
