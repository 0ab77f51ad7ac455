//! Node process loop.
//!
//! One durable, queue-grouped subscription per input subject feeds the
//! message runner; each delivery is processed on its own task. Shutdown
//! stops intake on every subscription but does not wait for handlers that
//! are still running.

use futures::future::{join_all, BoxFuture};
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{Documents, Handler, HandlerManager, MessageRunner, NodeContext, OutputPublisher};
use crate::commbus::nats::NatsBus;
use crate::commbus::{consumer_name, DeliveryStream, MessageBus};
use crate::metrics::{sink_from_config, Measurement, MetricsSink};
use crate::storage::nats::{NatsKeyValue, NatsObjectBucket};
use crate::storage::{ObjectStore, ScopedConfig};
use crate::types::{Config, Result};

/// Start-up or shut-down hook.
pub type Hook = Box<dyn FnOnce(Arc<NodeContext>) -> BoxFuture<'static, Result<()>> + Send>;

/// Backends a node runs on.
pub struct Services {
    pub bus: Arc<dyn MessageBus>,
    pub configuration: ScopedConfig,
    pub objects: ObjectStore,
    pub metrics: Arc<dyn MetricsSink>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("configuration", &self.configuration)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

pub struct NodeBuilder {
    config: Config,
    handlers: HandlerManager,
    preprocessor: Option<Arc<dyn Handler>>,
    postprocessor: Option<Arc<dyn Handler>>,
    initializer: Option<Hook>,
    finalizer: Option<Hook>,
    accept_terminal: bool,
}

impl fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("node_id", &self.config.node_id)
            .field("handlers", &self.handlers)
            .field("accept_terminal", &self.accept_terminal)
            .finish_non_exhaustive()
    }
}

fn boxed_hook<F, Fut>(f: F) -> Hook
where
    F: FnOnce(Arc<NodeContext>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |ctx| f(ctx).boxed())
}

impl NodeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            handlers: HandlerManager::new(),
            preprocessor: None,
            postprocessor: None,
            initializer: None,
            finalizer: None,
            accept_terminal: false,
        }
    }

    pub fn handlers(mut self, handlers: HandlerManager) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn preprocessor(mut self, handler: Arc<dyn Handler>) -> Self {
        self.preprocessor = Some(handler);
        self
    }

    pub fn postprocessor(mut self, handler: Arc<dyn Handler>) -> Self {
        self.postprocessor = Some(handler);
        self
    }

    /// Run once before intake starts; a failure aborts `Node::run`.
    pub fn initializer<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(Arc<NodeContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.initializer = Some(boxed_hook(f));
        self
    }

    /// Run once after intake stops.
    pub fn finalizer<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(Arc<NodeContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.finalizer = Some(boxed_hook(f));
        self
    }

    /// Deliver `ERROR` and `EARLY_EXIT` envelopes to handlers too.
    pub fn accept_terminal(mut self, accept: bool) -> Self {
        self.accept_terminal = accept;
        self
    }

    /// Assemble the node on explicit backends.
    pub fn build(self, services: Services) -> Result<Node> {
        self.config.validate()?;
        if self.handlers.is_empty() {
            tracing::warn!(node_id = %self.config.node_id, "Node has no handlers registered");
        }

        let config = Arc::new(self.config);
        let context = Arc::new(NodeContext {
            publisher: OutputPublisher::new(services.bus.clone(), &config),
            configuration: services.configuration,
            objects: services.objects,
            measurement: Measurement::new(services.metrics, &config),
            documents: Documents::new(services.bus.clone(), &config),
            config,
        });

        let mut runner = MessageRunner::new(context, Arc::new(self.handlers))
            .accept_terminal(self.accept_terminal);
        if let Some(pre) = self.preprocessor {
            runner = runner.with_preprocessor(pre);
        }
        if let Some(post) = self.postprocessor {
            runner = runner.with_postprocessor(post);
        }

        Ok(Node {
            runner,
            bus: services.bus,
            initializer: self.initializer,
            finalizer: self.finalizer,
            shutdown: CancellationToken::new(),
        })
    }

    /// Connect to NATS and open every configured bucket.
    ///
    /// Any connectivity failure here is fatal for the process.
    pub async fn connect(self) -> Result<Node> {
        self.config.validate()?;
        let bus = NatsBus::connect(&self.config).await?;
        let jetstream = bus.jetstream();
        let storage = &self.config.storage;

        let configuration = ScopedConfig::new(
            Arc::new(NatsKeyValue::open(jetstream, &storage.kv_node).await?),
            Arc::new(NatsKeyValue::open(jetstream, &storage.kv_workflow).await?),
            Arc::new(NatsKeyValue::open(jetstream, &storage.kv_project).await?),
        );

        let objects = match &storage.object_store {
            Some(bucket) => ObjectStore::new(Arc::new(NatsObjectBucket::open(jetstream, bucket).await?)),
            None => {
                tracing::info!("No object store configured");
                ObjectStore::undefined()
            }
        };

        let metrics = sink_from_config(&self.config)?;

        self.build(Services {
            bus: Arc::new(bus),
            configuration,
            objects,
            metrics,
        })
    }
}

/// A runnable node process.
pub struct Node {
    runner: MessageRunner,
    bus: Arc<dyn MessageBus>,
    initializer: Option<Hook>,
    finalizer: Option<Hook>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn context(&self) -> &Arc<NodeContext> {
        self.runner.node()
    }

    /// Token that stops intake when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Subscribe to every input subject and process messages until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let context = self.runner.node().clone();
        let node_id = context.config.node_id.clone();

        if let Some(init) = self.initializer.take() {
            init(context.clone()).await?;
        }

        let mut pumps = Vec::new();
        for subject in &context.config.bus.input_subjects {
            let queue_group = consumer_name(subject, &node_id);
            let stream = self.bus.subscribe(subject, &queue_group).await?;
            pumps.push(pump(
                self.runner.clone(),
                stream,
                subject.clone(),
                self.shutdown.clone(),
            ));
        }

        tracing::info!(
            node_id = %node_id,
            subjects = ?context.config.bus.input_subjects,
            output = %context.config.bus.output_subject,
            "Node running"
        );
        join_all(pumps).await;
        tracing::info!(node_id = %node_id, "Intake stopped");

        if let Some(finalize) = self.finalizer.take() {
            finalize(context).await?;
        }
        Ok(())
    }

    /// `run` until SIGINT or SIGTERM.
    pub async fn run_until_signal(self) -> Result<()> {
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown signal received, unsubscribing");
            token.cancel();
        });
        self.run().await
    }
}

async fn pump(
    runner: MessageRunner,
    mut stream: DeliveryStream,
    subject: String,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(delivery) => {
                    let runner = runner.clone();
                    tokio::spawn(async move {
                        runner.process(delivery).await;
                    });
                }
                None => {
                    tracing::warn!(subject = %subject, "Subscription closed");
                    break;
                }
            },
        }
    }
    // dropping the stream unsubscribes
    drop(stream);
    tracing::debug!(subject = %subject, "Unsubscribed");
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commbus::InMemoryBus;
    use crate::envelope::{Envelope, EnvelopeCodec, Payload};
    use crate::metrics::MemorySink;
    use crate::runtime::handler_fn;
    use crate::storage::MemoryBucket;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::{sleep, timeout, Duration};

    fn config() -> Config {
        let mut config = Config {
            node_id: "nodeB".into(),
            ..Config::default()
        };
        config.bus.input_subjects = vec!["pipeline.nodeA".into()];
        config.bus.output_subject = "pipeline.nodeB".into();
        config
    }

    fn services(bus: &InMemoryBus) -> Services {
        Services {
            bus: Arc::new(bus.clone()),
            configuration: ScopedConfig::new(
                Arc::new(MemoryBucket::new()),
                Arc::new(MemoryBucket::new()),
                Arc::new(MemoryBucket::new()),
            ),
            objects: ObjectStore::undefined(),
            metrics: Arc::new(MemorySink::new()),
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut bad = config();
        bad.bus.input_subjects.clear();
        assert!(NodeBuilder::new(bad).build(services(&InMemoryBus::new())).is_err());
    }

    #[tokio::test]
    async fn test_run_processes_until_shutdown() {
        let bus = InMemoryBus::new();
        let finalized = Arc::new(AtomicBool::new(false));
        let finalized_flag = finalized.clone();

        let mut handlers = HandlerManager::new();
        handlers
            .register(
                "nodeA",
                handler_fn(|ctx, payload| async move { ctx.send_output(payload, "").await }),
            )
            .unwrap();

        let node = NodeBuilder::new(config())
            .handlers(handlers)
            .initializer(|ctx| async move { ctx.configuration.set("ready", "yes").await })
            .finalizer(move |_ctx| async move {
                finalized_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .build(services(&bus))
            .unwrap();
        let shutdown = node.shutdown_token();
        let context = node.context().clone();
        let running = tokio::spawn(node.run());

        // wait for the subscription
        let env = Envelope::new("nodeA", Payload::text("hello"));
        let bytes = EnvelopeCodec::default().encode(&env).unwrap();
        timeout(Duration::from_secs(2), async {
            while bus.inject("pipeline.nodeA", Bytes::clone(&bytes)).await == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        timeout(Duration::from_secs(2), async {
            while bus.published_on("pipeline.nodeB").await.is_empty() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(bus.acked(), 1);
        assert_eq!(
            context.configuration.get("ready", None).await.unwrap(),
            "yes"
        );

        shutdown.cancel();
        timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(finalized.load(Ordering::SeqCst));

        // intake stopped: nobody is subscribed any more
        assert_eq!(bus.inject("pipeline.nodeA", bytes).await, 0);
    }
}
