//! # Event Handler
//!
//! The single writer in the single-writer/many-reader concurrency model:
//! one `tokio::task` that drains [`CacheNotification`]s from the
//! Object Cache, coalesces bursts behind a hold-down timer, and on each
//! fired cycle runs DAG Builder → Translator → the five Resource Caches'
//! `publish_all`, then reconciles status back through a [`StatusSink`].
//!
//! A panic inside the DAG build is caught at this boundary so one bad
//! rebuild cannot corrupt the previous, still-serving DAG or resource
//! caches.

use crate::cache::{CacheNotification, ObjectCache};
use crate::dag::{self, model::Dag, BuilderConfig};
use crate::status_writer::{self, StatusSink};
use crate::translator::{self, TranslatorConfig};
use crate::xds::cache::XdsCaches;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info};

/// One worker implementing the coalescing rebuild loop.
pub struct EventHandler {
    object_cache: Arc<ObjectCache>,
    builder_config: BuilderConfig,
    translator_config: TranslatorConfig,
    xds_caches: Arc<XdsCaches>,
    dag: Arc<ArcSwap<Dag>>,
    status_sink: Arc<dyn StatusSink>,
    hold_down: Duration,
}

impl EventHandler {
    /// Builds the handler plus a shared handle onto its published DAG, so
    /// other parts of the process (e.g. an admin/debug surface) can read
    /// the latest build without owning the handler itself.
    pub fn new(
        object_cache: Arc<ObjectCache>,
        builder_config: BuilderConfig,
        translator_config: TranslatorConfig,
        xds_caches: Arc<XdsCaches>,
        status_sink: Arc<dyn StatusSink>,
        hold_down: Duration,
    ) -> (Self, Arc<ArcSwap<Dag>>) {
        let dag = Arc::new(ArcSwap::from_pointee(Dag::default()));
        let handle = dag.clone();
        (Self { object_cache, builder_config, translator_config, xds_caches, dag, status_sink, hold_down }, handle)
    }

    /// Runs until `notifications` is closed. Consumes `self` since there is
    /// exactly one writer for the lifetime of the process.
    pub async fn run(self, mut notifications: mpsc::Receiver<CacheNotification>) {
        loop {
            if notifications.recv().await.is_none() {
                info!("object cache channel closed, stopping event handler");
                return;
            }

            // Hold-down: wait out `hold_down`, but a fresh notification
            // arriving mid-wait restarts the clock, coalescing bursts into
            // one rebuild.
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.hold_down) => break,
                    more = notifications.recv() => {
                        if more.is_none() {
                            break;
                        }
                    }
                }
            }

            self.run_cycle().await;
        }
    }

    async fn run_cycle(&self) {
        let started = Instant::now();
        let snapshot = self.object_cache.snapshot();
        let builder_config = &self.builder_config;

        let build_result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dag::build(&snapshot, builder_config)));

        let outcome = match build_result {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("DAG build panicked; keeping the previously published DAG and resource caches");
                return;
            }
        };

        let dag = outcome.dag;
        self.publish(&dag);
        status_writer::reconcile(&dag, self.status_sink.as_ref()).await;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            virtual_hosts = dag.virtual_hosts.len(),
            clusters = dag.clusters.len(),
            statuses = dag.statuses.len(),
            "rebuild cycle complete"
        );

        self.dag.store(Arc::new(dag));
    }

    fn publish(&self, dag: &Dag) {
        self.xds_caches.publish_all(
            translator::build_listeners(dag, &self.translator_config),
            translator::build_routes(dag),
            translator::build_clusters(dag),
            translator::build_endpoints(dag),
            translator::build_secrets(dag),
        );
    }
}
