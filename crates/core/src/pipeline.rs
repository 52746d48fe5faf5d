//! Wires the reader, assembler, sink and broadcaster together and owns their
//! tasks for the lifetime of a run.

use crate::assembler::{BlockAssembler, ContractAbis};
use crate::error::IndexerError;
use crate::evm::NativeEvmHandler;
use crate::hasher::HashMode;
use crate::monitor::PipelineMonitor;
use crate::rpc::ChainRpc;
use crate::ship::ShipClient;
use crate::sink::{BlockSink, ElasticSink};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tevm_indexer_broadcast::BroadcastServer;
use tevm_indexer_config::IndexerConfig;
use tevm_indexer_types::IndexerCheckpoint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Pipeline {
    monitor: PipelineMonitor,
    sink: Arc<dyn BlockSink>,
    client_task: JoinHandle<Result<(), IndexerError>>,
    assembler_task: JoinHandle<Result<(), IndexerError>>,
    broadcast_task: JoinHandle<anyhow::Result<()>>,
}

impl Pipeline {
    /// Validates the environment, resolves the resume point from the sink,
    /// and spawns every component task.
    pub async fn bootstrap(config: IndexerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let rpc = ChainRpc::new(config.endpoint.clone());
        rpc.assert_chain_id(&config.chain_id).await?;
        let abis = ContractAbis::load(&rpc)
            .await
            .context("failed to load contract schemas")?;

        let sink: Arc<dyn BlockSink> =
            Arc::new(ElasticSink::new(config.elastic.clone(), &config.chain_name));
        sink.init().await?;
        if let Some(checkpoint) = sink.get_indexer_state().await? {
            tracing::info!(
                state = %checkpoint.state,
                last_indexed_block = checkpoint.last_indexed_block,
                "found previous run state"
            );
        }
        let resume = sink.get_last_indexed_block().await?;
        let start_block = match &resume {
            Some(last) if last.block_num >= config.start_block => {
                tracing::info!(
                    last_indexed = last.block_num,
                    "resuming from the sink's last indexed block"
                );
                last.block_num + 1
            }
            _ => config.start_block,
        };

        let monitor = PipelineMonitor::new();
        let (server, publisher) = BroadcastServer::new(config.broadcast.clone());
        let broadcast_task = tokio::spawn(server.run());

        let (sender, receiver) = mpsc::channel(config.perf.concurrency_amount.max(1));
        let mut assembler = BlockAssembler::new(
            receiver,
            Arc::clone(&sink),
            Arc::new(NativeEvmHandler),
            abis,
            monitor.clone(),
            Some(publisher),
            HashMode::from_debug_flag(config.debug),
            config.debug,
        );
        if let Some(last) = &resume {
            assembler = assembler.with_resume_point(last.block_num);
        }
        let assembler_task = tokio::spawn(assembler.run());

        let client = ShipClient::new(&config, start_block, monitor.clone(), sender);
        let client_task = tokio::spawn(client.run());

        Ok(Self {
            monitor,
            sink,
            client_task,
            assembler_task,
            broadcast_task,
        })
    }

    pub fn monitor(&self) -> &PipelineMonitor {
        &self.monitor
    }

    /// Runs until the requested range completes or a component fails.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        tokio::select! {
            result = &mut self.client_task => {
                result.context("reader task panicked")??;
                // Reader is done; its sender is dropped, so the assembler
                // drains the channel and stops on its own.
                (&mut self.assembler_task)
                    .await
                    .context("assembler task panicked")??;
            }
            result = &mut self.assembler_task => {
                result.context("assembler task panicked")??;
                self.client_task.abort();
            }
            result = &mut self.broadcast_task => {
                result.context("broadcast task panicked")??;
                anyhow::bail!("broadcast server stopped unexpectedly");
            }
        }
        Ok(())
    }

    /// Persists the run state and tears the tasks down. Called on SIGINT;
    /// in-flight work is abandoned and covered by the sink's idempotence.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let checkpoint = IndexerCheckpoint {
            state: self.monitor.state(),
            last_indexed_block: self.monitor.last_ordered_block(),
            timestamp: Utc::now(),
        };
        tracing::info!(
            last_indexed_block = checkpoint.last_indexed_block,
            state = %checkpoint.state,
            "persisting indexer state"
        );
        self.sink
            .index_state(&checkpoint)
            .await
            .context("failed to persist indexer state")?;
        self.client_task.abort();
        self.assembler_task.abort();
        self.broadcast_task.abort();
        Ok(())
    }
}
