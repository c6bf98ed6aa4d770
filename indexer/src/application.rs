//! Orchestrator: historical backfill and realtime tailing (spec.md §4.4), plus the supplemented
//! retry sweeper (SPEC_FULL.md §10.8).

use crate::{
    config::{Config, RetrySweepConfig},
    decode,
    metrics as app_metrics,
};
use anyhow::Context;
use broadcast_hub::{HubHandle, Message, Topic};
use event_subscriber::{BlockEvent, Subscriber, TransactionResult};
use fastrace::trace;
use indexer_common::domain::{
    Block, DexLiquidity, DexSwap, Event, EventAttribute, IndexingStatus, LiquidityAction,
    OraclePrice, Transaction, TransactionStatus, module_of_event_type,
};
use log::{debug, info, warn};
use rpc_client::domain::TxResult;
use rpc_client::{BlockData, RpcClient};
use serde::Serialize;
use sqlx::types::chrono::{DateTime, Utc};
use store::Storage;
use tokio::{select, signal::unix::Signal, task, time::Instant};

/// Drives the two sequential phases of spec.md §4.4, then hands off to the realtime tailing and
/// retry-sweep tasks until cancelled. Historical and realtime phases are serialized; the
/// realtime loop and the sweeper run concurrently once the historical phase (if any) is done.
pub async fn run<R, S>(
    config: Config,
    rpc: R,
    subscriber: impl Subscriber,
    storage: S,
    hub: HubHandle,
    mut sigterm: Signal,
) -> anyhow::Result<()>
where
    R: RpcClient,
    S: Storage,
{
    if config.enable_historical_indexing {
        select! {
            result = historical_backfill(&config, &rpc, &storage) => {
                result.context("historical backfill failed")?;
            }

            _ = sigterm.recv() => {
                warn!("SIGTERM received during historical backfill");
                return Ok(());
            }
        }
    }

    let mut realtime_task = task::spawn(realtime_tailing(storage.clone(), hub, subscriber));
    let mut sweeper_task = task::spawn(retry_sweep(config.retry_sweep, rpc, storage));

    let result = select! {
        result = &mut realtime_task => {
            sweeper_task.abort();
            result
                .context("realtime tailing task panicked")
                .and_then(|r| r.context("realtime tailing failed"))
        }

        result = &mut sweeper_task => {
            realtime_task.abort();
            result
                .context("retry sweeper task panicked")
                .and_then(|r| r.context("retry sweeper failed"))
        }

        _ = sigterm.recv() => {
            warn!("SIGTERM received, cancelling realtime tailing and retry sweep");
            realtime_task.abort();
            sweeper_task.abort();
            Ok(())
        }
    };

    let _ = tokio::join!(realtime_task, sweeper_task);

    result
}

/// spec.md §4.4.1. Each height is indexed in its own DB transaction (see DESIGN.md for why this
/// departs from a literal one-transaction-per-batch reading): a per-height failure rolls back
/// only that height, is recorded to `failed_blocks`, and the loop continues with the next
/// height in the batch, matching scenario 3's expectation that unaffected heights still commit.
#[trace]
async fn historical_backfill<R: RpcClient, S: Storage>(
    config: &Config,
    rpc: &R,
    storage: &S,
) -> anyhow::Result<()> {
    let status = rpc.get_status().await.context("get chain status")?;
    let tip = status.latest_height;

    let checkpoint = storage
        .get_last_indexed_height()
        .await
        .context("get last indexed height")?;
    let start = config.start_height.max(checkpoint + 1);

    if start > tip {
        info!(start, tip; "checkpoint at or past tip, skipping historical backfill");
        return Ok(());
    }

    storage
        .save_indexing_progress(checkpoint, IndexingStatus::Indexing)
        .await
        .context("mark indexing in progress")?;
    info!(start, tip; "starting historical backfill");

    let mut height = start;
    let mut bps_ewma: Option<f64> = None;

    while height <= tip {
        let batch_end = (height + config.batch_size - 1).min(tip);
        let batch_started_at = Instant::now();

        let batch = match rpc.get_block_batch(height, batch_end).await {
            Ok(batch) => batch,

            Err(error) => {
                warn!(error:%, start = height, end = batch_end; "batch fetch failed, abandoning batch");
                tokio::time::sleep(config.inter_batch_pause).await;
                height = batch_end + 1;
                continue;
            }
        };

        let mut committed = 0i64;
        for (offset, entry) in batch.into_iter().enumerate() {
            let h = height + offset as i64;

            let outcome = match entry {
                Some(block_data) => index_rpc_block(storage, h, block_data).await,
                None => Err(anyhow::anyhow!("block fetch failed")),
            };

            match outcome {
                Ok(()) => {
                    committed += 1;
                    app_metrics::record_block_indexed();
                }

                Err(error) => {
                    warn!(error:%, height = h; "failed to index block, recording as failed");
                    storage
                        .save_failed_block(h, &error.to_string())
                        .await
                        .context("save failed block")?;
                    app_metrics::record_failed_block();
                }
            }
        }

        height = batch_end + 1;

        let elapsed = batch_started_at.elapsed().as_secs_f64();
        let bps = app_metrics::blocks_per_second_ewma(bps_ewma, committed, elapsed);
        bps_ewma = Some(bps);
        let progress = app_metrics::progress_percent(start, tip, batch_end);
        let eta = app_metrics::eta_seconds(tip - batch_end, bps);
        app_metrics::record_progress(progress, bps, eta);

        info!(batch_end, tip, progress, bps, eta; "historical batch committed");

        tokio::time::sleep(config.inter_batch_pause).await;
    }

    storage
        .save_indexing_progress(tip, IndexingStatus::Complete)
        .await
        .context("mark indexing complete")?;
    info!(tip; "historical backfill complete");

    Ok(())
}

/// spec.md §4.4.2. Consumes the subscriber's bounded channel forever; ends only when the
/// subscriber's channel closes (process shutdown).
#[trace]
async fn realtime_tailing<S: Storage>(
    storage: S,
    hub: HubHandle,
    mut subscriber: impl Subscriber,
) -> anyhow::Result<()> {
    info!("starting realtime tailing");

    while let Some(block_event) = subscriber.next().await {
        let height = block_event.height;

        if let Err(error) = index_subscriber_block(&storage, &hub, block_event).await {
            warn!(error:%, height; "failed to index realtime block, recording as failed");
            storage
                .save_failed_block(height, &error.to_string())
                .await
                .context("save failed block")?;
            app_metrics::record_failed_block();
            continue;
        }

        app_metrics::record_block_indexed();
    }

    warn!("subscriber channel closed, realtime tailing ending");
    Ok(())
}

/// SPEC_FULL.md §10.8: periodically re-attempts the lowest-retry-count failed heights, reusing
/// the historical phase's per-block fetch and atomic-write path. Runs alongside realtime
/// tailing, never historical (that phase already owns the fresh end of the chain).
#[trace]
async fn retry_sweep<R: RpcClient, S: Storage>(
    config: RetrySweepConfig,
    rpc: R,
    storage: S,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(config.interval);
    interval.tick().await; // first tick fires immediately; consume it.

    loop {
        interval.tick().await;

        let failed = match storage.get_failed_blocks(config.batch_size).await {
            Ok(failed) => failed,

            Err(error) => {
                warn!(error:%; "retry sweep could not list failed blocks, skipping this sweep");
                continue;
            }
        };

        if failed.is_empty() {
            continue;
        }

        debug!(count = failed.len(); "retry sweep starting");

        for failed_block in failed {
            let height = failed_block.height;

            match rpc.get_block_batch(height, height).await {
                Ok(mut batch) => match batch.pop().flatten() {
                    Some(block_data) => retry_one(&storage, height, block_data).await,

                    None => {
                        warn!(height; "retry fetch returned no data");
                        let _ = storage
                            .save_failed_block(height, "retry fetch returned no data")
                            .await;
                    }
                },

                Err(error) => {
                    warn!(error:%, height; "retry fetch failed");
                    let _ = storage.save_failed_block(height, &error.to_string()).await;
                }
            }
        }
    }
}

async fn retry_one<S: Storage>(storage: &S, height: i64, block_data: BlockData) {
    match index_rpc_block(storage, height, block_data).await {
        Ok(()) => {
            if let Err(error) = storage.delete_failed_block(height).await {
                warn!(error:%, height; "failed to clear retried height from failed_blocks");
            } else {
                info!(height; "retried height indexed successfully");
            }
        }

        Err(error) => {
            warn!(error:%, height; "retry attempt failed again");
            let _ = storage.save_failed_block(height, &error.to_string()).await;
        }
    }
}

/// Indexes one height fetched via RPC (historical phase, retry sweep). No hub broadcast: only
/// the realtime phase notifies connected clients (spec.md §4.4.2 step 5 names broadcasting
/// there and nowhere else).
async fn index_rpc_block<S: Storage>(storage: &S, height: i64, block_data: BlockData) -> anyhow::Result<()> {
    let BlockData {
        block,
        block_results,
    } = block_data;

    let time = decode::parse_time(&block.time);
    let gas_used: i64 = block_results
        .tx_results
        .iter()
        .map(|r| decode::parse_i64_or_zero("gas_used", &r.gas_used))
        .sum();
    let gas_wanted: i64 = block_results
        .tx_results
        .iter()
        .map(|r| decode::parse_i64_or_zero("gas_wanted", &r.gas_wanted))
        .sum();

    let block_row = Block {
        height,
        hash: block.hash.clone(),
        proposer_address: block.proposer_address.clone(),
        time,
        tx_count: block.txs.len() as i32,
        gas_used,
        gas_wanted,
        evidence_count: block.evidence_count,
    };

    let mut db_tx = storage.begin_tx().await.context("begin block transaction")?;
    storage
        .insert_block(&mut db_tx, &block_row)
        .await
        .context("insert block")?;

    for (tx_index, (raw_tx, result)) in block.txs.iter().zip(block_results.tx_results.iter()).enumerate() {
        let hash = decode::tx_hash(raw_tx);
        insert_rpc_transaction(
            storage,
            &mut db_tx,
            height,
            time,
            tx_index as i32,
            &hash,
            raw_tx,
            result,
        )
        .await?;
    }

    storage
        .update_last_indexed_height(&mut db_tx, height)
        .await
        .context("update checkpoint")?;
    storage.commit(db_tx).await.context("commit block transaction")?;

    app_metrics::record_transactions_indexed(block.txs.len() as u64);

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_rpc_transaction<S: Storage>(
    storage: &S,
    db_tx: &mut S::Tx,
    block_height: i64,
    block_time: DateTime<Utc>,
    tx_index: i32,
    hash: &str,
    raw_tx: &str,
    result: &TxResult,
) -> anyhow::Result<()> {
    let envelope = decode::decode_envelope(raw_tx);
    let gas_used = decode::parse_i64_or_zero("gas_used", &result.gas_used);
    let gas_wanted = decode::parse_i64_or_zero("gas_wanted", &result.gas_wanted);
    let events_json = serde_json::to_value(&result.events).unwrap_or(serde_json::Value::Array(Vec::new()));

    let transaction = Transaction {
        hash: hash.to_string(),
        block_height,
        tx_index,
        r#type: envelope.r#type,
        sender: envelope.sender,
        status: TransactionStatus::from_code(result.code),
        code: result.code,
        gas_used,
        gas_wanted,
        fee_amount: envelope.fee_amount,
        fee_denom: envelope.fee_denom,
        raw_log: result.log.clone(),
        time: block_time,
        messages: decode::messages_json(raw_tx),
        events: events_json,
    };

    storage
        .insert_transaction(db_tx, &transaction)
        .await
        .context("insert transaction")?;

    if !transaction.sender.is_empty() {
        storage
            .upsert_account(db_tx, &transaction.sender, block_height)
            .await
            .context("upsert account")?;
    }

    for (event_index, rpc_event) in result.events.iter().enumerate() {
        let domain_event = Event {
            tx_hash: hash.to_string(),
            block_height,
            event_index: event_index as i32,
            event_type: rpc_event.event_type.clone(),
            module: module_of_event_type(&rpc_event.event_type),
            attributes: rpc_event
                .attributes
                .iter()
                .map(|a| EventAttribute {
                    key: a.key.clone(),
                    value: a.value.clone(),
                })
                .collect(),
        };

        storage
            .insert_event(db_tx, &domain_event)
            .await
            .context("insert event")?;

        insert_module_row(storage, db_tx, &domain_event, block_time)
            .await
            .context("insert module row")?;
    }

    Ok(())
}

/// Indexes one pushed block (realtime phase). Broadcasts block/transaction/module-row
/// notifications to the hub after a successful commit.
async fn index_subscriber_block<S: Storage>(
    storage: &S,
    hub: &HubHandle,
    block_event: BlockEvent,
) -> anyhow::Result<()> {
    let time = decode::parse_time(&block_event.time);
    let gas_used: i64 = block_event
        .txs
        .iter()
        .map(|t| decode::parse_i64_or_zero("gas_used", &t.gas_used))
        .sum();
    let gas_wanted: i64 = block_event
        .txs
        .iter()
        .map(|t| decode::parse_i64_or_zero("gas_wanted", &t.gas_wanted))
        .sum();

    let block_row = Block {
        height: block_event.height,
        hash: block_event.hash.clone(),
        proposer_address: block_event.proposer.clone(),
        time,
        tx_count: block_event.txs.len() as i32,
        gas_used,
        gas_wanted,
        evidence_count: 0,
    };

    let mut db_tx = storage.begin_tx().await.context("begin block transaction")?;
    storage
        .insert_block(&mut db_tx, &block_row)
        .await
        .context("insert block")?;

    let mut transactions = Vec::with_capacity(block_event.txs.len());
    let mut module_rows = Vec::new();

    for (tx_index, result) in block_event.txs.iter().enumerate() {
        let (transaction, rows) = insert_subscriber_transaction(
            storage,
            &mut db_tx,
            block_event.height,
            time,
            tx_index as i32,
            result,
        )
        .await?;

        transactions.push(transaction);
        module_rows.extend(rows);
    }

    storage
        .update_last_indexed_height(&mut db_tx, block_event.height)
        .await
        .context("update checkpoint")?;
    storage.commit(db_tx).await.context("commit block transaction")?;

    app_metrics::record_transactions_indexed(block_event.txs.len() as u64);

    broadcast(hub, Topic::Block, &block_row).await;
    for transaction in &transactions {
        broadcast(hub, Topic::Transaction, transaction).await;
    }
    for row in &module_rows {
        row.broadcast(hub).await;
    }

    Ok(())
}

async fn insert_subscriber_transaction<S: Storage>(
    storage: &S,
    db_tx: &mut S::Tx,
    block_height: i64,
    block_time: DateTime<Utc>,
    tx_index: i32,
    result: &TransactionResult,
) -> anyhow::Result<(Transaction, Vec<ModuleRow>)> {
    let envelope = decode::decode_envelope(&result.raw_tx);
    let gas_used = decode::parse_i64_or_zero("gas_used", &result.gas_used);
    let gas_wanted = decode::parse_i64_or_zero("gas_wanted", &result.gas_wanted);
    let events_json = serde_json::to_value(&result.events).unwrap_or(serde_json::Value::Array(Vec::new()));

    let transaction = Transaction {
        hash: result.hash.clone(),
        block_height,
        tx_index,
        r#type: envelope.r#type,
        sender: envelope.sender,
        status: TransactionStatus::from_code(result.code),
        code: result.code,
        gas_used,
        gas_wanted,
        fee_amount: envelope.fee_amount,
        fee_denom: envelope.fee_denom,
        raw_log: result.log.clone(),
        time: block_time,
        messages: decode::messages_json(&result.raw_tx),
        events: events_json,
    };

    storage
        .insert_transaction(db_tx, &transaction)
        .await
        .context("insert transaction")?;

    if !transaction.sender.is_empty() {
        storage
            .upsert_account(db_tx, &transaction.sender, block_height)
            .await
            .context("upsert account")?;
    }

    let mut module_rows = Vec::new();

    for (event_index, event) in result.events.iter().enumerate() {
        let domain_event = Event {
            tx_hash: result.hash.clone(),
            block_height,
            event_index: event_index as i32,
            event_type: event.event_type.clone(),
            module: module_of_event_type(&event.event_type),
            attributes: event
                .attributes
                .iter()
                .map(|a| EventAttribute {
                    key: a.key.clone(),
                    value: a.value.clone(),
                })
                .collect(),
        };

        storage
            .insert_event(db_tx, &domain_event)
            .await
            .context("insert event")?;

        if let Some(row) = insert_module_row(storage, db_tx, &domain_event, block_time)
            .await
            .context("insert module row")?
        {
            module_rows.push(row);
        }
    }

    Ok((transaction, module_rows))
}

/// A persisted module-specific row, kept around after insertion so the realtime phase can
/// broadcast it without re-deriving it from the event.
enum ModuleRow {
    DexSwap(DexSwap),
    DexLiquidity(DexLiquidity),
    OraclePrice(OraclePrice),
}

impl ModuleRow {
    async fn broadcast(&self, hub: &HubHandle) {
        match self {
            ModuleRow::DexSwap(row) => broadcast(hub, Topic::DexSwap, row).await,
            ModuleRow::DexLiquidity(row) => broadcast(hub, Topic::DexLiquidity, row).await,
            ModuleRow::OraclePrice(row) => broadcast(hub, Topic::OraclePrice, row).await,
        }
    }
}

async fn insert_module_row<S: Storage>(
    storage: &S,
    db_tx: &mut S::Tx,
    event: &Event,
    time: DateTime<Utc>,
) -> Result<Option<ModuleRow>, sqlx::Error> {
    match event.event_type.as_str() {
        "swap" => {
            let swap = decode::dex_swap_from_event(event, time);
            storage.insert_dex_swap(db_tx, &swap).await?;
            Ok(Some(ModuleRow::DexSwap(swap)))
        }

        "add_liquidity" => {
            let liquidity = decode::dex_liquidity_from_event(event, LiquidityAction::Add, time);
            storage.insert_dex_liquidity(db_tx, &liquidity).await?;
            Ok(Some(ModuleRow::DexLiquidity(liquidity)))
        }

        "remove_liquidity" => {
            let liquidity = decode::dex_liquidity_from_event(event, LiquidityAction::Remove, time);
            storage.insert_dex_liquidity(db_tx, &liquidity).await?;
            Ok(Some(ModuleRow::DexLiquidity(liquidity)))
        }

        "oracle_price_update" => {
            let price = decode::oracle_price_from_event(event, time);
            storage.insert_oracle_price(db_tx, &price).await?;
            Ok(Some(ModuleRow::OraclePrice(price)))
        }

        _ => Ok(None),
    }
}

async fn broadcast(hub: &HubHandle, topic: Topic, payload: &impl Serialize) {
    match serde_json::to_value(payload) {
        Ok(value) => hub.broadcast(Message::new(topic, value)).await,
        Err(error) => warn!(error:%; "failed to serialize broadcast payload, dropping"),
    }
}
