//! Scriptable in-memory chain used by unit tests across the crate.

use super::{BlockSummary, ChainClient, RpcError};
use alloy::rpc::types::{Filter, Log, Transaction, TransactionReceipt};
use alloy_primitives::{Address, B256, Bytes, LogData, U256};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

type BlockNumberFn = dyn Fn(usize) -> BoxFuture<'static, Result<u64, RpcError>> + Send + Sync;
type BlocksFn = dyn Fn(u64) -> Result<Option<BlockSummary>, RpcError> + Send + Sync;
type LogsFn = dyn Fn(&Filter) -> Result<Vec<Log>, RpcError> + Send + Sync;
type TracesFn = dyn Fn(u64, u64) -> Result<Vec<Value>, RpcError> + Send + Sync;
type CallFn = dyn Fn(Address, &Bytes) -> Result<Bytes, RpcError> + Send + Sync;

pub(crate) struct StubChain {
    head: u64,
    block_number: Box<BlockNumberFn>,
    blocks: Box<BlocksFn>,
    logs: Box<LogsFn>,
    traces: Box<TracesFn>,
    calls: Box<CallFn>,
    block_number_calls: AtomicUsize,
    block_calls: AtomicUsize,
    log_calls: AtomicUsize,
    call_calls: AtomicUsize,
    log_filters: Mutex<Vec<Filter>>,
}

impl StubChain {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            block_number: Box::new(move |_| async move { Ok(head) }.boxed()),
            blocks: Box::new(move |number| Ok((number <= head).then(|| synthetic_block(number)))),
            logs: Box::new(|_| Ok(Vec::new())),
            traces: Box::new(|_, _| Ok(Vec::new())),
            calls: Box::new(|_, _| Err(RpcError::Transport("execution reverted".into()))),
            block_number_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
            log_calls: AtomicUsize::new(0),
            call_calls: AtomicUsize::new(0),
            log_filters: Mutex::new(Vec::new()),
        }
    }

    /// Scripts `eth_blockNumber`; the closure receives the zero-based call index.
    pub fn with_block_number(
        mut self,
        f: impl Fn(usize) -> BoxFuture<'static, Result<u64, RpcError>> + Send + Sync + 'static,
    ) -> Self {
        self.block_number = Box::new(f);
        self
    }

    /// Scripts `eth_getBlockByNumber`.
    pub fn with_blocks(
        mut self,
        f: impl Fn(u64) -> Result<Option<BlockSummary>, RpcError> + Send + Sync + 'static,
    ) -> Self {
        self.blocks = Box::new(f);
        self
    }

    pub fn with_logs(
        mut self,
        f: impl Fn(&Filter) -> Result<Vec<Log>, RpcError> + Send + Sync + 'static,
    ) -> Self {
        self.logs = Box::new(f);
        self
    }

    pub fn with_traces(
        mut self,
        f: impl Fn(u64, u64) -> Result<Vec<Value>, RpcError> + Send + Sync + 'static,
    ) -> Self {
        self.traces = Box::new(f);
        self
    }

    pub fn with_calls(
        mut self,
        f: impl Fn(Address, &Bytes) -> Result<Bytes, RpcError> + Send + Sync + 'static,
    ) -> Self {
        self.calls = Box::new(f);
        self
    }

    pub fn block_number_calls(&self) -> usize {
        self.block_number_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    pub fn call_calls(&self) -> usize {
        self.call_calls.load(Ordering::SeqCst)
    }

    pub fn log_filters(&self) -> Vec<Filter> {
        self.log_filters.lock().unwrap().clone()
    }
}

pub(crate) fn block_timestamp(number: u64) -> u64 {
    GENESIS_TIMESTAMP + number * 12
}

fn synthetic_block(number: u64) -> BlockSummary {
    BlockSummary {
        number,
        hash: B256::left_padding_from(&number.to_be_bytes()),
        timestamp: block_timestamp(number),
    }
}

/// A log at `block`, in a transaction whose hash is derived from the block.
pub(crate) fn log_at(
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block: u64,
    log_index: u64,
) -> Log {
    Log {
        inner: alloy_primitives::Log {
            address,
            data: LogData::new_unchecked(topics, data),
        },
        block_hash: Some(synthetic_block(block).hash),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(tx_hash(block)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

pub(crate) fn tx_hash(seed: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xee;
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    B256::from(bytes)
}

#[async_trait::async_trait]
impl ChainClient for StubChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let attempt = self.block_number_calls.fetch_add(1, Ordering::SeqCst);
        (self.block_number)(attempt).await
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockSummary>, RpcError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        (self.blocks)(number)
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<BlockSummary>, RpcError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let number = u64::from_be_bytes(hash[24..].try_into().unwrap_or_default());
        Ok((synthetic_block(number).hash == hash && number <= self.head)
            .then(|| synthetic_block(number)))
    }

    async fn trace_filter(
        &self,
        from_block: u64,
        to_block: u64,
        _to_addresses: &[Address],
    ) -> Result<Vec<Value>, RpcError> {
        (self.traces)(from_block, to_block)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        self.log_filters.lock().unwrap().push(filter.clone());
        (self.logs)(filter)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.call_calls.fetch_add(1, Ordering::SeqCst);
        (self.calls)(to, &data)
    }

    async fn balance(&self, _address: Address) -> Result<U256, RpcError> {
        Ok(U256::ZERO)
    }

    async fn transaction_by_hash(&self, _hash: B256) -> Result<Option<Transaction>, RpcError> {
        Ok(None)
    }

    async fn transaction_receipt(
        &self,
        _hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        Ok(None)
    }
}
