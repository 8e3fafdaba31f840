use super::{BlockSummary, ChainClient, ErrorClass, RpcError};
use crate::config::RpcConfig;
use alloy::rpc::types::{Filter, Log, Transaction, TransactionReceipt};
use alloy_primitives::{Address, B256, Bytes, U256};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, error, warn};

/// Blocks re-queried when an open-ended `eth_getLogs` is rejected as too wide.
const OPEN_RANGE_LOOKBACK: u64 = 10_000;

/// Wraps a [`ChainClient`] with per-call timeouts, bounded retries of
/// throttled calls, and adaptive `eth_getLogs` range splitting.
#[derive(Clone)]
pub struct RetryingChainClient {
    inner: Arc<dyn ChainClient>,
    policy: RpcConfig,
}

impl RetryingChainClient {
    pub fn new(inner: Arc<dyn ChainClient>, policy: RpcConfig) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RpcConfig {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_tries` attempts have been made. Only throttling and timeouts
    /// are retried; every other error goes back to the caller untouched.
    async fn with_retry<T, F, Fut>(&self, method: &'static str, mut operation: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let max_tries = self.policy.max_tries.max(1);
        let call_timeout = self.policy.call_timeout;
        let attempts = AtomicUsize::new(0);
        let strategy = FixedInterval::new(self.policy.throttle_delay).take(max_tries - 1);

        let result = RetryIf::start(
            strategy,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                let call = operation();
                async move {
                    match timeout(call_timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(RpcError::Timeout(call_timeout)),
                    }
                }
            },
            |err: &RpcError| {
                let retryable = err.is_retryable();
                let attempt = attempts.load(Ordering::Relaxed);
                if retryable && attempt < max_tries {
                    warn!(method, attempt, max_tries, error = %err, "RPC call throttled or timed out, retrying");
                }
                retryable
            },
        )
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_retryable() => {
                let attempts = attempts.load(Ordering::Relaxed);
                error!(method, attempts, error = %err, "RPC call exhausted retries");
                Err(RpcError::RetriesExhausted {
                    method,
                    attempts,
                    last: err.to_string(),
                })
            }
            Err(RpcError::Transport(message)) if super::classify(&message) == ErrorClass::CapacityExceeded => {
                error!(method, error = %message, "RPC capacity exceeded, not retrying");
                Err(RpcError::CapacityExceeded(message))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        self.with_retry("eth_blockNumber", || self.inner.block_number())
            .await
    }

    pub async fn block_by_number(&self, number: u64) -> Result<Option<BlockSummary>, RpcError> {
        self.with_retry("eth_getBlockByNumber", || self.inner.block_by_number(number))
            .await
    }

    pub async fn block_by_hash(&self, hash: B256) -> Result<Option<BlockSummary>, RpcError> {
        self.with_retry("eth_getBlockByHash", || self.inner.block_by_hash(hash))
            .await
    }

    pub async fn block_timestamp(&self, number: u64) -> Result<u64, RpcError> {
        self.block_by_number(number)
            .await?
            .map(|block| block.timestamp)
            .ok_or_else(|| RpcError::Decode(format!("block {number} not found")))
    }

    pub async fn trace_filter(
        &self,
        from_block: u64,
        to_block: u64,
        to_addresses: &[Address],
    ) -> Result<Vec<Value>, RpcError> {
        self.with_retry("trace_filter", || {
            self.inner.trace_filter(from_block, to_block, to_addresses)
        })
        .await
    }

    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.with_retry("eth_call", || self.inner.call(to, data.clone()))
            .await
    }

    pub async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        self.with_retry("eth_getBalance", || self.inner.balance(address))
            .await
    }

    pub async fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, RpcError> {
        self.with_retry("eth_getTransactionByHash", || {
            self.inner.transaction_by_hash(hash)
        })
        .await
    }

    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.with_retry("eth_getTransactionReceipt", || {
            self.inner.transaction_receipt(hash)
        })
        .await
    }

    /// `eth_getLogs` that resolves provider range limits by re-querying the
    /// suggested sub-range or bisecting, and unions the results.
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.logs_in_range(filter, None).await
    }

    fn logs_in_range<'a>(
        &'a self,
        base: &'a Filter,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<Log>, RpcError>> {
        async move {
            let filter = match range {
                Some((from, to)) => base.clone().from_block(from).to_block(to),
                None => base.clone(),
            };

            let err = match self
                .with_retry("eth_getLogs", || self.inner.get_logs(&filter))
                .await
            {
                Ok(logs) => return Ok(logs),
                Err(err) => err,
            };

            let ErrorClass::RangeExceeded(suggested) = err.class() else {
                return Err(err);
            };

            let (from, to) = match range {
                Some(range) => range,
                None => match filter.get_from_block() {
                    Some(from) => {
                        let to = match filter.get_to_block() {
                            Some(to) => to,
                            None => self.block_number().await?,
                        };
                        (from, to)
                    }
                    None => {
                        let head = self.block_number().await?;
                        let from = head.saturating_sub(OPEN_RANGE_LOOKBACK - 1);
                        warn!(
                            from,
                            to = head,
                            "Open-ended eth_getLogs rejected as too wide, querying recent blocks only"
                        );
                        return self.logs_in_range(base, Some((from, head))).await;
                    }
                },
            };

            if from >= to {
                // A single block cannot be split any further.
                return Err(err);
            }

            let parts = split_range(from, to, suggested);
            debug!(from, to, ?suggested, ?parts, "Splitting eth_getLogs range");

            let mut logs = Vec::new();
            let mut failures = Vec::new();
            for (part_from, part_to) in parts {
                match self.logs_in_range(base, Some((part_from, part_to))).await {
                    Ok(part_logs) => logs.extend(part_logs),
                    Err(RpcError::PartialRange {
                        logs: part_logs,
                        failures: part_failures,
                    }) => {
                        logs.extend(part_logs);
                        failures.extend(part_failures);
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!(from = part_from, to = part_to, error = %err, "eth_getLogs sub-range failed");
                        failures.push(err);
                    }
                }
            }

            if failures.is_empty() {
                Ok(logs)
            } else {
                Err(RpcError::PartialRange { logs, failures })
            }
        }
        .boxed()
    }
}

/// Sub-ranges covering `[from, to]` exactly once, each strictly smaller than
/// the input. A usable provider suggestion is honored, anything else bisects.
fn split_range(from: u64, to: u64, suggested: Option<(u64, u64)>) -> Vec<(u64, u64)> {
    if let Some((start, end)) = suggested {
        if from <= start && end <= to && (start, end) != (from, to) {
            let mut parts = Vec::with_capacity(3);
            if start > from {
                parts.push((from, start - 1));
            }
            parts.push((start, end));
            if end < to {
                parts.push((end + 1, to));
            }
            return parts;
        }
    }

    let mid = from + (to - from) / 2;
    vec![(from, mid), (mid + 1, to)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::testing::{StubChain, log_at};
    use alloy_primitives::address;
    use std::time::Duration;

    const CONTRACT: Address = address!("00000000000000000000000000000000000000aa");

    fn client(stub: Arc<StubChain>) -> RetryingChainClient {
        RetryingChainClient::new(stub, RpcConfig::default())
    }

    /// One log per block; spans wider than `cap` blocks are rejected with a
    /// suggestion covering the first `cap` blocks.
    fn capped_logs(cap: u64) -> impl Fn(&Filter) -> Result<Vec<Log>, RpcError> + Send + Sync {
        move |filter: &Filter| {
            let from = filter.get_from_block().unwrap();
            let to = filter.get_to_block().unwrap();
            if to - from + 1 > cap {
                return Err(RpcError::Transport(format!(
                    "block range should work: [{:#x},{:#x}]",
                    from,
                    from + cap - 1
                )));
            }
            Ok((from..=to)
                .map(|block| log_at(CONTRACT, vec![], Bytes::new(), block, 0))
                .collect())
        }
    }

    fn block_numbers(logs: &[Log]) -> Vec<u64> {
        logs.iter().map(|log| log.block_number.unwrap()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_calls_exhaust_after_max_tries() {
        let stub = Arc::new(StubChain::new(100).with_block_number(|_| {
            async { Err(RpcError::Transport("HTTP 429 Too Many Requests".into())) }.boxed()
        }));

        let err = client(stub.clone()).block_number().await.unwrap_err();

        assert!(matches!(err, RpcError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("exhausted retries"));
        assert_eq!(stub.block_number_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_call_recovers() {
        let stub = Arc::new(StubChain::new(100).with_block_number(|attempt| {
            async move {
                if attempt < 2 {
                    Err(RpcError::Transport("429".into()))
                } else {
                    Ok(42)
                }
            }
            .boxed()
        }));

        assert_eq!(client(stub.clone()).block_number().await.unwrap(), 42);
        assert_eq!(stub.block_number_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_errors_fail_fast() {
        let stub = Arc::new(StubChain::new(100).with_block_number(|_| {
            async { Err(RpcError::Transport("daily request limit exceeded".into())) }.boxed()
        }));

        let err = client(stub.clone()).block_number().await.unwrap_err();

        assert!(matches!(err, RpcError::CapacityExceeded(_)));
        assert!(err.is_fatal());
        assert_eq!(stub.block_number_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_returned_untouched() {
        let stub = Arc::new(StubChain::new(100).with_block_number(|_| {
            async { Err(RpcError::Transport("execution reverted".into())) }.boxed()
        }));

        let err = client(stub.clone()).block_number().await.unwrap_err();

        assert!(matches!(err, RpcError::Transport(ref m) if m == "execution reverted"));
        assert_eq!(stub.block_number_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_consume_attempts() {
        let stub = Arc::new(StubChain::new(100).with_block_number(|_| {
            async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(1)
            }
            .boxed()
        }));

        let err = client(stub.clone()).block_number().await.unwrap_err();

        assert!(matches!(err, RpcError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(stub.block_number_calls(), 3);
    }

    #[tokio::test]
    async fn suggested_ranges_cover_the_whole_span() {
        let cap = 100;
        let stub = Arc::new(StubChain::new(10_000).with_logs(capped_logs(cap)));
        let filter = Filter::new().address(CONTRACT).from_block(0).to_block(10 * cap - 1);

        let logs = client(stub).get_logs(&filter).await.unwrap();

        assert_eq!(block_numbers(&logs), (0..10 * cap).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn bisects_when_no_suggestion_is_given() {
        let stub = Arc::new(StubChain::new(10_000).with_logs(|filter: &Filter| {
            let from = filter.get_from_block().unwrap();
            let to = filter.get_to_block().unwrap();
            if to - from + 1 > 64 {
                return Err(RpcError::Transport("eth_getLogs block range is too large".into()));
            }
            Ok((from..=to)
                .map(|block| log_at(CONTRACT, vec![], Bytes::new(), block, 0))
                .collect())
        }));
        let filter = Filter::new().address(CONTRACT).from_block(1_000).to_block(1_999);

        let logs = client(stub).get_logs(&filter).await.unwrap();

        assert_eq!(block_numbers(&logs), (1_000..2_000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn suggestion_outside_the_request_falls_back_to_bisection() {
        let stub = Arc::new(StubChain::new(10_000).with_logs(|filter: &Filter| {
            let from = filter.get_from_block().unwrap();
            let to = filter.get_to_block().unwrap();
            if to - from + 1 > 10 {
                return Err(RpcError::Transport("block range should work: [0xA,0xB]".into()));
            }
            Ok((from..=to)
                .map(|block| log_at(CONTRACT, vec![], Bytes::new(), block, 0))
                .collect())
        }));
        let filter = Filter::new().address(CONTRACT).from_block(100).to_block(199);

        let logs = client(stub).get_logs(&filter).await.unwrap();

        assert_eq!(block_numbers(&logs), (100..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failed_half_keeps_the_other_halfs_logs() {
        let stub = Arc::new(StubChain::new(10_000).with_logs(|filter: &Filter| {
            let from = filter.get_from_block().unwrap();
            let to = filter.get_to_block().unwrap();
            if to - from + 1 > 50 {
                return Err(RpcError::Transport("block range too large".into()));
            }
            if from >= 50 {
                return Err(RpcError::Transport("internal error".into()));
            }
            Ok((from..=to)
                .map(|block| log_at(CONTRACT, vec![], Bytes::new(), block, 0))
                .collect())
        }));
        let filter = Filter::new().address(CONTRACT).from_block(0).to_block(99);

        let err = client(stub).get_logs(&filter).await.unwrap_err();

        let RpcError::PartialRange { logs, failures } = err else {
            panic!("expected a partial range error");
        };
        assert_eq!(block_numbers(&logs), (0..50).collect::<Vec<_>>());
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("internal error"));
    }

    #[tokio::test]
    async fn open_ended_query_falls_back_to_recent_blocks() {
        let stub = Arc::new(StubChain::new(50_000).with_logs(|filter: &Filter| {
            match (filter.get_from_block(), filter.get_to_block()) {
                (Some(from), Some(to)) => Ok(vec![
                    log_at(CONTRACT, vec![], Bytes::new(), from, 0),
                    log_at(CONTRACT, vec![], Bytes::new(), to, 0),
                ]),
                _ => Err(RpcError::Transport("query exceeds max results".into())),
            }
        }));
        let filter = Filter::new().address(CONTRACT);

        let logs = client(stub).get_logs(&filter).await.unwrap();

        assert_eq!(block_numbers(&logs), vec![40_001, 50_000]);
    }

    #[test]
    fn split_plans_cover_the_range_exactly() {
        assert_eq!(split_range(0, 9, None), vec![(0, 4), (5, 9)]);
        assert_eq!(split_range(0, 9, Some((0, 3))), vec![(0, 3), (4, 9)]);
        assert_eq!(split_range(0, 9, Some((2, 3))), vec![(0, 1), (2, 3), (4, 9)]);
        assert_eq!(split_range(0, 9, Some((0, 9))), vec![(0, 4), (5, 9)]);
        assert_eq!(split_range(5, 9, Some((10, 11))), vec![(5, 7), (8, 9)]);
    }
}
