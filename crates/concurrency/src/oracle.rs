//! Timestamp oracle client
//!
//! Fetches start timestamps from the cluster. Only the eager start policy
//! calls it; lazily started transactions take their timestamp from the first
//! response context instead.

use lattice_core::fault;
use lattice_core::{BeginRequest, Error, Result, Timestamp, Transport};
use std::time::Duration;
use tracing::debug;

/// Client side of the cluster's timestamp oracle
pub struct TimestampOracle<'a> {
    transport: &'a dyn Transport,
    deadline: Option<Duration>,
}

impl<'a> TimestampOracle<'a> {
    /// Oracle client over a transport, with an optional per-call deadline
    pub fn new(transport: &'a dyn Transport, deadline: Option<Duration>) -> Self {
        Self {
            transport,
            deadline,
        }
    }

    /// Obtain a start timestamp
    ///
    /// # Errors
    /// - `Unavailable` if no node can be reached
    /// - `Transport` if the deadline elapses
    /// - `Cluster` on an oracle fault, or if the oracle hands out the
    ///   unassigned timestamp
    pub async fn begin(&self, best_effort: bool, read_only: bool) -> Result<Timestamp> {
        let request = BeginRequest {
            best_effort,
            read_only,
        };
        let response = fault::call("begin", self.deadline, self.transport.begin(request)).await?;
        if !response.start_ts.is_assigned() {
            return Err(Error::cluster("oracle returned an unassigned start timestamp"));
        }
        debug!(
            target: "lattice::txn",
            start_ts = %response.start_ts,
            best_effort,
            read_only,
            "Start timestamp assigned"
        );
        Ok(response.start_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lattice_core::{
        BeginResponse, CommitDecision, Request, Response, RpcStatus, TxnContext,
    };

    /// Transport whose oracle answers with a fixed outcome
    struct FixedOracle(std::result::Result<u64, RpcStatus>);

    #[async_trait]
    impl Transport for FixedOracle {
        async fn begin(&self, _: BeginRequest) -> std::result::Result<BeginResponse, RpcStatus> {
            self.0.clone().map(|ts| BeginResponse {
                start_ts: Timestamp::new(ts),
            })
        }
        async fn query(&self, _: Request) -> std::result::Result<Response, RpcStatus> {
            Err(RpcStatus::internal("unused"))
        }
        async fn mutate(&self, _: Request) -> std::result::Result<Response, RpcStatus> {
            Err(RpcStatus::internal("unused"))
        }
        async fn commit(&self, _: TxnContext) -> std::result::Result<CommitDecision, RpcStatus> {
            Err(RpcStatus::internal("unused"))
        }
        async fn discard(&self, _: TxnContext) -> std::result::Result<(), RpcStatus> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_begin_returns_timestamp() {
        let transport = FixedOracle(Ok(42));
        let ts = TimestampOracle::new(&transport, None)
            .begin(false, false)
            .await
            .unwrap();
        assert_eq!(ts, Timestamp::new(42));
    }

    #[tokio::test]
    async fn test_unreachable_oracle_is_unavailable() {
        let transport = FixedOracle(Err(RpcStatus::unavailable("no nodes")));
        let err = TimestampOracle::new(&transport, None)
            .begin(false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_oracle_fault_is_cluster_error() {
        let transport = FixedOracle(Err(RpcStatus::internal("zero not leader")));
        let err = TimestampOracle::new(&transport, None)
            .begin(true, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cluster { .. }));
    }

    #[tokio::test]
    async fn test_zero_timestamp_rejected() {
        let transport = FixedOracle(Ok(0));
        let err = TimestampOracle::new(&transport, None)
            .begin(false, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unassigned"));
    }
}
