//! The transport seam between the transaction engine and the cluster
//!
//! The engine treats the cluster as a request/response boundary. Retries and
//! backoff at the connection level belong to the implementation of this
//! trait, not to the engine.
//!
//! Thread safety: implementations are shared by every transaction of a
//! client, so they must be `Send + Sync`.

use crate::error::RpcStatus;
use crate::types::{BeginRequest, BeginResponse, CommitDecision, Request, Response, TxnContext};
use async_trait::async_trait;
use std::sync::Arc;

/// RPC surface of a cluster node
#[async_trait]
pub trait Transport: Send + Sync {
    /// Obtain a start timestamp from the cluster's oracle
    async fn begin(&self, request: BeginRequest) -> Result<BeginResponse, RpcStatus>;

    /// Run a read at the request's snapshot
    async fn query(&self, request: Request) -> Result<Response, RpcStatus>;

    /// Apply mutations (optionally with a query and commit-now)
    ///
    /// A commit-now request that loses to a concurrent writer fails with an
    /// `Aborted` status.
    async fn mutate(&self, request: Request) -> Result<Response, RpcStatus>;

    /// Ask the conflict checker for a commit decision
    async fn commit(&self, context: TxnContext) -> Result<CommitDecision, RpcStatus>;

    /// Release server-side state held for an abandoned transaction
    async fn discard(&self, context: TxnContext) -> Result<(), RpcStatus>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn begin(&self, request: BeginRequest) -> Result<BeginResponse, RpcStatus> {
        (**self).begin(request).await
    }

    async fn query(&self, request: Request) -> Result<Response, RpcStatus> {
        (**self).query(request).await
    }

    async fn mutate(&self, request: Request) -> Result<Response, RpcStatus> {
        (**self).mutate(request).await
    }

    async fn commit(&self, context: TxnContext) -> Result<CommitDecision, RpcStatus> {
        (**self).commit(context).await
    }

    async fn discard(&self, context: TxnContext) -> Result<(), RpcStatus> {
        (**self).discard(context).await
    }
}
