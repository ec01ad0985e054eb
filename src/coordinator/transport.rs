use std::future::Future;

use crate::config::Timeouts;
use crate::net::{self, NetError};
use crate::protocol::{WorkerReply, WorkerRequest};
use crate::topology::NodeInfo;

/// How the coordinator reaches worker replicas.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        node: &NodeInfo,
        request: &WorkerRequest,
    ) -> impl Future<Output = Result<WorkerReply, NetError>> + Send;
}

/// One TCP connection per request.
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    timeouts: Timeouts,
}

impl TcpTransport {
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }
}

impl Transport for TcpTransport {
    async fn send(&self, node: &NodeInfo, request: &WorkerRequest) -> Result<WorkerReply, NetError> {
        net::exchange(
            &node.addr(),
            request,
            self.timeouts.connect(),
            self.timeouts.request(),
        )
        .await
    }
}
