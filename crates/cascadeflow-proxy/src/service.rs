use cascadeflow_core::Result;

use crate::handler::ProxyHandler;
use crate::models::{ProxyRequest, ProxyResult};
use crate::router::ProxyRouter;

/// End-to-end proxy service: route, then execute.
pub struct ProxyService {
    router: ProxyRouter,
    handler: ProxyHandler,
}

impl ProxyService {
    pub fn new(router: ProxyRouter, handler: ProxyHandler) -> Self {
        Self { router, handler }
    }

    pub async fn handle(&self, request: &ProxyRequest) -> Result<ProxyResult> {
        let plan = self.router.plan(request)?;
        self.handler.execute(&plan).await
    }
}
