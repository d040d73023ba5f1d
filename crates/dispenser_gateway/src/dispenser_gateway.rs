use crate::domain::EventAdmissionService;
use crate::http::{build_router, run_http_server, AppState, HttpServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct DispenserGateway {
    admission: Arc<EventAdmissionService>,
    config: HttpServerConfig,
}

impl DispenserGateway {
    pub fn new(admission: Arc<EventAdmissionService>, config: HttpServerConfig) -> Self {
        debug!("Initializing dispenser gateway module");
        Self { admission, config }
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| {
            Box::pin(async move {
                let router = build_router(AppState {
                    admission: self.admission,
                });
                run_http_server(self.config, router, ctx).await
            })
        }
    }
}
