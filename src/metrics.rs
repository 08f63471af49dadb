use std::{convert::Infallible, net::SocketAddr};

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Response, Server,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use stream_cancel::Trigger;
use tokio::task::JoinHandle;

use crate::shutdown::ShutdownSignal;

pub const PORT: u16 = 9367;

/// Installs the Prometheus recorder and serves the exposition endpoint.
/// Returns the trigger that stops the server, or `None` when a recorder is
/// already installed (counters keep working either way; uninstalled ones
/// are no-ops).
pub fn spawn_server() -> Option<(Trigger, JoinHandle<()>)> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if let Err(error) = metrics::set_boxed_recorder(Box::new(recorder)) {
        warn!(message = "Metrics recorder already installed, not serving metrics.", %error);
        return None;
    }

    let (trigger, shutdown) = ShutdownSignal::new_wired();
    let task = tokio::spawn(serve(handle, shutdown));
    Some((trigger, task))
}

async fn serve(handle: PrometheusHandle, shutdown: ShutdownSignal) {
    let make_svc = make_service_fn(move |_conn| {
        let handle = handle.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |_req| {
                let body = handle.render();
                async move { Ok::<_, Infallible>(Response::new(Body::from(body))) }
            }))
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], PORT));
    let builder = match Server::try_bind(&addr) {
        Ok(builder) => builder,
        Err(error) => {
            error!(message = "Unable to bind metrics server.", %addr, %error);
            return;
        }
    };

    info!(message = "Serving metrics.", %addr);
    if let Err(error) = builder
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(message = "Metrics server failed.", %error);
    }
}
