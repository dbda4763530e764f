//! HTTP server: one effect tree per request, run by the production executor.

use bitserve::{ProductionExecutor, Reply, Trace};
use futures::Future;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{info, info_span, Instrument};

use crate::dispatch::{dispatch, RequestHead};
use crate::Site;

/// Answer one request.
pub async fn handle(site: Site, executor: ProductionExecutor, request: Request<Body>) -> Response<Body> {
    let head = RequestHead::from_request(&request);
    let span = info_span!("request", method = %head.method, path = %head.path);
    async move {
        let reply: Reply = dispatch::<Trace<Reply>>(&site, &head).into_inner();
        executor.run(request, reply).await
    }
    .instrument(span)
    .await
}

/// Serve `site` on `address` until `shutdown` completes.
pub async fn serve<F>(
    site: Site,
    executor: ProductionExecutor,
    address: SocketAddr,
    shutdown: F,
) -> hyper::Result<()>
where
    F: Future<Output = ()>,
{
    let make_service = make_service_fn(move |connection: &AddrStream| {
        let site = site.clone();
        let executor = executor.clone();
        let remote = connection.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let site = site.clone();
                let executor = executor.clone();
                async move {
                    tracing::trace!(%remote, "accepted request");
                    Ok::<_, Infallible>(handle(site, executor, request).await)
                }
            }))
        }
    });

    let server = Server::try_bind(&address)?.serve(make_service);
    info!(address = %server.local_addr(), "listening");
    server.with_graceful_shutdown(shutdown).await
}
