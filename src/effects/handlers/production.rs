// Production interpreter
//
// A `Reply` is a deferred computation from the request context to a hyper
// response. Suspending effects await their I/O inside the computation and
// then run the continuation's reply against the same context.

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use hyper::header::{HeaderMap, CACHE_CONTROL, CONTENT_TYPE, COOKIE, LOCATION};
use hyper::http::request::Parts;
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::database::{Connection, Pool};
use crate::effects::{AsyncTask, Headers, Interpreter, InterpreterExt, Scoped, Step};
use crate::error::{QueryError, ServerError, TaskError, GENERIC_PUBLIC_MESSAGE};
use crate::query::QuerySpec;
use crate::session::{self, Session};

/// Public message for static files that cannot be served.
pub const FILE_NOT_FOUND: &str = "The file you requested could not be found.";

/// Loads the session behind a cookie token.
pub type SessionResolver = fn(Uuid) -> Step<Reply, Option<Session>>;

/// The production interpreter.
pub struct Reply(Box<dyn FnOnce(Arc<RequestContext>) -> BoxFuture<'static, Response<Body>> + Send>);

impl Reply {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Arc<RequestContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Response<Body>> + Send + 'static,
    {
        Reply(Box::new(move |ctx| f(ctx).boxed()))
    }

    fn respond(response: Response<Body>) -> Self {
        Reply(Box::new(move |_| future::ready(response).boxed()))
    }

    /// Drive the chain to its response.
    pub fn run(self, ctx: Arc<RequestContext>) -> BoxFuture<'static, Response<Body>> {
        (self.0)(ctx)
    }
}

enum RequestBody {
    Pending(Body),
    Buffered(Bytes),
}

/// Everything a reply may need while it runs.
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Mutex<RequestBody>,
    pool: Arc<dyn Pool>,
    static_root: PathBuf,
    session_resolver: SessionResolver,
    task_timeout: Option<Duration>,
    cancel: watch::Receiver<bool>,
}

impl RequestContext {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn session_token(&self) -> Option<Uuid> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(session::session_token)
    }

    /// The request body, read once and buffered for later readers.
    pub async fn body_bytes(&self) -> Result<Bytes, hyper::Error> {
        let mut body = self.body.lock().await;
        match &mut *body {
            RequestBody::Buffered(bytes) => Ok(bytes.clone()),
            RequestBody::Pending(pending) => {
                let bytes = hyper::body::to_bytes(std::mem::take(pending)).await?;
                *body = RequestBody::Buffered(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// Resolves once the request has been cancelled. Never resolves for a
    /// scope nobody can cancel.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        loop {
            if *cancel.borrow() {
                return;
            }
            if cancel.changed().await.is_err() {
                return future::pending().await;
            }
        }
    }

    /// A fresh scope for work that outlives the request: same pool and
    /// configuration, no body, its own cancellation.
    fn detached(&self) -> RequestContext {
        let (_, cancel) = watch::channel(false);
        RequestContext {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            body: Mutex::new(RequestBody::Buffered(Bytes::new())),
            pool: self.pool.clone(),
            static_root: self.static_root.clone(),
            session_resolver: self.session_resolver,
            task_timeout: self.task_timeout,
            cancel,
        }
    }

    /// Map a static path onto the static root, refusing anything that could
    /// escape it.
    fn static_path(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        (safe && !path.is_empty()).then(|| self.static_root.join(relative))
    }
}

/// Cancels the request it was created with, at the latest when dropped.
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn build(status: StatusCode, headers: &Headers, body: Body) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(body).unwrap_or_else(|e| {
        error!(error = %e, "invalid response");
        let mut response = Response::new(Body::from(GENERIC_PUBLIC_MESSAGE));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("mp4") => "video/mp4",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

async fn execute<T: Send + 'static>(ctx: &RequestContext, query: QuerySpec<T>) -> Result<T, QueryError> {
    let (statement, query) = query.into_parts()?;
    let connection = ctx.pool.acquire().await?;
    let mut connection = Scoped::new(connection, |connection: Box<dyn Connection>| connection.release());
    let rows = match connection.as_mut() {
        Some(connection) => connection.execute(&statement).await,
        None => Err(QueryError::Acquire("connection already released".into())),
    };
    connection.release();
    trace!(%statement, ok = rows.is_ok(), "statement executed");
    query.parse(rows?)
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => future::pending().await,
    }
}

impl Interpreter for Reply {
    fn write_text(body: String, status: StatusCode, mut headers: Headers) -> Self {
        if !headers.keys().any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str())) {
            headers.insert(CONTENT_TYPE.as_str().into(), "text/plain; charset=utf-8".into());
        }
        Reply::respond(build(status, &headers, Body::from(body)))
    }

    fn write_binary(bytes: Bytes, status: StatusCode, headers: Headers) -> Self {
        Reply::respond(build(status, &headers, Body::from(bytes)))
    }

    fn write_file(path: String, max_age: Option<u64>) -> Self {
        Reply::new(move |ctx| async move {
            let Some(file) = ctx.static_path(&path) else {
                warn!(%path, "refusing static path");
                return Reply::not_found(FILE_NOT_FOUND).run(ctx).await;
            };
            match tokio::fs::read(&file).await {
                Ok(contents) => {
                    let mut headers = Headers::new();
                    headers.insert(CONTENT_TYPE.as_str().into(), content_type(&file).into());
                    if let Some(max_age) = max_age {
                        headers.insert(
                            CACHE_CONTROL.as_str().into(),
                            format!("public, max-age={max_age}, immutable"),
                        );
                    }
                    build(StatusCode::OK, &headers, Body::from(contents))
                }
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "static file unavailable");
                    Reply::not_found(FILE_NOT_FOUND).run(ctx).await
                }
            }
        })
    }

    fn redirect(path: String, mut headers: Headers) -> Self {
        headers.insert(LOCATION.as_str().into(), path);
        Reply::respond(build(StatusCode::FOUND, &headers, Body::empty()))
    }

    fn with_session<F>(cont: F) -> Self
    where
        F: FnOnce(Option<Session>) -> Self + Send + 'static,
    {
        Reply::new(move |ctx| match ctx.session_token() {
            None => cont(None).run(ctx),
            Some(token) => (ctx.session_resolver)(token).finish(cont).run(ctx),
        })
    }

    fn with_request_body<F>(cont: F) -> Self
    where
        F: FnOnce(Bytes) -> Self + Send + 'static,
    {
        Reply::new(move |ctx| async move {
            match ctx.body_bytes().await {
                Ok(bytes) => cont(bytes).run(ctx).await,
                Err(e) => {
                    let error = ServerError::bad_request(
                        format!("failed to read request body: {e}"),
                        "The request body could not be read.",
                    );
                    Reply::write_error(error).run(ctx).await
                }
            }
        })
    }

    fn run_query<T, F>(query: QuerySpec<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, QueryError>) -> Self + Send + 'static,
    {
        Reply::new(move |ctx| async move {
            let result = execute(&ctx, query).await;
            cont(result).run(ctx).await
        })
    }

    fn await_async<T, F>(task: AsyncTask<T>, cont: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(Result<T, TaskError>) -> Self + Send + 'static,
    {
        Reply::new(move |ctx| async move {
            let description = task.description().clone();
            let work = task.into_future();
            let result = tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(TaskError::Cancelled),
                result = work => result,
                _ = deadline(ctx.task_timeout) => {
                    Err(TaskError::Failed(format!("{description} timed out")))
                }
            };
            tokio::task::yield_now().await;
            cont(result).run(ctx).await
        })
    }

    fn detach(side: Self, then: Self) -> Self {
        Reply::new(move |ctx| {
            let scope = Arc::new(ctx.detached());
            let path = ctx.uri.path().to_string();
            let handle = tokio::spawn(side.run(scope));
            tokio::spawn(async move {
                match handle.await {
                    Ok(response) if response.status().is_server_error() => {
                        let status = response.status();
                        let detail = hyper::body::to_bytes(response.into_body())
                            .await
                            .map(|body| String::from_utf8_lossy(&body).into_owned())
                            .unwrap_or_default();
                        error!(%path, %status, %detail, "detached effect chain failed");
                    }
                    Ok(response) => trace!(%path, status = %response.status(), "detached effect chain done"),
                    Err(e) => error!(%path, error = %e, "detached effect chain panicked"),
                }
            });
            then.run(ctx)
        })
    }

    fn ensure<C>(body: Self, cleanup: C) -> Self
    where
        C: FnOnce() + Send + 'static,
    {
        let guard = Scoped::new((), move |()| cleanup());
        Reply::new(move |ctx| async move {
            let response = body.run(ctx).await;
            guard.release();
            response
        })
    }
}

/// Builds request contexts and drives replies to responses.
#[derive(Clone)]
pub struct ProductionExecutor {
    pool: Arc<dyn Pool>,
    static_root: PathBuf,
    session_resolver: SessionResolver,
    task_timeout: Option<Duration>,
}

impl ProductionExecutor {
    pub fn new(pool: Arc<dyn Pool>, static_root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            static_root: static_root.into(),
            session_resolver: session::resolve::<Reply>,
            task_timeout: None,
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_session_resolver(mut self, resolver: SessionResolver) -> Self {
        self.session_resolver = resolver;
        self
    }

    pub fn context(&self, parts: Parts, body: Body) -> (Arc<RequestContext>, CancelHandle) {
        let (cancel, cancelled) = watch::channel(false);
        let ctx = RequestContext {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: Mutex::new(RequestBody::Pending(body)),
            pool: self.pool.clone(),
            static_root: self.static_root.clone(),
            session_resolver: self.session_resolver,
            task_timeout: self.task_timeout,
            cancel: cancelled,
        };
        (Arc::new(ctx), CancelHandle(cancel))
    }

    /// Run `reply` for `request`, logging the outcome.
    pub async fn run(&self, request: Request<Body>, reply: Reply) -> Response<Body> {
        let start = Instant::now();
        let (parts, body) = request.into_parts();
        let (ctx, _cancel) = self.context(parts, body);
        let method = ctx.method.clone();
        let path = ctx.uri.path().to_string();
        let response = reply.run(ctx).await;
        let status = response.status();
        let elapsed = start.elapsed();
        if status.is_server_error() {
            warn!(%method, %path, status = status.as_u16(), ?elapsed, "request completed");
        } else {
            info!(%method, %path, status = status.as_u16(), ?elapsed, "request completed");
        }
        response
    }
}
