use std::{
    borrow::Cow,
    cell::RefCell,
    collections::{HashMap, HashSet},
    future::Future,
    io::Write,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::ready;
use pin_project_lite::pin_project;
use regex::Regex;
use time::OffsetDateTime;

use actix_http::{BoxedPayloadStream, Payload};
use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header;
use actix_web::{Error, HttpMessage, HttpRequest, Result};

use crate::body::{Capture, TeePayload};
use crate::event::Event;
use crate::level::Level;
use crate::request::{Logger, RequestErrors, render_errors};
use crate::sink::{Format, LogSink, Sink, WriterSink};

const DEFAULT_MESSAGE: &str = "Request";
const DEFAULT_MAX_BODY_LEN: usize = 50;

type Skipper = Box<dyn Fn(&ServiceRequest) -> bool>;
type LoggerFn = Box<dyn Fn(&ServiceRequest, Logger) -> Logger>;
type ContextFn = Box<dyn Fn(&HttpRequest, Event) -> Event>;

/// Middleware that emits one leveled, structured event per request.
///
/// Every request that is not suppressed produces exactly one event once its
/// response body has been written. The event carries `status`, `method`,
/// `path` (with query), `ip`, `user_agent`, `latency` (milliseconds) and
/// `body_size`. Its level follows the response status:
///
/// 1. a [`status_level`](ReqLogger::status_level) override for the exact code;
/// 2. `400..=499` → [`client_error_level`](ReqLogger::client_error_level) (`warn`);
/// 3. `>= 500` → [`server_error_level`](ReqLogger::server_error_level) (`error`);
/// 4. a [`path_level`](ReqLogger::path_level) override for the request path;
/// 5. [`default_level`](ReqLogger::default_level) (`info`).
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_middleware_reqlog::{Level, ReqLogger};
///
/// let app = App::new().wrap(
///     ReqLogger::default()
///         .exclude("/metrics")
///         .exclude_regex(r"^/assets/")
///         .path_level("/health", Level::Debug)
///         .status_level(404, Level::Info)
///         .utc(true),
/// );
/// ```
pub struct ReqLogger(Rc<Inner>);

struct Inner {
    exclude: HashSet<String>,
    exclude_regex: Vec<Regex>,
    skipper: Option<Skipper>,
    utc: bool,
    sink: Arc<dyn Sink>,
    default_level: Level,
    client_error_level: Level,
    server_error_level: Level,
    path_levels: HashMap<String, Level>,
    status_levels: HashMap<u16, Level>,
    logger_fn: Option<LoggerFn>,
    context_fn: Option<ContextFn>,
    message: Cow<'static, str>,
    log_request_body: bool,
    max_request_body_len: usize,
    log_response_body: bool,
    log_error_response_body: bool,
    max_response_body_len: usize,
}

impl ReqLogger {
    /// Create `ReqLogger` middleware writing to `sink`.
    pub fn new(sink: Arc<dyn Sink>) -> ReqLogger {
        ReqLogger(Rc::new(Inner {
            exclude: HashSet::new(),
            exclude_regex: Vec::new(),
            skipper: None,
            utc: false,
            sink,
            default_level: Level::Info,
            client_error_level: Level::Warn,
            server_error_level: Level::Error,
            path_levels: HashMap::new(),
            status_levels: HashMap::new(),
            logger_fn: None,
            context_fn: None,
            message: Cow::Borrowed(DEFAULT_MESSAGE),
            log_request_body: false,
            max_request_body_len: DEFAULT_MAX_BODY_LEN,
            log_response_body: false,
            log_error_response_body: false,
            max_response_body_len: DEFAULT_MAX_BODY_LEN,
        }))
    }

    fn inner_mut(&mut self) -> &mut Inner {
        // Not `Clone`, and the only other owners are created by `new_transform`.
        Rc::get_mut(&mut self.0).expect("ReqLogger must be configured before it is installed")
    }

    /// Ignore and do not log access info for specified path.
    ///
    /// Compared against the path including its query string, if any.
    pub fn exclude<T: Into<String>>(mut self, path: T) -> Self {
        self.inner_mut().exclude.insert(path.into());
        self
    }

    /// Ignore every path in `paths`, see [`exclude`](ReqLogger::exclude).
    pub fn exclude_paths<I, T>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.inner_mut()
            .exclude
            .extend(paths.into_iter().map(Into::into));
        self
    }

    /// Ignore and do not log access info for paths that match regex.
    ///
    /// # Panics
    /// Panics if `pattern` is not a valid regex. Use
    /// [`try_exclude_regex`](ReqLogger::try_exclude_regex) for patterns that
    /// come from configuration.
    pub fn exclude_regex<T: AsRef<str>>(self, pattern: T) -> Self {
        match self.try_exclude_regex(pattern.as_ref()) {
            Ok(this) => this,
            Err(err) => panic!("invalid exclude pattern {:?}: {err}", pattern.as_ref()),
        }
    }

    pub fn try_exclude_regex<T: AsRef<str>>(self, pattern: T) -> Result<Self, regex::Error> {
        Regex::new(pattern.as_ref()).map(|re| self.exclude_compiled(re))
    }

    /// Add already compiled exclusion patterns, checked in order.
    pub fn exclude_regexes<I: IntoIterator<Item = Regex>>(mut self, patterns: I) -> Self {
        self.inner_mut().exclude_regex.extend(patterns);
        self
    }

    fn exclude_compiled(mut self, re: Regex) -> Self {
        self.inner_mut().exclude_regex.push(re);
        self
    }

    /// Ignore requests for which `skipper` returns `true`.
    ///
    /// Called once per request, before the wrapped service runs.
    pub fn skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&ServiceRequest) -> bool + 'static,
    {
        self.inner_mut().skipper = Some(Box::new(skipper));
        self
    }

    /// Timestamp events in UTC instead of local time.
    pub fn utc(mut self, utc: bool) -> Self {
        self.inner_mut().utc = utc;
        self
    }

    /// Send events to `sink`.
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.inner_mut().sink = sink;
        self
    }

    /// Write console formatted events, without colours, to `out`.
    pub fn output<W: Write + Send + 'static>(self, out: W) -> Self {
        self.sink(Arc::new(WriterSink::new(out, Format::Console { color: false })))
    }

    /// Write one JSON object per event to `out`.
    pub fn json_output<W: Write + Send + 'static>(self, out: W) -> Self {
        self.sink(Arc::new(WriterSink::new(out, Format::Json)))
    }

    /// Send events through the `log` facade with the default target.
    pub fn log_facade(self) -> Self {
        self.sink(Arc::new(LogSink::default()))
    }

    /// Send events through the `log` facade with `target`.
    ///
    /// # Examples
    /// Using `.log_target("http_log")` would have this effect on request logs:
    /// ```diff
    /// - [2015-10-21T07:28:00Z INFO  actix_web_middleware_reqlog] Request status=200 ...
    /// + [2015-10-21T07:28:00Z INFO  http_log] Request status=200 ...
    ///                               ^^^^^^^^
    /// ```
    pub fn log_target(self, target: impl Into<Cow<'static, str>>) -> Self {
        self.sink(Arc::new(LogSink::new(target)))
    }

    /// Level for responses with status below 400.
    pub fn default_level(mut self, level: Level) -> Self {
        self.inner_mut().default_level = level;
        self
    }

    /// Level for responses with status 400 to 499.
    pub fn client_error_level(mut self, level: Level) -> Self {
        self.inner_mut().client_error_level = level;
        self
    }

    /// Level for responses with status 500 and above.
    pub fn server_error_level(mut self, level: Level) -> Self {
        self.inner_mut().server_error_level = level;
        self
    }

    /// Level for successful responses to `path`.
    ///
    /// Only used for statuses below 400; error statuses keep their tier.
    /// `path` is compared without the query string.
    pub fn path_level<T: Into<String>>(mut self, path: T, level: Level) -> Self {
        self.inner_mut().path_levels.insert(path.into(), level);
        self
    }

    pub fn path_levels<I, T>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = (T, Level)>,
        T: Into<String>,
    {
        self.inner_mut()
            .path_levels
            .extend(levels.into_iter().map(|(path, level)| (path.into(), level)));
        self
    }

    /// Level for responses with exactly `status`. Takes precedence over everything else.
    pub fn status_level(mut self, status: u16, level: Level) -> Self {
        self.inner_mut().status_levels.insert(status, level);
        self
    }

    pub fn status_levels<I: IntoIterator<Item = (u16, Level)>>(mut self, levels: I) -> Self {
        self.inner_mut().status_levels.extend(levels);
        self
    }

    /// Build the per-request logger from the default one.
    ///
    /// Runs for every request, suppressed or not. The result is what
    /// [`get`](crate::get) returns and what the request event is sent through.
    pub fn logger_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest, Logger) -> Logger + 'static,
    {
        self.inner_mut().logger_fn = Some(Box::new(f));
        self
    }

    /// Add custom fields to the request event once the handler has finished.
    ///
    /// Standard fields are attached afterwards and replace custom fields of
    /// the same name. Not called when the wrapped service fails with an
    /// `Err`, as the request no longer exists then; fields that must appear
    /// on every event belong in [`logger_fn`](ReqLogger::logger_fn).
    pub fn context_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&HttpRequest, Event) -> Event + 'static,
    {
        self.inner_mut().context_fn = Some(Box::new(f));
        self
    }

    /// Event message. Default: `Request`.
    pub fn message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.inner_mut().message = message.into();
        self
    }

    /// Attach the consumed request body as `request_body`.
    pub fn log_request_body(mut self, enabled: bool) -> Self {
        self.inner_mut().log_request_body = enabled;
        self
    }

    /// Characters of request body kept before truncating. Default: 50.
    pub fn max_request_body_len(mut self, max_len: usize) -> Self {
        self.inner_mut().max_request_body_len = max_len;
        self
    }

    /// Attach the response body as `response_body` for statuses below 400.
    pub fn log_response_body(mut self, enabled: bool) -> Self {
        self.inner_mut().log_response_body = enabled;
        self
    }

    /// Attach the response body as `response_body` for statuses 400 and above.
    pub fn log_error_response_body(mut self, enabled: bool) -> Self {
        self.inner_mut().log_error_response_body = enabled;
        self
    }

    /// Characters of response body kept before truncating. Default: 50.
    pub fn max_response_body_len(mut self, max_len: usize) -> Self {
        self.inner_mut().max_response_body_len = max_len;
        self
    }
}

impl Default for ReqLogger {
    /// Create `ReqLogger` middleware writing console lines to stderr.
    ///
    /// Colours are used when stderr is a terminal.
    fn default() -> Self {
        ReqLogger::new(Arc::new(WriterSink::stderr()))
    }
}

impl Inner {
    /// Whether a request for `path` (with query) should produce an event.
    fn should_log(&self, path: &str, req: &ServiceRequest) -> bool {
        let skipped = self.exclude.contains(path)
            || self.skipper.as_ref().is_some_and(|skip| skip(req))
            || self.exclude_regex.iter().any(|re| re.is_match(path));
        !skipped
    }

    fn select_level(&self, status: u16, path: &str) -> Level {
        if let Some(level) = self.status_levels.get(&status) {
            return *level;
        }

        match status {
            400..=499 => self.client_error_level,
            500.. => self.server_error_level,
            _ => self
                .path_levels
                .get(path)
                .copied()
                .unwrap_or(self.default_level),
        }
    }

    fn message_for(&self, errors: &[String]) -> String {
        if errors.is_empty() {
            self.message.to_string()
        } else {
            format!(
                "{} with errors: {}",
                self.message,
                render_errors(errors.iter().map(String::as_str))
            )
        }
    }

    fn captures_response(&self, status: u16) -> bool {
        if status >= 400 {
            self.log_error_response_body
        } else {
            self.log_response_body
        }
    }

    fn base_logger(&self, req: &ServiceRequest) -> Logger {
        let logger = Logger::new(Arc::clone(&self.sink)).utc(self.utc);
        match &self.logger_fn {
            Some(f) => f(req, logger),
            None => logger,
        }
    }
}

/// Path plus `?query` when the query string is not empty.
fn full_path(req: &ServiceRequest) -> String {
    match req.query_string() {
        "" => req.path().to_string(),
        query => format!("{}?{}", req.path(), query),
    }
}

impl<S, B> Transform<S, ServiceRequest> for ReqLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Transform = ReqLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ReqLoggerMiddleware {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

/// Request data captured on entry, completed into an event once the
/// wrapped service has produced a response.
struct Tracked {
    inner: Rc<Inner>,
    logger: Logger,
    start: OffsetDateTime,
    url_path: String,
    path: String,
    method: String,
    ip: String,
    user_agent: String,
    errors: RequestErrors,
    request_body: Option<Rc<RefCell<Capture>>>,
}

impl Tracked {
    fn level(&self, status: u16) -> Level {
        self.inner.select_level(status, &self.url_path)
    }

    /// Layers the standard fields over `event`, which may already carry custom ones.
    fn complete(self, status: u16, event: Event, errors: &[String]) -> Pending {
        let event = event
            .with("status", status)
            .with("method", self.method)
            .with("path", self.path)
            .with("ip", self.ip)
            .with("user_agent", self.user_agent);

        Pending {
            message: self.inner.message_for(errors),
            logger: self.logger,
            event,
            start: self.start,
            request_body: self.request_body,
        }
    }
}

/// Event waiting for the response body to finish.
struct Pending {
    logger: Logger,
    event: Event,
    message: String,
    start: OffsetDateTime,
    request_body: Option<Rc<RefCell<Capture>>>,
}

impl Pending {
    fn emit(self, size: usize, response_body: Option<&Capture>) {
        let latency = OffsetDateTime::now_utc() - self.start;
        let mut event = self
            .event
            .with("latency", latency.as_seconds_f64() * 1000.0)
            .with("body_size", size);

        if let Some(capture) = &self.request_body {
            event = event.with("request_body", capture.borrow().render());
        }
        if let Some(capture) = response_body {
            event = event.with("response_body", capture.render());
        }

        self.logger.send(event, &self.message);
    }
}

pin_project! {
    /// Response body wrapper that counts, and optionally copies, every chunk
    /// written to the client and emits the request event when dropped.
    pub struct StreamLog<B> {
        #[pin]
        body: B,
        size: usize,
        capture: Option<Capture>,
        pending: Option<Pending>,
    }

    impl<B> PinnedDrop for StreamLog<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(pending) = this.pending.take() {
                pending.emit(*this.size, this.capture.as_ref());
            }
        }
    }
}

impl<B: MessageBody> MessageBody for StreamLog<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match ready!(this.body.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.size += chunk.len();
                if let Some(capture) = this.capture {
                    capture.push(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }
}

/// Logger middleware service.
pub struct ReqLoggerMiddleware<S> {
    inner: Rc<Inner>,
    service: S,
}

impl<S, B> Service<ServiceRequest> for ReqLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Future = ReqLoggerResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let start = OffsetDateTime::now_utc();
        let path = full_path(&req);

        let logger = self.inner.base_logger(&req);
        req.extensions_mut().insert(logger.clone());

        if !self.inner.should_log(&path, &req) {
            return ReqLoggerResponse {
                fut: self.service.call(req),
                tracked: None,
                _phantom: PhantomData,
            };
        }

        let request_body = self.inner.log_request_body.then(|| {
            let capture = Rc::new(RefCell::new(Capture::new(self.inner.max_request_body_len)));
            let tee = TeePayload::new(req.take_payload(), Rc::clone(&capture));
            let payload: BoxedPayloadStream = Box::pin(tee);
            req.set_payload(Payload::Stream { payload });
            capture
        });

        let errors = {
            let mut extensions = req.extensions_mut();
            match extensions.get::<RequestErrors>() {
                Some(errors) => errors.clone(),
                None => {
                    let errors = RequestErrors::default();
                    extensions.insert(errors.clone());
                    errors
                }
            }
        };

        let ip = req
            .connection_info()
            .realip_remote_addr()
            .map(str::to_string)
            .unwrap_or_default();
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let tracked = Tracked {
            inner: Rc::clone(&self.inner),
            logger,
            start,
            url_path: req.path().to_string(),
            path,
            method: req.method().to_string(),
            ip,
            user_agent,
            errors,
            request_body,
        };

        ReqLoggerResponse {
            fut: self.service.call(req),
            tracked: Some(tracked),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct ReqLoggerResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        tracked: Option<Tracked>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for ReqLoggerResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<StreamLog<B>>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = match ready!(this.fut.poll(cx)) {
            Ok(res) => res,
            Err(err) => {
                // The error never becomes a response we can observe, so log it now.
                // The request is gone, so `context_fn` cannot run.
                if let Some(tracked) = this.tracked.take() {
                    let status = err.as_response_error().status_code().as_u16();
                    let mut errors = tracked.errors.to_vec();
                    errors.push(err.to_string());
                    let event = Event::new(tracked.level(status));
                    tracked.complete(status, event, &errors).emit(0, None);
                }
                return Poll::Ready(Err(err));
            }
        };

        let Some(tracked) = this.tracked.take() else {
            return Poll::Ready(Ok(res.map_body(|_, body| StreamLog {
                body,
                size: 0,
                capture: None,
                pending: None,
            })));
        };

        let status = res.status().as_u16();
        let request = res.request();

        let mut errors = tracked.errors.to_vec();
        if let Some(error) = res.response().error() {
            log::debug!("Error in response: {:?}", error);
            errors.push(error.to_string());
        }

        let event = Event::new(tracked.level(status));
        #[cfg(feature = "tracing-request-id")]
        let event = match request.extensions().get::<tracing_actix_web::RequestId>() {
            Some(id) => event.with("request_id", id.to_string()),
            None => event,
        };
        let event = match &tracked.inner.context_fn {
            Some(f) => f(request, event),
            None => event,
        };

        let capture = tracked
            .inner
            .captures_response(status)
            .then(|| Capture::new(tracked.inner.max_response_body_len));
        let pending = tracked.complete(status, event, &errors);

        Poll::Ready(Ok(res.map_body(move |_, body| StreamLog {
            body,
            size: 0,
            capture,
            pending: Some(pending),
        })))
    }
}
