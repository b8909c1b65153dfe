use std::{borrow::Cow, cell::RefCell, fmt, rc::Rc, sync::Arc};

use actix_utils::future::{Ready, ready};
use actix_web::dev::Payload;
use actix_web::error::ErrorInternalServerError;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use serde_json::Value;

use crate::event::{self, Event, FieldList, Record};
use crate::level::Level;
use crate::sink::Sink;

/// Per-request logger.
///
/// The middleware attaches one to every request it sees, carrying whatever
/// fields the configured [`logger_fn`](crate::ReqLogger::logger_fn) added.
/// Handlers fetch it with [`get`] or take it as an extractor and emit
/// their own events bound to the same fields.
///
/// Like [`Event`], a `Logger` is extended by value: [`with`](Logger::with)
/// returns a new logger and leaves the original untouched.
///
/// ```rust
/// use actix_web::{web, App, HttpResponse};
/// use actix_web_middleware_reqlog::{Logger, ReqLogger};
///
/// async fn index(log: Logger) -> HttpResponse {
///     log.with("step", "render").info("rendering index");
///     HttpResponse::Ok().finish()
/// }
///
/// let app = App::new()
///     .wrap(ReqLogger::default())
///     .route("/", web::get().to(index));
/// ```
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Sink>,
    fields: FieldList,
    utc: bool,
}

impl Logger {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Logger {
            sink,
            fields: FieldList::default(),
            utc: false,
        }
    }

    /// Adds a context field to every event sent through this logger.
    pub fn with(mut self, key: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sends events to `sink` instead.
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    /// Stamps events in UTC instead of local time.
    pub fn utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Emits `event` with `message`.
    ///
    /// Event fields win over logger fields of the same name. Events at
    /// [`Level::Disabled`] are dropped.
    pub fn send(&self, event: Event, message: &str) {
        if !event.level().is_enabled() {
            return;
        }

        let fields = self.fields.overlaid(event.field_list());
        self.sink.write(&Record {
            time: event::now(self.utc),
            level: event.level(),
            message,
            fields: fields.as_slice(),
        });
    }

    pub fn log(&self, level: Level, message: &str) {
        self.send(Event::new(level), message)
    }

    pub fn trace(&self, message: &str) {
        self.log(Level::Trace, message)
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message)
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message)
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message)
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("fields", &self.fields)
            .field("utc", &self.utc)
            .finish_non_exhaustive()
    }
}

/// Returns the logger the middleware attached to `req`.
///
/// # Panics
/// Panics when `req` never went through [`ReqLogger`](crate::ReqLogger).
/// That is a wiring mistake in the application, not a runtime condition.
pub fn get(req: &HttpRequest) -> Logger {
    match try_get(req) {
        Some(logger) => logger,
        None => panic!(
            "no request logger attached to {} {}: wrap the route with ReqLogger",
            req.method(),
            req.path()
        ),
    }
}

/// Like [`get`], but returns `None` instead of panicking.
pub fn try_get(req: &HttpRequest) -> Option<Logger> {
    req.extensions().get::<Logger>().cloned()
}

/// Fails with `500 Internal Server Error` when the middleware is missing.
impl FromRequest for Logger {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(try_get(req).ok_or_else(|| {
            log::error!(
                "no request logger attached to {} {}: wrap the route with ReqLogger",
                req.method(),
                req.path()
            );
            ErrorInternalServerError("request logger is not configured")
        }))
    }
}

/// Errors recorded against a request while it was handled.
///
/// Clones share one list, so the middleware keeps reading it after the
/// request itself has been dropped by a failing inner service.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestErrors(Rc<RefCell<Vec<String>>>);

impl RequestErrors {
    pub(crate) fn push(&self, err: String) {
        self.0.borrow_mut().push(err);
    }

    pub(crate) fn to_vec(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Records `err` against `req`.
///
/// Recorded errors are appended to the request log message:
/// `Request with errors: Error #01: first; Error #02: second`.
pub fn record_error(req: &HttpRequest, err: impl fmt::Display) {
    let mut extensions = req.extensions_mut();
    match extensions.get::<RequestErrors>() {
        Some(errors) => errors.push(err.to_string()),
        None => {
            let errors = RequestErrors::default();
            errors.push(err.to_string());
            extensions.insert(errors);
        }
    }
}

pub(crate) fn render_errors<'a>(errors: impl IntoIterator<Item = &'a str>) -> String {
    errors
        .into_iter()
        .enumerate()
        .map(|(i, err)| format!("Error #{:02}: {}", i + 1, err))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Format, WriterSink};
    use actix_web::test::TestRequest;
    use std::{
        io::{self, Write},
        sync::Mutex,
    };

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn json_lines(buf: &SharedBuf) -> Vec<Value> {
        let contents = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_logger_fields_and_levels() {
        let buf = SharedBuf::default();
        let logger = Logger::new(Arc::new(WriterSink::new(buf.clone(), Format::Json)))
            .utc(true)
            .with("foo", "bar")
            .with("path", "/from-logger");

        logger.send(
            Event::new(Level::Warn).with("path", "/from-event"),
            "custom",
        );
        logger.debug("plain");
        logger.log(Level::Disabled, "never");

        let lines = json_lines(&buf);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "warn");
        assert_eq!(lines[0]["path"], "/from-event");
        assert_eq!(lines[0]["foo"], "bar");
        assert_eq!(lines[0]["message"], "custom");
        assert!(lines[0]["time"].as_str().unwrap().ends_with('Z'));
        assert_eq!(lines[1]["level"], "debug");
        assert_eq!(lines[1]["path"], "/from-logger");
    }

    #[test]
    fn test_logger_with_does_not_mutate_original() {
        let base = Logger::new(Arc::new(WriterSink::new(io::sink(), Format::Json)));
        let extended = base.clone().with("id", 7);
        assert_eq!(base.field("id"), None);
        assert_eq!(extended.field("id"), Some(&Value::from(7)));
    }

    #[test]
    fn test_try_get_without_middleware() {
        let req = TestRequest::default().to_http_request();
        assert!(try_get(&req).is_none());
    }

    #[test]
    #[should_panic(expected = "no request logger attached to GET /orphan")]
    fn test_get_without_middleware_panics() {
        let req = TestRequest::get().uri("/orphan").to_http_request();
        get(&req);
    }

    #[actix_web::test]
    async fn test_extractor_without_middleware_fails() {
        let req = TestRequest::default().to_http_request();
        let res = Logger::from_request(&req, &mut Payload::None).await;
        assert!(res.is_err());
    }

    #[test]
    fn test_get_returns_attached_logger() {
        let req = TestRequest::default().to_http_request();
        let logger =
            Logger::new(Arc::new(WriterSink::new(io::sink(), Format::Json))).with("id", "abc");
        req.extensions_mut().insert(logger);

        assert_eq!(get(&req).field("id"), Some(&Value::from("abc")));
    }

    #[test]
    fn test_record_error() {
        let req = TestRequest::default().to_http_request();
        record_error(&req, "first");
        record_error(&req, io::Error::other("second"));

        let errors = req.extensions().get::<RequestErrors>().cloned().unwrap();
        assert_eq!(
            render_errors(errors.to_vec().iter().map(String::as_str)),
            "Error #01: first; Error #02: second"
        );

        // a handle taken earlier sees later records
        let req = TestRequest::default().to_http_request();
        let handle = RequestErrors::default();
        req.extensions_mut().insert(handle.clone());
        record_error(&req, "late");
        drop(req);
        assert_eq!(handle.to_vec(), vec!["late".to_string()]);
    }
}
