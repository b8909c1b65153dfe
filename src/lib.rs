//! Actix-web middleware for leveled, structured request logs.
//!
//! Every request produces one event once its response has been written. The
//! event level follows the response status, and the event carries method,
//! path, client address, user agent, status, latency and body size.
//!
//! # Examples:
//! ```bash
//! cargo add actix-web-middleware-reqlog
//! ```
//! By default events are written to stderr as console lines, coloured when
//! stderr is a terminal:
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_reqlog::ReqLogger;
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     HttpServer::new(|| {
//!         App::new()
//!             .wrap(ReqLogger::default())
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```
//! ```text
//! 2025-03-01T10:15:00.123+01:00 INF Request status=200 method=GET path=/?page=2 ip=127.0.0.1 user_agent=curl/8.5.0 latency=0.412 body_size=12
//! ```
//!
//! ## Through the `log` facade
//! Events can go to whatever `log` implementation the application installs,
//! for example `structured_logger`:
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_middleware_reqlog::ReqLogger;
//! use structured_logger::{Builder, async_json::new_writer};
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     HttpServer::new(|| {
//!         App::new()
//!             .wrap(ReqLogger::default().log_target("http"))
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```
//!
//! # Configuration
//!
//! ## Suppression
//!
//! A request is not logged when any of these match:
//!
//! ```rust
//! use actix_web_middleware_reqlog::ReqLogger;
//!
//! let logger = ReqLogger::default()
//!     .exclude("/health")                          // exact path, query included
//!     .exclude_regex(r"^/assets/.*")               // any matching pattern
//!     .skipper(|req| req.method() == "OPTIONS");   // arbitrary predicate
//! ```
//!
//! ## Levels
//!
//! ```rust
//! use actix_web_middleware_reqlog::{Level, ReqLogger};
//!
//! let logger = ReqLogger::default()
//!     .default_level(Level::Info)            // status < 400
//!     .client_error_level(Level::Warn)       // 400..=499
//!     .server_error_level(Level::Error)      // >= 500
//!     .path_level("/health", Level::Debug)   // successful requests to /health
//!     .status_level(404, Level::Debug);      // exactly 404, wins over everything
//! ```
//!
//! ## Fields
//!
//! ```rust
//! use actix_web_middleware_reqlog::ReqLogger;
//!
//! let logger = ReqLogger::default()
//!     // base logger for the request, also returned by `get`
//!     .logger_fn(|req, logger| logger.with("service", "billing"))
//!     // extra fields once the handler has finished
//!     .context_fn(|req, event| event.with("route", req.match_pattern().unwrap_or_default()))
//!     .message("Request finished")
//!     .log_error_response_body(true)
//!     .max_response_body_len(200);
//! ```
//!
//! Handlers can log through the same per-request logger and record errors
//! that end up in the request message:
//!
//! ```rust
//! use actix_web::{HttpRequest, HttpResponse};
//! use actix_web_middleware_reqlog::{get, record_error};
//!
//! async fn handler(req: HttpRequest) -> HttpResponse {
//!     get(&req).with("step", "lookup").debug("looking up account");
//!     record_error(&req, "account cache unavailable");
//!     HttpResponse::Ok().finish()
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `tracing-request-id` - Attach `tracing-actix-web`'s request ID as `request_id`

mod body;
mod event;
mod level;
mod logger;
mod request;
mod sink;

pub use crate::event::{Event, Field, Record};
pub use crate::level::{Level, ParseLevelError, parse_level};
pub use crate::logger::{ReqLogger, ReqLoggerMiddleware, ReqLoggerResponse, StreamLog};
pub use crate::request::{Logger, get, record_error, try_get};
pub use crate::sink::{Format, LogSink, Sink, WriterSink};
