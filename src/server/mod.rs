//! Line-delimited JSON query server.
//!
//! Artifacts are loaded once by the caller and shared read-only through
//! [`ServerState`]. Each TCP connection gets its own thread, its own
//! [`SessionContext`](crate::session::SessionContext) and its own carousel
//! ticker. A fatal query fault raises the halt flag; the accept loop then
//! stops and [`QueryServer::run`] returns [`ServeError::Halted`].

pub mod protocol;

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::carousel::ticker::CarouselTicker;
use crate::carousel::{CarouselConfig, CarouselError, CarouselSession, Navigation};
use crate::model::types::BookView;
use crate::search::embedder::EmbedderError;
use crate::search::query::{QueryEngine, QueryError};
use crate::session::{SessionRegistry, SharedSession};
use protocol::{
    CarouselEvent, ErrorKind, Request, Response, ResponseBody, ResultItem, carousel_label,
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener failed: {0}")]
    Io(#[from] io::Error),

    #[error("serving halted: {reason}")]
    Halted { reason: String },
}

/// Shared, read-mostly state behind every connection.
pub struct ServerState {
    engine: QueryEngine,
    covers_dir: PathBuf,
    carousel: CarouselConfig,
    top_k: usize,
    registry: SessionRegistry,
    halted: AtomicBool,
    halt_reason: Mutex<Option<String>>,
}

impl ServerState {
    pub fn new(
        engine: QueryEngine,
        covers_dir: PathBuf,
        carousel: CarouselConfig,
        top_k: usize,
    ) -> Self {
        Self {
            engine,
            covers_dir,
            carousel,
            top_k,
            registry: SessionRegistry::new(),
            halted: AtomicBool::new(false),
            halt_reason: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(%reason, "halting query server");
        self.halt_reason.lock().get_or_insert(reason);
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.halt_reason.lock().clone()
    }

    /// Start a session with a freshly sampled carousel.
    pub fn open_session(&self) -> Result<SharedSession, CarouselError> {
        let now = Instant::now();
        let carousel = CarouselSession::new(
            self.engine.catalogue().len(),
            &self.carousel,
            &mut rand::rng(),
            now,
        )?;
        Ok(self.registry.open(carousel, now))
    }

    fn view(&self, position: usize) -> Option<BookView> {
        self.engine
            .catalogue()
            .get(position)
            .map(|record| BookView::from_record(record, &self.covers_dir))
    }

    /// Handle one request line. The flag is true when the connection should close.
    pub fn dispatch(&self, session: &SharedSession, line: &str) -> (Response, bool) {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(err) => {
                return (
                    Response::error(ErrorKind::InvalidRequest, format!("invalid request: {err}")),
                    false,
                );
            }
        };

        match request {
            Request::Search { text, k } => self.search(session, &text, k),
            Request::Result { nav } => (self.browse(session, nav), false),
            Request::Carousel { nav } => (self.carousel(session, nav), false),
            Request::Stats => (self.stats(session), false),
            Request::Bye => (Response::ok(ResponseBody::Bye { bye: true }), true),
        }
    }

    fn search(&self, session: &SharedSession, text: &str, k: Option<usize>) -> (Response, bool) {
        let k = k.unwrap_or(self.top_k);
        if k == 0 {
            return (
                Response::error(ErrorKind::InvalidRequest, "k must be > 0"),
                false,
            );
        }

        match self.engine.query(text, k) {
            Ok(results) => {
                let items = results
                    .hits()
                    .iter()
                    .enumerate()
                    .filter_map(|(rank, hit)| {
                        self.view(hit.position)
                            .map(|view| ResultItem::new(rank + 1, hit, view))
                    })
                    .collect::<Vec<_>>();
                let body = ResponseBody::Search {
                    query: results.query.clone(),
                    count: items.len(),
                    results: items,
                };
                session.lock().set_results(results);
                (Response::ok(body), false)
            }
            Err(err) if err.is_fatal() => {
                self.halt(err.to_string());
                (
                    Response::error(ErrorKind::IndexConsistencyFault, err.to_string()),
                    true,
                )
            }
            Err(err @ QueryError::EmptyQuery) => {
                (Response::error(ErrorKind::EmptyQuery, err.to_string()), false)
            }
            Err(err @ QueryError::Embedding(EmbedderError::InvalidInput { .. })) => (
                Response::error(ErrorKind::InvalidQuery, err.to_string()),
                false,
            ),
            Err(err @ QueryError::Embedding(_)) => (
                Response::error(ErrorKind::EmbeddingFailed, err.to_string()),
                false,
            ),
            Err(err) => (Response::error(ErrorKind::QueryFailed, err.to_string()), false),
        }
    }

    fn browse(&self, session: &SharedSession, nav: Option<Navigation>) -> Response {
        let mut ctx = session.lock();
        if ctx.results().is_none() {
            return Response::error(ErrorKind::NoResults, "no search results to browse yet");
        }
        let item = ctx.browse_results(nav).map(|hit| {
            let view = BookView::from_record(&hit.book, &self.covers_dir);
            (hit.clone(), view)
        });
        let (cursor, total) = ctx
            .results()
            .map_or((0, 0), |results| (results.cursor(), results.len()));
        Response::ok(ResponseBody::Result {
            cursor,
            total,
            result: item.map(|(hit, view)| ResultItem::new(cursor + 1, &hit, view)),
        })
    }

    fn carousel(&self, session: &SharedSession, nav: Option<Navigation>) -> Response {
        let now = Instant::now();
        let (position, total, book) = {
            let mut ctx = session.lock();
            let carousel = ctx.carousel_mut();
            match nav {
                Some(nav) => {
                    carousel.apply(nav, now);
                }
                None => {
                    carousel.poll(now);
                }
            }
            (carousel.position(), carousel.len(), carousel.current())
        };

        match self.carousel_view(book) {
            Ok(view) => Response::ok(ResponseBody::Carousel {
                position,
                total,
                label: carousel_label(position, total),
                book: view,
            }),
            Err(reason) => Response::error(ErrorKind::IndexConsistencyFault, reason),
        }
    }

    /// Resolve a carousel book, halting the server when the catalogue has no
    /// record at that position.
    fn carousel_view(&self, book: usize) -> Result<BookView, String> {
        self.view(book).ok_or_else(|| {
            let reason = format!(
                "carousel position {book} has no catalogue record (catalogue holds {})",
                self.engine.catalogue().len()
            );
            self.halt(reason.clone());
            reason
        })
    }

    fn stats(&self, session: &SharedSession) -> Response {
        Response::ok(ResponseBody::Stats {
            session: session.lock().id(),
            catalogue_size: self.engine.catalogue().len(),
            dimension: self.engine.index().dimension(),
            embedder: self.engine.embedder_info(),
            active_sessions: self.registry.active(),
        })
    }
}

/// Serialized writes so responses and ticker events never interleave mid-line.
type SharedWriter = Arc<Mutex<BufWriter<TcpStream>>>;

fn write_line<T: Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut w = writer.lock();
    serde_json::to_writer(&mut *w, value).map_err(io::Error::other)?;
    w.write_all(b"\n")?;
    w.flush()
}

pub struct QueryServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl QueryServer {
    pub fn bind(addr: &str, state: ServerState) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(addr).map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Accept connections until the halt flag is raised.
    pub fn run(self) -> Result<(), ServeError> {
        let addr = self.local_addr()?;
        info!(
            %addr,
            books = self.state.engine.catalogue().len(),
            embedder = %self.state.engine.embedder_info(),
            "query server listening"
        );

        while !self.state.is_halted() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let state = self.state.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("conn-{peer}"))
                        .spawn(move || {
                            if let Err(err) = handle_connection(stream, &state) {
                                debug!(%peer, error = %err, "connection ended with error");
                            }
                        });
                    if let Err(err) = spawned {
                        warn!(%peer, error = %err, "failed to spawn connection thread");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(err) => return Err(ServeError::Io(err)),
            }
        }

        let reason = self
            .state
            .halt_reason()
            .unwrap_or_else(|| "halt requested".to_string());
        Err(ServeError::Halted { reason })
    }
}

fn handle_connection(stream: TcpStream, state: &Arc<ServerState>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(stream.try_clone()?)));
    let reader = BufReader::new(stream);

    let session = match state.open_session() {
        Ok(session) => session,
        Err(err) => {
            write_line(&writer, &Response::error(ErrorKind::QueryFailed, err.to_string()))?;
            return Ok(());
        }
    };
    let session_id = session.lock().id();
    info!(%peer, session = %session_id, "session opened");

    let ticker = match start_ticker(&session, &writer, state) {
        Ok(ticker) => ticker,
        Err(err) => {
            state.registry.close(session_id);
            return Err(err);
        }
    };

    let result = serve_lines(reader, &writer, &session, state);

    ticker.stop();
    state.registry.close(session_id);
    info!(%peer, session = %session_id, "session closed");
    result
}

/// Push carousel advances to the client until the connection or the catalogue
/// lookup fails.
fn start_ticker(
    session: &SharedSession,
    writer: &SharedWriter,
    state: &Arc<ServerState>,
) -> io::Result<CarouselTicker> {
    let writer = writer.clone();
    let state = state.clone();
    let total = session.lock().carousel().len();
    CarouselTicker::spawn(session.clone(), state.carousel.poll, move |event| {
        match state.carousel_view(event.book) {
            Ok(book) => {
                write_line(&writer, &CarouselEvent::advanced(event.position, total, book)).is_ok()
            }
            Err(reason) => {
                let _ = write_line(
                    &writer,
                    &Response::error(ErrorKind::IndexConsistencyFault, reason),
                );
                false
            }
        }
    })
}

fn serve_lines(
    reader: BufReader<TcpStream>,
    writer: &SharedWriter,
    session: &SharedSession,
    state: &ServerState,
) -> io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if state.is_halted() {
            let reason = state.halt_reason().unwrap_or_default();
            write_line(writer, &Response::error(ErrorKind::IndexConsistencyFault, reason))?;
            break;
        }
        let (response, close) = state.dispatch(session, &line);
        write_line(writer, &response)?;
        if close {
            break;
        }
    }
    Ok(())
}
