//! Wire types for the line-delimited JSON query protocol.
//!
//! Every request is one JSON object per line, tagged by `op`:
//!
//! ```text
//! {"op":"search","text":"a science fiction adventure","k":3}
//! {"op":"result","nav":"next"}
//! {"op":"carousel","nav":"previous"}
//! {"op":"stats"}
//! {"op":"bye"}
//! ```
//!
//! Replies carry `"ok":true` plus a body, or `"ok":false` with an `error`.
//! Timer-driven carousel steps arrive unprompted as `{"event":"carousel_advanced",...}`.

use serde::{Deserialize, Serialize};

use crate::carousel::Navigation;
use crate::model::types::BookView;
use crate::search::embedder::EmbedderInfo;
use crate::search::query::SearchHit;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Search {
        text: String,
        #[serde(default)]
        k: Option<usize>,
    },
    Result {
        #[serde(default)]
        nav: Option<Navigation>,
    },
    Carousel {
        #[serde(default)]
        nav: Option<Navigation>,
    },
    Stats,
    Bye,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Stable machine-readable error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    EmptyQuery,
    InvalidQuery,
    NoResults,
    EmbeddingFailed,
    QueryFailed,
    IndexConsistencyFault,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// One ranked book as shown to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultItem {
    pub rank: usize,
    pub position: usize,
    pub distance: f32,
    pub score: f32,
    pub match_label: String,
    pub book: BookView,
}

impl ResultItem {
    pub fn new(rank: usize, hit: &SearchHit, book: BookView) -> Self {
        Self {
            rank,
            position: hit.position,
            distance: hit.distance,
            score: hit.score,
            match_label: hit.match_label(),
            book,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Search {
        query: String,
        count: usize,
        results: Vec<ResultItem>,
    },
    Result {
        cursor: usize,
        total: usize,
        result: Option<ResultItem>,
    },
    Carousel {
        position: usize,
        total: usize,
        label: String,
        book: BookView,
    },
    Stats {
        session: SessionId,
        catalogue_size: usize,
        dimension: usize,
        embedder: EmbedderInfo,
        active_sessions: usize,
    },
    Bye {
        bye: bool,
    },
    Error {
        error: ErrorBody,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn ok(body: ResponseBody) -> Self {
        Self { ok: true, body }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            body: ResponseBody::Error {
                error: ErrorBody {
                    kind,
                    message: message.into(),
                },
            },
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.body {
            ResponseBody::Error { error } => Some(error.kind),
            _ => None,
        }
    }
}

/// Pushed to the client when the carousel timer fires.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarouselEvent {
    pub event: &'static str,
    pub position: usize,
    pub total: usize,
    pub label: String,
    pub book: BookView,
}

impl CarouselEvent {
    pub fn advanced(position: usize, total: usize, book: BookView) -> Self {
        Self {
            event: "carousel_advanced",
            position,
            total,
            label: carousel_label(position, total),
            book,
        }
    }
}

/// One-based "3 / 20" position label.
pub fn carousel_label(position: usize, total: usize) -> String {
    format!("{} / {}", position + 1, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_search_with_and_without_k() {
        assert_eq!(
            Request::parse(r#"{"op":"search","text":"ships","k":3}"#).unwrap(),
            Request::Search {
                text: "ships".into(),
                k: Some(3)
            }
        );
        assert_eq!(
            Request::parse(r#"{"op":"search","text":"ships"}"#).unwrap(),
            Request::Search {
                text: "ships".into(),
                k: None
            }
        );
    }

    #[test]
    fn parses_navigation_ops() {
        assert_eq!(
            Request::parse(r#"{"op":"carousel","nav":"previous"}"#).unwrap(),
            Request::Carousel {
                nav: Some(Navigation::Previous)
            }
        );
        assert_eq!(
            Request::parse(r#"{"op":"result"}"#).unwrap(),
            Request::Result { nav: None }
        );
        assert_eq!(Request::parse(r#"{"op":"bye"}"#).unwrap(), Request::Bye);
    }

    #[test]
    fn rejects_unknown_op_and_bad_nav() {
        assert!(Request::parse(r#"{"op":"delete"}"#).is_err());
        assert!(Request::parse(r#"{"op":"carousel","nav":"sideways"}"#).is_err());
        assert!(Request::parse("not json").is_err());
    }

    #[test]
    fn error_response_shape() {
        let resp = Response::error(ErrorKind::EmptyQuery, "query text is empty");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"ok": false, "error": {"kind": "empty_query", "message": "query text is empty"}})
        );
    }

    #[test]
    fn bye_response_shape() {
        let value = serde_json::to_value(Response::ok(ResponseBody::Bye { bye: true })).unwrap();
        assert_eq!(value, json!({"ok": true, "bye": true}));
    }

    #[test]
    fn label_is_one_based() {
        assert_eq!(carousel_label(0, 20), "1 / 20");
        assert_eq!(carousel_label(19, 20), "20 / 20");
    }
}
