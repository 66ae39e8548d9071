//! HTTP API for curation front ends
//!
//! `hpoa serve` loads the configured sources once and answers JSON requests:
//! trees and term search for browsing, annotation rows for review, and the
//! suggest / approve / discard cycle of a [`CurationSession`]. Requests are
//! handled one at a time on the accept loop.

use crate::annotation::AnnotationRow;
use crate::hierarchy::{filter, materialize, FilteredTree, HierarchyError, TreeNode};
use crate::reconcile::{flatten, FlatChange, SuggestionOutput};
use crate::session::{CurationSession, SessionError};
use crate::suggest::SuggestionSource;
use crate::workspace::{Workspace, WorkspaceError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Status code and JSON body of an API reply
type Reply = (u16, String);

fn ok<T: Serialize>(data: T) -> Reply {
    match serde_json::to_string(&ApiResponse::success(data)) {
        Ok(json) => (200, json),
        Err(e) => fail(500, e),
    }
}

fn fail(status: u16, error: impl ToString) -> Reply {
    let json = serde_json::to_string(&ApiResponse::failure(error))
        .unwrap_or_else(|_| r#"{"ok":false,"data":null,"error":"internal error"}"#.to_string());
    (status, json)
}

/// Everything a running server needs
pub struct ServerState {
    workspace: Workspace,
    session: CurationSession,
    suggester: Option<Box<dyn SuggestionSource>>,
    output: PathBuf,
    trees: Mutex<HashMap<(String, String), Arc<TreeNode>>>,
}

impl ServerState {
    pub fn new(workspace: Workspace, session: CurationSession) -> Self {
        let suggester = workspace.config().suggester();
        let output = workspace.config().output_path();
        Self {
            workspace,
            session,
            suggester,
            output,
            trees: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_suggester(mut self, suggester: Option<Box<dyn SuggestionSource>>) -> Self {
        self.suggester = suggester;
        self
    }

    pub fn session(&self) -> &CurationSession {
        &self.session
    }

    /// Full tree for `(ontology, root)`, materialized on first use
    fn tree(&self, ontology: &str, root: Option<&str>) -> Result<Arc<TreeNode>, Reply> {
        let onto = self.workspace.ontology(ontology).map_err(|e| match e {
            WorkspaceError::UnknownOntology(_) | WorkspaceError::NoDiseaseOntology => fail(400, e),
            other => fail(500, other),
        })?;
        let root = match root {
            Some(r) if !r.trim().is_empty() => r.trim().to_string(),
            _ => self.workspace.default_root(&onto),
        };

        let key = (onto.prefix().to_string(), root.clone());
        let mut trees = self.trees.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tree) = trees.get(&key) {
            return Ok(Arc::clone(tree));
        }

        let root_id = crate::curie::Curie::parse(&root).map_err(|e| fail(400, e))?;
        let tree = materialize(&onto, &root_id).map_err(|e| match e {
            HierarchyError::UnknownRoot(_) => fail(404, e),
            other => fail(500, other),
        })?;
        tracing::info!(ontology = onto.prefix(), %root, nodes = tree.node_count(), "tree materialized");
        let tree = Arc::new(tree);
        trees.insert(key, Arc::clone(&tree));
        Ok(tree)
    }

}

/// Query-string parameters, keeping repeated keys
struct Query(Vec<(String, String)>);

impl Query {
    fn parse(url: &str) -> Self {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        Self(serde_urlencoded::from_str(query).unwrap_or_default())
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn all(&self, key: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[derive(Serialize)]
struct TermHit<'a> {
    id: String,
    name: &'a str,
    definition: Option<&'a str>,
}

#[derive(Serialize)]
struct PendingChange<'a> {
    #[serde(flatten)]
    change: &'a FlatChange,
    color: &'static str,
}

#[derive(Serialize)]
struct PendingView<'a> {
    reply: String,
    changes: Vec<PendingChange<'a>>,
}

#[derive(Deserialize)]
struct SuggestRequest {
    message: String,
    #[serde(default)]
    diseases: Vec<String>,
}

#[derive(Deserialize)]
struct ApproveRequest {
    /// Edited change set; the pending one when absent
    #[serde(default)]
    changes: Option<serde_json::Value>,
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct EditRequest {
    original: Vec<AnnotationRow>,
    edited: Vec<AnnotationRow>,
}

fn parse_body<'a, T: Deserialize<'a>>(body: &'a str) -> Result<T, Reply> {
    serde_json::from_str(body).map_err(|e| fail(400, format!("Invalid JSON: {}", e)))
}

/// Dispatch one request. Kept free of I/O so it can be tested directly.
pub fn route(state: &ServerState, method: &Method, url: &str, body: &str) -> (u16, String) {
    let path = url.split('?').next().unwrap_or("/");
    let query = Query::parse(url);
    tracing::debug!(%method, path, "request");

    let result = match (method, path) {
        (Method::Get, "/api/tree") => get_tree(state, &query),
        (Method::Get, "/api/terms") => get_terms(state, &query),
        (Method::Get, "/api/diseases") => Ok(get_diseases(state, &query)),
        (Method::Get, "/api/annotations") => Ok(ok(state.session.begin_edit(&query.all("disease")))),
        (Method::Get, "/api/pending") => Ok(get_pending(state)),
        (Method::Post, "/api/suggest") => post_suggest(state, body),
        (Method::Post, "/api/approve") => post_approve(state, body),
        (Method::Post, "/api/edit") => post_edit(state, body),
        (Method::Post, "/api/discard") => {
            state.session.discard();
            Ok(ok(true))
        }
        _ => Ok(fail(404, "Not found")),
    };
    result.unwrap_or_else(|reply| reply)
}

fn get_tree(state: &ServerState, query: &Query) -> Result<Reply, Reply> {
    let tree = state.tree(query.get("ontology").unwrap_or("hp"), query.get("root"))?;
    let q = query.get("q").unwrap_or("");
    let depth = match query.get("depth") {
        Some(d) => Some(
            d.parse::<usize>()
                .map_err(|_| fail(400, format!("invalid depth '{}'", d)))?,
        ),
        None => None,
    };

    let view = match filter(&tree, q) {
        // depth only trims unfiltered trees; a search must reach its matches
        Some(filtered) if q.trim().is_empty() => FilteredTree {
            root: match depth {
                Some(d) => filtered.root.limit_depth(d),
                None => filtered.root,
            },
            expanded: filtered.expanded,
        },
        Some(filtered) => filtered,
        None => return Ok(ok(Option::<FilteredTree>::None)),
    };
    Ok(ok(Some(view)))
}

fn get_terms(state: &ServerState, query: &Query) -> Result<Reply, Reply> {
    let onto = state
        .workspace
        .ontology(query.get("ontology").unwrap_or("hp"))
        .map_err(|e| fail(400, e))?;
    let limit = query
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(25);
    let hits: Vec<TermHit> = onto
        .search(query.get("q").unwrap_or(""), limit)
        .into_iter()
        .map(|t| TermHit {
            id: t.id.to_string(),
            name: &t.name,
            definition: t.definition.as_deref(),
        })
        .collect();
    Ok(ok(hits))
}

fn get_diseases(state: &ServerState, query: &Query) -> Reply {
    let store = state.session.store();
    let names: Vec<&str> = match query.get("q") {
        Some(q) => store.search_diseases(q),
        None => store.disease_names(),
    };
    ok(names)
}

fn get_pending(state: &ServerState) -> Reply {
    let changes = state.session.pending();
    let view = PendingView {
        reply: state.session.reply(),
        changes: changes
            .iter()
            .map(|change| PendingChange {
                change,
                color: change.status.color(),
            })
            .collect(),
    };
    ok(view)
}

fn post_suggest(state: &ServerState, body: &str) -> Result<Reply, Reply> {
    let req: SuggestRequest = parse_body(body)?;
    let suggester = state
        .suggester
        .as_deref()
        .ok_or_else(|| fail(400, "no suggester configured; set [suggester] in .hpoa/config.toml"))?;
    Ok(ok(state.session.request_suggestions(suggester, &req.message, &req.diseases)))
}

fn session_failure(e: SessionError) -> Reply {
    match e {
        SessionError::ApplyInFlight | SessionError::AlreadyApplied(_) => fail(409, e),
        other => fail(500, other),
    }
}

fn post_approve(state: &ServerState, body: &str) -> Result<Reply, Reply> {
    let req: ApproveRequest = if body.trim().is_empty() {
        ApproveRequest {
            changes: None,
            force: false,
        }
    } else {
        parse_body(body)?
    };

    let changes = match req.changes {
        Some(value) => {
            let output = SuggestionOutput::from_value(value).map_err(|e| fail(400, e))?;
            Some(flatten(&output.annotations))
        }
        None => None,
    };

    let result = state
        .session
        .approve_and_save(changes, req.force, &state.output)
        .map_err(session_failure)?;
    Ok(ok(result))
}

fn post_edit(state: &ServerState, body: &str) -> Result<Reply, Reply> {
    let req: EditRequest = parse_body(body)?;
    let rows = state
        .session
        .approve_edit_and_save(&req.original, &req.edited, &state.output)
        .map_err(session_failure)?;
    Ok(ok(rows))
}

fn json_response(status: u16, json: String) -> Response<Cursor<Vec<u8>>> {
    Response::from_string(json)
        .with_status_code(status)
        .with_header(Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap())
}

fn handle_request(state: &ServerState, mut request: Request) -> std::io::Result<()> {
    let mut body = String::new();
    if let Err(e) = request.as_reader().read_to_string(&mut body) {
        let (status, json) = fail(400, format!("Failed to read body: {}", e));
        return request.respond(json_response(status, json));
    }

    let method = request.method().clone();
    let url = request.url().to_string();
    let (status, json) = route(state, &method, &url, &body);
    if status >= 400 {
        tracing::warn!(%method, %url, status, "request failed");
    }
    request.respond(json_response(status, json))
}

/// Start the curation API server
pub fn start_server(state: ServerState, port: u16) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;

    eprintln!("\n\x1b[1;32mhpoa\x1b[0m");
    eprintln!("   API: http://localhost:{}/api/tree", port);
    eprintln!("   Press Ctrl+C to stop\n");
    tracing::info!(%addr, "server listening");

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&state, request) {
            tracing::error!(error = %e, "failed to respond");
        }
    }

    Ok(())
}
