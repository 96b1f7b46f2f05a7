//! Route table.
//!
//! Deterministic, built once during server construction. Path templates use
//! `:name` segments; matching is by segment with literal precedence (a
//! literal route wins over a parameterized one for the same path).

use std::sync::Arc;

use hyper::Method;

use crate::registry::MethodEntry;

/// What a matched route dispatches to.
#[derive(Debug, Clone)]
pub enum RouteTarget {
    /// One REST method.
    Rest(Arc<MethodEntry>),
    /// JSON-RPC batch endpoint, optionally scoped to one contract.
    RpcBatch(Option<String>),
    /// JSON-RPC direct dispatch; the method name is the `:method` segment.
    RpcDirect { contract: String },
}

impl RouteTarget {
    pub fn is_rpc(&self) -> bool {
        matches!(self, RouteTarget::RpcBatch(_) | RouteTarget::RpcDirect { .. })
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug)]
struct Route {
    verb: Method,
    segments: Vec<Segment>,
    target: RouteTarget,
}

/// Result of resolving a request against the table.
#[derive(Debug)]
pub enum RouteOutcome {
    Matched {
        target: RouteTarget,
        params: Vec<(String, String)>,
    },
    /// The path exists but not for this verb; `rpc` reports whether any of
    /// the path's routes belong to the JSON-RPC surface (those answer 405).
    WrongVerb { rpc: bool },
    NotFound,
}

#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn add(&mut self, verb: Method, path: &str, target: RouteTarget) {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        self.routes.push(Route {
            verb,
            segments,
            target,
        });
    }

    pub fn resolve(&self, verb: &Method, path: &str) -> RouteOutcome {
        let incoming: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut best: Option<(usize, &Route, Vec<(String, String)>)> = None;
        let mut wrong_verb_rpc = None;
        for route in &self.routes {
            let Some(params) = match_segments(&route.segments, &incoming) else {
                continue;
            };
            if route.verb != *verb {
                let rpc = wrong_verb_rpc.unwrap_or(false) || route.target.is_rpc();
                wrong_verb_rpc = Some(rpc);
                continue;
            }
            // Fewer captured params = more literal = higher precedence.
            let rank = params.len();
            if best.as_ref().map(|(r, _, _)| rank < *r).unwrap_or(true) {
                best = Some((rank, route, params));
            }
        }

        if let Some((_, route, params)) = best {
            return RouteOutcome::Matched {
                target: route.target.clone(),
                params,
            };
        }
        match wrong_verb_rpc {
            Some(rpc) => RouteOutcome::WrongVerb { rpc },
            None => RouteOutcome::NotFound,
        }
    }
}

fn match_segments(template: &[Segment], incoming: &[&str]) -> Option<Vec<(String, String)>> {
    if template.len() != incoming.len() {
        return None;
    }
    let mut params = Vec::new();
    for (segment, actual) in template.iter().zip(incoming) {
        match segment {
            Segment::Literal(lit) if lit == actual => {}
            Segment::Literal(_) => return None,
            Segment::Param(name) => params.push((name.clone(), (*actual).to_string())),
        }
    }
    Some(params)
}
