use std::fmt::Write;

use crate::decl::{OpName, Visibility};
use crate::spec::{Mode, ServiceSpec};

/// What survives of a clause after its body has been consumed into the
/// dispatch tables: enough to render the generated surface.
pub(crate) struct ClauseSketch {
    pub name: OpName,
    pub visibility: Visibility,
    pub params: Vec<String>,
}

/// Render the generated surface — implementation signatures with the declared
/// state name bound as the first parameter, client functions with the state
/// parameter elided, and the selected wiring — as a human-readable listing.
pub(crate) fn render<S>(spec: &ServiceSpec<S>, clauses: &[ClauseSketch]) -> String {
    let mut out = String::new();

    match spec.mode {
        Mode::Pooled => {
            let bounds = spec.pool.expect("pooled mode carries pool bounds");
            let _ = writeln!(
                out,
                "service surface (mode: {}, workers {}..{})",
                spec.mode, bounds.min, bounds.max
            );
        }
        Mode::Named => {
            let name = spec
                .service_name
                .as_ref()
                .expect("named mode carries a service name");
            let _ = writeln!(out, "service surface (mode: {}, name: {name})", spec.mode);
        }
        _ => {
            let _ = writeln!(out, "service surface (mode: {})", spec.mode);
        }
    }

    for clause in clauses {
        match clause.visibility {
            Visibility::Public => {
                let _ = writeln!(
                    out,
                    "  impl {}({}) -> reply",
                    clause.name,
                    join_params(Some(spec.state_name.as_str()), &clause.params),
                );
                let _ = writeln!(
                    out,
                    "  client {}({})",
                    clause.name,
                    join_params(None, &clause.params),
                );
            }
            Visibility::Private => {
                let _ = writeln!(
                    out,
                    "  helper {}({})",
                    clause.name,
                    join_params(None, &clause.params),
                );
            }
        }
    }

    match spec.mode {
        Mode::Inline => {
            let _ = writeln!(out, "  no worker: callers thread state explicitly");
        }
        _ => {
            let _ = writeln!(
                out,
                "  worker: mailbox {}, call timeout {:?}",
                spec.mailbox_capacity, spec.call_timeout,
            );
        }
    }

    out
}

fn join_params(state_name: Option<&str>, params: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(params.len() + 1);
    if let Some(state_name) = state_name {
        parts.push(state_name);
    }
    parts.extend(params.iter().map(String::as_str));
    parts.join(", ")
}
