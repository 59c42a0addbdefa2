//! String helpers for `user@domain/resource` addresses.

/// The `user@domain` part of a JID.
pub fn remove_resource(jid: &str) -> &str {
    split_resource(jid).0
}

pub fn is_bare_jid(jid: &str) -> bool {
    !jid.contains('/')
}

/// Everything before the first `@`, or the whole string if there is none.
pub fn local_part(jid: &str) -> &str {
    jid.split_once('@').map_or(jid, |(local, _)| local)
}

/// Split at the first `/` into (bare JID, resource). The resource may itself
/// contain `/`: `a@b/c/d` yields resource `c/d`, not `c`. A bare JID yields an
/// empty resource.
pub fn split_resource(jid: &str) -> (&str, &str) {
    jid.split_once('/').unwrap_or((jid, ""))
}
