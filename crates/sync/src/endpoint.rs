use crate::SyncError;
use uuid::Uuid;

/// Path every fog authority endpoint serves on.
pub const FOG_PATH: &str = "/api/fog/ws";

/// Bring a user-supplied endpoint into `ws://host[:port]/api/fog/ws` form.
///
/// HTTP schemes map to their websocket counterparts and a bare host gets
/// `ws://`.
pub fn normalize_endpoint(raw: &str) -> Result<String, SyncError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SyncError::EmptyEndpoint);
    }

    let endpoint = if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        format!("ws://{trimmed}")
    };

    let (base, query) = match endpoint.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (endpoint.as_str(), None),
    };
    let base = base.trim_end_matches('/');
    let mut normalized = if base.ends_with(FOG_PATH) {
        base.to_string()
    } else {
        format!("{base}{FOG_PATH}")
    };
    if let Some(query) = query {
        normalized.push('?');
        normalized.push_str(query);
    }
    Ok(normalized)
}

/// Endpoint with the actor identity appended as a query parameter.
pub fn connect_uri(endpoint: &str, identity: Uuid) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}uuid={identity}")
}

/// Split `scheme://host[:port]/...` into scheme, host and port.
pub(crate) fn authority(uri: &str) -> Option<(&str, &str, Option<u16>)> {
    let (scheme, rest) = uri.split_once("://")?;
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let authority = &rest[..end];
    if authority.is_empty() {
        return None;
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            port.parse().ok().map(|port| (scheme, host, Some(port)))
        }
        _ => Some((scheme, authority, None)),
    }
}
