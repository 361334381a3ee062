//! URL helpers.

use ::url::Url;

/// Best-effort extraction of a media id from a watch URL.
///
/// Understands `?v=<id>` query parameters, `youtu.be/<id>` short links and
/// `/shorts/<id>` or `/live/<id>` paths. Returns `None` for anything else.
pub fn media_id_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;

    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        return non_empty(&v);
    }

    let host = url.host_str()?;
    let mut segments = url.path_segments()?;

    if host.eq_ignore_ascii_case("youtu.be") {
        return segments.next().and_then(non_empty);
    }

    match segments.next() {
        Some("shorts" | "live" | "embed") => segments.next().and_then(non_empty),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}
