//! Route to bucket normalization
//!
//! Ids that follow `channels`, `guilds` or `webhooks` (the "major"
//! parameters) get their own limits and are kept. Every other id is
//! collapsed, so all calls against messages of one channel share a bucket.
//! Webhook tokens are not numeric and stay in the key. Reaction routes
//! collapse the emoji and user segments as well.

const MAJOR_PARAMETERS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Placeholder for a collapsed id
const ID: &str = ":id";

/// Normalize `path` to its bucket key
///
/// The query string is ignored and leading/trailing slashes are trimmed.
///
/// ```
/// use shardline_rest::resolve_bucket;
///
/// assert_eq!(
///     resolve_bucket("/channels/123/messages/456"),
///     "channels/123/messages/:id"
/// );
/// ```
#[must_use]
pub fn resolve_bucket(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut key: Vec<&str> = Vec::with_capacity(segments.len());
    let mut previous = "";

    for segment in segments {
        if previous == "reactions" {
            // Emoji and user segments never gate their own limit
            key.push("*");
            break;
        }

        let is_id = segment.bytes().all(|b| b.is_ascii_digit());
        if is_id && !MAJOR_PARAMETERS.contains(&previous) {
            key.push(ID);
        } else {
            key.push(segment);
        }
        previous = segment;
    }

    key.join("/")
}
